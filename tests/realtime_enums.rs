//! GTFS-Realtime enum-to-string translators (spec §4.F, SPEC_FULL §10).

use gtfs_core::realtime::enums;

#[test]
fn vehicle_stop_status_maps_all_known_values() {
    assert_eq!(enums::vehicle_stop_status(0), "incoming_at");
    assert_eq!(enums::vehicle_stop_status(1), "stopped_at");
    assert_eq!(enums::vehicle_stop_status(2), "in_transit_to");
}

#[test]
fn vehicle_stop_status_falls_back_on_unknown_value() {
    assert_eq!(enums::vehicle_stop_status(99), "in_transit_to");
}

#[test]
fn congestion_level_maps_all_known_values() {
    assert_eq!(enums::congestion_level(0), "unknown");
    assert_eq!(enums::congestion_level(1), "running_smoothly");
    assert_eq!(enums::congestion_level(2), "stop_and_go");
    assert_eq!(enums::congestion_level(3), "congestion");
    assert_eq!(enums::congestion_level(4), "severe_congestion");
}

#[test]
fn congestion_level_falls_back_on_unknown_value() {
    assert_eq!(enums::congestion_level(-1), "unknown");
}

#[test]
fn occupancy_status_maps_all_known_values() {
    assert_eq!(enums::occupancy_status(0), "empty");
    assert_eq!(enums::occupancy_status(1), "many_seats_available");
    assert_eq!(enums::occupancy_status(2), "few_seats_available");
    assert_eq!(enums::occupancy_status(3), "standing_room_only");
    assert_eq!(enums::occupancy_status(4), "crushed_standing_room_only");
    assert_eq!(enums::occupancy_status(5), "full");
    assert_eq!(enums::occupancy_status(6), "not_accepting_passengers");
    assert_eq!(enums::occupancy_status(7), "no_data_available");
    assert_eq!(enums::occupancy_status(8), "not_boardable");
}

#[test]
fn occupancy_status_falls_back_to_no_data_available() {
    assert_eq!(enums::occupancy_status(42), "no_data_available");
}

#[test]
fn trip_schedule_relationship_maps_all_known_values() {
    assert_eq!(enums::trip_schedule_relationship(0), "scheduled");
    assert_eq!(enums::trip_schedule_relationship(1), "added");
    assert_eq!(enums::trip_schedule_relationship(2), "unscheduled");
    assert_eq!(enums::trip_schedule_relationship(3), "canceled");
    assert_eq!(enums::trip_schedule_relationship(5), "duplicated");
    assert_eq!(enums::trip_schedule_relationship(6), "deleted");
}

#[test]
fn trip_schedule_relationship_falls_back_to_scheduled() {
    // 4 is deliberately unassigned in the .proto (gap between UNSCHEDULED
    // family and DUPLICATED); must not panic, falls back like any other
    // unrecognized value.
    assert_eq!(enums::trip_schedule_relationship(4), "scheduled");
}

#[test]
fn stop_time_schedule_relationship_maps_all_known_values() {
    assert_eq!(enums::stop_time_schedule_relationship(0), "scheduled");
    assert_eq!(enums::stop_time_schedule_relationship(1), "skipped");
    assert_eq!(enums::stop_time_schedule_relationship(2), "no_data");
    assert_eq!(enums::stop_time_schedule_relationship(3), "unscheduled");
}

#[test]
fn stop_time_schedule_relationship_falls_back_to_scheduled() {
    assert_eq!(enums::stop_time_schedule_relationship(-5), "scheduled");
}

#[test]
fn cause_maps_all_known_values() {
    assert_eq!(enums::cause(1), "unknown_cause");
    assert_eq!(enums::cause(2), "other_cause");
    assert_eq!(enums::cause(3), "technical_problem");
    assert_eq!(enums::cause(4), "strike");
    assert_eq!(enums::cause(5), "demonstration");
    assert_eq!(enums::cause(6), "accident");
    assert_eq!(enums::cause(7), "holiday");
    assert_eq!(enums::cause(8), "weather");
    assert_eq!(enums::cause(9), "maintenance");
    assert_eq!(enums::cause(10), "construction");
    assert_eq!(enums::cause(11), "police_activity");
    assert_eq!(enums::cause(12), "medical_emergency");
}

#[test]
fn cause_falls_back_on_unknown_value() {
    assert_eq!(enums::cause(0), "unknown_cause");
    assert_eq!(enums::cause(999), "unknown_cause");
}

#[test]
fn effect_maps_all_known_values() {
    assert_eq!(enums::effect(1), "no_service");
    assert_eq!(enums::effect(2), "reduced_service");
    assert_eq!(enums::effect(3), "significant_delays");
    assert_eq!(enums::effect(4), "detour");
    assert_eq!(enums::effect(5), "additional_service");
    assert_eq!(enums::effect(6), "modified_service");
    assert_eq!(enums::effect(7), "other_effect");
    assert_eq!(enums::effect(8), "unknown_effect");
    assert_eq!(enums::effect(9), "stop_moved");
    assert_eq!(enums::effect(10), "no_effect");
    assert_eq!(enums::effect(11), "accessibility_issue");
}

#[test]
fn effect_falls_back_on_unknown_value() {
    assert_eq!(enums::effect(0), "unknown_effect");
}

#[test]
fn severity_level_maps_all_known_values() {
    assert_eq!(enums::severity_level(1), "unknown_severity");
    assert_eq!(enums::severity_level(2), "info");
    assert_eq!(enums::severity_level(3), "warning");
    assert_eq!(enums::severity_level(4), "severe");
}

#[test]
fn severity_level_falls_back_on_unknown_value() {
    assert_eq!(enums::severity_level(0), "unknown_severity");
}
