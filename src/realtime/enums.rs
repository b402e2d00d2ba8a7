//! Enum-to-string translators (spec §4.F): GTFS-Realtime ships its
//! statuses as small protobuf integers; consumers (dashboards, the
//! liveupdates feed) want stable names instead of re-deriving the mapping
//! from the `.proto` file. One function per enum in `transit_realtime`.

use super::proto::alert::{Cause, Effect, SeverityLevel};
use super::proto::trip_descriptor::ScheduleRelationship as TripScheduleRelationship;
use super::proto::trip_update::stop_time_update::ScheduleRelationship as StopTimeScheduleRelationship;
use super::proto::vehicle_position::{CongestionLevel, OccupancyStatus, VehicleStopStatus};

pub fn vehicle_stop_status(v: i32) -> &'static str {
    match VehicleStopStatus::try_from(v) {
        Ok(VehicleStopStatus::IncomingAt) => "incoming_at",
        Ok(VehicleStopStatus::StoppedAt) => "stopped_at",
        Ok(VehicleStopStatus::InTransitTo) => "in_transit_to",
        Err(_) => "in_transit_to",
    }
}

pub fn congestion_level(v: i32) -> &'static str {
    match CongestionLevel::try_from(v) {
        Ok(CongestionLevel::UnknownCongestionLevel) => "unknown",
        Ok(CongestionLevel::RunningSmoothly) => "running_smoothly",
        Ok(CongestionLevel::StopAndGo) => "stop_and_go",
        Ok(CongestionLevel::Congestion) => "congestion",
        Ok(CongestionLevel::SevereCongestion) => "severe_congestion",
        Err(_) => "unknown",
    }
}

pub fn occupancy_status(v: i32) -> &'static str {
    match OccupancyStatus::try_from(v) {
        Ok(OccupancyStatus::Empty) => "empty",
        Ok(OccupancyStatus::ManySeatsAvailable) => "many_seats_available",
        Ok(OccupancyStatus::FewSeatsAvailable) => "few_seats_available",
        Ok(OccupancyStatus::StandingRoomOnly) => "standing_room_only",
        Ok(OccupancyStatus::CrushedStandingRoomOnly) => "crushed_standing_room_only",
        Ok(OccupancyStatus::Full) => "full",
        Ok(OccupancyStatus::NotAcceptingPassengers) => "not_accepting_passengers",
        Ok(OccupancyStatus::NoDataAvailable) => "no_data_available",
        Ok(OccupancyStatus::NotBoardable) => "not_boardable",
        Err(_) => "no_data_available",
    }
}

pub fn trip_schedule_relationship(v: i32) -> &'static str {
    match TripScheduleRelationship::try_from(v) {
        Ok(TripScheduleRelationship::Scheduled) => "scheduled",
        Ok(TripScheduleRelationship::Added) => "added",
        Ok(TripScheduleRelationship::Unscheduled) => "unscheduled",
        Ok(TripScheduleRelationship::Canceled) => "canceled",
        Ok(TripScheduleRelationship::Duplicated) => "duplicated",
        Ok(TripScheduleRelationship::Deleted) => "deleted",
        Err(_) => "scheduled",
    }
}

pub fn stop_time_schedule_relationship(v: i32) -> &'static str {
    match StopTimeScheduleRelationship::try_from(v) {
        Ok(StopTimeScheduleRelationship::Scheduled) => "scheduled",
        Ok(StopTimeScheduleRelationship::Skipped) => "skipped",
        Ok(StopTimeScheduleRelationship::NoData) => "no_data",
        Ok(StopTimeScheduleRelationship::Unscheduled) => "unscheduled",
        Err(_) => "scheduled",
    }
}

pub fn cause(v: i32) -> &'static str {
    match Cause::try_from(v) {
        Ok(Cause::UnknownCause) => "unknown_cause",
        Ok(Cause::OtherCause) => "other_cause",
        Ok(Cause::TechnicalProblem) => "technical_problem",
        Ok(Cause::Strike) => "strike",
        Ok(Cause::Demonstration) => "demonstration",
        Ok(Cause::Accident) => "accident",
        Ok(Cause::Holiday) => "holiday",
        Ok(Cause::Weather) => "weather",
        Ok(Cause::Maintenance) => "maintenance",
        Ok(Cause::Construction) => "construction",
        Ok(Cause::PoliceActivity) => "police_activity",
        Ok(Cause::MedicalEmergency) => "medical_emergency",
        Err(_) => "unknown_cause",
    }
}

pub fn effect(v: i32) -> &'static str {
    match Effect::try_from(v) {
        Ok(Effect::NoService) => "no_service",
        Ok(Effect::ReducedService) => "reduced_service",
        Ok(Effect::SignificantDelays) => "significant_delays",
        Ok(Effect::Detour) => "detour",
        Ok(Effect::AdditionalService) => "additional_service",
        Ok(Effect::ModifiedService) => "modified_service",
        Ok(Effect::OtherEffect) => "other_effect",
        Ok(Effect::UnknownEffect) => "unknown_effect",
        Ok(Effect::StopMoved) => "stop_moved",
        Ok(Effect::NoEffect) => "no_effect",
        Ok(Effect::AccessibilityIssue) => "accessibility_issue",
        Err(_) => "unknown_effect",
    }
}

pub fn severity_level(v: i32) -> &'static str {
    match SeverityLevel::try_from(v) {
        Ok(SeverityLevel::UnknownSeverity) => "unknown_severity",
        Ok(SeverityLevel::Info) => "info",
        Ok(SeverityLevel::Warning) => "warning",
        Ok(SeverityLevel::Severe) => "severe",
        Err(_) => "unknown_severity",
    }
}
