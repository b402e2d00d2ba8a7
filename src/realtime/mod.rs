//! GTFS-Realtime fetch/parse layer (spec §4.F).
//!
//! Grounded on `liveupdates.rs`'s original `update_listener`: the protobuf
//! decode, the conditional-GET headers, and the `FeedMessage` walk are all
//! inherited from there, generalized from one hardcoded URL and one
//! trip-update projection into a multi-source fetch producing typed lists
//! for every entity kind the feed can carry.

pub mod demo;
pub mod enums;
pub mod fetcher;

pub mod proto {
    include!(concat!(env!("OUT_DIR"), "/transit_realtime.rs"));
}

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehiclePositionEntity {
    pub feed_source_id: i64,
    pub feed_source_name: String,
    pub entity_id: String,
    pub trip_id: Option<String>,
    pub route_id: Option<String>,
    pub vehicle_id: Option<String>,
    pub vehicle_label: Option<String>,
    pub latitude: Option<f32>,
    pub longitude: Option<f32>,
    pub bearing: Option<f32>,
    pub speed: Option<f32>,
    pub current_stop_sequence: Option<u32>,
    pub stop_id: Option<String>,
    pub current_status: Option<&'static str>,
    pub congestion_level: Option<&'static str>,
    pub occupancy_status: Option<&'static str>,
    pub timestamp: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopTimeUpdateEntity {
    pub stop_sequence: Option<u32>,
    pub stop_id: Option<String>,
    pub arrival_delay: Option<i32>,
    pub arrival_time: Option<i64>,
    pub departure_delay: Option<i32>,
    pub departure_time: Option<i64>,
    pub schedule_relationship: &'static str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripUpdateEntity {
    pub feed_source_id: i64,
    pub feed_source_name: String,
    pub entity_id: String,
    pub trip_id: Option<String>,
    pub route_id: Option<String>,
    pub start_date: Option<String>,
    pub start_time: Option<String>,
    pub schedule_relationship: &'static str,
    pub vehicle_id: Option<String>,
    pub delay: Option<i32>,
    pub stop_time_updates: Vec<StopTimeUpdateEntity>,
    pub timestamp: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEntity {
    pub feed_source_id: i64,
    pub feed_source_name: String,
    pub entity_id: String,
    pub cause: &'static str,
    pub effect: &'static str,
    pub severity_level: &'static str,
    pub header_text: Option<String>,
    pub description_text: Option<String>,
    pub url: Option<String>,
    pub informed_route_ids: Vec<String>,
    pub informed_stop_ids: Vec<String>,
    pub active_periods: Vec<(Option<u64>, Option<u64>)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShapeEntityData {
    pub feed_source_id: i64,
    pub feed_source_name: String,
    pub entity_id: String,
    pub shape_id: Option<String>,
    pub encoded_polyline: Option<String>,
    pub points: Vec<(f64, f64)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopEntityData {
    pub feed_source_id: i64,
    pub feed_source_name: String,
    pub entity_id: String,
    pub stop_id: Option<String>,
    pub stop_name: Option<String>,
    pub stop_lat: Option<f32>,
    pub stop_lon: Option<f32>,
    pub platform_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripModificationEntity {
    pub feed_source_id: i64,
    pub feed_source_name: String,
    pub entity_id: String,
    pub affected_trip_ids: Vec<String>,
    pub start_times: Option<String>,
    pub replacement_stop_ids: Vec<String>,
}

/// Everything decoded from one feed source's most recent poll (spec §4.F).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedEntities {
    pub vehicle_positions: Vec<VehiclePositionEntity>,
    pub trip_updates: Vec<TripUpdateEntity>,
    pub alerts: Vec<AlertEntity>,
    pub shapes: Vec<ShapeEntityData>,
    pub stops: Vec<StopEntityData>,
    pub trip_modifications: Vec<TripModificationEntity>,
}

impl FeedEntities {
    pub(crate) fn extend(&mut self, other: FeedEntities) {
        self.vehicle_positions.extend(other.vehicle_positions);
        self.trip_updates.extend(other.trip_updates);
        self.alerts.extend(other.alerts);
        self.shapes.extend(other.shapes);
        self.stops.extend(other.stops);
        self.trip_modifications.extend(other.trip_modifications);
    }
}

/// One feed source's outcome: either it produced entities, or it failed
/// without taking down the rest of the agency's sources (spec §4.F: "on
/// any failure it records the error per source but still returns partial
/// results for other sources").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceOutcome {
    pub feed_source_id: i64,
    pub feed_source_name: String,
    pub url: String,
    pub error: Option<String>,
    pub not_modified: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchResult {
    pub entities: FeedEntities,
    pub sources: Vec<SourceOutcome>,
}
