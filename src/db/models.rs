//! Row structs for the GTFS domain model and the task lifecycle model
//! (spec §3). Custom-field / JSON columns are `serde_json::Value`; geometry
//! columns are represented as `geo_types::{Point, LineString}` in memory and
//! persisted as WKT text.

use geo_types::{LineString, Point};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use sqlx::FromRow;

pub fn empty_custom_fields() -> Json {
    Json::Object(serde_json::Map::new())
}

fn parse_json_col(raw: Option<String>) -> Json {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_else(empty_custom_fields)
}

pub fn encode_json_col(value: &Json) -> Option<String> {
    if value.as_object().map(|o| o.is_empty()).unwrap_or(false) {
        None
    } else {
        Some(value.to_string())
    }
}

pub fn point_to_wkt(p: Point<f64>) -> String {
    format!("POINT({} {})", p.x(), p.y())
}

pub fn linestring_to_wkt(ls: &LineString<f64>) -> String {
    let coords: Vec<String> = ls.coords().map(|c| format!("{} {}", c.x, c.y)).collect();
    format!("LINESTRING({})", coords.join(", "))
}

#[derive(Debug, Clone, FromRow)]
pub struct Agency {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub agency_id: Option<String>,
    pub agency_url: Option<String>,
    pub agency_timezone: Option<String>,
    pub agency_lang: Option<String>,
    pub agency_phone: Option<String>,
    pub agency_fare_url: Option<String>,
    pub agency_email: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Feed {
    pub id: i64,
    pub agency_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub version: Option<String>,
    pub imported_at: String,
    pub is_active: bool,
    pub total_routes: i64,
    pub total_stops: i64,
    pub total_trips: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub feed_id: i64,
    pub route_id: String,
    pub agency_id: i64,
    pub route_short_name: Option<String>,
    pub route_long_name: Option<String>,
    pub route_desc: Option<String>,
    pub route_type: Option<i64>,
    pub route_url: Option<String>,
    pub route_color: Option<String>,
    pub route_text_color: Option<String>,
    pub route_sort_order: Option<i64>,
    #[serde(default = "empty_custom_fields")]
    pub custom_fields: Json,
}

impl Route {
    pub fn from_row(row: &sqlx::sqlite::SqliteRow) -> Self {
        use sqlx::Row;
        Route {
            feed_id: row.get("feed_id"),
            route_id: row.get("route_id"),
            agency_id: row.get("agency_id"),
            route_short_name: row.get("route_short_name"),
            route_long_name: row.get("route_long_name"),
            route_desc: row.get("route_desc"),
            route_type: row.get("route_type"),
            route_url: row.get("route_url"),
            route_color: row.get("route_color"),
            route_text_color: row.get("route_text_color"),
            route_sort_order: row.get("route_sort_order"),
            custom_fields: parse_json_col(row.get("custom_fields")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stop {
    pub feed_id: i64,
    pub stop_id: String,
    pub stop_code: Option<String>,
    pub stop_name: Option<String>,
    pub stop_desc: Option<String>,
    pub stop_lat: Option<f64>,
    pub stop_lon: Option<f64>,
    pub zone_id: Option<String>,
    pub stop_url: Option<String>,
    pub location_type: Option<i64>,
    pub parent_station: Option<String>,
    pub stop_timezone: Option<String>,
    pub wheelchair_boarding: Option<i64>,
    #[serde(default = "empty_custom_fields")]
    pub custom_fields: Json,
}

impl Stop {
    pub fn geom(&self) -> Option<Point<f64>> {
        match (self.stop_lon, self.stop_lat) {
            (Some(lon), Some(lat)) => Some(Point::new(lon, lat)),
            _ => None,
        }
    }

    pub fn from_row(row: &sqlx::sqlite::SqliteRow) -> Self {
        use sqlx::Row;
        Stop {
            feed_id: row.get("feed_id"),
            stop_id: row.get("stop_id"),
            stop_code: row.get("stop_code"),
            stop_name: row.get("stop_name"),
            stop_desc: row.get("stop_desc"),
            stop_lat: row.get("stop_lat"),
            stop_lon: row.get("stop_lon"),
            zone_id: row.get("zone_id"),
            stop_url: row.get("stop_url"),
            location_type: row.get("location_type"),
            parent_station: row.get("parent_station"),
            stop_timezone: row.get("stop_timezone"),
            wheelchair_boarding: row.get("wheelchair_boarding"),
            custom_fields: parse_json_col(row.get("custom_fields")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Calendar {
    pub feed_id: i64,
    pub service_id: String,
    pub monday: bool,
    pub tuesday: bool,
    pub wednesday: bool,
    pub thursday: bool,
    pub friday: bool,
    pub saturday: bool,
    pub sunday: bool,
    pub start_date: String,
    pub end_date: String,
    #[serde(default = "empty_custom_fields")]
    pub custom_fields: Json,
}

/// The sentinel dates an auto-created Calendar row gets for a service_id
/// that only ever appears in `calendar_dates.txt` (spec §4.B.2, open
/// question "Calendar auto-creation for dates-only services").
pub const SENTINEL_START_DATE: &str = "19700101";
pub const SENTINEL_END_DATE: &str = "20991231";

impl Calendar {
    pub fn sentinel(feed_id: i64, service_id: &str) -> Self {
        Calendar {
            feed_id,
            service_id: service_id.to_string(),
            monday: false,
            tuesday: false,
            wednesday: false,
            thursday: false,
            friday: false,
            saturday: false,
            sunday: false,
            start_date: SENTINEL_START_DATE.to_string(),
            end_date: SENTINEL_END_DATE.to_string(),
            custom_fields: empty_custom_fields(),
        }
    }

    pub fn from_row(row: &sqlx::sqlite::SqliteRow) -> Self {
        use sqlx::Row;
        Calendar {
            feed_id: row.get("feed_id"),
            service_id: row.get("service_id"),
            monday: row.get::<i64, _>("monday") != 0,
            tuesday: row.get::<i64, _>("tuesday") != 0,
            wednesday: row.get::<i64, _>("wednesday") != 0,
            thursday: row.get::<i64, _>("thursday") != 0,
            friday: row.get::<i64, _>("friday") != 0,
            saturday: row.get::<i64, _>("saturday") != 0,
            sunday: row.get::<i64, _>("sunday") != 0,
            start_date: row.get("start_date"),
            end_date: row.get("end_date"),
            custom_fields: parse_json_col(row.get("custom_fields")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CalendarDate {
    pub feed_id: i64,
    pub service_id: String,
    pub date: String,
    pub exception_type: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ShapePoint {
    pub feed_id: i64,
    pub shape_id: String,
    pub shape_pt_sequence: i64,
    pub shape_pt_lat: f64,
    pub shape_pt_lon: f64,
    pub shape_dist_traveled: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trip {
    pub feed_id: i64,
    pub trip_id: String,
    pub route_id: String,
    pub service_id: String,
    pub trip_headsign: Option<String>,
    pub trip_short_name: Option<String>,
    pub direction_id: Option<i64>,
    pub block_id: Option<String>,
    pub shape_id: Option<String>,
    pub wheelchair_accessible: Option<i64>,
    pub bikes_allowed: Option<i64>,
    #[serde(default = "empty_custom_fields")]
    pub custom_fields: Json,
}

impl Trip {
    pub fn from_row(row: &sqlx::sqlite::SqliteRow) -> Self {
        use sqlx::Row;
        Trip {
            feed_id: row.get("feed_id"),
            trip_id: row.get("trip_id"),
            route_id: row.get("route_id"),
            service_id: row.get("service_id"),
            trip_headsign: row.get("trip_headsign"),
            trip_short_name: row.get("trip_short_name"),
            direction_id: row.get("direction_id"),
            block_id: row.get("block_id"),
            shape_id: row.get("shape_id"),
            wheelchair_accessible: row.get("wheelchair_accessible"),
            bikes_allowed: row.get("bikes_allowed"),
            custom_fields: parse_json_col(row.get("custom_fields")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StopTime {
    pub feed_id: i64,
    pub trip_id: String,
    pub stop_sequence: i64,
    pub stop_id: String,
    pub arrival_time: Option<String>,
    pub departure_time: Option<String>,
    pub stop_headsign: Option<String>,
    pub pickup_type: Option<i64>,
    pub drop_off_type: Option<i64>,
    pub shape_dist_traveled: Option<f64>,
    pub timepoint: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FareAttribute {
    pub feed_id: i64,
    pub fare_id: String,
    pub price: Option<String>,
    pub currency_type: Option<String>,
    pub payment_method: Option<i64>,
    pub transfers: Option<i64>,
    pub agency_id: Option<i64>,
    pub transfer_duration: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FareRule {
    pub feed_id: i64,
    pub fare_id: String,
    pub route_id: Option<String>,
    pub origin_id: Option<String>,
    pub destination_id: Option<String>,
    pub contains_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FeedInfo {
    pub feed_id: i64,
    pub publisher_name: Option<String>,
    pub publisher_url: Option<String>,
    pub lang: Option<String>,
    pub default_lang: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub version: Option<String>,
    pub contact_email: Option<String>,
    pub contact_url: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct FeedSource {
    pub id: i64,
    pub agency_id: i64,
    pub name: String,
    pub url: String,
    pub enabled: bool,
    pub auth_header_name: Option<String>,
    pub auth_header_value: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}
