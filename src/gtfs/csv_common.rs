//! Shared CSV column tables: required files/columns for the archive
//! pre-pass (spec §4.B.1) and per-file standard field sets used to split
//! recognized columns from custom ones (spec §4.B.5, §4.C).
//!
//! Field lists follow the public GTFS reference and
//! `examples/original_source/backend/app/services/gtfs_service.py`'s
//! column handling for each file.

use std::collections::HashMap;
use std::collections::HashSet;

/// The GTFS base set: files an archive must contain to be importable
/// (spec §4.B, "Required files").
pub const REQUIRED_FILES: &[&str] = &["agency", "stops", "routes", "trips", "stop_times"];

/// All GTFS files this importer recognizes, in no particular order. Files
/// present in the archive but absent here are classified `info` and
/// skipped silently (spec §4.B.1).
pub const RECOGNIZED_FILES: &[&str] = &[
    "agency",
    "stops",
    "routes",
    "calendar",
    "calendar_dates",
    "shapes",
    "trips",
    "stop_times",
    "fare_attributes",
    "fare_rules",
    "feed_info",
];

pub fn required_columns(file: &str) -> &'static [&'static str] {
    match file {
        "agency" => &["agency_name", "agency_url", "agency_timezone"],
        "stops" => &["stop_id"],
        "routes" => &["route_id", "route_type"],
        "trips" => &["route_id", "service_id", "trip_id"],
        "stop_times" => &["trip_id", "stop_id", "stop_sequence"],
        "calendar" => &[
            "service_id",
            "monday",
            "tuesday",
            "wednesday",
            "thursday",
            "friday",
            "saturday",
            "sunday",
            "start_date",
            "end_date",
        ],
        "calendar_dates" => &["service_id", "date", "exception_type"],
        "shapes" => &["shape_id", "shape_pt_lat", "shape_pt_lon", "shape_pt_sequence"],
        "fare_attributes" => &["fare_id", "price", "currency_type", "payment_method", "transfers"],
        "fare_rules" => &["fare_id"],
        "feed_info" => &["feed_publisher_name", "feed_publisher_url", "feed_lang"],
        _ => &[],
    }
}

pub fn standard_fields(file: &str) -> &'static [&'static str] {
    match file {
        "agency" => &[
            "agency_id",
            "agency_name",
            "agency_url",
            "agency_timezone",
            "agency_lang",
            "agency_phone",
            "agency_fare_url",
            "agency_email",
        ],
        "routes" => &[
            "route_id",
            "agency_id",
            "route_short_name",
            "route_long_name",
            "route_desc",
            "route_type",
            "route_url",
            "route_color",
            "route_text_color",
            "route_sort_order",
        ],
        "stops" => &[
            "stop_id",
            "stop_code",
            "stop_name",
            "stop_desc",
            "stop_lat",
            "stop_lon",
            "zone_id",
            "stop_url",
            "location_type",
            "parent_station",
            "stop_timezone",
            "wheelchair_boarding",
        ],
        "calendar" => &[
            "service_id",
            "monday",
            "tuesday",
            "wednesday",
            "thursday",
            "friday",
            "saturday",
            "sunday",
            "start_date",
            "end_date",
        ],
        "calendar_dates" => &["service_id", "date", "exception_type"],
        "shapes" => &[
            "shape_id",
            "shape_pt_lat",
            "shape_pt_lon",
            "shape_pt_sequence",
            "shape_dist_traveled",
        ],
        "trips" => &[
            "route_id",
            "service_id",
            "trip_id",
            "trip_headsign",
            "trip_short_name",
            "direction_id",
            "block_id",
            "shape_id",
            "wheelchair_accessible",
            "bikes_allowed",
        ],
        "stop_times" => &[
            "trip_id",
            "arrival_time",
            "departure_time",
            "stop_id",
            "stop_sequence",
            "stop_headsign",
            "pickup_type",
            "drop_off_type",
            "shape_dist_traveled",
            "timepoint",
        ],
        "fare_attributes" => &[
            "fare_id",
            "price",
            "currency_type",
            "payment_method",
            "transfers",
            "agency_id",
            "transfer_duration",
        ],
        "fare_rules" => &["fare_id", "route_id", "origin_id", "destination_id", "contains_id"],
        "feed_info" => &[
            "feed_publisher_name",
            "feed_publisher_url",
            "feed_lang",
            "default_lang",
            "feed_start_date",
            "feed_end_date",
            "feed_version",
            "feed_contact_email",
            "feed_contact_url",
        ],
        _ => &[],
    }
}

/// Splits a raw CSV row (header -> value) into recognized fields and a
/// custom-fields map of everything else (spec §4.B.5).
pub fn split_custom_fields(
    file: &str,
    row: &HashMap<String, String>,
) -> serde_json::Value {
    let standard: HashSet<&str> = standard_fields(file).iter().copied().collect();
    let mut custom = serde_json::Map::new();
    for (k, v) in row {
        if !standard.contains(k.as_str()) && !v.is_empty() {
            custom.insert(k.clone(), serde_json::Value::String(v.clone()));
        }
    }
    serde_json::Value::Object(custom)
}

/// Non-GTFS archive members (macOS resource forks, docs, etc.) that are
/// `info`-level and silently skipped rather than reported as errors.
pub fn is_ignorable_member(name: &str) -> bool {
    name.starts_with("__MACOSX/")
        || name.ends_with(".DS_Store")
        || name.ends_with(".md")
        || name.ends_with(".txt.license")
        || !name.ends_with(".txt")
}

pub fn file_stem(member_name: &str) -> Option<&str> {
    member_name
        .rsplit('/')
        .next()
        .and_then(|base| base.strip_suffix(".txt"))
}
