//! Native rule engine (spec §4.E.1).
//!
//! Grounded on `examples/original_source/backend/app/services/gtfs_validator.py`
//! (`GTFSValidator`): the mandatory-field lists below are its
//! `*_MANDATORY_FIELDS` class constants, and the rule groupings (one
//! `validate_*` pass per entity, each gated by a `ValidationPreferences`
//! flag) follow its `validate_feed` dispatch order. `stop_times` keeps its
//! aggregate-SQL strategy (no row ever loaded into memory) including the
//! `LAG() OVER (PARTITION BY trip_id ORDER BY stop_sequence)` window query
//! for sequence monotonicity.

use sqlx::{Row, SqlitePool};
use std::collections::{HashMap, HashSet};

use crate::error::ValidationError;
use crate::orchestrator::Orchestrator;

use super::{haversine_meters, ValidationPreferences, ValidationResult};

pub mod fields {
    pub const ROUTE_MANDATORY: &[&str] = &["route_id", "route_short_name", "route_type"];
    pub const SHAPE_MANDATORY: &[&str] = &["shape_id", "shape_pt_lat", "shape_pt_lon", "shape_pt_sequence"];
    pub const CALENDAR_MANDATORY: &[&str] = &["service_id", "start_date", "end_date"];
    pub const CALENDAR_DATE_MANDATORY: &[&str] = &["date", "exception_type"];
    pub const STOP_MANDATORY: &[&str] = &["stop_id", "stop_name"];
    pub const TRIP_MANDATORY: &[&str] = &["trip_id"];
    pub const STOP_TIME_MANDATORY: &[&str] = &["arrival_time", "departure_time", "stop_sequence"];
    pub const FARE_ATTRIBUTE_MANDATORY: &[&str] = &["fare_id", "price", "currency_type", "payment_method"];
    pub const FEED_INFO_MANDATORY: &[&str] = &["feed_publisher_name", "feed_publisher_url", "feed_lang"];
}

async fn load_preferences(pool: &SqlitePool, agency_id: i64) -> Result<ValidationPreferences, ValidationError> {
    let row = sqlx::query("SELECT rules FROM validation_preferences WHERE agency_id = ?")
        .bind(agency_id)
        .fetch_optional(pool)
        .await?;
    match row {
        Some(r) => {
            let raw: String = r.get("rules");
            Ok(serde_json::from_str(&raw).unwrap_or_default())
        }
        None => Ok(ValidationPreferences::default()),
    }
}

pub struct Validator<'a> {
    pool: &'a SqlitePool,
    task_id: Option<i64>,
}

impl<'a> Validator<'a> {
    pub fn new(pool: &'a SqlitePool, task_id: Option<i64>) -> Self {
        Validator { pool, task_id }
    }

    async fn report(&self, percent: f64, message: &str) {
        if let Some(task_id) = self.task_id {
            let orch = Orchestrator::new(self.pool);
            orch.report_progress(task_id, percent, Some(message)).await.ok();
        }
    }

    async fn check_cancelled(&self) -> Result<(), ValidationError> {
        if let Some(task_id) = self.task_id {
            let orch = Orchestrator::new(self.pool);
            if orch.check_cancelled(task_id).await.unwrap_or(false) {
                return Err(crate::error::CancellationError(task_id).into());
            }
        }
        Ok(())
    }

    pub async fn validate_feed(&self, feed_id: i64) -> Result<ValidationResult, ValidationError> {
        let mut result = ValidationResult::default();

        let feed_row = sqlx::query("SELECT agency_id FROM feeds WHERE id = ?")
            .bind(feed_id)
            .fetch_optional(self.pool)
            .await?;
        let agency_id: i64 = match feed_row {
            Some(r) => r.get("agency_id"),
            None => return Err(ValidationError::UnknownFeed(feed_id)),
        };

        let prefs = load_preferences(self.pool, agency_id).await?;

        validate_routes(self.pool, feed_id, &prefs, &mut result).await?;
        self.report(10.0, "validated routes").await;
        self.check_cancelled().await?;

        validate_shapes(self.pool, feed_id, &prefs, &mut result).await?;
        self.report(25.0, "validated shapes").await;
        self.check_cancelled().await?;

        validate_calendar(self.pool, feed_id, &prefs, &mut result).await?;
        self.report(35.0, "validated calendar").await;

        validate_calendar_dates(self.pool, feed_id, &prefs, &mut result).await?;
        self.report(45.0, "validated calendar_dates").await;
        self.check_cancelled().await?;

        validate_stops(self.pool, feed_id, &prefs, &mut result).await?;
        self.report(55.0, "validated stops").await;

        validate_trips(self.pool, feed_id, &prefs, &mut result).await?;
        self.report(70.0, "validated trips").await;
        self.check_cancelled().await?;

        validate_stop_times(self.pool, feed_id, &prefs, &mut result).await?;
        self.report(90.0, "validated stop_times").await;

        validate_fare_attributes(self.pool, feed_id, &prefs, &mut result).await?;
        validate_feed_info(self.pool, feed_id, &prefs, &mut result).await?;
        self.report(100.0, "validation complete").await;

        Ok(result)
    }
}

fn blank(v: &Option<String>) -> bool {
    v.as_deref().map(|s| s.trim().is_empty()).unwrap_or(true)
}

async fn validate_routes(
    pool: &SqlitePool,
    feed_id: i64,
    prefs: &ValidationPreferences,
    result: &mut ValidationResult,
) -> Result<(), ValidationError> {
    let rows = sqlx::query("SELECT * FROM routes WHERE feed_id = ?").bind(feed_id).fetch_all(pool).await?;
    if rows.is_empty() {
        result.info("routes", format!("No routes found for feed {feed_id}"));
        return Ok(());
    }

    let mut seen: HashMap<String, ()> = HashMap::new();
    let mut agency_tz_cache: HashMap<i64, Option<String>> = HashMap::new();

    for row in &rows {
        let route_id: String = row.get("route_id");
        let route_short_name: Option<String> = row.get("route_short_name");
        let route_type: Option<i64> = row.get("route_type");
        let route_agency_id: i64 = row.get("agency_id");

        if prefs.validate_route_mandatory {
            if route_id.trim().is_empty() {
                result.error("routes", "Route missing mandatory field: route_id").entity("route", route_id.clone()).field("route_id");
            }
            if blank(&route_short_name) {
                result.error("routes", "Route missing mandatory field: route_short_name").entity("route", route_id.clone()).field("route_short_name");
            }
            if route_type.is_none() {
                result.error("routes", "Route missing mandatory field: route_type").entity("route", route_id.clone()).field("route_type");
            }
        }

        if prefs.validate_route_duplicates {
            if seen.contains_key(&route_id) {
                result
                    .error("routes", format!("Duplicated route_id: {route_id}"))
                    .entity("route", route_id.clone())
                    .field("route_id");
            } else {
                seen.insert(route_id.clone(), ());
            }
        }

        if prefs.validate_route_agency {
            let tz = match agency_tz_cache.get(&route_agency_id) {
                Some(v) => v.clone(),
                None => {
                    let tz: Option<String> =
                        sqlx::query("SELECT agency_timezone FROM agencies WHERE id = ?")
                            .bind(route_agency_id)
                            .fetch_optional(pool)
                            .await?
                            .and_then(|r| r.get("agency_timezone"));
                    agency_tz_cache.insert(route_agency_id, tz.clone());
                    tz
                }
            };
            if blank(&tz) {
                result
                    .warning("routes", "Route's agency is missing agency_timezone (required by GTFS)")
                    .entity("route", route_id.clone())
                    .field("agency_id");
            }
        }
    }

    result.info("routes", format!("Validated {} routes", rows.len()));
    Ok(())
}

async fn validate_shapes(
    pool: &SqlitePool,
    feed_id: i64,
    prefs: &ValidationPreferences,
    result: &mut ValidationResult,
) -> Result<(), ValidationError> {
    let rows = sqlx::query(
        "SELECT shape_id, shape_pt_sequence, shape_pt_lat, shape_pt_lon, shape_dist_traveled
         FROM shapes WHERE feed_id = ? ORDER BY shape_id, shape_pt_sequence",
    )
    .bind(feed_id)
    .fetch_all(pool)
    .await?;

    if rows.is_empty() {
        result.info("shapes", format!("No shapes found for feed {feed_id}"));
        return Ok(());
    }

    let mut by_shape: HashMap<String, Vec<(i64, f64, f64, Option<f64>)>> = HashMap::new();
    for row in &rows {
        let shape_id: String = row.get("shape_id");
        let seq: i64 = row.get("shape_pt_sequence");
        let lat: f64 = row.get("shape_pt_lat");
        let lon: f64 = row.get("shape_pt_lon");
        let dist: Option<f64> = row.get("shape_dist_traveled");
        by_shape.entry(shape_id).or_default().push((seq, lat, lon, dist));
    }

    let total_points = rows.len();
    for (shape_id, points) in &by_shape {
        let mut prev: Option<(i64, f64, f64, Option<f64>)> = None;
        let mut with_dist = 0usize;

        for (i, point) in points.iter().enumerate() {
            let (seq, lat, lon, dist) = *point;

            if prefs.validate_shape_mandatory {
                // lat/lon/sequence are NOT NULL columns; only shape_id itself can be blank.
                if shape_id.trim().is_empty() {
                    result
                        .error("shapes", "Shape point missing mandatory field: shape_id")
                        .entity("shape", shape_id.clone())
                        .details(serde_json::json!({"sequence": seq}));
                }
            }

            if prefs.validate_shape_sequence {
                if let Some((prev_seq, ..)) = prev {
                    if seq <= prev_seq {
                        result
                            .error("shapes", format!("Shape point sequence not increasing: {prev_seq} -> {seq}"))
                            .entity("shape", shape_id.clone())
                            .field("shape_pt_sequence")
                            .details(serde_json::json!({"previous_sequence": prev_seq, "current_sequence": seq}));
                    }
                }
            }

            if dist.is_some() {
                with_dist += 1;
            }

            if let Some((_, prev_lat, prev_lon, prev_dist)) = prev {
                let calculated = haversine_meters(prev_lat, prev_lon, lat, lon);
                if prefs.validate_shape_dist_accuracy {
                    if let (Some(d), Some(pd)) = (dist, prev_dist) {
                        let reported = d - pd;
                        if calculated > 0.0 && (reported - calculated).abs() > calculated * 0.2 {
                            result
                                .warning(
                                    "shapes",
                                    format!(
                                        "Shape distance mismatch: reported {reported:.2}m vs calculated {calculated:.2}m"
                                    ),
                                )
                                .entity("shape", shape_id.clone())
                                .field("shape_dist_traveled")
                                .details(serde_json::json!({
                                    "sequence": seq,
                                    "reported_distance": reported,
                                    "calculated_distance": calculated,
                                }));
                        }
                    }
                }
            }

            prev = Some((seq, lat, lon, dist));
            let _ = i;
        }

        if prefs.validate_shape_dist_traveled && !points.is_empty() && with_dist > 0 && with_dist < points.len() {
            result
                .warning("shapes", format!("Shape has incomplete shape_dist_traveled: {with_dist}/{}", points.len()))
                .entity("shape", shape_id.clone())
                .field("shape_dist_traveled")
                .details(serde_json::json!({"points_with_distance": with_dist, "total_points": points.len()}));
        }
    }

    result.info("shapes", format!("Validated {} shapes with {total_points} points", by_shape.len()));
    Ok(())
}

async fn validate_calendar(
    pool: &SqlitePool,
    feed_id: i64,
    prefs: &ValidationPreferences,
    result: &mut ValidationResult,
) -> Result<(), ValidationError> {
    let rows = sqlx::query("SELECT service_id, start_date, end_date FROM calendars WHERE feed_id = ?")
        .bind(feed_id)
        .fetch_all(pool)
        .await?;
    if rows.is_empty() {
        result.info("calendar", format!("No calendars found for feed {feed_id}"));
        return Ok(());
    }
    if prefs.validate_calendar_mandatory {
        for row in &rows {
            let service_id: String = row.get("service_id");
            let start_date: String = row.get("start_date");
            let end_date: String = row.get("end_date");
            for (field, value) in [("service_id", &service_id), ("start_date", &start_date), ("end_date", &end_date)] {
                if value.trim().is_empty() {
                    result
                        .error("calendar", format!("Calendar missing mandatory field: {field}"))
                        .entity("calendar", service_id.clone())
                        .field(field);
                }
            }
        }
    }
    result.info("calendar", format!("Validated {} calendars", rows.len()));
    Ok(())
}

async fn validate_calendar_dates(
    pool: &SqlitePool,
    feed_id: i64,
    prefs: &ValidationPreferences,
    result: &mut ValidationResult,
) -> Result<(), ValidationError> {
    let rows = sqlx::query("SELECT service_id, date, exception_type FROM calendar_dates WHERE feed_id = ?")
        .bind(feed_id)
        .fetch_all(pool)
        .await?;
    if rows.is_empty() {
        result.info("calendar_dates", format!("No calendar_dates found for feed {feed_id}"));
        return Ok(());
    }
    if prefs.validate_calendar_date_mandatory {
        for row in &rows {
            let service_id: String = row.get("service_id");
            let date: String = row.get("date");
            if date.trim().is_empty() {
                result
                    .error("calendar_dates", "CalendarDate missing mandatory field: date")
                    .entity("calendar_date", format!("{service_id}_{date}"))
                    .field("date")
                    .details(serde_json::json!({"service_id": service_id, "date": date}));
            }
        }
    }
    result.info("calendar_dates", format!("Validated {} calendar_dates", rows.len()));
    Ok(())
}

async fn validate_stops(
    pool: &SqlitePool,
    feed_id: i64,
    prefs: &ValidationPreferences,
    result: &mut ValidationResult,
) -> Result<(), ValidationError> {
    let rows = sqlx::query("SELECT stop_id, stop_name FROM stops WHERE feed_id = ?").bind(feed_id).fetch_all(pool).await?;
    if rows.is_empty() {
        result.info("stops", format!("No stops found for feed {feed_id}"));
        return Ok(());
    }
    let mut seen: HashSet<String> = HashSet::new();
    for row in &rows {
        let stop_id: String = row.get("stop_id");
        let stop_name: Option<String> = row.get("stop_name");

        if prefs.validate_stop_mandatory {
            if stop_id.trim().is_empty() {
                result.error("stops", "Stop missing mandatory field: stop_id").entity("stop", stop_id.clone()).field("stop_id");
            }
            if blank(&stop_name) {
                result.error("stops", "Stop missing mandatory field: stop_name").entity("stop", stop_id.clone()).field("stop_name");
            }
        }

        if prefs.validate_stop_duplicates {
            if !seen.insert(stop_id.clone()) {
                result
                    .error("stops", format!("Duplicated stop_id: {stop_id}"))
                    .entity("stop", stop_id.clone())
                    .field("stop_id");
            }
        }
    }
    result.info("stops", format!("Validated {} stops", rows.len()));
    Ok(())
}

async fn validate_trips(
    pool: &SqlitePool,
    feed_id: i64,
    prefs: &ValidationPreferences,
    result: &mut ValidationResult,
) -> Result<(), ValidationError> {
    let rows = sqlx::query("SELECT trip_id, service_id, shape_id FROM trips WHERE feed_id = ?")
        .bind(feed_id)
        .fetch_all(pool)
        .await?;
    if rows.is_empty() {
        result.info("trips", format!("No trips found for feed {feed_id}"));
        return Ok(());
    }

    let valid_service_ids: HashSet<String> = {
        let mut set: HashSet<String> = sqlx::query("SELECT DISTINCT service_id FROM calendars WHERE feed_id = ?")
            .bind(feed_id)
            .fetch_all(pool)
            .await?
            .into_iter()
            .map(|r| r.get("service_id"))
            .collect();
        set.extend(
            sqlx::query("SELECT DISTINCT service_id FROM calendar_dates WHERE feed_id = ?")
                .bind(feed_id)
                .fetch_all(pool)
                .await?
                .into_iter()
                .map(|r: sqlx::sqlite::SqliteRow| r.get::<String, _>("service_id")),
        );
        set
    };

    let valid_shape_ids: HashSet<String> = sqlx::query("SELECT DISTINCT shape_id FROM shapes WHERE feed_id = ?")
        .bind(feed_id)
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(|r| r.get("shape_id"))
        .collect();

    let mut seen: HashSet<String> = HashSet::new();
    for row in &rows {
        let trip_id: String = row.get("trip_id");
        let service_id: String = row.get("service_id");
        let shape_id: Option<String> = row.get("shape_id");

        if prefs.validate_trip_mandatory && trip_id.trim().is_empty() {
            result.error("trips", "Trip missing mandatory field: trip_id").entity("trip", trip_id.clone()).field("trip_id");
        }

        if prefs.validate_trip_duplicates {
            if !seen.insert(trip_id.clone()) {
                result
                    .error("trips", format!("Duplicated trip_id: {trip_id}"))
                    .entity("trip", trip_id.clone())
                    .field("trip_id");
            }
        }

        if prefs.validate_trip_service && !valid_service_ids.contains(&service_id) {
            result
                .error("trips", format!("Trip references non-existent service_id: {service_id}"))
                .entity("trip", trip_id.clone())
                .field("service_id")
                .details(serde_json::json!({"service_id": service_id}));
        }

        if prefs.validate_trip_shape {
            if let Some(shape_id) = &shape_id {
                if !shape_id.is_empty() && !valid_shape_ids.contains(shape_id) {
                    result
                        .error("trips", format!("Trip references non-existent shape_id: {shape_id}"))
                        .entity("trip", trip_id.clone())
                        .field("shape_id")
                        .details(serde_json::json!({"shape_id": shape_id}));
                }
            }
        }
    }

    result.info("trips", format!("Validated {} trips", rows.len()));
    Ok(())
}

/// Large-table rule (spec §4.E.1): five aggregate queries, no stop_time row
/// is ever loaded into process memory.
async fn validate_stop_times(
    pool: &SqlitePool,
    feed_id: i64,
    prefs: &ValidationPreferences,
    result: &mut ValidationResult,
) -> Result<(), ValidationError> {
    let total_count: i64 = sqlx::query("SELECT COUNT(*) AS c FROM stop_times WHERE feed_id = ?")
        .bind(feed_id)
        .fetch_one(pool)
        .await?
        .get("c");
    if total_count == 0 {
        result.info("stop_times", format!("No stop_times found for feed {feed_id}"));
        return Ok(());
    }

    if prefs.validate_stop_time_mandatory {
        for field in fields::STOP_TIME_MANDATORY {
            let null_count: i64 = sqlx::query(&format!(
                "SELECT COUNT(*) AS c FROM stop_times WHERE feed_id = ? AND {field} IS NULL"
            ))
            .bind(feed_id)
            .fetch_one(pool)
            .await?
            .get("c");
            if null_count > 0 {
                result
                    .error("stop_times", format!("{null_count} stop_times missing mandatory field: {field}"))
                    .field(field)
                    .details(serde_json::json!({"missing_count": null_count, "total_count": total_count}));
            }
        }
    }

    if prefs.validate_stop_time_trip {
        let invalid: i64 = sqlx::query(
            "SELECT COUNT(*) AS c FROM stop_times st
             WHERE st.feed_id = ?
             AND NOT EXISTS (SELECT 1 FROM trips t WHERE t.feed_id = st.feed_id AND t.trip_id = st.trip_id)",
        )
        .bind(feed_id)
        .fetch_one(pool)
        .await?
        .get("c");
        if invalid > 0 {
            result
                .error("stop_times", format!("{invalid} stop_times reference non-existent trips"))
                .field("trip_id")
                .details(serde_json::json!({"invalid_count": invalid}));
        }
    }

    if prefs.validate_stop_time_stop {
        let invalid: i64 = sqlx::query(
            "SELECT COUNT(*) AS c FROM stop_times st
             WHERE st.feed_id = ?
             AND NOT EXISTS (SELECT 1 FROM stops s WHERE s.feed_id = st.feed_id AND s.stop_id = st.stop_id)",
        )
        .bind(feed_id)
        .fetch_one(pool)
        .await?
        .get("c");
        if invalid > 0 {
            result
                .error("stop_times", format!("{invalid} stop_times reference non-existent stops"))
                .field("stop_id")
                .details(serde_json::json!({"invalid_count": invalid}));
        }
    }

    if prefs.validate_stop_time_sequence {
        let violations: i64 = sqlx::query(
            "WITH sequenced AS (
                SELECT stop_sequence,
                       LAG(stop_sequence) OVER (PARTITION BY trip_id ORDER BY stop_sequence) AS prev_sequence
                FROM stop_times WHERE feed_id = ?
             )
             SELECT COUNT(*) AS c FROM sequenced WHERE prev_sequence IS NOT NULL AND stop_sequence <= prev_sequence",
        )
        .bind(feed_id)
        .fetch_one(pool)
        .await?
        .get("c");
        if violations > 0 {
            result
                .warning("stop_times", format!("{violations} stop_times have non-increasing stop_sequence"))
                .field("stop_sequence")
                .details(serde_json::json!({"violation_count": violations}));
        }
    }

    result.info("stop_times", format!("Validated {total_count} stop_times (using efficient aggregate queries)"));
    Ok(())
}

async fn validate_fare_attributes(
    pool: &SqlitePool,
    feed_id: i64,
    prefs: &ValidationPreferences,
    result: &mut ValidationResult,
) -> Result<(), ValidationError> {
    let rows = sqlx::query("SELECT fare_id, price, currency_type, payment_method FROM fare_attributes WHERE feed_id = ?")
        .bind(feed_id)
        .fetch_all(pool)
        .await?;
    if rows.is_empty() {
        result.info("fare_attributes", format!("No fare_attributes found for feed {feed_id}"));
        return Ok(());
    }
    if prefs.validate_fare_attribute_mandatory {
        for row in &rows {
            let fare_id: String = row.get("fare_id");
            let price: Option<String> = row.get("price");
            let currency: Option<String> = row.get("currency_type");
            let payment: Option<i64> = row.get("payment_method");
            if fare_id.trim().is_empty() {
                result.error("fare_attributes", "FareAttribute missing mandatory field: fare_id").entity("fare_attribute", fare_id.clone()).field("fare_id");
            }
            if blank(&price) {
                result.error("fare_attributes", "FareAttribute missing mandatory field: price").entity("fare_attribute", fare_id.clone()).field("price");
            }
            if blank(&currency) {
                result.error("fare_attributes", "FareAttribute missing mandatory field: currency_type").entity("fare_attribute", fare_id.clone()).field("currency_type");
            }
            if payment.is_none() {
                result.error("fare_attributes", "FareAttribute missing mandatory field: payment_method").entity("fare_attribute", fare_id.clone()).field("payment_method");
            }
        }
    }
    result.info("fare_attributes", format!("Validated {} fare_attributes", rows.len()));
    Ok(())
}

async fn validate_feed_info(
    pool: &SqlitePool,
    feed_id: i64,
    prefs: &ValidationPreferences,
    result: &mut ValidationResult,
) -> Result<(), ValidationError> {
    let row = sqlx::query("SELECT publisher_name, publisher_url, lang FROM feed_infos WHERE feed_id = ?")
        .bind(feed_id)
        .fetch_optional(pool)
        .await?;
    let row = match row {
        Some(r) => r,
        None => {
            result.info("feed_info", format!("No feed_info found for feed {feed_id}"));
            return Ok(());
        }
    };
    if prefs.validate_feed_info_mandatory {
        let publisher_name: Option<String> = row.get("publisher_name");
        let publisher_url: Option<String> = row.get("publisher_url");
        let lang: Option<String> = row.get("lang");
        for (field, value) in [
            ("feed_publisher_name", &publisher_name),
            ("feed_publisher_url", &publisher_url),
            ("feed_lang", &lang),
        ] {
            if blank(value) {
                result
                    .error("feed_info", format!("FeedInfo missing mandatory field: {field}"))
                    .entity("feed_info", feed_id.to_string())
                    .field(field);
            }
        }
    }
    result.info("feed_info", "Validated feed_info");
    Ok(())
}
