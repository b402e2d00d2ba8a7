//! Feed Exporter (spec §4.C) — component C.
//!
//! Grounded on `examples/original_source/backend/app/services/gtfs_service.py`
//! (`GTFSService.export_gtfs_data`), re-expressed as direct `sqlx` row
//! streaming into `csv::Writer` buffers, zipped with the `zip` crate the way
//! the teacher already depends on it for archive handling.

use std::io::Write;

use sqlx::{Row, SqlitePool};
use zip::write::FileOptions;
use zip::ZipWriter;

use crate::error::ExportError;
use crate::gtfs::csv_common::standard_fields;
use crate::orchestrator::Orchestrator;

/// Selects the feed an export targets when the caller names an agency
/// rather than a specific feed: the most recently imported active feed
/// (spec §4.C, "Feed selection").
pub async fn most_recent_active_feed(pool: &SqlitePool, agency_id: i64) -> Result<Option<i64>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT id FROM feeds WHERE agency_id = ? AND is_active = 1
         ORDER BY imported_at DESC LIMIT 1",
    )
    .bind(agency_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| r.get("id")))
}

pub struct Exporter<'a> {
    pool: &'a SqlitePool,
    task_id: Option<i64>,
}

impl<'a> Exporter<'a> {
    pub fn new(pool: &'a SqlitePool, task_id: Option<i64>) -> Self {
        Exporter { pool, task_id }
    }

    async fn report(&self, percent: f64, message: &str) {
        if let Some(task_id) = self.task_id {
            let orch = Orchestrator::new(self.pool);
            let _ = orch.report_progress(task_id, percent, Some(message)).await;
        }
    }

    async fn check_cancelled(&self) -> Result<(), ExportError> {
        if let Some(task_id) = self.task_id {
            let orch = Orchestrator::new(self.pool);
            if orch.check_cancelled(task_id).await.unwrap_or(false) {
                return Err(crate::error::CancellationError(task_id).into());
            }
        }
        Ok(())
    }

    /// Produces a GTFS zip archive for `feed_id`. Files are emitted in the
    /// same order the importer consumes them, and only files that have at
    /// least one row are written (spec §4.C, "omit empty optional files").
    pub async fn export_feed(&self, feed_id: i64) -> Result<Vec<u8>, ExportError> {
        let mut buf = Vec::new();
        {
            let cursor = std::io::Cursor::new(&mut buf);
            let mut zip = ZipWriter::new(cursor);
            let options: FileOptions =
                FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

            self.report(0.0, "agency.txt").await;
            self.write_agency(&mut zip, &options, feed_id).await?;
            self.check_cancelled().await?;

            self.report(10.0, "routes.txt").await;
            self.write_table(
                &mut zip,
                &options,
                "routes",
                "SELECT * FROM routes WHERE feed_id = ? ORDER BY route_id",
                feed_id,
                &[
                    "route_id", "agency_id", "route_short_name", "route_long_name", "route_desc",
                    "route_type", "route_url", "route_color", "route_text_color", "route_sort_order",
                ],
            )
            .await?;
            self.check_cancelled().await?;

            self.report(20.0, "stops.txt").await;
            self.write_table(
                &mut zip,
                &options,
                "stops",
                "SELECT * FROM stops WHERE feed_id = ? ORDER BY stop_id",
                feed_id,
                &[
                    "stop_id", "stop_code", "stop_name", "stop_desc", "stop_lat", "stop_lon",
                    "zone_id", "stop_url", "location_type", "parent_station", "stop_timezone",
                    "wheelchair_boarding",
                ],
            )
            .await?;
            self.check_cancelled().await?;

            self.report(30.0, "calendar.txt").await;
            self.write_calendar(&mut zip, &options, feed_id).await?;
            self.check_cancelled().await?;

            self.report(40.0, "calendar_dates.txt").await;
            self.write_table(
                &mut zip,
                &options,
                "calendar_dates",
                "SELECT * FROM calendar_dates WHERE feed_id = ? ORDER BY service_id, date",
                feed_id,
                &["service_id", "date", "exception_type"],
            )
            .await?;
            self.check_cancelled().await?;

            self.report(45.0, "shapes.txt").await;
            self.write_table(
                &mut zip,
                &options,
                "shapes",
                "SELECT * FROM shapes WHERE feed_id = ? ORDER BY shape_id, shape_pt_sequence",
                feed_id,
                &["shape_id", "shape_pt_lat", "shape_pt_lon", "shape_pt_sequence", "shape_dist_traveled"],
            )
            .await?;
            self.check_cancelled().await?;

            self.report(55.0, "trips.txt").await;
            self.write_table(
                &mut zip,
                &options,
                "trips",
                "SELECT * FROM trips WHERE feed_id = ? ORDER BY trip_id",
                feed_id,
                &[
                    "route_id", "service_id", "trip_id", "trip_headsign", "trip_short_name",
                    "direction_id", "block_id", "shape_id", "wheelchair_accessible", "bikes_allowed",
                ],
            )
            .await?;
            self.check_cancelled().await?;

            self.report(65.0, "stop_times.txt").await;
            self.write_stop_times(&mut zip, &options, feed_id).await?;
            self.check_cancelled().await?;

            self.report(90.0, "fares/feed_info").await;
            self.write_table(
                &mut zip,
                &options,
                "fare_attributes",
                "SELECT * FROM fare_attributes WHERE feed_id = ? ORDER BY fare_id",
                feed_id,
                &["fare_id", "price", "currency_type", "payment_method", "transfers", "agency_id", "transfer_duration"],
            )
            .await?;
            self.write_table(
                &mut zip,
                &options,
                "fare_rules",
                "SELECT * FROM fare_rules WHERE feed_id = ? ORDER BY fare_id",
                feed_id,
                &["fare_id", "route_id", "origin_id", "destination_id", "contains_id"],
            )
            .await?;
            self.write_feed_info(&mut zip, &options, feed_id).await?;

            zip.finish()?;
        }

        self.report(100.0, "done").await;
        Ok(buf)
    }

    async fn write_agency(
        &self,
        zip: &mut ZipWriter<std::io::Cursor<&mut Vec<u8>>>,
        options: &FileOptions,
        feed_id: i64,
    ) -> Result<(), ExportError> {
        let feed = sqlx::query("SELECT agency_id FROM feeds WHERE id = ?")
            .bind(feed_id)
            .fetch_one(self.pool)
            .await?;
        let agency_id: i64 = feed.get("agency_id");
        let row = sqlx::query("SELECT * FROM agencies WHERE id = ?")
            .bind(agency_id)
            .fetch_one(self.pool)
            .await?;

        let mut wtr = csv::Writer::from_writer(vec![]);
        wtr.write_record([
            "agency_id",
            "agency_name",
            "agency_url",
            "agency_timezone",
            "agency_lang",
            "agency_phone",
            "agency_fare_url",
            "agency_email",
        ])?;
        let get_opt = |col: &str| -> String { row.try_get::<Option<String>, _>(col).ok().flatten().unwrap_or_default() };
        wtr.write_record([
            get_opt("agency_id"),
            row.get::<String, _>("name"),
            get_opt("agency_url"),
            get_opt("agency_timezone"),
            get_opt("agency_lang"),
            get_opt("agency_phone"),
            get_opt("agency_fare_url"),
            get_opt("agency_email"),
        ])?;
        let bytes = wtr.into_inner().map_err(|e| ExportError::Io(e.into_error()))?;
        zip.start_file("agency.txt", *options)?;
        zip.write_all(&bytes)?;
        Ok(())
    }

    async fn write_calendar(
        &self,
        zip: &mut ZipWriter<std::io::Cursor<&mut Vec<u8>>>,
        options: &FileOptions,
        feed_id: i64,
    ) -> Result<(), ExportError> {
        let rows = sqlx::query("SELECT * FROM calendars WHERE feed_id = ? ORDER BY service_id")
            .bind(feed_id)
            .fetch_all(self.pool)
            .await?;
        if rows.is_empty() {
            return Ok(());
        }

        // Custom columns (spec §4.B.5) get re-merged into the row as extra
        // trailing columns, same as `write_table`: standard fields followed
        // by sorted custom-field keys (spec §4.C).
        let mut seen = std::collections::BTreeSet::new();
        for row in &rows {
            if let Ok(Some(raw)) = row.try_get::<Option<String>, _>("custom_fields") {
                if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(&raw) {
                    for key in map.keys() {
                        seen.insert(key.clone());
                    }
                }
            }
        }
        let custom_keys: Vec<String> = seen.into_iter().collect();

        let mut wtr = csv::Writer::from_writer(vec![]);
        let mut header: Vec<String> = [
            "service_id", "monday", "tuesday", "wednesday", "thursday", "friday", "saturday",
            "sunday", "start_date", "end_date",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        header.extend(custom_keys.iter().cloned());
        wtr.write_record(&header)?;

        for row in &rows {
            let flag = |c: &str| -> String {
                if row.get::<i64, _>(c) != 0 { "1".to_string() } else { "0".to_string() }
            };
            let mut record = vec![
                row.get::<String, _>("service_id"),
                flag("monday"),
                flag("tuesday"),
                flag("wednesday"),
                flag("thursday"),
                flag("friday"),
                flag("saturday"),
                flag("sunday"),
                row.get::<String, _>("start_date"),
                row.get::<String, _>("end_date"),
            ];
            let custom: serde_json::Value = row
                .try_get::<Option<String>, _>("custom_fields")
                .ok()
                .flatten()
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_else(|| serde_json::json!({}));
            for key in &custom_keys {
                record.push(custom.get(key).and_then(|v| v.as_str()).unwrap_or_default().to_string());
            }
            wtr.write_record(&record)?;
        }
        let bytes = wtr.into_inner().map_err(|e| ExportError::Io(e.into_error()))?;
        zip.start_file("calendar.txt", *options)?;
        zip.write_all(&bytes)?;
        Ok(())
    }

    async fn write_feed_info(
        &self,
        zip: &mut ZipWriter<std::io::Cursor<&mut Vec<u8>>>,
        options: &FileOptions,
        feed_id: i64,
    ) -> Result<(), ExportError> {
        let Some(row) = sqlx::query("SELECT * FROM feed_infos WHERE feed_id = ?")
            .bind(feed_id)
            .fetch_optional(self.pool)
            .await?
        else {
            return Ok(());
        };
        let mut wtr = csv::Writer::from_writer(vec![]);
        wtr.write_record([
            "feed_publisher_name",
            "feed_publisher_url",
            "feed_lang",
            "default_lang",
            "feed_start_date",
            "feed_end_date",
            "feed_version",
            "feed_contact_email",
            "feed_contact_url",
        ])?;
        let get_opt = |col: &str| -> String { row.try_get::<Option<String>, _>(col).ok().flatten().unwrap_or_default() };
        wtr.write_record([
            get_opt("publisher_name"),
            get_opt("publisher_url"),
            get_opt("lang"),
            get_opt("default_lang"),
            get_opt("start_date"),
            get_opt("end_date"),
            get_opt("version"),
            get_opt("contact_email"),
            get_opt("contact_url"),
        ])?;
        let bytes = wtr.into_inner().map_err(|e| ExportError::Io(e.into_error()))?;
        zip.start_file("feed_info.txt", *options)?;
        zip.write_all(&bytes)?;
        Ok(())
    }

    /// Generic column-to-column export for tables whose custom fields
    /// (spec §4.B.5) get re-merged into the row as extra trailing columns.
    async fn write_table(
        &self,
        zip: &mut ZipWriter<std::io::Cursor<&mut Vec<u8>>>,
        options: &FileOptions,
        file: &str,
        query: &str,
        feed_id: i64,
        gtfs_columns: &[&str],
    ) -> Result<(), ExportError> {
        let rows = sqlx::query(query).bind(feed_id).fetch_all(self.pool).await?;
        if rows.is_empty() {
            return Ok(());
        }

        let has_custom = standard_fields(file) != gtfs_columns
            || rows.iter().any(|r| {
                r.try_get::<Option<String>, _>("custom_fields")
                    .ok()
                    .flatten()
                    .map(|s| s != "{}" && !s.is_empty())
                    .unwrap_or(false)
            });
        let mut custom_keys: Vec<String> = Vec::new();
        if has_custom {
            let mut seen = std::collections::BTreeSet::new();
            for row in &rows {
                if let Ok(Some(raw)) = row.try_get::<Option<String>, _>("custom_fields") {
                    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(&raw) {
                        for key in map.keys() {
                            seen.insert(key.clone());
                        }
                    }
                }
            }
            custom_keys = seen.into_iter().collect();
        }

        let mut wtr = csv::Writer::from_writer(vec![]);
        let mut header: Vec<String> = gtfs_columns.iter().map(|s| s.to_string()).collect();
        header.extend(custom_keys.iter().cloned());
        wtr.write_record(&header)?;

        for row in &rows {
            let mut record: Vec<String> = gtfs_columns
                .iter()
                .map(|col| match row.try_get::<Option<i64>, _>(*col) {
                    Ok(Some(v)) => v.to_string(),
                    _ => match row.try_get::<Option<f64>, _>(*col) {
                        Ok(Some(v)) => v.to_string(),
                        _ => row
                            .try_get::<Option<String>, _>(*col)
                            .ok()
                            .flatten()
                            .unwrap_or_default(),
                    },
                })
                .collect();
            let custom: serde_json::Value = row
                .try_get::<Option<String>, _>("custom_fields")
                .ok()
                .flatten()
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_else(|| serde_json::json!({}));
            for key in &custom_keys {
                record.push(
                    custom
                        .get(key)
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                );
            }
            wtr.write_record(&record)?;
        }

        let bytes = wtr.into_inner().map_err(|e| ExportError::Io(e.into_error()))?;
        zip.start_file(format!("{file}.txt"), *options)?;
        zip.write_all(&bytes)?;
        Ok(())
    }

    async fn write_stop_times(
        &self,
        zip: &mut ZipWriter<std::io::Cursor<&mut Vec<u8>>>,
        options: &FileOptions,
        feed_id: i64,
    ) -> Result<(), ExportError> {
        let rows = sqlx::query(
            "SELECT * FROM stop_times WHERE feed_id = ? ORDER BY trip_id, stop_sequence",
        )
        .bind(feed_id)
        .fetch_all(self.pool)
        .await?;
        if rows.is_empty() {
            return Ok(());
        }
        let mut wtr = csv::Writer::from_writer(vec![]);
        wtr.write_record([
            "trip_id", "arrival_time", "departure_time", "stop_id", "stop_sequence",
            "stop_headsign", "pickup_type", "drop_off_type", "shape_dist_traveled", "timepoint",
        ])?;
        for row in rows {
            let opt_str = |c: &str| -> String { row.try_get::<Option<String>, _>(c).ok().flatten().unwrap_or_default() };
            let opt_i64 = |c: &str| -> String {
                row.try_get::<Option<i64>, _>(c).ok().flatten().map(|v| v.to_string()).unwrap_or_default()
            };
            let opt_f64 = |c: &str| -> String {
                row.try_get::<Option<f64>, _>(c).ok().flatten().map(|v| v.to_string()).unwrap_or_default()
            };
            wtr.write_record([
                row.get::<String, _>("trip_id"),
                opt_str("arrival_time"),
                opt_str("departure_time"),
                row.get::<String, _>("stop_id"),
                row.get::<i64, _>("stop_sequence").to_string(),
                opt_str("stop_headsign"),
                opt_i64("pickup_type"),
                opt_i64("drop_off_type"),
                opt_f64("shape_dist_traveled"),
                opt_i64("timepoint"),
            ])?;
        }
        let bytes = wtr.into_inner().map_err(|e| ExportError::Io(e.into_error()))?;
        zip.start_file("stop_times.txt", *options)?;
        zip.write_all(&bytes)?;
        Ok(())
    }
}
