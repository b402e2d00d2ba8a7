//! Feed Importer (spec §4.B) — component B.
//!
//! Grounded on `examples/original_source/backend/app/services/gtfs_service.py`
//! (`GTFSService.import_gtfs_data` and friends) and `app/tasks.py::import_gtfs`,
//! translated from SQLAlchemy ORM batches into direct `sqlx` batched
//! INSERTs over composite-key tables (spec §9, "Implementers should prefer
//! composite-key primary keys directly").

use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Read};

use log::{info, warn};
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::config::bulk_batch_size;
use crate::db::models::{encode_json_col, Calendar};
use crate::error::ImportError;
use crate::gtfs::csv_common::{
    self, is_ignorable_member, required_columns, RECOGNIZED_FILES, REQUIRED_FILES,
};
use crate::orchestrator::Orchestrator;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportOptions {
    pub replace_existing: bool,
    pub validate_only: bool,
    pub skip_shapes: bool,
    pub stop_on_error: bool,
    pub feed_name: Option<String>,
    pub description: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IssueSeverity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveIssue {
    pub severity: IssueSeverity,
    pub file: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FileStats {
    pub imported: u64,
    pub updated: u64,
    pub skipped: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportResult {
    pub feed_id: i64,
    pub total_routes: i64,
    pub total_stops: i64,
    pub total_trips: i64,
    pub file_stats: HashMap<String, FileStats>,
    pub missing_stop_ids: Vec<String>,
    pub missing_trip_ids: Vec<String>,
    pub issues: Vec<ArchiveIssue>,
}

/// Pre-pass archive validation (spec §4.B.1). Returns the issues found;
/// does not itself decide whether to abort — the caller checks
/// `has_errors()` against `stop_on_error`.
pub struct ArchivePrepass {
    pub issues: Vec<ArchiveIssue>,
    pub members: HashMap<String, String>,
    /// The typed cause of the first error-severity issue found, in archive
    /// scan order. `None` when `issues` has no `Error`-severity entry.
    pub first_error: Option<ImportError>,
}

impl ArchivePrepass {
    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(|i| i.severity == IssueSeverity::Error)
    }
}

pub fn prepass(zip_bytes: &[u8]) -> Result<ArchivePrepass, ImportError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(zip_bytes))
        .map_err(|e| ImportError::InvalidArchive(e.to_string()))?;

    let mut members: HashMap<String, String> = HashMap::new();
    let mut issues = Vec::new();
    let mut first_error: Option<ImportError> = None;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| ImportError::InvalidArchive(e.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        if is_ignorable_member(&name) {
            issues.push(ArchiveIssue {
                severity: IssueSeverity::Info,
                file: Some(name.clone()),
                message: "archive member is not a recognized GTFS file; skipped".to_string(),
            });
            continue;
        }
        let Some(stem) = csv_common::file_stem(&name) else {
            continue;
        };
        let mut raw = Vec::new();
        entry
            .read_to_end(&mut raw)
            .map_err(|e| ImportError::InvalidArchive(e.to_string()))?;
        // BOM-tolerant UTF-8 decode.
        let stripped = raw.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(&raw);
        match String::from_utf8(stripped.to_vec()) {
            Ok(text) => {
                members.insert(stem.to_string(), text);
            }
            Err(_) => {
                issues.push(ArchiveIssue {
                    severity: IssueSeverity::Error,
                    file: Some(name.clone()),
                    message: "file is not valid UTF-8".to_string(),
                });
                first_error.get_or_insert(ImportError::InvalidEncoding(name.clone()));
            }
        }
    }

    let missing_files: Vec<&'static str> = REQUIRED_FILES
        .iter()
        .copied()
        .filter(|required| !members.contains_key(*required))
        .collect();
    for required in &missing_files {
        issues.push(ArchiveIssue {
            severity: IssueSeverity::Error,
            file: Some(format!("{required}.txt")),
            message: "required file missing from archive".to_string(),
        });
    }
    if !missing_files.is_empty() {
        first_error.get_or_insert(ImportError::MissingRequiredFiles(missing_files));
    }

    for (file, text) in &members {
        let mut reader = csv::ReaderBuilder::new().from_reader(text.as_bytes());
        let headers = match reader.headers() {
            Ok(h) => h.clone(),
            Err(e) => {
                issues.push(ArchiveIssue {
                    severity: IssueSeverity::Error,
                    file: Some(format!("{file}.txt")),
                    message: format!("unparseable CSV: {e}"),
                });
                continue;
            }
        };
        let have: HashSet<&str> = headers.iter().collect();
        let missing: Vec<String> = required_columns(file)
            .iter()
            .filter(|c| !have.contains(*c))
            .map(|c| c.to_string())
            .collect();
        if !missing.is_empty() {
            issues.push(ArchiveIssue {
                severity: IssueSeverity::Error,
                file: Some(format!("{file}.txt")),
                message: format!("missing required column(s): {missing:?}"),
            });
            if let Some(&canonical) = RECOGNIZED_FILES.iter().find(|&&f| f == file) {
                first_error.get_or_insert(ImportError::MissingRequiredColumns {
                    file: canonical,
                    columns: missing,
                });
            }
        }
    }

    Ok(ArchivePrepass { issues, members, first_error })
}

fn row_map(headers: &csv::StringRecord, record: &csv::StringRecord) -> HashMap<String, String> {
    headers
        .iter()
        .zip(record.iter())
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn parse_opt_i64(row: &HashMap<String, String>, key: &str) -> Option<i64> {
    row.get(key).filter(|s| !s.is_empty()).and_then(|s| s.parse().ok())
}

fn parse_opt_f64(row: &HashMap<String, String>, key: &str) -> Option<f64> {
    row.get(key).filter(|s| !s.is_empty()).and_then(|s| s.parse().ok())
}

fn parse_opt_str(row: &HashMap<String, String>, key: &str) -> Option<String> {
    row.get(key).filter(|s| !s.is_empty()).cloned()
}

/// Progress bands from spec §4.B.6.
struct ProgressBands;
impl ProgressBands {
    const AGENCY: (f64, f64) = (0.0, 5.0);
    const ROUTES: (f64, f64) = (5.0, 10.0);
    const STOPS: (f64, f64) = (10.0, 20.0);
    const CALENDAR: (f64, f64) = (20.0, 30.0);
    const CALENDAR_DATES: (f64, f64) = (30.0, 35.0);
    const SHAPES: (f64, f64) = (35.0, 40.0);
    const TRIPS: (f64, f64) = (40.0, 45.0);
    const STOP_TIMES: (f64, f64) = (45.0, 85.0);
    const TAILS: (f64, f64) = (85.0, 95.0);
    const FINALIZE: (f64, f64) = (95.0, 100.0);
}

pub struct Importer<'a> {
    pool: &'a SqlitePool,
    task_id: Option<i64>,
}

impl<'a> Importer<'a> {
    pub fn new(pool: &'a SqlitePool, task_id: Option<i64>) -> Self {
        Importer { pool, task_id }
    }

    async fn report(&self, percent: f64, message: &str) -> Result<(), ImportError> {
        if let Some(task_id) = self.task_id {
            let orch = Orchestrator::new(self.pool);
            orch.report_progress(task_id, percent, Some(message)).await.ok();
        }
        Ok(())
    }

    async fn check_cancelled(&self) -> Result<(), ImportError> {
        if let Some(task_id) = self.task_id {
            let orch = Orchestrator::new(self.pool);
            if orch.check_cancelled(task_id).await.unwrap_or(false) {
                return Err(crate::error::CancellationError(task_id).into());
            }
        }
        Ok(())
    }

    /// Runs the full import inside a single transaction, per spec §4.B.2
    /// ("the entire import runs inside a single transaction bracket ...
    /// committed at the end").
    pub async fn import_archive(
        &self,
        agency_id: i64,
        zip_bytes: &[u8],
        options: &ImportOptions,
    ) -> Result<ImportResult, ImportError> {
        let agency_exists: Option<i64> = sqlx::query("SELECT id FROM agencies WHERE id = ?")
            .bind(agency_id)
            .fetch_optional(self.pool)
            .await
            .map_err(ImportError::Db)?
            .map(|r| r.get("id"));
        if agency_exists.is_none() {
            return Err(crate::error::PreconditionError::UnknownAgency(agency_id).into());
        }

        let mut prepass = prepass(zip_bytes)?;
        if prepass.has_errors() && options.stop_on_error {
            return Err(prepass.first_error.take().unwrap_or(ImportError::StoppedOnError));
        }

        let mut result = ImportResult {
            issues: prepass.issues.clone(),
            ..Default::default()
        };

        if options.validate_only {
            return Ok(result);
        }

        let mut tx = self.pool.begin().await.map_err(ImportError::Db)?;

        if options.replace_existing {
            let other_feeds: Vec<i64> =
                sqlx::query("SELECT id FROM feeds WHERE agency_id = ?")
                    .bind(agency_id)
                    .fetch_all(&mut *tx)
                    .await
                    .map_err(ImportError::Db)?
                    .into_iter()
                    .map(|r| r.get("id"))
                    .collect();
            for old_feed_id in other_feeds {
                delete_feed_rows(&mut tx, old_feed_id).await.map_err(ImportError::Db)?;
                sqlx::query("DELETE FROM feeds WHERE id = ?")
                    .bind(old_feed_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(ImportError::Db)?;
            }
        }

        let now = chrono::Utc::now().to_rfc3339();
        let feed_row = sqlx::query(
            "INSERT INTO feeds (agency_id, name, description, version, imported_at, is_active)
             VALUES (?, ?, ?, ?, ?, 1)",
        )
        .bind(agency_id)
        .bind(options.feed_name.clone().unwrap_or_else(|| "Imported feed".to_string()))
        .bind(&options.description)
        .bind(&options.version)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(ImportError::Db)?;
        let feed_id = feed_row.last_insert_rowid();
        result.feed_id = feed_id;

        // --- 1. agency.txt (0-5%) ---
        self.report(ProgressBands::AGENCY.0, "agency.txt").await?;
        if let Some(text) = prepass.members.get("agency") {
            let stats = import_agency(&mut tx, agency_id, text).await?;
            result.file_stats.insert("agency".to_string(), stats);
        }
        self.report(ProgressBands::AGENCY.1, "agency.txt done").await?;
        self.check_cancelled().await?;

        // --- 2. routes.txt (5-10%) ---
        self.report(ProgressBands::ROUTES.0, "routes.txt").await?;
        if let Some(text) = prepass.members.get("routes") {
            let stats = import_routes(&mut tx, feed_id, agency_id, text).await?;
            result.file_stats.insert("routes".to_string(), stats);
        }
        self.report(ProgressBands::ROUTES.1, "routes.txt done").await?;
        self.check_cancelled().await?;

        // --- 3. stops.txt (10-20%) ---
        self.report(ProgressBands::STOPS.0, "stops.txt").await?;
        if let Some(text) = prepass.members.get("stops") {
            let stats = import_stops(&mut tx, feed_id, text).await?;
            result.file_stats.insert("stops".to_string(), stats);
        }
        self.report(ProgressBands::STOPS.1, "stops.txt done").await?;
        self.check_cancelled().await?;

        // --- 4. calendar.txt (20-30%) ---
        self.report(ProgressBands::CALENDAR.0, "calendar.txt").await?;
        if let Some(text) = prepass.members.get("calendar") {
            let stats = import_calendar(&mut tx, feed_id, text).await?;
            result.file_stats.insert("calendar".to_string(), stats);
        }
        self.report(ProgressBands::CALENDAR.1, "calendar.txt done").await?;
        self.check_cancelled().await?;

        // --- 5. calendar_dates.txt (30-35%) ---
        self.report(ProgressBands::CALENDAR_DATES.0, "calendar_dates.txt").await?;
        if let Some(text) = prepass.members.get("calendar_dates") {
            let stats = import_calendar_dates(&mut tx, feed_id, text).await?;
            result.file_stats.insert("calendar_dates".to_string(), stats);
        }
        self.report(ProgressBands::CALENDAR_DATES.1, "calendar_dates.txt done").await?;
        self.check_cancelled().await?;

        // --- 6. shapes.txt (35-40%) ---
        self.report(ProgressBands::SHAPES.0, "shapes.txt").await?;
        if !options.skip_shapes {
            if let Some(text) = prepass.members.get("shapes") {
                let stats = import_shapes(&mut tx, feed_id, text).await?;
                result.file_stats.insert("shapes".to_string(), stats);
            }
        }
        self.report(ProgressBands::SHAPES.1, "shapes.txt done").await?;
        self.check_cancelled().await?;

        // --- 7. trips.txt (40-45%) ---
        self.report(ProgressBands::TRIPS.0, "trips.txt").await?;
        if let Some(text) = prepass.members.get("trips") {
            let stats = import_trips(&mut tx, feed_id, text).await?;
            result.file_stats.insert("trips".to_string(), stats);
        }
        self.report(ProgressBands::TRIPS.1, "trips.txt done").await?;
        self.check_cancelled().await?;

        // --- 8. stop_times.txt (45-85%) ---
        if let Some(text) = prepass.members.get("stop_times") {
            let (stats, missing_stops, missing_trips) =
                self.import_stop_times(&mut tx, feed_id, text).await?;
            result.file_stats.insert("stop_times".to_string(), stats);
            result.missing_stop_ids = missing_stops;
            result.missing_trip_ids = missing_trips;
        }
        self.check_cancelled().await?;

        // --- 9. fares, feed_info (85-95%) ---
        self.report(ProgressBands::TAILS.0, "fares/feed_info").await?;
        if let Some(text) = prepass.members.get("fare_attributes") {
            let stats = import_fare_attributes(&mut tx, feed_id, text).await?;
            result.file_stats.insert("fare_attributes".to_string(), stats);
        }
        if let Some(text) = prepass.members.get("fare_rules") {
            let stats = import_fare_rules(&mut tx, feed_id, text).await?;
            result.file_stats.insert("fare_rules".to_string(), stats);
        }
        if let Some(text) = prepass.members.get("feed_info") {
            let stats = import_feed_info(&mut tx, feed_id, text).await?;
            result.file_stats.insert("feed_info".to_string(), stats);
        }
        self.report(ProgressBands::TAILS.1, "tails done").await?;

        // --- 10. finalize (95-100%) ---
        self.report(ProgressBands::FINALIZE.0, "finalize").await?;
        let (routes, stops, trips) = recount_feed(&mut tx, feed_id).await.map_err(ImportError::Db)?;
        sqlx::query(
            "UPDATE feeds SET total_routes = ?, total_stops = ?, total_trips = ? WHERE id = ?",
        )
        .bind(routes)
        .bind(stops)
        .bind(trips)
        .bind(feed_id)
        .execute(&mut *tx)
        .await
        .map_err(ImportError::Db)?;
        result.total_routes = routes;
        result.total_stops = stops;
        result.total_trips = trips;

        tx.commit().await.map_err(ImportError::Db)?;
        self.report(ProgressBands::FINALIZE.1, "committed").await?;

        info!(
            "import_gtfs: feed {feed_id} imported ({routes} routes, {stops} stops, {trips} trips)"
        );
        Ok(result)
    }

    async fn import_stop_times(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        feed_id: i64,
        text: &str,
    ) -> Result<(FileStats, Vec<String>, Vec<String>), ImportError> {
        let mut stats = FileStats::default();

        let valid_trip_ids: HashSet<String> =
            sqlx::query("SELECT trip_id FROM trips WHERE feed_id = ?")
                .bind(feed_id)
                .fetch_all(&mut **tx)
                .await
                .map_err(ImportError::Db)?
                .into_iter()
                .map(|r| r.get("trip_id"))
                .collect();
        let valid_stop_ids: HashSet<String> =
            sqlx::query("SELECT stop_id FROM stops WHERE feed_id = ?")
                .bind(feed_id)
                .fetch_all(&mut **tx)
                .await
                .map_err(ImportError::Db)?
                .into_iter()
                .map(|r| r.get("stop_id"))
                .collect();
        let mut existing: HashSet<(String, i64)> = sqlx::query(
            "SELECT trip_id, stop_sequence FROM stop_times WHERE feed_id = ?",
        )
        .bind(feed_id)
        .fetch_all(&mut **tx)
        .await
        .map_err(ImportError::Db)?
        .into_iter()
        .map(|r| (r.get("trip_id"), r.get("stop_sequence")))
        .collect();

        let mut reader = csv::ReaderBuilder::new().from_reader(text.as_bytes());
        let headers = reader.headers().map_err(|e| ImportError::Csv { file: "stop_times", source: e })?.clone();

        const COLUMNS: usize = 10;
        let batch_size = bulk_batch_size(COLUMNS);

        let mut missing_stops: HashSet<String> = HashSet::new();
        let mut missing_trips: HashSet<String> = HashSet::new();
        let mut pending: Vec<HashMap<String, String>> = Vec::with_capacity(batch_size);

        // Count rows up front only to drive the linear progress interpolation;
        // the stream itself is processed once.
        let total_rows = text.lines().count().saturating_sub(1).max(1);
        let mut processed = 0usize;

        for record in reader.records() {
            let record = record.map_err(|e| ImportError::Csv { file: "stop_times", source: e })?;
            let row = row_map(&headers, &record);
            processed += 1;

            let trip_id = row.get("trip_id").cloned().unwrap_or_default();
            let stop_id = row.get("stop_id").cloned().unwrap_or_default();

            if !valid_trip_ids.contains(&trip_id) {
                missing_trips.insert(trip_id);
                stats.skipped += 1;
                continue;
            }
            if !valid_stop_ids.contains(&stop_id) {
                missing_stops.insert(stop_id);
                stats.skipped += 1;
                continue;
            }
            let Some(stop_sequence) = parse_opt_i64(&row, "stop_sequence") else {
                stats.errors += 1;
                continue;
            };

            let key = (trip_id.clone(), stop_sequence);
            if existing.contains(&key) {
                update_stop_time(tx, feed_id, &trip_id, stop_sequence, &row).await?;
                stats.updated += 1;
            } else {
                existing.insert(key);
                pending.push(row);
                if pending.len() >= batch_size {
                    let n = pending.len() as u64;
                    flush_stop_times_batch(tx, feed_id, &mut pending).await?;
                    stats.imported += n;
                    let pct = ProgressBands::STOP_TIMES.0
                        + (ProgressBands::STOP_TIMES.1 - ProgressBands::STOP_TIMES.0)
                            * (processed as f64 / total_rows as f64);
                    self.report(pct.min(ProgressBands::STOP_TIMES.1), "stop_times.txt").await?;
                    self.check_cancelled().await?;
                }
            }
        }
        if !pending.is_empty() {
            let n = pending.len() as u64;
            flush_stop_times_batch(tx, feed_id, &mut pending).await?;
            stats.imported += n;
        }

        self.report(ProgressBands::STOP_TIMES.1, "stop_times.txt done").await?;

        Ok((
            stats,
            missing_stops.into_iter().collect(),
            missing_trips.into_iter().collect(),
        ))
    }
}

async fn flush_stop_times_batch(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    feed_id: i64,
    pending: &mut Vec<HashMap<String, String>>,
) -> Result<(), ImportError> {
    for row in pending.drain(..) {
        let trip_id = row.get("trip_id").cloned().unwrap_or_default();
        let stop_sequence = parse_opt_i64(&row, "stop_sequence").unwrap_or_default();
        sqlx::query(
            "INSERT INTO stop_times
                (feed_id, trip_id, stop_sequence, stop_id, arrival_time, departure_time,
                 stop_headsign, pickup_type, drop_off_type, shape_dist_traveled, timepoint)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(feed_id)
        .bind(&trip_id)
        .bind(stop_sequence)
        .bind(row.get("stop_id"))
        .bind(parse_opt_str(&row, "arrival_time"))
        .bind(parse_opt_str(&row, "departure_time"))
        .bind(parse_opt_str(&row, "stop_headsign"))
        .bind(parse_opt_i64(&row, "pickup_type"))
        .bind(parse_opt_i64(&row, "drop_off_type"))
        .bind(parse_opt_f64(&row, "shape_dist_traveled"))
        .bind(parse_opt_i64(&row, "timepoint"))
        .execute(&mut **tx)
        .await
        .map_err(ImportError::Db)?;
    }
    Ok(())
}

async fn update_stop_time(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    feed_id: i64,
    trip_id: &str,
    stop_sequence: i64,
    row: &HashMap<String, String>,
) -> Result<(), ImportError> {
    sqlx::query(
        "UPDATE stop_times SET stop_id = ?, arrival_time = ?, departure_time = ?,
            stop_headsign = ?, pickup_type = ?, drop_off_type = ?, shape_dist_traveled = ?,
            timepoint = ?
         WHERE feed_id = ? AND trip_id = ? AND stop_sequence = ?",
    )
    .bind(row.get("stop_id"))
    .bind(parse_opt_str(row, "arrival_time"))
    .bind(parse_opt_str(row, "departure_time"))
    .bind(parse_opt_str(row, "stop_headsign"))
    .bind(parse_opt_i64(row, "pickup_type"))
    .bind(parse_opt_i64(row, "drop_off_type"))
    .bind(parse_opt_f64(row, "shape_dist_traveled"))
    .bind(parse_opt_i64(row, "timepoint"))
    .bind(feed_id)
    .bind(trip_id)
    .bind(stop_sequence)
    .execute(&mut **tx)
    .await
    .map_err(ImportError::Db)?;
    Ok(())
}

async fn import_agency(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    agency_id: i64,
    text: &str,
) -> Result<FileStats, ImportError> {
    let mut stats = FileStats::default();
    let mut reader = csv::ReaderBuilder::new().from_reader(text.as_bytes());
    let headers = reader.headers().map_err(|e| ImportError::Csv { file: "agency", source: e })?.clone();
    let mut rows = reader.records();

    if let Some(first) = rows.next() {
        let record = first.map_err(|e| ImportError::Csv { file: "agency", source: e })?;
        let row = row_map(&headers, &record);
        sqlx::query(
            "UPDATE agencies SET agency_id = ?, agency_url = ?, agency_timezone = ?,
                agency_lang = ?, agency_phone = ?, agency_fare_url = ?, agency_email = ?
             WHERE id = ?",
        )
        .bind(parse_opt_str(&row, "agency_id"))
        .bind(parse_opt_str(&row, "agency_url"))
        .bind(parse_opt_str(&row, "agency_timezone"))
        .bind(parse_opt_str(&row, "agency_lang"))
        .bind(parse_opt_str(&row, "agency_phone"))
        .bind(parse_opt_str(&row, "agency_fare_url"))
        .bind(parse_opt_str(&row, "agency_email"))
        .bind(agency_id)
        .execute(&mut **tx)
        .await
        .map_err(ImportError::Db)?;
        stats.updated += 1;
    }
    for extra in rows {
        let _ = extra;
        warn!("agency.txt: additional agency row skipped (multi-agency import is ambiguous; see SPEC_FULL.md)");
        stats.skipped += 1;
    }
    Ok(stats)
}

async fn import_routes(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    feed_id: i64,
    agency_id: i64,
    text: &str,
) -> Result<FileStats, ImportError> {
    let mut stats = FileStats::default();
    let mut reader = csv::ReaderBuilder::new().from_reader(text.as_bytes());
    let headers = reader.headers().map_err(|e| ImportError::Csv { file: "routes", source: e })?.clone();
    for record in reader.records() {
        let record = record.map_err(|e| ImportError::Csv { file: "routes", source: e })?;
        let row = row_map(&headers, &record);
        let Some(route_id) = parse_opt_str(&row, "route_id") else {
            stats.errors += 1;
            continue;
        };
        let custom = encode_json_col(&csv_common::split_custom_fields("routes", &row));
        sqlx::query(
            "INSERT INTO routes
                (feed_id, route_id, agency_id, route_short_name, route_long_name, route_desc,
                 route_type, route_url, route_color, route_text_color, route_sort_order, custom_fields)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(feed_id, route_id) DO UPDATE SET
                agency_id = excluded.agency_id, route_short_name = excluded.route_short_name,
                route_long_name = excluded.route_long_name, route_desc = excluded.route_desc,
                route_type = excluded.route_type, route_url = excluded.route_url,
                route_color = excluded.route_color, route_text_color = excluded.route_text_color,
                route_sort_order = excluded.route_sort_order, custom_fields = excluded.custom_fields",
        )
        .bind(feed_id)
        .bind(&route_id)
        .bind(agency_id)
        .bind(parse_opt_str(&row, "route_short_name"))
        .bind(parse_opt_str(&row, "route_long_name"))
        .bind(parse_opt_str(&row, "route_desc"))
        .bind(parse_opt_i64(&row, "route_type"))
        .bind(parse_opt_str(&row, "route_url"))
        .bind(parse_opt_str(&row, "route_color"))
        .bind(parse_opt_str(&row, "route_text_color"))
        .bind(parse_opt_i64(&row, "route_sort_order"))
        .bind(custom)
        .execute(&mut **tx)
        .await
        .map_err(ImportError::Db)?;
        stats.imported += 1;
    }
    Ok(stats)
}

async fn import_stops(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    feed_id: i64,
    text: &str,
) -> Result<FileStats, ImportError> {
    let mut stats = FileStats::default();
    let mut reader = csv::ReaderBuilder::new().from_reader(text.as_bytes());
    let headers = reader.headers().map_err(|e| ImportError::Csv { file: "stops", source: e })?.clone();
    for record in reader.records() {
        let record = record.map_err(|e| ImportError::Csv { file: "stops", source: e })?;
        let row = row_map(&headers, &record);
        let Some(stop_id) = parse_opt_str(&row, "stop_id") else {
            stats.errors += 1;
            continue;
        };
        let lat = parse_opt_f64(&row, "stop_lat");
        let lon = parse_opt_f64(&row, "stop_lon");
        let geom = match (lon, lat) {
            (Some(lon), Some(lat)) => Some(crate::db::models::point_to_wkt(geo_types::Point::new(lon, lat))),
            _ => None,
        };
        let custom = encode_json_col(&csv_common::split_custom_fields("stops", &row));
        sqlx::query(
            "INSERT INTO stops
                (feed_id, stop_id, stop_code, stop_name, stop_desc, stop_lat, stop_lon, zone_id,
                 stop_url, location_type, parent_station, stop_timezone, wheelchair_boarding, geom, custom_fields)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(feed_id, stop_id) DO UPDATE SET
                stop_code = excluded.stop_code, stop_name = excluded.stop_name,
                stop_desc = excluded.stop_desc, stop_lat = excluded.stop_lat, stop_lon = excluded.stop_lon,
                zone_id = excluded.zone_id, stop_url = excluded.stop_url, location_type = excluded.location_type,
                parent_station = excluded.parent_station, stop_timezone = excluded.stop_timezone,
                wheelchair_boarding = excluded.wheelchair_boarding, geom = excluded.geom,
                custom_fields = excluded.custom_fields",
        )
        .bind(feed_id)
        .bind(&stop_id)
        .bind(parse_opt_str(&row, "stop_code"))
        .bind(parse_opt_str(&row, "stop_name"))
        .bind(parse_opt_str(&row, "stop_desc"))
        .bind(lat)
        .bind(lon)
        .bind(parse_opt_str(&row, "zone_id"))
        .bind(parse_opt_str(&row, "stop_url"))
        .bind(parse_opt_i64(&row, "location_type"))
        .bind(parse_opt_str(&row, "parent_station"))
        .bind(parse_opt_str(&row, "stop_timezone"))
        .bind(parse_opt_i64(&row, "wheelchair_boarding"))
        .bind(geom)
        .bind(custom)
        .execute(&mut **tx)
        .await
        .map_err(ImportError::Db)?;
        stats.imported += 1;
    }
    Ok(stats)
}

async fn import_calendar(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    feed_id: i64,
    text: &str,
) -> Result<FileStats, ImportError> {
    let mut stats = FileStats::default();
    let mut reader = csv::ReaderBuilder::new().from_reader(text.as_bytes());
    let headers = reader.headers().map_err(|e| ImportError::Csv { file: "calendar", source: e })?.clone();
    for record in reader.records() {
        let record = record.map_err(|e| ImportError::Csv { file: "calendar", source: e })?;
        let row = row_map(&headers, &record);
        let Some(service_id) = parse_opt_str(&row, "service_id") else {
            stats.errors += 1;
            continue;
        };
        let day = |k: &str| row.get(k).map(|v| v == "1").unwrap_or(false) as i64;
        let custom = encode_json_col(&csv_common::split_custom_fields("calendar", &row));
        sqlx::query(
            "INSERT INTO calendars
                (feed_id, service_id, monday, tuesday, wednesday, thursday, friday, saturday, sunday,
                 start_date, end_date, custom_fields)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(feed_id, service_id) DO UPDATE SET
                monday = excluded.monday, tuesday = excluded.tuesday, wednesday = excluded.wednesday,
                thursday = excluded.thursday, friday = excluded.friday, saturday = excluded.saturday,
                sunday = excluded.sunday, start_date = excluded.start_date, end_date = excluded.end_date,
                custom_fields = excluded.custom_fields",
        )
        .bind(feed_id)
        .bind(&service_id)
        .bind(day("monday"))
        .bind(day("tuesday"))
        .bind(day("wednesday"))
        .bind(day("thursday"))
        .bind(day("friday"))
        .bind(day("saturday"))
        .bind(day("sunday"))
        .bind(row.get("start_date").cloned().unwrap_or_default())
        .bind(row.get("end_date").cloned().unwrap_or_default())
        .bind(custom)
        .execute(&mut **tx)
        .await
        .map_err(ImportError::Db)?;
        stats.imported += 1;
    }
    Ok(stats)
}

/// calendar_dates.txt may introduce service_ids unseen in calendar.txt; the
/// importer auto-creates a sentinel Calendar row for each (spec §4.B.2).
async fn import_calendar_dates(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    feed_id: i64,
    text: &str,
) -> Result<FileStats, ImportError> {
    let mut stats = FileStats::default();

    let known_services: HashSet<String> =
        sqlx::query("SELECT service_id FROM calendars WHERE feed_id = ?")
            .bind(feed_id)
            .fetch_all(&mut **tx)
            .await
            .map_err(ImportError::Db)?
            .into_iter()
            .map(|r| r.get("service_id"))
            .collect();
    let mut created_sentinels: HashSet<String> = HashSet::new();

    let mut reader = csv::ReaderBuilder::new().from_reader(text.as_bytes());
    let headers = reader
        .headers()
        .map_err(|e| ImportError::Csv { file: "calendar_dates", source: e })?
        .clone();
    for record in reader.records() {
        let record = record.map_err(|e| ImportError::Csv { file: "calendar_dates", source: e })?;
        let row = row_map(&headers, &record);
        let (Some(service_id), Some(date)) =
            (parse_opt_str(&row, "service_id"), parse_opt_str(&row, "date"))
        else {
            stats.errors += 1;
            continue;
        };
        let Some(exception_type) = parse_opt_i64(&row, "exception_type") else {
            stats.errors += 1;
            continue;
        };

        if !known_services.contains(&service_id) && !created_sentinels.contains(&service_id) {
            let sentinel = Calendar::sentinel(feed_id, &service_id);
            sqlx::query(
                "INSERT INTO calendars
                    (feed_id, service_id, monday, tuesday, wednesday, thursday, friday, saturday, sunday,
                     start_date, end_date)
                 VALUES (?, ?, 0, 0, 0, 0, 0, 0, 0, ?, ?)
                 ON CONFLICT(feed_id, service_id) DO NOTHING",
            )
            .bind(feed_id)
            .bind(&sentinel.service_id)
            .bind(&sentinel.start_date)
            .bind(&sentinel.end_date)
            .execute(&mut **tx)
            .await
            .map_err(ImportError::Db)?;
            created_sentinels.insert(service_id.clone());
        }

        sqlx::query(
            "INSERT INTO calendar_dates (feed_id, service_id, date, exception_type)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(feed_id, service_id, date) DO UPDATE SET exception_type = excluded.exception_type",
        )
        .bind(feed_id)
        .bind(&service_id)
        .bind(&date)
        .bind(exception_type)
        .execute(&mut **tx)
        .await
        .map_err(ImportError::Db)?;
        stats.imported += 1;
    }
    Ok(stats)
}

async fn import_shapes(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    feed_id: i64,
    text: &str,
) -> Result<FileStats, ImportError> {
    let mut stats = FileStats::default();
    let mut reader = csv::ReaderBuilder::new().from_reader(text.as_bytes());
    let headers = reader.headers().map_err(|e| ImportError::Csv { file: "shapes", source: e })?.clone();
    for record in reader.records() {
        let record = record.map_err(|e| ImportError::Csv { file: "shapes", source: e })?;
        let row = row_map(&headers, &record);
        let (Some(shape_id), Some(seq), Some(lat), Some(lon)) = (
            parse_opt_str(&row, "shape_id"),
            parse_opt_i64(&row, "shape_pt_sequence"),
            parse_opt_f64(&row, "shape_pt_lat"),
            parse_opt_f64(&row, "shape_pt_lon"),
        ) else {
            stats.errors += 1;
            continue;
        };
        sqlx::query(
            "INSERT INTO shapes (feed_id, shape_id, shape_pt_sequence, shape_pt_lat, shape_pt_lon, shape_dist_traveled)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(feed_id, shape_id, shape_pt_sequence) DO UPDATE SET
                shape_pt_lat = excluded.shape_pt_lat, shape_pt_lon = excluded.shape_pt_lon,
                shape_dist_traveled = excluded.shape_dist_traveled",
        )
        .bind(feed_id)
        .bind(&shape_id)
        .bind(seq)
        .bind(lat)
        .bind(lon)
        .bind(parse_opt_f64(&row, "shape_dist_traveled"))
        .execute(&mut **tx)
        .await
        .map_err(ImportError::Db)?;
        stats.imported += 1;
    }
    Ok(stats)
}

async fn import_trips(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    feed_id: i64,
    text: &str,
) -> Result<FileStats, ImportError> {
    let mut stats = FileStats::default();

    let valid_routes: HashSet<String> = sqlx::query("SELECT route_id FROM routes WHERE feed_id = ?")
        .bind(feed_id)
        .fetch_all(&mut **tx)
        .await
        .map_err(ImportError::Db)?
        .into_iter()
        .map(|r| r.get("route_id"))
        .collect();
    let valid_services: HashSet<String> =
        sqlx::query("SELECT service_id FROM calendars WHERE feed_id = ?")
            .bind(feed_id)
            .fetch_all(&mut **tx)
            .await
            .map_err(ImportError::Db)?
            .into_iter()
            .map(|r| r.get("service_id"))
            .collect();
    let valid_shapes: HashSet<String> = sqlx::query(
        "SELECT DISTINCT shape_id FROM shapes WHERE feed_id = ?",
    )
    .bind(feed_id)
    .fetch_all(&mut **tx)
    .await
    .map_err(ImportError::Db)?
    .into_iter()
    .map(|r| r.get("shape_id"))
    .collect();

    let mut reader = csv::ReaderBuilder::new().from_reader(text.as_bytes());
    let headers = reader.headers().map_err(|e| ImportError::Csv { file: "trips", source: e })?.clone();
    for record in reader.records() {
        let record = record.map_err(|e| ImportError::Csv { file: "trips", source: e })?;
        let row = row_map(&headers, &record);
        let (Some(trip_id), Some(route_id), Some(service_id)) = (
            parse_opt_str(&row, "trip_id"),
            parse_opt_str(&row, "route_id"),
            parse_opt_str(&row, "service_id"),
        ) else {
            stats.errors += 1;
            continue;
        };
        if !valid_routes.contains(&route_id) || !valid_services.contains(&service_id) {
            stats.skipped += 1;
            continue;
        }
        let mut shape_id = parse_opt_str(&row, "shape_id");
        if let Some(sid) = &shape_id {
            if !valid_shapes.contains(sid) {
                warn!("trips.txt: trip {trip_id} references unknown shape {sid}; stored with shape_id=null");
                shape_id = None;
            }
        }
        let custom = encode_json_col(&csv_common::split_custom_fields("trips", &row));
        sqlx::query(
            "INSERT INTO trips
                (feed_id, trip_id, route_id, service_id, trip_headsign, trip_short_name, direction_id,
                 block_id, shape_id, wheelchair_accessible, bikes_allowed, custom_fields)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(feed_id, trip_id) DO UPDATE SET
                route_id = excluded.route_id, service_id = excluded.service_id,
                trip_headsign = excluded.trip_headsign, trip_short_name = excluded.trip_short_name,
                direction_id = excluded.direction_id, block_id = excluded.block_id,
                shape_id = excluded.shape_id, wheelchair_accessible = excluded.wheelchair_accessible,
                bikes_allowed = excluded.bikes_allowed, custom_fields = excluded.custom_fields",
        )
        .bind(feed_id)
        .bind(&trip_id)
        .bind(&route_id)
        .bind(&service_id)
        .bind(parse_opt_str(&row, "trip_headsign"))
        .bind(parse_opt_str(&row, "trip_short_name"))
        .bind(parse_opt_i64(&row, "direction_id"))
        .bind(parse_opt_str(&row, "block_id"))
        .bind(&shape_id)
        .bind(parse_opt_i64(&row, "wheelchair_accessible"))
        .bind(parse_opt_i64(&row, "bikes_allowed"))
        .bind(custom)
        .execute(&mut **tx)
        .await
        .map_err(ImportError::Db)?;
        stats.imported += 1;
    }
    Ok(stats)
}

async fn import_fare_attributes(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    feed_id: i64,
    text: &str,
) -> Result<FileStats, ImportError> {
    let mut stats = FileStats::default();
    let mut reader = csv::ReaderBuilder::new().from_reader(text.as_bytes());
    let headers = reader
        .headers()
        .map_err(|e| ImportError::Csv { file: "fare_attributes", source: e })?
        .clone();
    for record in reader.records() {
        let record = record.map_err(|e| ImportError::Csv { file: "fare_attributes", source: e })?;
        let row = row_map(&headers, &record);
        let Some(fare_id) = parse_opt_str(&row, "fare_id") else {
            stats.errors += 1;
            continue;
        };
        sqlx::query(
            "INSERT INTO fare_attributes
                (feed_id, fare_id, price, currency_type, payment_method, transfers, agency_id, transfer_duration)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(feed_id, fare_id) DO UPDATE SET
                price = excluded.price, currency_type = excluded.currency_type,
                payment_method = excluded.payment_method, transfers = excluded.transfers,
                agency_id = excluded.agency_id, transfer_duration = excluded.transfer_duration",
        )
        .bind(feed_id)
        .bind(&fare_id)
        .bind(parse_opt_str(&row, "price"))
        .bind(parse_opt_str(&row, "currency_type"))
        .bind(parse_opt_i64(&row, "payment_method"))
        .bind(parse_opt_i64(&row, "transfers"))
        .bind(parse_opt_i64(&row, "agency_id"))
        .bind(parse_opt_i64(&row, "transfer_duration"))
        .execute(&mut **tx)
        .await
        .map_err(ImportError::Db)?;
        stats.imported += 1;
    }
    Ok(stats)
}

async fn import_fare_rules(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    feed_id: i64,
    text: &str,
) -> Result<FileStats, ImportError> {
    let mut stats = FileStats::default();
    let mut reader = csv::ReaderBuilder::new().from_reader(text.as_bytes());
    let headers = reader.headers().map_err(|e| ImportError::Csv { file: "fare_rules", source: e })?.clone();
    for record in reader.records() {
        let record = record.map_err(|e| ImportError::Csv { file: "fare_rules", source: e })?;
        let row = row_map(&headers, &record);
        let Some(fare_id) = parse_opt_str(&row, "fare_id") else {
            stats.errors += 1;
            continue;
        };
        sqlx::query(
            "INSERT INTO fare_rules (feed_id, fare_id, route_id, origin_id, destination_id, contains_id)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(feed_id, fare_id, route_id, origin_id, destination_id, contains_id) DO NOTHING",
        )
        .bind(feed_id)
        .bind(&fare_id)
        .bind(parse_opt_str(&row, "route_id"))
        .bind(parse_opt_str(&row, "origin_id"))
        .bind(parse_opt_str(&row, "destination_id"))
        .bind(parse_opt_str(&row, "contains_id"))
        .execute(&mut **tx)
        .await
        .map_err(ImportError::Db)?;
        stats.imported += 1;
    }
    Ok(stats)
}

async fn import_feed_info(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    feed_id: i64,
    text: &str,
) -> Result<FileStats, ImportError> {
    let mut stats = FileStats::default();
    let mut reader = csv::ReaderBuilder::new().from_reader(text.as_bytes());
    let headers = reader.headers().map_err(|e| ImportError::Csv { file: "feed_info", source: e })?.clone();
    if let Some(record) = reader.records().next() {
        let record = record.map_err(|e| ImportError::Csv { file: "feed_info", source: e })?;
        let row = row_map(&headers, &record);
        sqlx::query(
            "INSERT INTO feed_infos
                (feed_id, publisher_name, publisher_url, lang, default_lang, start_date, end_date,
                 version, contact_email, contact_url)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(feed_id) DO UPDATE SET
                publisher_name = excluded.publisher_name, publisher_url = excluded.publisher_url,
                lang = excluded.lang, default_lang = excluded.default_lang,
                start_date = excluded.start_date, end_date = excluded.end_date,
                version = excluded.version, contact_email = excluded.contact_email,
                contact_url = excluded.contact_url",
        )
        .bind(feed_id)
        .bind(parse_opt_str(&row, "feed_publisher_name"))
        .bind(parse_opt_str(&row, "feed_publisher_url"))
        .bind(parse_opt_str(&row, "feed_lang"))
        .bind(parse_opt_str(&row, "default_lang"))
        .bind(parse_opt_str(&row, "feed_start_date"))
        .bind(parse_opt_str(&row, "feed_end_date"))
        .bind(parse_opt_str(&row, "feed_version"))
        .bind(parse_opt_str(&row, "feed_contact_email"))
        .bind(parse_opt_str(&row, "feed_contact_url"))
        .execute(&mut **tx)
        .await
        .map_err(ImportError::Db)?;
        stats.imported += 1;
    }
    Ok(stats)
}

async fn recount_feed(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    feed_id: i64,
) -> Result<(i64, i64, i64), sqlx::Error> {
    let routes: i64 = sqlx::query("SELECT COUNT(*) AS c FROM routes WHERE feed_id = ?")
        .bind(feed_id)
        .fetch_one(&mut **tx)
        .await?
        .get("c");
    let stops: i64 = sqlx::query("SELECT COUNT(*) AS c FROM stops WHERE feed_id = ?")
        .bind(feed_id)
        .fetch_one(&mut **tx)
        .await?
        .get("c");
    let trips: i64 = sqlx::query("SELECT COUNT(*) AS c FROM trips WHERE feed_id = ?")
        .bind(feed_id)
        .fetch_one(&mut **tx)
        .await?
        .get("c");
    Ok((routes, stops, trips))
}

/// Deletes a feed's child rows in the order spec §4.D.4 defines, used both
/// by `replace_existing` here and by the Delete mutator directly.
pub(crate) async fn delete_feed_rows(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    feed_id: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM stop_times WHERE feed_id = ?").bind(feed_id).execute(&mut **tx).await?;
    sqlx::query("DELETE FROM calendar_dates WHERE feed_id = ?").bind(feed_id).execute(&mut **tx).await?;
    sqlx::query("DELETE FROM trips WHERE feed_id = ?").bind(feed_id).execute(&mut **tx).await?;
    sqlx::query("DELETE FROM routes WHERE feed_id = ?").bind(feed_id).execute(&mut **tx).await?;
    sqlx::query("DELETE FROM stops WHERE feed_id = ?").bind(feed_id).execute(&mut **tx).await?;
    sqlx::query("DELETE FROM calendars WHERE feed_id = ?").bind(feed_id).execute(&mut **tx).await?;
    sqlx::query("DELETE FROM shapes WHERE feed_id = ?").bind(feed_id).execute(&mut **tx).await?;
    sqlx::query("DELETE FROM fare_rules WHERE feed_id = ?").bind(feed_id).execute(&mut **tx).await?;
    sqlx::query("DELETE FROM fare_attributes WHERE feed_id = ?").bind(feed_id).execute(&mut **tx).await?;
    sqlx::query("DELETE FROM feed_infos WHERE feed_id = ?").bind(feed_id).execute(&mut **tx).await?;
    Ok(())
}
