//! Merge (spec §4.D.1): N source feeds -> one new feed in a target agency.
//!
//! Grounded on `examples/original_source/backend/app/services/gtfs_service.py`
//! (`GTFSService.merge_feeds`) for copy order and remap semantics. The
//! `fail_on_conflict` abort-with-empty-destination behavior follows the
//! newer authoritative contract recorded in `SPEC_FULL.md` §10 rather than
//! the Python original's skip-the-row behavior.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::error::MutatorError;
use crate::orchestrator::Orchestrator;

use super::{MergeStrategy, RemapTables};

#[derive(Debug, Clone, Default, Serialize)]
pub struct MergeResult {
    pub feed_id: i64,
    pub counts: HashMap<String, i64>,
    pub warnings: Vec<String>,
}

pub struct MergeOptions {
    pub sources: Vec<i64>,
    pub target_agency_id: i64,
    pub strategy: MergeStrategy,
    pub name: Option<String>,
    pub description: Option<String>,
    pub activate: bool,
}

pub async fn merge_feeds(
    pool: &SqlitePool,
    options: &MergeOptions,
    task_id: Option<i64>,
) -> Result<MergeResult, MutatorError> {
    if options.sources.is_empty() {
        return Err(MutatorError::EmptySourceSet);
    }

    let mut tx = pool.begin().await?;

    let now = chrono::Utc::now().to_rfc3339();
    let feed_row = sqlx::query(
        "INSERT INTO feeds (agency_id, name, description, imported_at, is_active)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(options.target_agency_id)
    .bind(options.name.clone().unwrap_or_else(|| "Merged feed".to_string()))
    .bind(&options.description)
    .bind(&now)
    .bind(options.activate as i64)
    .execute(&mut *tx)
    .await?;
    let dest_feed_id = feed_row.last_insert_rowid();

    let mut remap = RemapTables::default();
    let mut counts: HashMap<String, i64> = HashMap::new();
    let mut incremental: HashMap<String, i64> = HashMap::new();

    macro_rules! checkpoint {
        ($pct:expr, $msg:expr) => {
            if let Some(tid) = task_id {
                let orch = Orchestrator::new(pool);
                let _ = orch.report_progress(tid, $pct, Some($msg)).await;
                if orch.check_cancelled(tid).await.unwrap_or(false) {
                    return Err(crate::error::CancellationError(tid).into());
                }
            }
        };
    }

    checkpoint!(0.0, "stops");
    copy_stops(&mut tx, &options.sources, dest_feed_id, options.strategy, &mut remap, &mut incremental).await?;

    checkpoint!(15.0, "calendars");
    copy_calendars(&mut tx, &options.sources, dest_feed_id, options.strategy, &mut remap, &mut incremental).await?;
    copy_calendar_dates(&mut tx, &options.sources, dest_feed_id, &remap, &mut incremental).await?;

    checkpoint!(30.0, "shapes");
    copy_shapes(&mut tx, &options.sources, dest_feed_id, options.strategy, &mut remap, &mut incremental).await?;

    checkpoint!(45.0, "routes");
    copy_routes(&mut tx, &options.sources, dest_feed_id, options.target_agency_id, options.strategy, &mut remap, &mut incremental).await?;

    checkpoint!(55.0, "trips");
    copy_trips(&mut tx, &options.sources, dest_feed_id, options.strategy, &mut remap, &mut incremental).await?;

    checkpoint!(70.0, "stop_times");
    copy_stop_times(&mut tx, &options.sources, dest_feed_id, &remap, &mut incremental).await?;

    checkpoint!(85.0, "fares");
    copy_fare_attributes(&mut tx, &options.sources, dest_feed_id, options.strategy, &mut remap, &mut incremental).await?;
    copy_fare_rules(&mut tx, &options.sources, dest_feed_id, &remap, &mut incremental).await?;

    checkpoint!(95.0, "feed_info");
    copy_feed_info_first_wins(&mut tx, &options.sources, dest_feed_id).await?;

    // Verification: compare actual row counts against incremental counters
    // (spec §4.D.1, "emits a warning per mismatch against the incremental
    // counters").
    let mut warnings = Vec::new();
    for (table, expected) in &incremental {
        let actual: i64 = sqlx::query(&format!("SELECT COUNT(*) AS c FROM {table} WHERE feed_id = ?"))
            .bind(dest_feed_id)
            .fetch_one(&mut *tx)
            .await?
            .get("c");
        counts.insert(table.clone(), actual);
        if actual != *expected {
            warnings.push(format!(
                "{table}: expected {expected} rows from incremental counters, found {actual}"
            ));
        }
    }

    let (routes, stops, trips) = recount(&mut tx, dest_feed_id).await?;
    sqlx::query("UPDATE feeds SET total_routes = ?, total_stops = ?, total_trips = ? WHERE id = ?")
        .bind(routes)
        .bind(stops)
        .bind(trips)
        .bind(dest_feed_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    checkpoint!(100.0, "done");

    Ok(MergeResult { feed_id: dest_feed_id, counts, warnings })
}

async fn recount(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>, feed_id: i64) -> Result<(i64, i64, i64), sqlx::Error> {
    let routes: i64 = sqlx::query("SELECT COUNT(*) AS c FROM routes WHERE feed_id = ?").bind(feed_id).fetch_one(&mut **tx).await?.get("c");
    let stops: i64 = sqlx::query("SELECT COUNT(*) AS c FROM stops WHERE feed_id = ?").bind(feed_id).fetch_one(&mut **tx).await?.get("c");
    let trips: i64 = sqlx::query("SELECT COUNT(*) AS c FROM trips WHERE feed_id = ?").bind(feed_id).fetch_one(&mut **tx).await?.get("c");
    Ok((routes, stops, trips))
}

/// Resolves a natural key against the already-seen set for this merge,
/// returning the key to write to the destination, or `Err(Conflict)` under
/// `fail_on_conflict` (spec §4.D.1, testable property 9).
fn resolve_key(
    seen: &mut HashSet<String>,
    strategy: MergeStrategy,
    table: &'static str,
    source_feed_id: i64,
    key: &str,
) -> Result<String, MutatorError> {
    if !seen.contains(key) {
        seen.insert(key.to_string());
        return Ok(key.to_string());
    }
    match strategy {
        MergeStrategy::FailOnConflict => Err(MutatorError::Conflict { table, key: key.to_string() }),
        MergeStrategy::AutoPrefix => {
            let prefixed = format!("feed{source_feed_id}_{key}");
            seen.insert(prefixed.clone());
            Ok(prefixed)
        }
    }
}

async fn copy_stops(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    sources: &[i64],
    dest_feed_id: i64,
    strategy: MergeStrategy,
    remap: &mut RemapTables,
    incremental: &mut HashMap<String, i64>,
) -> Result<(), MutatorError> {
    let mut seen = HashSet::new();
    let mut count = 0i64;
    for &src in sources {
        let rows = sqlx::query("SELECT * FROM stops WHERE feed_id = ?").bind(src).fetch_all(&mut **tx).await?;
        for row in rows {
            let original: String = row.get("stop_id");
            let final_key = resolve_key(&mut seen, strategy, "stops", src, &original)?;
            remap.stops.insert((src, original), final_key.clone());
            sqlx::query(
                "INSERT INTO stops (feed_id, stop_id, stop_code, stop_name, stop_desc, stop_lat, stop_lon,
                    zone_id, stop_url, location_type, parent_station, stop_timezone, wheelchair_boarding, geom, custom_fields)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(dest_feed_id)
            .bind(&final_key)
            .bind(row.get::<Option<String>, _>("stop_code"))
            .bind(row.get::<Option<String>, _>("stop_name"))
            .bind(row.get::<Option<String>, _>("stop_desc"))
            .bind(row.get::<Option<f64>, _>("stop_lat"))
            .bind(row.get::<Option<f64>, _>("stop_lon"))
            .bind(row.get::<Option<String>, _>("zone_id"))
            .bind(row.get::<Option<String>, _>("stop_url"))
            .bind(row.get::<Option<i64>, _>("location_type"))
            .bind(row.get::<Option<String>, _>("parent_station"))
            .bind(row.get::<Option<String>, _>("stop_timezone"))
            .bind(row.get::<Option<i64>, _>("wheelchair_boarding"))
            .bind(row.get::<Option<String>, _>("geom"))
            .bind(row.get::<Option<String>, _>("custom_fields"))
            .execute(&mut **tx)
            .await?;
            count += 1;
        }
    }
    incremental.insert("stops".to_string(), count);
    Ok(())
}

async fn copy_calendars(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    sources: &[i64],
    dest_feed_id: i64,
    strategy: MergeStrategy,
    remap: &mut RemapTables,
    incremental: &mut HashMap<String, i64>,
) -> Result<(), MutatorError> {
    let mut seen = HashSet::new();
    let mut count = 0i64;
    for &src in sources {
        let rows = sqlx::query("SELECT * FROM calendars WHERE feed_id = ?").bind(src).fetch_all(&mut **tx).await?;
        for row in rows {
            let original: String = row.get("service_id");
            let final_key = resolve_key(&mut seen, strategy, "calendars", src, &original)?;
            remap.calendars.insert((src, original), final_key.clone());
            sqlx::query(
                "INSERT INTO calendars (feed_id, service_id, monday, tuesday, wednesday, thursday, friday,
                    saturday, sunday, start_date, end_date, custom_fields)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(dest_feed_id)
            .bind(&final_key)
            .bind(row.get::<i64, _>("monday"))
            .bind(row.get::<i64, _>("tuesday"))
            .bind(row.get::<i64, _>("wednesday"))
            .bind(row.get::<i64, _>("thursday"))
            .bind(row.get::<i64, _>("friday"))
            .bind(row.get::<i64, _>("saturday"))
            .bind(row.get::<i64, _>("sunday"))
            .bind(row.get::<String, _>("start_date"))
            .bind(row.get::<String, _>("end_date"))
            .bind(row.get::<Option<String>, _>("custom_fields"))
            .execute(&mut **tx)
            .await?;
            count += 1;
        }
    }
    incremental.insert("calendars".to_string(), count);
    Ok(())
}

async fn copy_calendar_dates(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    sources: &[i64],
    dest_feed_id: i64,
    remap: &RemapTables,
    incremental: &mut HashMap<String, i64>,
) -> Result<(), MutatorError> {
    let mut count = 0i64;
    for &src in sources {
        let rows = sqlx::query("SELECT * FROM calendar_dates WHERE feed_id = ?").bind(src).fetch_all(&mut **tx).await?;
        for row in rows {
            let service_id: String = row.get("service_id");
            let Some(final_service) = RemapTables::resolve(&remap.calendars, src, &service_id) else {
                continue;
            };
            sqlx::query(
                "INSERT INTO calendar_dates (feed_id, service_id, date, exception_type) VALUES (?, ?, ?, ?)
                 ON CONFLICT(feed_id, service_id, date) DO NOTHING",
            )
            .bind(dest_feed_id)
            .bind(&final_service)
            .bind(row.get::<String, _>("date"))
            .bind(row.get::<i64, _>("exception_type"))
            .execute(&mut **tx)
            .await?;
            count += 1;
        }
    }
    incremental.insert("calendar_dates".to_string(), count);
    Ok(())
}

async fn copy_shapes(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    sources: &[i64],
    dest_feed_id: i64,
    strategy: MergeStrategy,
    remap: &mut RemapTables,
    incremental: &mut HashMap<String, i64>,
) -> Result<(), MutatorError> {
    let mut seen = HashSet::new();
    let mut count = 0i64;
    for &src in sources {
        let shape_ids: Vec<String> = sqlx::query("SELECT DISTINCT shape_id FROM shapes WHERE feed_id = ?")
            .bind(src)
            .fetch_all(&mut **tx)
            .await?
            .into_iter()
            .map(|r| r.get("shape_id"))
            .collect();
        for original in shape_ids {
            let final_key = resolve_key(&mut seen, strategy, "shapes", src, &original)?;
            remap.shapes.insert((src, original.clone()), final_key.clone());
            let points = sqlx::query(
                "SELECT * FROM shapes WHERE feed_id = ? AND shape_id = ? ORDER BY shape_pt_sequence",
            )
            .bind(src)
            .bind(&original)
            .fetch_all(&mut **tx)
            .await?;
            for point in points {
                sqlx::query(
                    "INSERT INTO shapes (feed_id, shape_id, shape_pt_sequence, shape_pt_lat, shape_pt_lon, shape_dist_traveled)
                     VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(dest_feed_id)
                .bind(&final_key)
                .bind(point.get::<i64, _>("shape_pt_sequence"))
                .bind(point.get::<f64, _>("shape_pt_lat"))
                .bind(point.get::<f64, _>("shape_pt_lon"))
                .bind(point.get::<Option<f64>, _>("shape_dist_traveled"))
                .execute(&mut **tx)
                .await?;
                count += 1;
            }
        }
    }
    incremental.insert("shapes".to_string(), count);
    Ok(())
}

async fn copy_routes(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    sources: &[i64],
    dest_feed_id: i64,
    target_agency_id: i64,
    strategy: MergeStrategy,
    remap: &mut RemapTables,
    incremental: &mut HashMap<String, i64>,
) -> Result<(), MutatorError> {
    let mut seen = HashSet::new();
    let mut count = 0i64;
    for &src in sources {
        let rows = sqlx::query("SELECT * FROM routes WHERE feed_id = ?").bind(src).fetch_all(&mut **tx).await?;
        for row in rows {
            let original: String = row.get("route_id");
            let final_key = resolve_key(&mut seen, strategy, "routes", src, &original)?;
            remap.routes.insert((src, original), final_key.clone());
            sqlx::query(
                "INSERT INTO routes (feed_id, route_id, agency_id, route_short_name, route_long_name, route_desc,
                    route_type, route_url, route_color, route_text_color, route_sort_order, custom_fields)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(dest_feed_id)
            .bind(&final_key)
            .bind(target_agency_id)
            .bind(row.get::<Option<String>, _>("route_short_name"))
            .bind(row.get::<Option<String>, _>("route_long_name"))
            .bind(row.get::<Option<String>, _>("route_desc"))
            .bind(row.get::<Option<i64>, _>("route_type"))
            .bind(row.get::<Option<String>, _>("route_url"))
            .bind(row.get::<Option<String>, _>("route_color"))
            .bind(row.get::<Option<String>, _>("route_text_color"))
            .bind(row.get::<Option<i64>, _>("route_sort_order"))
            .bind(row.get::<Option<String>, _>("custom_fields"))
            .execute(&mut **tx)
            .await?;
            count += 1;
        }
    }
    incremental.insert("routes".to_string(), count);
    Ok(())
}

async fn copy_trips(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    sources: &[i64],
    dest_feed_id: i64,
    strategy: MergeStrategy,
    remap: &mut RemapTables,
    incremental: &mut HashMap<String, i64>,
) -> Result<(), MutatorError> {
    let mut seen = HashSet::new();
    let mut count = 0i64;
    for &src in sources {
        let rows = sqlx::query("SELECT * FROM trips WHERE feed_id = ?").bind(src).fetch_all(&mut **tx).await?;
        for row in rows {
            let original: String = row.get("trip_id");
            let final_key = resolve_key(&mut seen, strategy, "trips", src, &original)?;
            remap.trips.insert((src, original), final_key.clone());

            let route_id: String = row.get("route_id");
            let final_route = RemapTables::resolve(&remap.routes, src, &route_id).unwrap_or(route_id);
            let service_id: String = row.get("service_id");
            let final_service = RemapTables::resolve(&remap.calendars, src, &service_id).unwrap_or(service_id);
            let shape_id: Option<String> = row.get("shape_id");
            let final_shape = shape_id.and_then(|s| RemapTables::resolve(&remap.shapes, src, &s));

            sqlx::query(
                "INSERT INTO trips (feed_id, trip_id, route_id, service_id, trip_headsign, trip_short_name,
                    direction_id, block_id, shape_id, wheelchair_accessible, bikes_allowed, custom_fields)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(dest_feed_id)
            .bind(&final_key)
            .bind(&final_route)
            .bind(&final_service)
            .bind(row.get::<Option<String>, _>("trip_headsign"))
            .bind(row.get::<Option<String>, _>("trip_short_name"))
            .bind(row.get::<Option<i64>, _>("direction_id"))
            .bind(row.get::<Option<String>, _>("block_id"))
            .bind(&final_shape)
            .bind(row.get::<Option<i64>, _>("wheelchair_accessible"))
            .bind(row.get::<Option<i64>, _>("bikes_allowed"))
            .bind(row.get::<Option<String>, _>("custom_fields"))
            .execute(&mut **tx)
            .await?;
            count += 1;
        }
    }
    incremental.insert("trips".to_string(), count);
    Ok(())
}

async fn copy_stop_times(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    sources: &[i64],
    dest_feed_id: i64,
    remap: &RemapTables,
    incremental: &mut HashMap<String, i64>,
) -> Result<(), MutatorError> {
    let mut count = 0i64;
    for &src in sources {
        let rows = sqlx::query("SELECT * FROM stop_times WHERE feed_id = ?").bind(src).fetch_all(&mut **tx).await?;
        for row in rows {
            let trip_id: String = row.get("trip_id");
            let Some(final_trip) = RemapTables::resolve(&remap.trips, src, &trip_id) else { continue };
            let stop_id: String = row.get("stop_id");
            let final_stop = RemapTables::resolve(&remap.stops, src, &stop_id).unwrap_or(stop_id);

            sqlx::query(
                "INSERT INTO stop_times (feed_id, trip_id, stop_sequence, stop_id, arrival_time, departure_time,
                    stop_headsign, pickup_type, drop_off_type, shape_dist_traveled, timepoint)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(dest_feed_id)
            .bind(&final_trip)
            .bind(row.get::<i64, _>("stop_sequence"))
            .bind(&final_stop)
            .bind(row.get::<Option<String>, _>("arrival_time"))
            .bind(row.get::<Option<String>, _>("departure_time"))
            .bind(row.get::<Option<String>, _>("stop_headsign"))
            .bind(row.get::<Option<i64>, _>("pickup_type"))
            .bind(row.get::<Option<i64>, _>("drop_off_type"))
            .bind(row.get::<Option<f64>, _>("shape_dist_traveled"))
            .bind(row.get::<Option<i64>, _>("timepoint"))
            .execute(&mut **tx)
            .await?;
            count += 1;
        }
    }
    incremental.insert("stop_times".to_string(), count);
    Ok(())
}

async fn copy_fare_attributes(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    sources: &[i64],
    dest_feed_id: i64,
    strategy: MergeStrategy,
    remap: &mut RemapTables,
    incremental: &mut HashMap<String, i64>,
) -> Result<(), MutatorError> {
    let mut seen = HashSet::new();
    let mut count = 0i64;
    for &src in sources {
        let rows = sqlx::query("SELECT * FROM fare_attributes WHERE feed_id = ?").bind(src).fetch_all(&mut **tx).await?;
        for row in rows {
            let original: String = row.get("fare_id");
            let final_key = resolve_key(&mut seen, strategy, "fare_attributes", src, &original)?;
            remap.fare_attributes.insert((src, original), final_key.clone());
            sqlx::query(
                "INSERT INTO fare_attributes (feed_id, fare_id, price, currency_type, payment_method,
                    transfers, agency_id, transfer_duration)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(dest_feed_id)
            .bind(&final_key)
            .bind(row.get::<Option<String>, _>("price"))
            .bind(row.get::<Option<String>, _>("currency_type"))
            .bind(row.get::<Option<i64>, _>("payment_method"))
            .bind(row.get::<Option<i64>, _>("transfers"))
            .bind(row.get::<Option<i64>, _>("agency_id"))
            .bind(row.get::<Option<i64>, _>("transfer_duration"))
            .execute(&mut **tx)
            .await?;
            count += 1;
        }
    }
    incremental.insert("fare_attributes".to_string(), count);
    Ok(())
}

/// Fare rules are deduplicated after remap (spec §4.D.1): several sources'
/// rules can collapse onto the same composite key once fares/routes are
/// remapped, and only one copy should survive.
async fn copy_fare_rules(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    sources: &[i64],
    dest_feed_id: i64,
    remap: &RemapTables,
    incremental: &mut HashMap<String, i64>,
) -> Result<(), MutatorError> {
    let mut seen: HashSet<(String, String, String, String, String)> = HashSet::new();
    let mut count = 0i64;
    for &src in sources {
        let rows = sqlx::query("SELECT * FROM fare_rules WHERE feed_id = ?").bind(src).fetch_all(&mut **tx).await?;
        for row in rows {
            let fare_id: String = row.get("fare_id");
            let Some(final_fare) = RemapTables::resolve(&remap.fare_attributes, src, &fare_id) else { continue };
            let route_id: Option<String> = row.get("route_id");
            let final_route = route_id
                .as_ref()
                .and_then(|r| RemapTables::resolve(&remap.routes, src, r))
                .or(route_id);
            let origin_id: Option<String> = row.get("origin_id");
            let destination_id: Option<String> = row.get("destination_id");
            let contains_id: Option<String> = row.get("contains_id");

            let dedup_key = (
                final_fare.clone(),
                final_route.clone().unwrap_or_default(),
                origin_id.clone().unwrap_or_default(),
                destination_id.clone().unwrap_or_default(),
                contains_id.clone().unwrap_or_default(),
            );
            if !seen.insert(dedup_key) {
                continue;
            }

            sqlx::query(
                "INSERT INTO fare_rules (feed_id, fare_id, route_id, origin_id, destination_id, contains_id)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(dest_feed_id)
            .bind(&final_fare)
            .bind(&final_route)
            .bind(&origin_id)
            .bind(&destination_id)
            .bind(&contains_id)
            .execute(&mut **tx)
            .await?;
            count += 1;
        }
    }
    incremental.insert("fare_rules".to_string(), count);
    Ok(())
}

async fn copy_feed_info_first_wins(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    sources: &[i64],
    dest_feed_id: i64,
) -> Result<(), MutatorError> {
    for &src in sources {
        if let Some(row) = sqlx::query("SELECT * FROM feed_infos WHERE feed_id = ?").bind(src).fetch_optional(&mut **tx).await? {
            sqlx::query(
                "INSERT INTO feed_infos (feed_id, publisher_name, publisher_url, lang, default_lang,
                    start_date, end_date, version, contact_email, contact_url)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(dest_feed_id)
            .bind(row.get::<Option<String>, _>("publisher_name"))
            .bind(row.get::<Option<String>, _>("publisher_url"))
            .bind(row.get::<Option<String>, _>("lang"))
            .bind(row.get::<Option<String>, _>("default_lang"))
            .bind(row.get::<Option<String>, _>("start_date"))
            .bind(row.get::<Option<String>, _>("end_date"))
            .bind(row.get::<Option<String>, _>("version"))
            .bind(row.get::<Option<String>, _>("contact_email"))
            .bind(row.get::<Option<String>, _>("contact_url"))
            .execute(&mut **tx)
            .await?;
            return Ok(());
        }
    }
    Ok(())
}
