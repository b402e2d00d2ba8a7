//! Split (spec §4.D.2): a subset of a feed's routes -> a new agency.
//!
//! Grounded on `examples/original_source/backend/app/services/gtfs_service.py`
//! (`GTFSService.split_agency`), including its `trip_batch_size = 100`
//! chunking of the transitive-closure queries (`SPEC_FULL.md` §10) so the
//! `IN (...)` lists this module builds never approach the bind-parameter
//! limit that also bounds bulk inserts (`config::SQL_BIND_PARAM_LIMIT`).

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use crate::error::MutatorError;
use crate::orchestrator::Orchestrator;

/// Chunk size for `IN (...)` closure queries (spec §9/§10).
const TRIP_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct SplitOptions {
    pub source_agency_id: i64,
    pub source_feed_id: i64,
    pub route_ids: Vec<String>,
    pub new_agency_name: String,
    pub copy_users: bool,
    pub remove_from_source: bool,
    pub initiating_user_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SplitResult {
    pub new_agency_id: i64,
    pub new_feed_id: i64,
    pub counts: HashMap<String, i64>,
}

fn slugify(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

struct Closure {
    route_ids: Vec<String>,
    trip_ids: Vec<String>,
    stop_ids: HashSet<String>,
    service_ids: HashSet<String>,
    shape_ids: HashSet<String>,
}

async fn compute_closure(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    feed_id: i64,
    route_ids: &[String],
) -> Result<Closure, MutatorError> {
    let mut trip_ids = Vec::new();
    let mut stop_ids = HashSet::new();
    let mut service_ids = HashSet::new();
    let mut shape_ids = HashSet::new();

    for chunk in route_ids.chunks(TRIP_BATCH_SIZE) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT trip_id, service_id, shape_id FROM trips WHERE feed_id = ",
        );
        qb.push_bind(feed_id).push(" AND route_id IN (");
        let mut sep = qb.separated(", ");
        for route_id in chunk {
            sep.push_bind(route_id.as_str());
        }
        qb.push(")");
        let rows = qb.build().fetch_all(&mut **tx).await?;
        for row in rows {
            let trip_id: String = row.get("trip_id");
            trip_ids.push(trip_id);
            service_ids.insert(row.get::<String, _>("service_id"));
            if let Some(shape_id) = row.get::<Option<String>, _>("shape_id") {
                shape_ids.insert(shape_id);
            }
        }
    }

    for chunk in trip_ids.chunks(TRIP_BATCH_SIZE) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT DISTINCT stop_id FROM stop_times WHERE feed_id = ",
        );
        qb.push_bind(feed_id).push(" AND trip_id IN (");
        let mut sep = qb.separated(", ");
        for trip_id in chunk {
            sep.push_bind(trip_id.as_str());
        }
        qb.push(")");
        let rows = qb.build().fetch_all(&mut **tx).await?;
        for row in rows {
            stop_ids.insert(row.get::<String, _>("stop_id"));
        }
    }

    Ok(Closure { route_ids: route_ids.to_vec(), trip_ids, stop_ids, service_ids, shape_ids })
}

pub async fn split_agency(
    pool: &SqlitePool,
    options: &SplitOptions,
    task_id: Option<i64>,
) -> Result<SplitResult, MutatorError> {
    if options.route_ids.is_empty() {
        return Err(MutatorError::EmptySourceSet);
    }

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

    let mut tx = pool.begin().await?;

    // Phase 1: new agency + initial feed.
    checkpoint!(0.0, "create agency");
    let slug = slugify(&options.new_agency_name);
    let agency_row = sqlx::query("INSERT INTO agencies (name, slug) VALUES (?, ?)")
        .bind(&options.new_agency_name)
        .bind(&slug)
        .execute(&mut *tx)
        .await?;
    let new_agency_id = agency_row.last_insert_rowid();

    let now = chrono::Utc::now().to_rfc3339();
    let feed_row = sqlx::query(
        "INSERT INTO feeds (agency_id, name, imported_at, is_active) VALUES (?, ?, ?, 0)",
    )
    .bind(new_agency_id)
    .bind(format!("{} (split)", options.new_agency_name))
    .bind(&now)
    .execute(&mut *tx)
    .await?;
    let new_feed_id = feed_row.last_insert_rowid();

    if let Some(user_id) = options.initiating_user_id {
        sqlx::query(
            "INSERT INTO agency_memberships (agency_id, user_id, role) VALUES (?, ?, 'admin')
             ON CONFLICT(agency_id, user_id) DO UPDATE SET role = 'admin'",
        )
        .bind(new_agency_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .ok();
    }
    if options.copy_users {
        sqlx::query(
            "INSERT INTO agency_memberships (agency_id, user_id, role)
             SELECT ?, user_id, role FROM agency_memberships WHERE agency_id = ?",
        )
        .bind(new_agency_id)
        .bind(options.source_agency_id)
        .execute(&mut *tx)
        .await
        .ok();
    }

    // Phase 2: transitive closure.
    checkpoint!(15.0, "compute closure");
    let closure = compute_closure(&mut tx, options.source_feed_id, &options.route_ids).await?;

    // Phase 3: copy in dependency order.
    checkpoint!(30.0, "copy stops");
    let mut counts = HashMap::new();
    counts.insert(
        "stops".to_string(),
        copy_rows_verbatim(&mut tx, "stops", "stop_id", options.source_feed_id, new_feed_id, &closure.stop_ids.iter().cloned().collect::<Vec<_>>()).await?,
    );

    checkpoint!(40.0, "copy calendars");
    counts.insert(
        "calendars".to_string(),
        copy_rows_verbatim(&mut tx, "calendars", "service_id", options.source_feed_id, new_feed_id, &closure.service_ids.iter().cloned().collect::<Vec<_>>()).await?,
    );
    copy_calendar_dates(&mut tx, options.source_feed_id, new_feed_id, &closure.service_ids.iter().cloned().collect::<Vec<_>>()).await?;

    checkpoint!(50.0, "copy shapes");
    counts.insert(
        "shapes".to_string(),
        copy_shapes(&mut tx, options.source_feed_id, new_feed_id, &closure.shape_ids.iter().cloned().collect::<Vec<_>>()).await?,
    );

    checkpoint!(60.0, "copy routes");
    counts.insert(
        "routes".to_string(),
        copy_routes(&mut tx, options.source_feed_id, new_feed_id, new_agency_id, &closure.route_ids).await?,
    );

    checkpoint!(70.0, "copy trips");
    counts.insert(
        "trips".to_string(),
        copy_rows_verbatim(&mut tx, "trips", "trip_id", options.source_feed_id, new_feed_id, &closure.trip_ids).await?,
    );

    checkpoint!(80.0, "copy stop_times");
    counts.insert(
        "stop_times".to_string(),
        copy_stop_times(&mut tx, options.source_feed_id, new_feed_id, &closure.trip_ids).await?,
    );

    // Phase 4: optionally remove the graph from the source.
    if options.remove_from_source {
        checkpoint!(90.0, "remove from source");
        remove_closure_from_source(&mut tx, options.source_feed_id, &closure).await?;
    }

    let (routes, stops, trips) = (
        counts.get("routes").copied().unwrap_or(0),
        counts.get("stops").copied().unwrap_or(0),
        counts.get("trips").copied().unwrap_or(0),
    );
    sqlx::query("UPDATE feeds SET total_routes = ?, total_stops = ?, total_trips = ? WHERE id = ?")
        .bind(routes)
        .bind(stops)
        .bind(trips)
        .bind(new_feed_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    checkpoint!(100.0, "done");

    Ok(SplitResult { new_agency_id, new_feed_id, counts })
}

/// Copies rows from `table` whose `key_column` value is in `keys`, rewriting
/// only `feed_id`; used for stops, calendars, and trips, none of which need
/// natural-key remapping in a split (same feed identity space, just a new
/// feed row).
async fn copy_rows_verbatim(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    table: &str,
    key_column: &str,
    source_feed_id: i64,
    dest_feed_id: i64,
    keys: &[String],
) -> Result<i64, MutatorError> {
    let mut total = 0i64;
    for chunk in keys.chunks(TRIP_BATCH_SIZE) {
        if chunk.is_empty() {
            continue;
        }
        let mut select: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT * FROM {table} WHERE feed_id = "
        ));
        select.push_bind(source_feed_id).push(format!(" AND {key_column} IN ("));
        {
            let mut sep = select.separated(", ");
            for k in chunk {
                sep.push_bind(k.as_str());
            }
        }
        select.push(")");
        let rows = select.build().fetch_all(&mut **tx).await?;
        for row in rows {
            total += 1;
            match table {
                "stops" => {
                    sqlx::query(
                        "INSERT INTO stops (feed_id, stop_id, stop_code, stop_name, stop_desc, stop_lat, stop_lon,
                            zone_id, stop_url, location_type, parent_station, stop_timezone, wheelchair_boarding, geom, custom_fields)
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    )
                    .bind(dest_feed_id)
                    .bind(row.get::<String, _>("stop_id"))
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
                }
                "calendars" => {
                    sqlx::query(
                        "INSERT INTO calendars (feed_id, service_id, monday, tuesday, wednesday, thursday, friday,
                            saturday, sunday, start_date, end_date, custom_fields)
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    )
                    .bind(dest_feed_id)
                    .bind(row.get::<String, _>("service_id"))
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
                }
                "trips" => {
                    sqlx::query(
                        "INSERT INTO trips (feed_id, trip_id, route_id, service_id, trip_headsign, trip_short_name,
                            direction_id, block_id, shape_id, wheelchair_accessible, bikes_allowed, custom_fields)
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    )
                    .bind(dest_feed_id)
                    .bind(row.get::<String, _>("trip_id"))
                    .bind(row.get::<String, _>("route_id"))
                    .bind(row.get::<String, _>("service_id"))
                    .bind(row.get::<Option<String>, _>("trip_headsign"))
                    .bind(row.get::<Option<String>, _>("trip_short_name"))
                    .bind(row.get::<Option<i64>, _>("direction_id"))
                    .bind(row.get::<Option<String>, _>("block_id"))
                    .bind(row.get::<Option<String>, _>("shape_id"))
                    .bind(row.get::<Option<i64>, _>("wheelchair_accessible"))
                    .bind(row.get::<Option<i64>, _>("bikes_allowed"))
                    .bind(row.get::<Option<String>, _>("custom_fields"))
                    .execute(&mut **tx)
                    .await?;
                }
                _ => unreachable!("copy_rows_verbatim only handles stops/calendars/trips"),
            }
        }
    }
    Ok(total)
}

async fn copy_calendar_dates(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    source_feed_id: i64,
    dest_feed_id: i64,
    service_ids: &[String],
) -> Result<(), MutatorError> {
    for chunk in service_ids.chunks(TRIP_BATCH_SIZE) {
        if chunk.is_empty() {
            continue;
        }
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM calendar_dates WHERE feed_id = ");
        qb.push_bind(source_feed_id).push(" AND service_id IN (");
        {
            let mut sep = qb.separated(", ");
            for s in chunk {
                sep.push_bind(s.as_str());
            }
        }
        qb.push(")");
        let rows = qb.build().fetch_all(&mut **tx).await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO calendar_dates (feed_id, service_id, date, exception_type) VALUES (?, ?, ?, ?)",
            )
            .bind(dest_feed_id)
            .bind(row.get::<String, _>("service_id"))
            .bind(row.get::<String, _>("date"))
            .bind(row.get::<i64, _>("exception_type"))
            .execute(&mut **tx)
            .await?;
        }
    }
    Ok(())
}

async fn copy_shapes(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    source_feed_id: i64,
    dest_feed_id: i64,
    shape_ids: &[String],
) -> Result<i64, MutatorError> {
    let mut total = 0i64;
    for chunk in shape_ids.chunks(TRIP_BATCH_SIZE) {
        if chunk.is_empty() {
            continue;
        }
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM shapes WHERE feed_id = ");
        qb.push_bind(source_feed_id).push(" AND shape_id IN (");
        {
            let mut sep = qb.separated(", ");
            for s in chunk {
                sep.push_bind(s.as_str());
            }
        }
        qb.push(") ORDER BY shape_id, shape_pt_sequence");
        let rows = qb.build().fetch_all(&mut **tx).await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO shapes (feed_id, shape_id, shape_pt_sequence, shape_pt_lat, shape_pt_lon, shape_dist_traveled)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(dest_feed_id)
            .bind(row.get::<String, _>("shape_id"))
            .bind(row.get::<i64, _>("shape_pt_sequence"))
            .bind(row.get::<f64, _>("shape_pt_lat"))
            .bind(row.get::<f64, _>("shape_pt_lon"))
            .bind(row.get::<Option<f64>, _>("shape_dist_traveled"))
            .execute(&mut **tx)
            .await?;
            total += 1;
        }
    }
    Ok(total)
}

async fn copy_routes(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    source_feed_id: i64,
    dest_feed_id: i64,
    new_agency_id: i64,
    route_ids: &[String],
) -> Result<i64, MutatorError> {
    let mut total = 0i64;
    for chunk in route_ids.chunks(TRIP_BATCH_SIZE) {
        if chunk.is_empty() {
            continue;
        }
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM routes WHERE feed_id = ");
        qb.push_bind(source_feed_id).push(" AND route_id IN (");
        {
            let mut sep = qb.separated(", ");
            for r in chunk {
                sep.push_bind(r.as_str());
            }
        }
        qb.push(")");
        let rows = qb.build().fetch_all(&mut **tx).await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO routes (feed_id, route_id, agency_id, route_short_name, route_long_name, route_desc,
                    route_type, route_url, route_color, route_text_color, route_sort_order, custom_fields)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(dest_feed_id)
            .bind(row.get::<String, _>("route_id"))
            .bind(new_agency_id)
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
            total += 1;
        }
    }
    Ok(total)
}

async fn copy_stop_times(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    source_feed_id: i64,
    dest_feed_id: i64,
    trip_ids: &[String],
) -> Result<i64, MutatorError> {
    let mut total = 0i64;
    for chunk in trip_ids.chunks(TRIP_BATCH_SIZE) {
        if chunk.is_empty() {
            continue;
        }
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM stop_times WHERE feed_id = ");
        qb.push_bind(source_feed_id).push(" AND trip_id IN (");
        {
            let mut sep = qb.separated(", ");
            for t in chunk {
                sep.push_bind(t.as_str());
            }
        }
        qb.push(")");
        let rows = qb.build().fetch_all(&mut **tx).await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO stop_times (feed_id, trip_id, stop_sequence, stop_id, arrival_time, departure_time,
                    stop_headsign, pickup_type, drop_off_type, shape_dist_traveled, timepoint)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(dest_feed_id)
            .bind(row.get::<String, _>("trip_id"))
            .bind(row.get::<i64, _>("stop_sequence"))
            .bind(row.get::<String, _>("stop_id"))
            .bind(row.get::<Option<String>, _>("arrival_time"))
            .bind(row.get::<Option<String>, _>("departure_time"))
            .bind(row.get::<Option<String>, _>("stop_headsign"))
            .bind(row.get::<Option<i64>, _>("pickup_type"))
            .bind(row.get::<Option<i64>, _>("drop_off_type"))
            .bind(row.get::<Option<f64>, _>("shape_dist_traveled"))
            .bind(row.get::<Option<i64>, _>("timepoint"))
            .execute(&mut **tx)
            .await?;
            total += 1;
        }
    }
    Ok(total)
}

/// Removes the split graph from the source feed using subqueries rather
/// than huge `IN (...)` lists (spec §4.D.2, Phase 4).
async fn remove_closure_from_source(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    source_feed_id: i64,
    closure: &Closure,
) -> Result<(), MutatorError> {
    for chunk in closure.route_ids.chunks(TRIP_BATCH_SIZE) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "DELETE FROM stop_times WHERE feed_id = ",
        );
        qb.push_bind(source_feed_id).push(
            " AND trip_id IN (SELECT trip_id FROM trips WHERE feed_id = ",
        );
        qb.push_bind(source_feed_id).push(" AND route_id IN (");
        {
            let mut sep = qb.separated(", ");
            for r in chunk {
                sep.push_bind(r.as_str());
            }
        }
        qb.push("))");
        qb.build().execute(&mut **tx).await?;
    }

    for chunk in closure.route_ids.chunks(TRIP_BATCH_SIZE) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("DELETE FROM trips WHERE feed_id = ");
        qb.push_bind(source_feed_id).push(" AND route_id IN (");
        {
            let mut sep = qb.separated(", ");
            for r in chunk {
                sep.push_bind(r.as_str());
            }
        }
        qb.push(")");
        qb.build().execute(&mut **tx).await?;
    }

    for chunk in closure.route_ids.chunks(TRIP_BATCH_SIZE) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("DELETE FROM routes WHERE feed_id = ");
        qb.push_bind(source_feed_id).push(" AND route_id IN (");
        {
            let mut sep = qb.separated(", ");
            for r in chunk {
                sep.push_bind(r.as_str());
            }
        }
        qb.push(")");
        qb.build().execute(&mut **tx).await?;
    }

    Ok(())
}
