//! Shared test setup: an in-memory SQLite pool with the schema bootstrapped,
//! plus small fixture builders for feeds that don't need a real archive.

use std::time::Duration;

use gtfs_core::config::Config;
use gtfs_core::db;
use sqlx::SqlitePool;

/// A fresh in-memory database with the schema applied. `cache=shared` keeps
/// every connection in the pool pointed at the same in-memory database
/// instead of each getting its own empty one.
pub async fn test_pool() -> SqlitePool {
    let cfg = test_config();
    db::init_pool(&cfg).await.expect("failed to init test pool")
}

pub fn test_config() -> Config {
    Config {
        database_url: "sqlite::memory:?cache=shared".to_string(),
        scratch_dir: "/tmp/gtfs-core-test-scratch".to_string(),
        uploads_dir: "/tmp/gtfs-core-test-uploads".to_string(),
        mobilitydata_validator_image: "mobilitydata/gtfs-validator:latest".to_string(),
        host_path_prefix: None,
        realtime_http_timeout: Duration::from_secs(10),
        realtime_url_pacing: Duration::from_secs(2),
        orphan_running_timeout: Duration::from_secs(30 * 60),
        orphan_pending_timeout: Duration::from_secs(60 * 60),
        task_retention: Duration::from_secs(30 * 24 * 60 * 60),
    }
}

/// Inserts a bare Agency row, returning its id.
pub async fn insert_agency(pool: &SqlitePool, name: &str) -> i64 {
    let slug = name.to_lowercase().replace(' ', "-");
    sqlx::query("INSERT INTO agencies (name, slug, agency_timezone) VALUES (?, ?, 'America/New_York')")
        .bind(name)
        .bind(slug)
        .execute(pool)
        .await
        .expect("insert agency")
        .last_insert_rowid()
}

/// Builds a minimal valid GTFS archive (spec §8 scenario S1): one agency
/// row, two stops, one route, one weekday calendar (2025), one trip with
/// two stop_times. Returns the zipped archive bytes.
pub fn minimal_archive() -> Vec<u8> {
    build_archive(&[
        ("agency.txt", "agency_id,agency_name,agency_url,agency_timezone\nA1,Test Agency,https://example.com,America/New_York\n"),
        ("stops.txt", "stop_id,stop_name,stop_lat,stop_lon\nS1,First Stop,40.0,-75.0\nS2,Second Stop,40.1,-75.1\n"),
        ("routes.txt", "route_id,route_short_name,route_long_name,route_type\nR1,1,Main Line,3\n"),
        ("calendar.txt", "service_id,monday,tuesday,wednesday,thursday,friday,saturday,sunday,start_date,end_date\nWEEKDAY,1,1,1,1,1,0,0,20250101,20251231\n"),
        ("trips.txt", "trip_id,route_id,service_id\nT1,R1,WEEKDAY\n"),
        ("stop_times.txt", "trip_id,arrival_time,departure_time,stop_id,stop_sequence\nT1,07:00:00,07:00:00,S1,1\nT1,07:10:00,07:10:00,S2,2\n"),
    ])
}

/// Same as [`minimal_archive`] but `stop_times.txt` references a stop_id
/// (`GHOST`) that does not appear in `stops.txt` (spec §8 scenario S2).
pub fn archive_with_ghost_stop() -> Vec<u8> {
    build_archive(&[
        ("agency.txt", "agency_id,agency_name,agency_url,agency_timezone\nA1,Test Agency,https://example.com,America/New_York\n"),
        ("stops.txt", "stop_id,stop_name,stop_lat,stop_lon\nS1,First Stop,40.0,-75.0\n"),
        ("routes.txt", "route_id,route_short_name,route_long_name,route_type\nR1,1,Main Line,3\n"),
        ("calendar.txt", "service_id,monday,tuesday,wednesday,thursday,friday,saturday,sunday,start_date,end_date\nWEEKDAY,1,1,1,1,1,0,0,20250101,20251231\n"),
        ("trips.txt", "trip_id,route_id,service_id\nT1,R1,WEEKDAY\n"),
        ("stop_times.txt", "trip_id,arrival_time,departure_time,stop_id,stop_sequence\nT1,07:00:00,07:00:00,S1,1\nT1,07:10:00,07:10:00,GHOST,2\n"),
    ])
}

fn build_archive(files: &[(&str, &str)]) -> Vec<u8> {
    use std::io::Write;
    use zip::write::FileOptions;

    let mut buf = Vec::new();
    {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        let options = FileOptions::default();
        for (name, contents) in files {
            writer.start_file(*name, options).expect("start_file");
            writer.write_all(contents.as_bytes()).expect("write contents");
        }
        writer.finish().expect("finish archive");
    }
    buf
}
