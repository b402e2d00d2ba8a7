//! Import -> export round trips and the importer's own per-scenario checks
//! (spec §8 testable properties 1, 2, 3, 4, 6; seed scenarios S1, S2, S3).

mod common;

use std::collections::HashSet;

use gtfs_core::gtfs::exporter::Exporter;
use gtfs_core::gtfs::importer::{ImportOptions, Importer};
use sqlx::Row;

fn default_options() -> ImportOptions {
    ImportOptions {
        replace_existing: false,
        validate_only: false,
        skip_shapes: false,
        stop_on_error: true,
        feed_name: None,
        description: None,
        version: None,
    }
}

/// S1: a minimal archive imports cleanly with the expected feed counts.
#[tokio::test]
async fn minimal_archive_imports_with_expected_counts() {
    let pool = common::test_pool().await;
    let agency_id = common::insert_agency(&pool, "Test Agency").await;

    let importer = Importer::new(&pool, None);
    let result = importer
        .import_archive(agency_id, &common::minimal_archive(), &default_options())
        .await
        .expect("import should succeed");

    assert_eq!(result.total_routes, 1);
    assert_eq!(result.total_stops, 2);
    assert_eq!(result.total_trips, 1);
    assert!(result.missing_stop_ids.is_empty());
}

/// Testable property 6: Feed.total_{routes,stops,trips} match actual row
/// counts after the committed import.
#[tokio::test]
async fn feed_counts_match_actual_rows() {
    let pool = common::test_pool().await;
    let agency_id = common::insert_agency(&pool, "Test Agency").await;

    let importer = Importer::new(&pool, None);
    let result = importer
        .import_archive(agency_id, &common::minimal_archive(), &default_options())
        .await
        .expect("import should succeed");

    let route_count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM routes WHERE feed_id = ?")
        .bind(result.feed_id)
        .fetch_one(&pool)
        .await
        .unwrap()
        .get("n");
    let stop_count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM stops WHERE feed_id = ?")
        .bind(result.feed_id)
        .fetch_one(&pool)
        .await
        .unwrap()
        .get("n");
    let trip_count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM trips WHERE feed_id = ?")
        .bind(result.feed_id)
        .fetch_one(&pool)
        .await
        .unwrap()
        .get("n");

    assert_eq!(result.total_routes, route_count);
    assert_eq!(result.total_stops, stop_count);
    assert_eq!(result.total_trips, trip_count);
}

/// S2: a stop_times row referencing an unknown stop_id is skipped, not
/// rejected wholesale, and the feed ends up without that stop.
#[tokio::test]
async fn unknown_stop_reference_is_skipped_not_fatal() {
    let pool = common::test_pool().await;
    let agency_id = common::insert_agency(&pool, "Test Agency").await;

    let importer = Importer::new(&pool, None);
    let result = importer
        .import_archive(agency_id, &common::archive_with_ghost_stop(), &default_options())
        .await
        .expect("import should still succeed despite the bad reference");

    assert!(result.missing_stop_ids.iter().any(|s| s == "GHOST"));

    let ghost_exists: i64 = sqlx::query("SELECT COUNT(*) AS n FROM stops WHERE feed_id = ? AND stop_id = 'GHOST'")
        .bind(result.feed_id)
        .fetch_one(&pool)
        .await
        .unwrap()
        .get("n");
    assert_eq!(ghost_exists, 0);

    // The valid stop_time row (S1 -> T1) still made it in.
    let stop_time_count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM stop_times WHERE feed_id = ?")
        .bind(result.feed_id)
        .fetch_one(&pool)
        .await
        .unwrap()
        .get("n");
    assert_eq!(stop_time_count, 1);
}

/// Testable property 3: every Trip's route_id/service_id/shape_id and every
/// StopTime's trip_id/stop_id resolve within the same feed.
#[tokio::test]
async fn referential_closure_holds_after_import() {
    let pool = common::test_pool().await;
    let agency_id = common::insert_agency(&pool, "Test Agency").await;

    let importer = Importer::new(&pool, None);
    let result = importer
        .import_archive(agency_id, &common::minimal_archive(), &default_options())
        .await
        .unwrap();

    let dangling_trips: i64 = sqlx::query(
        "SELECT COUNT(*) AS n FROM trips t
         WHERE t.feed_id = ?
           AND (NOT EXISTS (SELECT 1 FROM routes r WHERE r.feed_id = t.feed_id AND r.route_id = t.route_id)
                OR NOT EXISTS (SELECT 1 FROM calendars c WHERE c.feed_id = t.feed_id AND c.service_id = t.service_id))",
    )
    .bind(result.feed_id)
    .fetch_one(&pool)
    .await
    .unwrap()
    .get("n");
    assert_eq!(dangling_trips, 0);

    let dangling_stop_times: i64 = sqlx::query(
        "SELECT COUNT(*) AS n FROM stop_times st
         WHERE st.feed_id = ?
           AND (NOT EXISTS (SELECT 1 FROM trips t WHERE t.feed_id = st.feed_id AND t.trip_id = st.trip_id)
                OR NOT EXISTS (SELECT 1 FROM stops s WHERE s.feed_id = st.feed_id AND s.stop_id = st.stop_id))",
    )
    .bind(result.feed_id)
    .fetch_one(&pool)
    .await
    .unwrap()
    .get("n");
    assert_eq!(dangling_stop_times, 0);
}

/// Testable property 4: stop_sequence values are strictly increasing within
/// a trip.
#[tokio::test]
async fn stop_sequence_is_strictly_increasing() {
    let pool = common::test_pool().await;
    let agency_id = common::insert_agency(&pool, "Test Agency").await;

    let importer = Importer::new(&pool, None);
    let result = importer
        .import_archive(agency_id, &common::minimal_archive(), &default_options())
        .await
        .unwrap();

    let rows = sqlx::query(
        "SELECT stop_sequence FROM stop_times WHERE feed_id = ? AND trip_id = 'T1' ORDER BY stop_sequence",
    )
    .bind(result.feed_id)
    .fetch_all(&pool)
    .await
    .unwrap();

    let sequences: Vec<i64> = rows.iter().map(|r| r.get("stop_sequence")).collect();
    assert!(sequences.windows(2).all(|w| w[0] < w[1]));
}

/// Testable property 2: composite (feed_id, natural_key) uniqueness per
/// table holds after import — re-importing into the same feed via the
/// upsert paths must not create duplicate route_ids.
#[tokio::test]
async fn composite_keys_remain_unique() {
    let pool = common::test_pool().await;
    let agency_id = common::insert_agency(&pool, "Test Agency").await;

    let importer = Importer::new(&pool, None);
    let result = importer
        .import_archive(agency_id, &common::minimal_archive(), &default_options())
        .await
        .unwrap();

    let rows = sqlx::query("SELECT route_id FROM routes WHERE feed_id = ?")
        .bind(result.feed_id)
        .fetch_all(&pool)
        .await
        .unwrap();
    let route_ids: Vec<String> = rows.iter().map(|r| r.get("route_id")).collect();
    let unique: HashSet<&String> = route_ids.iter().collect();
    assert_eq!(route_ids.len(), unique.len());
}

/// Testable property 1 (round-trip fidelity): import then export yields an
/// archive whose per-file row counts match the source, modulo nothing for
/// this archive (it has no dates-only services and no custom columns).
#[tokio::test]
async fn export_after_import_round_trips_row_counts() {
    let pool = common::test_pool().await;
    let agency_id = common::insert_agency(&pool, "Test Agency").await;

    let importer = Importer::new(&pool, None);
    let result = importer
        .import_archive(agency_id, &common::minimal_archive(), &default_options())
        .await
        .unwrap();

    let exporter = Exporter::new(&pool, None);
    let archive_bytes = exporter.export_feed(result.feed_id).await.unwrap();

    let mut zip = zip::ZipArchive::new(std::io::Cursor::new(archive_bytes)).unwrap();
    let mut stop_times_csv = String::new();
    {
        use std::io::Read;
        let mut file = zip.by_name("stop_times.txt").expect("stop_times.txt present in export");
        file.read_to_string(&mut stop_times_csv).unwrap();
    }
    // Header + two data rows for T1's two stop_times.
    assert_eq!(stop_times_csv.lines().count(), 3);
}

/// Custom (non-standard) CSV columns round-trip through `custom_fields`.
#[tokio::test]
async fn custom_columns_survive_export() {
    let pool = common::test_pool().await;
    let agency_id = common::insert_agency(&pool, "Test Agency").await;

    // routes.txt carries an extra, non-standard column.
    let files = [
        ("agency.txt", "agency_id,agency_name,agency_url,agency_timezone\nA1,Test Agency,https://example.com,America/New_York\n"),
        ("stops.txt", "stop_id,stop_name,stop_lat,stop_lon\nS1,First Stop,40.0,-75.0\nS2,Second Stop,40.1,-75.1\n"),
        ("routes.txt", "route_id,route_short_name,route_long_name,route_type,operator_notes\nR1,1,Main Line,3,night-service\n"),
        ("calendar.txt", "service_id,monday,tuesday,wednesday,thursday,friday,saturday,sunday,start_date,end_date\nWEEKDAY,1,1,1,1,1,0,0,20250101,20251231\n"),
        ("trips.txt", "trip_id,route_id,service_id\nT1,R1,WEEKDAY\n"),
        ("stop_times.txt", "trip_id,arrival_time,departure_time,stop_id,stop_sequence\nT1,07:00:00,07:00:00,S1,1\nT1,07:10:00,07:10:00,S2,2\n"),
    ];
    let archive = build_archive_for_test(&files);

    let importer = Importer::new(&pool, None);
    let result = importer
        .import_archive(agency_id, &archive, &default_options())
        .await
        .unwrap();

    let exporter = Exporter::new(&pool, None);
    let exported = exporter.export_feed(result.feed_id).await.unwrap();

    let mut zip = zip::ZipArchive::new(std::io::Cursor::new(exported)).unwrap();
    let mut routes_csv = String::new();
    {
        use std::io::Read;
        let mut file = zip.by_name("routes.txt").unwrap();
        file.read_to_string(&mut routes_csv).unwrap();
    }
    assert!(routes_csv.lines().next().unwrap().contains("operator_notes"));
    assert!(routes_csv.contains("night-service"));
}

fn build_archive_for_test(files: &[(&str, &str)]) -> Vec<u8> {
    use std::io::Write;
    use zip::write::FileOptions;

    let mut buf = Vec::new();
    {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        let options = FileOptions::default();
        for (name, contents) in files {
            writer.start_file(*name, options).unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }
    buf
}
