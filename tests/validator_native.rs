//! Native validator rule engine tests (spec §4.E.1; testable property 10).

mod common;

use gtfs_core::gtfs::importer::{ImportOptions, Importer};
use gtfs_core::validator::native::Validator;
use gtfs_core::validator::Severity;

fn default_options() -> ImportOptions {
    ImportOptions {
        replace_existing: false,
        validate_only: false,
        skip_shapes: false,
        stop_on_error: false,
        feed_name: None,
        description: None,
        version: None,
    }
}

async fn import_minimal(pool: &sqlx::SqlitePool) -> i64 {
    let agency_id = common::insert_agency(pool, "Test Agency").await;
    let importer = Importer::new(pool, None);
    importer
        .import_archive(agency_id, &common::minimal_archive(), &default_options())
        .await
        .unwrap()
        .feed_id
}

#[tokio::test]
async fn clean_feed_has_no_errors() {
    let pool = common::test_pool().await;
    let feed_id = import_minimal(&pool).await;

    let validator = Validator::new(&pool, None);
    let result = validator.validate_feed(feed_id).await.unwrap();

    assert!(result.is_valid(), "unexpected errors: {:?}", result.issues);
}

#[tokio::test]
async fn missing_route_short_name_is_an_error() {
    let pool = common::test_pool().await;
    let feed_id = import_minimal(&pool).await;

    sqlx::query("UPDATE routes SET route_short_name = NULL WHERE feed_id = ? AND route_id = 'R1'")
        .bind(feed_id)
        .execute(&pool)
        .await
        .unwrap();

    let validator = Validator::new(&pool, None);
    let result = validator.validate_feed(feed_id).await.unwrap();

    assert!(!result.is_valid());
    assert!(result
        .issues
        .iter()
        .any(|i| i.severity == Severity::Error && i.category == "routes" && i.field.as_deref() == Some("route_short_name")));
}

#[tokio::test]
async fn trip_referencing_unknown_service_id_is_an_error() {
    let pool = common::test_pool().await;
    let feed_id = import_minimal(&pool).await;

    sqlx::query("UPDATE trips SET service_id = 'GHOST_SERVICE' WHERE feed_id = ? AND trip_id = 'T1'")
        .bind(feed_id)
        .execute(&pool)
        .await
        .unwrap();

    let validator = Validator::new(&pool, None);
    let result = validator.validate_feed(feed_id).await.unwrap();

    assert!(result
        .issues
        .iter()
        .any(|i| i.severity == Severity::Error && i.category == "trips" && i.field.as_deref() == Some("service_id")));
}

#[tokio::test]
async fn trip_referencing_unknown_shape_id_is_an_error() {
    let pool = common::test_pool().await;
    let feed_id = import_minimal(&pool).await;

    sqlx::query("UPDATE trips SET shape_id = 'GHOST_SHAPE' WHERE feed_id = ? AND trip_id = 'T1'")
        .bind(feed_id)
        .execute(&pool)
        .await
        .unwrap();

    let validator = Validator::new(&pool, None);
    let result = validator.validate_feed(feed_id).await.unwrap();

    assert!(result
        .issues
        .iter()
        .any(|i| i.severity == Severity::Error && i.category == "trips" && i.field.as_deref() == Some("shape_id")));
}

#[tokio::test]
async fn stop_times_referencing_unknown_trip_or_stop_are_flagged_in_aggregate() {
    let pool = common::test_pool().await;
    let feed_id = import_minimal(&pool).await;

    sqlx::query(
        "INSERT INTO stop_times (feed_id, trip_id, stop_sequence, stop_id, arrival_time, departure_time)
         VALUES (?, 'GHOST_TRIP', 1, 'S1', '08:00:00', '08:00:00')",
    )
    .bind(feed_id)
    .execute(&pool)
    .await
    .unwrap();

    let validator = Validator::new(&pool, None);
    let result = validator.validate_feed(feed_id).await.unwrap();

    assert!(result.issues.iter().any(|i| {
        i.severity == Severity::Error
            && i.category == "stop_times"
            && i.message.contains("non-existent trips")
    }));
}

/// Testable property 4 surfaced via the validator's warning path: a
/// non-increasing stop_sequence within a trip is caught by the LAG() window
/// query, not just at import time.
#[tokio::test]
async fn non_increasing_stop_sequence_is_a_warning() {
    let pool = common::test_pool().await;
    let feed_id = import_minimal(&pool).await;

    sqlx::query("DELETE FROM stop_times WHERE feed_id = ? AND trip_id = 'T1'")
        .bind(feed_id)
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO stop_times (feed_id, trip_id, stop_sequence, stop_id, arrival_time, departure_time) VALUES
         (?, 'T1', 2, 'S1', '07:00:00', '07:00:00'),
         (?, 'T1', 1, 'S2', '07:10:00', '07:10:00')",
    )
    .bind(feed_id)
    .bind(feed_id)
    .execute(&pool)
    .await
    .unwrap();

    let validator = Validator::new(&pool, None);
    let result = validator.validate_feed(feed_id).await.unwrap();

    assert!(result.issues.iter().any(|i| {
        i.severity == Severity::Warning
            && i.category == "stop_times"
            && i.message.contains("non-increasing stop_sequence")
    }));
}

/// Testable property 10: a shape_dist_traveled delta that diverges from the
/// Haversine-calculated distance by more than 20% is a warning; within
/// tolerance is silent.
#[tokio::test]
async fn shape_distance_mismatch_beyond_tolerance_is_a_warning() {
    let pool = common::test_pool().await;
    let feed_id = import_minimal(&pool).await;

    // Two points roughly 1.57km apart (1 degree of longitude at the equator
    // is about 111km; 0.0141 degrees is about 1.57km), but shape_dist_traveled
    // claims only 10m between them -- wildly outside the 20% tolerance.
    sqlx::query(
        "INSERT INTO shapes (feed_id, shape_id, shape_pt_sequence, shape_pt_lat, shape_pt_lon, shape_dist_traveled) VALUES
         (?, 'SHP1', 1, 0.0, 0.0, 0.0),
         (?, 'SHP1', 2, 0.0, 0.0141, 10.0)",
    )
    .bind(feed_id)
    .bind(feed_id)
    .execute(&pool)
    .await
    .unwrap();

    let validator = Validator::new(&pool, None);
    let result = validator.validate_feed(feed_id).await.unwrap();

    assert!(result.issues.iter().any(|i| {
        i.severity == Severity::Warning
            && i.category == "shapes"
            && i.field.as_deref() == Some("shape_dist_traveled")
    }));
}

#[tokio::test]
async fn shape_distance_within_tolerance_is_silent() {
    let pool = common::test_pool().await;
    let feed_id = import_minimal(&pool).await;

    // ~1570m apart; report a distance within 20% of that.
    sqlx::query(
        "INSERT INTO shapes (feed_id, shape_id, shape_pt_sequence, shape_pt_lat, shape_pt_lon, shape_dist_traveled) VALUES
         (?, 'SHP2', 1, 0.0, 0.0, 0.0),
         (?, 'SHP2', 2, 0.0, 0.0141, 1570.0)",
    )
    .bind(feed_id)
    .bind(feed_id)
    .execute(&pool)
    .await
    .unwrap();

    let validator = Validator::new(&pool, None);
    let result = validator.validate_feed(feed_id).await.unwrap();

    assert!(!result.issues.iter().any(|i| {
        i.category == "shapes" && i.field.as_deref() == Some("shape_dist_traveled") && i.message.contains("mismatch")
    }));
}

#[tokio::test]
async fn validating_unknown_feed_is_an_error() {
    let pool = common::test_pool().await;
    let validator = Validator::new(&pool, None);
    assert!(validator.validate_feed(999_999).await.is_err());
}
