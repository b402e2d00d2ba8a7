//! Demo-mode synthetic vehicle positions (spec §4.F): when an agency has no
//! live feed configured, animate a vehicle along each trip's shape using
//! the wall clock as phase, so the dashboard has something to draw without
//! a real GTFS-rt producer. Grounded on `liveupdates.rs`'s in-memory
//! `UpdateStore`, which this demo feeds instead of a decoded protobuf feed.

use std::time::{SystemTime, UNIX_EPOCH};

use sqlx::{Row, SqlitePool};

use super::VehiclePositionEntity;

struct ShapePoint {
    lat: f64,
    lon: f64,
    cumulative_m: f64,
}

/// Builds one synthetic `VehiclePositionEntity` per trip in `feed_id`,
/// placing each vehicle along its shape at a position derived from
/// `now_unix_seconds` so consecutive calls show continuous movement.
pub async fn synthetic_positions(
    pool: &SqlitePool,
    feed_id: i64,
    now_unix_seconds: u64,
) -> Result<Vec<VehiclePositionEntity>, sqlx::Error> {
    let trips = sqlx::query(
        "SELECT trip_id, route_id, shape_id FROM trips WHERE feed_id = ? AND shape_id IS NOT NULL",
    )
    .bind(feed_id)
    .fetch_all(pool)
    .await?;

    let mut positions = Vec::new();
    for trip in trips {
        let trip_id: String = trip.get("trip_id");
        let route_id: Option<String> = trip.get("route_id");
        let shape_id: String = trip.get("shape_id");

        let points = load_shape(pool, feed_id, &shape_id).await?;
        if points.len() < 2 {
            continue;
        }

        let total_length = points.last().unwrap().cumulative_m;
        if total_length <= 0.0 {
            continue;
        }

        // 90-second lap, offset by a hash of the trip id so vehicles on the
        // same shape don't all sit on top of each other.
        let period_secs = 90u64;
        let offset = (hash_str(&trip_id) % period_secs) as u64;
        let phase = ((now_unix_seconds + offset) % period_secs) as f64 / period_secs as f64;
        let target = phase * total_length;

        let (lat, lon, bearing) = interpolate(&points, target);

        positions.push(VehiclePositionEntity {
            feed_source_id: 0,
            feed_source_name: "demo".to_string(),
            entity_id: format!("demo-{trip_id}"),
            trip_id: Some(trip_id.clone()),
            route_id,
            vehicle_id: Some(format!("demo-vehicle-{trip_id}")),
            vehicle_label: Some(format!("Demo {trip_id}")),
            latitude: Some(lat as f32),
            longitude: Some(lon as f32),
            bearing: Some(bearing as f32),
            speed: Some((total_length / period_secs as f64) as f32),
            current_stop_sequence: None,
            stop_id: None,
            current_status: Some("in_transit_to"),
            congestion_level: Some("unknown"),
            occupancy_status: Some("no_data_available"),
            timestamp: Some(now_unix_seconds),
        });
    }

    Ok(positions)
}

async fn load_shape(pool: &SqlitePool, feed_id: i64, shape_id: &str) -> Result<Vec<ShapePoint>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT shape_pt_lat, shape_pt_lon FROM shapes
         WHERE feed_id = ? AND shape_id = ? ORDER BY shape_pt_sequence",
    )
    .bind(feed_id)
    .bind(shape_id)
    .fetch_all(pool)
    .await?;

    let mut points = Vec::with_capacity(rows.len());
    let mut cumulative = 0.0;
    let mut prev: Option<(f64, f64)> = None;
    for row in rows {
        let lat: f64 = row.get("shape_pt_lat");
        let lon: f64 = row.get("shape_pt_lon");
        if let Some((plat, plon)) = prev {
            cumulative += crate::validator::haversine_meters(plat, plon, lat, lon);
        }
        points.push(ShapePoint { lat, lon, cumulative_m: cumulative });
        prev = Some((lat, lon));
    }
    Ok(points)
}

/// Walks the cumulative-distance table to find the segment containing
/// `target_m` and linearly interpolates lat/lon and bearing within it.
fn interpolate(points: &[ShapePoint], target_m: f64) -> (f64, f64, f64) {
    for window in points.windows(2) {
        let (a, b) = (&window[0], &window[1]);
        if target_m >= a.cumulative_m && target_m <= b.cumulative_m {
            let segment_len = b.cumulative_m - a.cumulative_m;
            let t = if segment_len > 0.0 { (target_m - a.cumulative_m) / segment_len } else { 0.0 };
            let lat = a.lat + (b.lat - a.lat) * t;
            let lon = a.lon + (b.lon - a.lon) * t;
            let bearing = bearing_degrees(a.lat, a.lon, b.lat, b.lon);
            return (lat, lon, bearing);
        }
    }
    let last = points.last().unwrap();
    (last.lat, last.lon, 0.0)
}

fn bearing_degrees(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1_r, lat2_r) = (lat1.to_radians(), lat2.to_radians());
    let delta_lon = (lon2 - lon1).to_radians();
    let y = delta_lon.sin() * lat2_r.cos();
    let x = lat1_r.cos() * lat2_r.sin() - lat1_r.sin() * lat2_r.cos() * delta_lon.cos();
    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

fn hash_str(s: &str) -> u64 {
    let mut h: u64 = 1469598103934665603;
    for b in s.bytes() {
        h ^= b as u64;
        h = h.wrapping_mul(1099511628211);
    }
    h
}

/// Convenience wrapper for callers that don't already have a unix timestamp.
pub fn now_unix_seconds() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}
