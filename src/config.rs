//! Process-wide configuration, loaded once at startup from the environment.
//!
//! Mirrors the shape of the Python implementation's settings object: a
//! handful of typed values with defaults, never a global mutable singleton.
//! Callers own a `Config` and pass it down explicitly (see `DESIGN.md`).

use std::env;
use std::time::Duration;

/// Reference bind-parameter limit of the underlying SQL driver (spec §4.B.3).
pub const SQL_BIND_PARAM_LIMIT: usize = 32_767;

/// Conservative default batch size used when a table's column count isn't
/// known ahead of time, or would allow a larger batch than is prudent.
pub const DEFAULT_BULK_BATCH_SIZE: usize = 2_500;

#[derive(Debug, Clone)]
pub struct Config {
    /// sqlx connection string, e.g. `sqlite://gtfs.db` or `sqlite::memory:`.
    pub database_url: String,
    /// Root directory for per-run validator scratch space.
    pub scratch_dir: String,
    /// Root directory for upload staging (expires after one hour).
    pub uploads_dir: String,
    /// Docker image reference for the containerized reference validator.
    pub mobilitydata_validator_image: String,
    /// Host-side prefix to substitute for `scratch_dir` when this process
    /// itself runs inside a container and must hand paths to a sibling
    /// Docker daemon for volume mounts (spec §4.E.2 / §6).
    pub host_path_prefix: Option<String>,
    /// Request timeout for realtime HTTP fetches (spec §5).
    pub realtime_http_timeout: Duration,
    /// Delay between distinct-URL fetches in the realtime fetcher (spec §4.F).
    pub realtime_url_pacing: Duration,
    /// Orphan sweep thresholds (spec §4.A).
    pub orphan_running_timeout: Duration,
    pub orphan_pending_timeout: Duration,
    /// Task retention (spec §4.A).
    pub task_retention: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://gtfs.db".to_string()),
            scratch_dir: env::var("GTFS_SCRATCH_DIR")
                .unwrap_or_else(|_| "/tmp/gtfs-scratch".to_string()),
            uploads_dir: env::var("GTFS_UPLOADS_DIR")
                .unwrap_or_else(|_| "/tmp/gtfs-uploads".to_string()),
            mobilitydata_validator_image: env::var("MOBILITYDATA_VALIDATOR_IMAGE")
                .unwrap_or_else(|_| "mobilitydata/gtfs-validator:latest".to_string()),
            host_path_prefix: env::var("GTFS_HOST_PATH_PREFIX").ok(),
            realtime_http_timeout: Duration::from_secs(
                env::var("GTFS_REALTIME_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(10),
            ),
            realtime_url_pacing: Duration::from_secs(2),
            orphan_running_timeout: Duration::from_secs(30 * 60),
            orphan_pending_timeout: Duration::from_secs(60 * 60),
            task_retention: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

/// `batch_size = floor(SQL_BIND_PARAM_LIMIT / columns)`, clamped to the
/// conservative default (spec §4.B.3, testable property 5).
pub fn bulk_batch_size(columns: usize) -> usize {
    let raw = SQL_BIND_PARAM_LIMIT / columns.max(1);
    raw.min(DEFAULT_BULK_BATCH_SIZE).max(1)
}
