//! In-process worker pool and periodic scheduler standing in for the task
//! queue transport (out of scope per spec §1) and the "task runtime" that
//! schedules `CleanupOldTasks`/`CheckOrphaned` (spec §4.A).
//!
//! The real transport is "a reliable at-least-once job dispatcher with
//! named job kinds, keyword arguments, and a periodic scheduler" (spec §1).
//! This module provides the piece of that contract the core owns: a pool of
//! `tokio` tasks pulling work and an `tokio::time::interval`-driven
//! scheduler, mirroring "a pool of parallel workers, each worker
//! single-threaded internally but running cooperatively with I/O" (spec §5).

use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use sqlx::SqlitePool;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::orchestrator::Orchestrator;

/// Runs the two periodic jobs from spec §4.A on their own intervals until
/// the process shuts down. Each tick is a single suspension-point-heavy
/// pass; ticks never overlap because `tokio::time::interval` only fires the
/// next tick after the previous `async` body returns.
pub async fn run_scheduler(pool: SqlitePool, cfg: Config) {
    let cleanup_pool = pool.clone();
    let cleanup_retention = cfg.task_retention;
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(24 * 60 * 60));
        loop {
            tick.tick().await;
            let orch = Orchestrator::new(&cleanup_pool);
            match orch
                .cleanup_old_tasks(chrono::Duration::from_std(cleanup_retention).unwrap())
                .await
            {
                Ok(n) => info!("cleanup_old_tasks removed {n} terminal tasks"),
                Err(e) => error!("cleanup_old_tasks failed: {e}"),
            }
        }
    });

    let orphan_pool = pool.clone();
    let running_timeout = cfg.orphan_running_timeout;
    let pending_timeout = cfg.orphan_pending_timeout;
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(10 * 60));
        loop {
            tick.tick().await;
            let orch = Orchestrator::new(&orphan_pool);
            match orch
                .check_orphaned(
                    chrono::Duration::from_std(running_timeout).unwrap(),
                    chrono::Duration::from_std(pending_timeout).unwrap(),
                )
                .await
            {
                Ok(r) if r.orphaned_running + r.orphaned_pending > 0 => {
                    info!(
                        "check_orphaned reconciled {} running, {} pending",
                        r.orphaned_running, r.orphaned_pending
                    );
                }
                Ok(_) => {}
                Err(e) => error!("check_orphaned failed: {e}"),
            }
        }
    });
}

/// A unit of work a worker executes. Each job kind's queue handler in the
/// real transport would call into the matching `gtfs::*` / `validator::*`
/// function with its task_db_id; this closure-based job keeps the worker
/// pool decoupled from any specific component.
pub type Job = Box<dyn FnOnce(SqlitePool) -> futures_boxed::BoxFuture + Send>;

/// Minimal boxed-future alias without pulling in `futures` as a dependency
/// the teacher doesn't already carry (the teacher depends on `reqwest`,
/// which re-exports nothing suitable); `tokio`'s `full` feature already
/// gives us everything needed to hand-roll this alias.
mod futures_boxed {
    use std::future::Future;
    use std::pin::Pin;
    pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
}

/// A small worker pool: `n` long-lived tasks pop jobs off an mpsc channel
/// and run them to completion. "Multiple workers may process different
/// tasks concurrently; at most one worker runs a given task_id" (spec §5)
/// is satisfied because each `AsyncTask` is enqueued as exactly one `Job`.
pub struct WorkerPool {
    tx: mpsc::UnboundedSender<Job>,
}

impl WorkerPool {
    pub fn spawn(pool: SqlitePool, workers: usize) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel::<Job>();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        for worker_id in 0..workers.max(1) {
            let pool = pool.clone();
            let rx = rx.clone();
            tokio::spawn(async move {
                loop {
                    let job = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    match job {
                        Some(job) => job(pool.clone()).await,
                        None => {
                            info!("worker {worker_id} shutting down: channel closed");
                            break;
                        }
                    }
                }
            });
        }
        Arc::new(WorkerPool { tx })
    }

    pub fn submit(&self, job: Job) {
        let _ = self.tx.send(job);
    }
}

/// A `JobDispatcher` that hands the enqueued task straight to the
/// in-process `WorkerPool` instead of a real external queue (spec §1,
/// "Task queue transport" is out of scope; this owns the contract it
/// consumes).
pub struct WorkerPoolDispatcher {
    pool: Arc<WorkerPool>,
    config: Config,
}

impl WorkerPoolDispatcher {
    pub fn new(pool: Arc<WorkerPool>, config: Config) -> Self {
        WorkerPoolDispatcher { pool, config }
    }
}

impl crate::orchestrator::JobDispatcher for WorkerPoolDispatcher {
    fn dispatch(
        &self,
        kind: crate::orchestrator::TaskKind,
        task_db_id: i64,
        payload: serde_json::Value,
    ) -> String {
        let handle = uuid::Uuid::new_v4().to_string();
        let config = self.config.clone();
        self.pool.submit(Box::new(move |db| {
            Box::pin(async move {
                run_job(&db, &config, kind, task_db_id, payload).await;
            })
        }));
        handle
    }
}

/// The "task runtime" (spec §4.A/§5): runs one `AsyncTask` to completion,
/// recording the result or failure on the orchestrator record. Mirrors
/// `app/tasks.py`'s per-kind Celery task bodies, collapsed into one match.
async fn run_job(
    pool: &SqlitePool,
    config: &Config,
    kind: crate::orchestrator::TaskKind,
    task_id: i64,
    payload: serde_json::Value,
) {
    use crate::orchestrator::TaskKind;

    let orch = Orchestrator::new(pool);
    if let Err(e) = orch.begin_run(task_id).await {
        error!("task {task_id}: failed to begin_run: {e}");
        return;
    }

    let outcome = match kind {
        TaskKind::ImportGtfs => run_import(pool, task_id, &payload).await,
        TaskKind::ExportGtfs => run_export(pool, task_id, &payload).await,
        TaskKind::ValidateGtfs => run_validate_native(pool, task_id, &payload).await,
        TaskKind::ValidateGtfsMobilitydata => {
            run_validate_mobilitydata(pool, config, task_id, &payload).await
        }
        TaskKind::ValidateGtfsFileMobilitydata => {
            run_validate_mobilitydata_file(pool, config, task_id, &payload).await
        }
        TaskKind::MergeAgencies => run_merge(pool, task_id, &payload).await,
        TaskKind::SplitAgency => run_split(pool, task_id, &payload).await,
        TaskKind::CloneFeed => run_clone(pool, task_id, &payload).await,
        TaskKind::DeleteFeed => run_delete_feed(pool, task_id, &payload).await,
        TaskKind::DeleteAgency => run_delete_agency(pool, task_id, &payload).await,
    };

    match outcome {
        Ok(result) => {
            if let Err(e) = orch.complete(task_id, result).await {
                error!("task {task_id}: failed to record completion: {e}");
            }
        }
        Err(JobError::Cancelled) => {
            info!("task {task_id}: cancelled");
        }
        Err(JobError::Failed(msg)) => {
            let retryable = matches!(kind, TaskKind::ValidateGtfsMobilitydata | TaskKind::ValidateGtfsFileMobilitydata);
            if let Err(e) = orch.fail(task_id, &msg, None, retryable).await {
                error!("task {task_id}: failed to record failure: {e}");
            }
        }
    }
}

enum JobError {
    Cancelled,
    Failed(String),
}

fn field_i64(payload: &serde_json::Value, key: &str) -> Result<i64, JobError> {
    payload
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| JobError::Failed(format!("missing or invalid payload field: {key}")))
}

fn field_str<'a>(payload: &'a serde_json::Value, key: &str) -> Result<&'a str, JobError> {
    payload
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| JobError::Failed(format!("missing or invalid payload field: {key}")))
}

fn field_bool(payload: &serde_json::Value, key: &str, default: bool) -> bool {
    payload.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
}

fn field_bytes(payload: &serde_json::Value, key: &str) -> Result<Vec<u8>, JobError> {
    use base64::Engine;
    let encoded = field_str(payload, key)?;
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| JobError::Failed(format!("{key} is not valid base64: {e}")))
}

async fn run_import(
    pool: &SqlitePool,
    task_id: i64,
    payload: &serde_json::Value,
) -> Result<serde_json::Value, JobError> {
    use crate::gtfs::importer::{ImportOptions, Importer};

    let agency_id = field_i64(payload, "agency_id")?;
    let zip_bytes = field_bytes(payload, "file_content")?;
    let options = ImportOptions {
        replace_existing: field_bool(payload, "replace_existing", false),
        validate_only: field_bool(payload, "validate_only", false),
        skip_shapes: field_bool(payload, "skip_shapes", false),
        stop_on_error: field_bool(payload, "stop_on_error", true),
        feed_name: payload.get("feed_name").and_then(|v| v.as_str()).map(str::to_string),
        description: payload.get("feed_description").and_then(|v| v.as_str()).map(str::to_string),
        version: payload.get("feed_version").and_then(|v| v.as_str()).map(str::to_string),
    };

    let importer = Importer::new(pool, Some(task_id));
    match importer.import_archive(agency_id, &zip_bytes, &options).await {
        Ok(result) => serde_json::to_value(result).map_err(|e| JobError::Failed(e.to_string())),
        Err(crate::error::ImportError::Cancelled(_)) => Err(JobError::Cancelled),
        Err(e) => Err(JobError::Failed(e.to_string())),
    }
}

async fn run_export(
    pool: &SqlitePool,
    task_id: i64,
    payload: &serde_json::Value,
) -> Result<serde_json::Value, JobError> {
    use crate::gtfs::exporter::Exporter;

    let feed_id = field_i64(payload, "feed_id")?;
    let exporter = Exporter::new(pool, Some(task_id));
    match exporter.export_feed(feed_id).await {
        Ok(bytes) => {
            use base64::Engine;
            let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
            Ok(serde_json::json!({ "file_content": encoded }))
        }
        Err(crate::error::ExportError::Cancelled(_)) => Err(JobError::Cancelled),
        Err(e) => Err(JobError::Failed(e.to_string())),
    }
}

async fn run_validate_native(
    pool: &SqlitePool,
    task_id: i64,
    payload: &serde_json::Value,
) -> Result<serde_json::Value, JobError> {
    use crate::validator::native::Validator;

    let feed_id = field_i64(payload, "feed_id")?;
    let validator = Validator::new(pool, Some(task_id));
    match validator.validate_feed(feed_id).await {
        Ok(result) => serde_json::to_value(result).map_err(|e| JobError::Failed(e.to_string())),
        Err(crate::error::ValidationError::Cancelled(_)) => Err(JobError::Cancelled),
        Err(e) => Err(JobError::Failed(e.to_string())),
    }
}

async fn run_validate_mobilitydata(
    pool: &SqlitePool,
    config: &Config,
    task_id: i64,
    payload: &serde_json::Value,
) -> Result<serde_json::Value, JobError> {
    use crate::validator::mobilitydata::MobilityDataValidator;

    let feed_id = field_i64(payload, "feed_id")?;
    let country_code = payload.get("country_code").and_then(|v| v.as_str());
    let validator = MobilityDataValidator::new(pool, config, Some(task_id));
    let feed_name = format!("feed-{feed_id}");
    match validator.validate_feed(feed_id, &feed_name, country_code).await {
        Ok(report) => serde_json::to_value(report).map_err(|e| JobError::Failed(e.to_string())),
        Err(crate::error::ValidationError::Cancelled(_)) => Err(JobError::Cancelled),
        Err(e) => Err(JobError::Failed(e.to_string())),
    }
}

async fn run_validate_mobilitydata_file(
    pool: &SqlitePool,
    config: &Config,
    task_id: i64,
    payload: &serde_json::Value,
) -> Result<serde_json::Value, JobError> {
    use crate::validator::mobilitydata::MobilityDataValidator;

    let zip_bytes = field_bytes(payload, "file_content")?;
    let filename = field_str(payload, "filename")?;
    let country_code = payload.get("country_code").and_then(|v| v.as_str());
    let validator = MobilityDataValidator::new(pool, config, Some(task_id));
    match validator.validate_file(&zip_bytes, filename, country_code).await {
        Ok(report) => serde_json::to_value(report).map_err(|e| JobError::Failed(e.to_string())),
        Err(crate::error::ValidationError::Cancelled(_)) => Err(JobError::Cancelled),
        Err(e) => Err(JobError::Failed(e.to_string())),
    }
}

async fn run_merge(
    pool: &SqlitePool,
    task_id: i64,
    payload: &serde_json::Value,
) -> Result<serde_json::Value, JobError> {
    use crate::gtfs::mutators::merge::{merge_feeds, MergeOptions};
    use crate::gtfs::mutators::MergeStrategy;

    let sources: Vec<i64> = payload
        .get("source_feed_ids")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_i64()).collect())
        .unwrap_or_default();
    let target_agency_id = field_i64(payload, "target_agency_id")?;
    let strategy = payload
        .get("merge_strategy")
        .and_then(|v| v.as_str())
        .and_then(MergeStrategy::parse)
        .unwrap_or(MergeStrategy::FailOnConflict);

    let options = MergeOptions {
        sources,
        target_agency_id,
        strategy,
        name: payload.get("feed_name").and_then(|v| v.as_str()).map(str::to_string),
        description: payload.get("feed_description").and_then(|v| v.as_str()).map(str::to_string),
        activate: field_bool(payload, "activate_on_success", true),
    };

    match merge_feeds(pool, &options, Some(task_id)).await {
        Ok(result) => serde_json::to_value(result).map_err(|e| JobError::Failed(e.to_string())),
        Err(crate::error::MutatorError::Cancelled(_)) => Err(JobError::Cancelled),
        Err(e) => Err(JobError::Failed(e.to_string())),
    }
}

async fn run_split(
    pool: &SqlitePool,
    task_id: i64,
    payload: &serde_json::Value,
) -> Result<serde_json::Value, JobError> {
    use crate::gtfs::mutators::split::{split_agency, SplitOptions};

    let route_ids: Vec<String> = payload
        .get("route_ids")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();

    let options = SplitOptions {
        source_agency_id: field_i64(payload, "source_agency_id")?,
        source_feed_id: field_i64(payload, "feed_id")?,
        route_ids,
        new_agency_name: field_str(payload, "new_agency_name")?.to_string(),
        copy_users: field_bool(payload, "copy_users", false),
        remove_from_source: field_bool(payload, "remove_from_source", false),
        initiating_user_id: payload.get("user_id").and_then(|v| v.as_i64()),
    };

    match split_agency(pool, &options, Some(task_id)).await {
        Ok(result) => serde_json::to_value(result).map_err(|e| JobError::Failed(e.to_string())),
        Err(crate::error::MutatorError::Cancelled(_)) => Err(JobError::Cancelled),
        Err(e) => Err(JobError::Failed(e.to_string())),
    }
}

async fn run_clone(
    pool: &SqlitePool,
    task_id: i64,
    payload: &serde_json::Value,
) -> Result<serde_json::Value, JobError> {
    use crate::gtfs::mutators::clone::{clone_feed, CloneOptions};

    let options = CloneOptions {
        source_feed_id: field_i64(payload, "source_feed_id")?,
        target_agency_id: field_i64(payload, "target_agency_id")?,
        name: payload.get("new_name").and_then(|v| v.as_str()).map(str::to_string),
        description: None,
    };

    match clone_feed(pool, &options, Some(task_id)).await {
        Ok(result) => serde_json::to_value(result).map_err(|e| JobError::Failed(e.to_string())),
        Err(crate::error::MutatorError::Cancelled(_)) => Err(JobError::Cancelled),
        Err(e) => Err(JobError::Failed(e.to_string())),
    }
}

async fn run_delete_feed(
    pool: &SqlitePool,
    task_id: i64,
    payload: &serde_json::Value,
) -> Result<serde_json::Value, JobError> {
    use crate::gtfs::mutators::delete::delete_feed;

    let feed_id = field_i64(payload, "feed_id")?;
    match delete_feed(pool, feed_id, Some(task_id)).await {
        Ok(()) => Ok(serde_json::json!({ "feed_id": feed_id })),
        Err(crate::error::MutatorError::Cancelled(_)) => Err(JobError::Cancelled),
        Err(e) => Err(JobError::Failed(e.to_string())),
    }
}

async fn run_delete_agency(
    pool: &SqlitePool,
    task_id: i64,
    payload: &serde_json::Value,
) -> Result<serde_json::Value, JobError> {
    use crate::gtfs::mutators::delete::delete_agency;

    let agency_id = field_i64(payload, "agency_id")?;
    match delete_agency(pool, agency_id, Some(task_id)).await {
        Ok(()) => Ok(serde_json::json!({ "agency_id": agency_id })),
        Err(crate::error::MutatorError::Cancelled(_)) => Err(JobError::Cancelled),
        Err(e) => Err(JobError::Failed(e.to_string())),
    }
}
