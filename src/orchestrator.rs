//! Task Orchestrator (spec §4.A) — the `AsyncTask` lifecycle record.
//!
//! Grounded on `examples/original_source/backend/app/tasks.py`
//! (`check_task_cancelled`, `mark_task_cancelled`, `cleanup_old_tasks`,
//! `check_orphaned_tasks`) translated into typed Rust: the Python code
//! reaches for string status columns and loosely-typed dict mutation; this
//! keeps the column but wraps it behind `TaskStatus`/`TaskKind` enums so
//! illegal states don't compile, parsed at the row boundary in `from_row`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::OrchestratorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    ImportGtfs,
    ExportGtfs,
    ValidateGtfs,
    ValidateGtfsMobilitydata,
    ValidateGtfsFileMobilitydata,
    MergeAgencies,
    SplitAgency,
    CloneFeed,
    DeleteFeed,
    DeleteAgency,
}

#[derive(Debug, Clone)]
pub struct AsyncTask {
    pub id: i64,
    pub external_job_id: String,
    pub task_kind: TaskKind,
    pub status: TaskStatus,
    pub progress: f64,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub user_id: i64,
    pub agency_id: Option<i64>,
    pub input_data: Json,
    pub result_data: Json,
    pub error_message: Option<String>,
    pub error_traceback: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl AsyncTask {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Self {
        use sqlx::Row;
        let status_str: String = row.get("status");
        let kind_str: String = row.get("task_kind");
        AsyncTask {
            id: row.get("id"),
            external_job_id: row.get("external_job_id"),
            task_kind: parse_kind(&kind_str),
            status: parse_status(&status_str),
            progress: row.get("progress"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
            user_id: row.get("user_id"),
            agency_id: row.get("agency_id"),
            input_data: row
                .get::<Option<String>, _>("input_data")
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or(Json::Null),
            result_data: row
                .get::<Option<String>, _>("result_data")
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or(Json::Null),
            error_message: row.get("error_message"),
            error_traceback: row.get("error_traceback"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

fn status_str(s: TaskStatus) -> &'static str {
    match s {
        TaskStatus::Pending => "pending",
        TaskStatus::Running => "running",
        TaskStatus::Completed => "completed",
        TaskStatus::Failed => "failed",
        TaskStatus::Cancelled => "cancelled",
    }
}

fn parse_status(s: &str) -> TaskStatus {
    match s {
        "running" => TaskStatus::Running,
        "completed" => TaskStatus::Completed,
        "failed" => TaskStatus::Failed,
        "cancelled" => TaskStatus::Cancelled,
        _ => TaskStatus::Pending,
    }
}

fn kind_str(k: TaskKind) -> &'static str {
    match k {
        TaskKind::ImportGtfs => "import_gtfs",
        TaskKind::ExportGtfs => "export_gtfs",
        TaskKind::ValidateGtfs => "validate_gtfs",
        TaskKind::ValidateGtfsMobilitydata => "validate_gtfs_mobilitydata",
        TaskKind::ValidateGtfsFileMobilitydata => "validate_gtfs_file_mobilitydata",
        TaskKind::MergeAgencies => "merge_agencies",
        TaskKind::SplitAgency => "split_agency",
        TaskKind::CloneFeed => "clone_feed",
        TaskKind::DeleteFeed => "delete_feed",
        TaskKind::DeleteAgency => "delete_agency",
    }
}

fn parse_kind(s: &str) -> TaskKind {
    match s {
        "export_gtfs" => TaskKind::ExportGtfs,
        "validate_gtfs" => TaskKind::ValidateGtfs,
        "validate_gtfs_mobilitydata" => TaskKind::ValidateGtfsMobilitydata,
        "validate_gtfs_file_mobilitydata" => TaskKind::ValidateGtfsFileMobilitydata,
        "merge_agencies" => TaskKind::MergeAgencies,
        "split_agency" => TaskKind::SplitAgency,
        "clone_feed" => TaskKind::CloneFeed,
        "delete_feed" => TaskKind::DeleteFeed,
        "delete_agency" => TaskKind::DeleteAgency,
        _ => TaskKind::ImportGtfs,
    }
}

/// A dispatched job handle: the kind plus the keyword payload a job-queue
/// transport would serialize (spec §6, "Task API"). The real transport is
/// out of scope (spec §1); this crate owns only the contract it consumes.
pub trait JobDispatcher: Send + Sync {
    fn dispatch(&self, kind: TaskKind, task_db_id: i64, payload: Json) -> String;
}

/// An in-process dispatcher used by tests and the demo binary: it returns a
/// fresh UUID as the "handle" and otherwise does nothing, standing in for
/// a reliable at-least-once external queue (spec §1, "Task queue transport").
pub struct NullDispatcher;

impl JobDispatcher for NullDispatcher {
    fn dispatch(&self, _kind: TaskKind, _task_db_id: i64, _payload: Json) -> String {
        Uuid::new_v4().to_string()
    }
}

pub struct Orchestrator<'a> {
    pool: &'a SqlitePool,
}

impl<'a> Orchestrator<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Orchestrator { pool }
    }

    /// *Enqueue(kind, input, user, agency?) -> task_id* (spec §4.A).
    pub async fn enqueue(
        &self,
        kind: TaskKind,
        input: Json,
        user_id: i64,
        agency_id: Option<i64>,
        dispatcher: &dyn JobDispatcher,
    ) -> Result<i64, OrchestratorError> {
        let now = Utc::now().to_rfc3339();
        let pregenerated_id = Uuid::new_v4().to_string();
        let input_text = input.to_string();

        let rec = sqlx::query(
            "INSERT INTO async_tasks
                (external_job_id, task_kind, status, progress, user_id, agency_id,
                 input_data, result_data, created_at, updated_at)
             VALUES (?, ?, 'pending', 0, ?, ?, ?, '{}', ?, ?)",
        )
        .bind(&pregenerated_id)
        .bind(kind_str(kind))
        .bind(user_id)
        .bind(agency_id)
        .bind(&input_text)
        .bind(&now)
        .bind(&now)
        .execute(self.pool)
        .await?;

        let task_id = rec.last_insert_rowid();

        let handle = dispatcher.dispatch(kind, task_id, input);

        sqlx::query("UPDATE async_tasks SET external_job_id = ? WHERE id = ?")
            .bind(&handle)
            .bind(task_id)
            .execute(self.pool)
            .await?;

        Ok(task_id)
    }

    pub async fn get(&self, task_id: i64) -> Result<AsyncTask, OrchestratorError> {
        let row = sqlx::query("SELECT * FROM async_tasks WHERE id = ?")
            .bind(task_id)
            .fetch_optional(self.pool)
            .await?
            .ok_or(OrchestratorError::NotFound(task_id))?;
        Ok(AsyncTask::from_row(&row))
    }

    /// *BeginRun(task_id)* (spec §4.A).
    pub async fn begin_run(&self, task_id: i64) -> Result<(), OrchestratorError> {
        let task = self.get(task_id).await?;
        if task.status == TaskStatus::Cancelled {
            return Err(OrchestratorError::AlreadyCancelled(task_id));
        }
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE async_tasks SET status = 'running', started_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&now)
        .bind(&now)
        .bind(task_id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// *ReportProgress(task_id, percent, message)* (spec §4.A). Throttled to
    /// at most one write per whole-percent increment, matching the spec's
    /// allowance ("implementations may throttle").
    pub async fn report_progress(
        &self,
        task_id: i64,
        percent: f64,
        message: Option<&str>,
    ) -> Result<(), OrchestratorError> {
        let task = self.get(task_id).await?;
        if (percent - task.progress).abs() < 1.0 && message.is_none() {
            return Ok(());
        }
        let mut result = if task.result_data.is_object() {
            task.result_data
        } else {
            json!({})
        };
        if let Some(msg) = message {
            result["current_step"] = json!(msg);
        }
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE async_tasks SET progress = ?, result_data = ?, updated_at = ? WHERE id = ?",
        )
        .bind(percent)
        .bind(result.to_string())
        .bind(&now)
        .bind(task_id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// *CheckCancelled(task_id) -> bool* (spec §4.A, §5).
    pub async fn check_cancelled(&self, task_id: i64) -> Result<bool, OrchestratorError> {
        let row = sqlx::query("SELECT status FROM async_tasks WHERE id = ?")
            .bind(task_id)
            .fetch_optional(self.pool)
            .await?;
        use sqlx::Row;
        match row {
            None => Ok(true),
            Some(r) => {
                let status: String = r.get("status");
                Ok(status == "cancelled")
            }
        }
    }

    /// *Complete(task_id, result)* (spec §4.A).
    pub async fn complete(&self, task_id: i64, result: Json) -> Result<(), OrchestratorError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE async_tasks
             SET status = 'completed', progress = 100, completed_at = ?, result_data = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&now)
        .bind(result.to_string())
        .bind(&now)
        .bind(task_id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// *Fail(task_id, error, traceback, retryable?)* (spec §4.A).
    pub async fn fail(
        &self,
        task_id: i64,
        error: &str,
        traceback: Option<&str>,
        retryable: bool,
    ) -> Result<(), OrchestratorError> {
        let task = self.get(task_id).await?;
        let mut result = if task.result_data.is_object() {
            task.result_data
        } else {
            json!({})
        };
        if retryable {
            result["can_retry"] = json!(true);
        }
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE async_tasks
             SET status = 'failed', error_message = ?, error_traceback = ?, completed_at = ?,
                 result_data = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(error)
        .bind(traceback)
        .bind(&now)
        .bind(result.to_string())
        .bind(&now)
        .bind(task_id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// *Cancel(task_id)* (spec §4.A); observed cooperatively by the worker.
    pub async fn cancel(&self, task_id: i64) -> Result<(), OrchestratorError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE async_tasks SET status = 'cancelled', updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(task_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// *CleanupOldTasks*: terminal tasks whose `completed_at` predates the
    /// retention window are removed (spec §4.A; completed_at, not
    /// created_at, per the original implementation — see SPEC_FULL.md §10).
    pub async fn cleanup_old_tasks(
        &self,
        retention: chrono::Duration,
    ) -> Result<u64, OrchestratorError> {
        let cutoff = (Utc::now() - retention).to_rfc3339();
        let result = sqlx::query(
            "DELETE FROM async_tasks
             WHERE status IN ('completed', 'failed', 'cancelled') AND completed_at < ?",
        )
        .bind(&cutoff)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// *CheckOrphaned*: reconciles stuck `running`/`pending` tasks to
    /// `failed, orphaned=true, can_retry=true` (spec §4.A, testable
    /// property 8).
    pub async fn check_orphaned(
        &self,
        running_timeout: chrono::Duration,
        pending_timeout: chrono::Duration,
    ) -> Result<OrphanSweepResult, OrchestratorError> {
        let now = Utc::now();
        let running_cutoff = (now - running_timeout).to_rfc3339();
        let pending_cutoff = (now - pending_timeout).to_rfc3339();

        let running_rows = sqlx::query(
            "SELECT id, progress, result_data FROM async_tasks
             WHERE status = 'running' AND updated_at < ?",
        )
        .bind(&running_cutoff)
        .fetch_all(self.pool)
        .await?;

        let mut orphaned_running = 0u64;
        for row in &running_rows {
            use sqlx::Row;
            let id: i64 = row.get("id");
            let progress: f64 = row.get("progress");
            let mut result: Json = row
                .get::<Option<String>, _>("result_data")
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_else(|| json!({}));
            result["orphaned"] = json!(true);
            result["orphan_type"] = json!("running_timeout");
            result["orphaned_at"] = json!(now.to_rfc3339());
            result["last_progress"] = json!(progress);
            result["can_retry"] = json!(true);
            self.mark_orphan_failed(id, &result, progress).await?;
            orphaned_running += 1;
        }

        let pending_rows = sqlx::query("SELECT id, result_data FROM async_tasks WHERE status = 'pending' AND created_at < ?")
            .bind(&pending_cutoff)
            .fetch_all(self.pool)
            .await?;

        let mut orphaned_pending = 0u64;
        for row in &pending_rows {
            use sqlx::Row;
            let id: i64 = row.get("id");
            let mut result: Json = row
                .get::<Option<String>, _>("result_data")
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_else(|| json!({}));
            result["orphaned"] = json!(true);
            result["orphan_type"] = json!("pending_lost");
            result["orphaned_at"] = json!(now.to_rfc3339());
            result["can_retry"] = json!(true);
            self.mark_orphan_failed(id, &result, 0.0).await?;
            orphaned_pending += 1;
        }

        Ok(OrphanSweepResult {
            orphaned_running,
            orphaned_pending,
        })
    }

    async fn mark_orphan_failed(
        &self,
        task_id: i64,
        result: &Json,
        progress: f64,
    ) -> Result<(), OrchestratorError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE async_tasks
             SET status = 'failed', completed_at = ?, result_data = ?, progress = ?, updated_at = ?,
                 error_message = 'Task timed out and was reconciled by the orphan sweeper'
             WHERE id = ?",
        )
        .bind(&now)
        .bind(result.to_string())
        .bind(progress)
        .bind(&now)
        .bind(task_id)
        .execute(self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct OrphanSweepResult {
    pub orphaned_running: u64,
    pub orphaned_pending: u64,
}
