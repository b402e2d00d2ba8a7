//! AsyncTask lifecycle tests (spec §4.A; testable properties 7, 8).

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use gtfs_core::orchestrator::{NullDispatcher, Orchestrator, TaskKind, TaskStatus};
use serde_json::json;
use sqlx::Row;

#[tokio::test]
async fn enqueue_starts_pending_with_a_dispatched_external_id() {
    let pool = common::test_pool().await;
    let agency_id = common::insert_agency(&pool, "Test Agency").await;
    let orch = Orchestrator::new(&pool);
    let dispatcher = NullDispatcher;

    let task_id = orch
        .enqueue(TaskKind::ImportGtfs, json!({"foo": "bar"}), 1, Some(agency_id), &dispatcher)
        .await
        .unwrap();

    let task = orch.get(task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.task_kind, TaskKind::ImportGtfs);
    assert_eq!(task.progress, 0.0);
    assert!(task.started_at.is_none());
    // NullDispatcher's handle replaces the pre-generated id at enqueue time.
    assert!(!task.external_job_id.is_empty());
}

#[tokio::test]
async fn full_lifecycle_pending_running_completed() {
    let pool = common::test_pool().await;
    let orch = Orchestrator::new(&pool);
    let dispatcher = NullDispatcher;

    let task_id = orch
        .enqueue(TaskKind::ValidateGtfs, json!({}), 1, None, &dispatcher)
        .await
        .unwrap();

    orch.begin_run(task_id).await.unwrap();
    let running = orch.get(task_id).await.unwrap();
    assert_eq!(running.status, TaskStatus::Running);
    assert!(running.started_at.is_some());

    orch.report_progress(task_id, 50.0, Some("halfway")).await.unwrap();
    let midway = orch.get(task_id).await.unwrap();
    assert_eq!(midway.progress, 50.0);
    assert_eq!(midway.result_data["current_step"], json!("halfway"));

    orch.complete(task_id, json!({"rows": 10})).await.unwrap();
    let done = orch.get(task_id).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.progress, 100.0);
    assert!(done.completed_at.is_some());
    assert_eq!(done.result_data["rows"], json!(10));
}

#[tokio::test]
async fn failed_tasks_carry_the_error_and_retry_flag() {
    let pool = common::test_pool().await;
    let orch = Orchestrator::new(&pool);
    let dispatcher = NullDispatcher;

    let task_id = orch
        .enqueue(TaskKind::ImportGtfs, json!({}), 1, None, &dispatcher)
        .await
        .unwrap();
    orch.begin_run(task_id).await.unwrap();
    orch.fail(task_id, "archive was not a valid zip", None, true).await.unwrap();

    let task = orch.get(task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error_message.as_deref(), Some("archive was not a valid zip"));
    assert_eq!(task.result_data["can_retry"], json!(true));
}

/// Testable property 7: cancelling a task marks it cancelled, and
/// CheckCancelled reports true for the worker to observe cooperatively.
#[tokio::test]
async fn cancel_is_observed_via_check_cancelled() {
    let pool = common::test_pool().await;
    let orch = Orchestrator::new(&pool);
    let dispatcher = NullDispatcher;

    let task_id = orch
        .enqueue(TaskKind::ImportGtfs, json!({}), 1, None, &dispatcher)
        .await
        .unwrap();
    orch.begin_run(task_id).await.unwrap();

    assert!(!orch.check_cancelled(task_id).await.unwrap());

    orch.cancel(task_id).await.unwrap();
    assert!(orch.check_cancelled(task_id).await.unwrap());

    let task = orch.get(task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
}

#[tokio::test]
async fn begin_run_rejects_an_already_cancelled_task() {
    let pool = common::test_pool().await;
    let orch = Orchestrator::new(&pool);
    let dispatcher = NullDispatcher;

    let task_id = orch
        .enqueue(TaskKind::ImportGtfs, json!({}), 1, None, &dispatcher)
        .await
        .unwrap();
    orch.cancel(task_id).await.unwrap();

    let result = orch.begin_run(task_id).await;
    assert!(result.is_err());
}

/// Testable property 8: a running task whose last progress update is older
/// than the running-timeout is reconciled to failed/orphaned/can_retry.
#[tokio::test]
async fn check_orphaned_sweeps_stale_running_tasks() {
    let pool = common::test_pool().await;
    let orch = Orchestrator::new(&pool);
    let dispatcher = NullDispatcher;

    let task_id = orch
        .enqueue(TaskKind::ImportGtfs, json!({}), 1, None, &dispatcher)
        .await
        .unwrap();
    orch.begin_run(task_id).await.unwrap();

    let stale = (Utc::now() - ChronoDuration::hours(2)).to_rfc3339();
    sqlx::query("UPDATE async_tasks SET updated_at = ? WHERE id = ?")
        .bind(&stale)
        .bind(task_id)
        .execute(&pool)
        .await
        .unwrap();

    let swept = orch
        .check_orphaned(ChronoDuration::minutes(30), ChronoDuration::hours(1))
        .await
        .unwrap();
    assert_eq!(swept.orphaned_running, 1);
    assert_eq!(swept.orphaned_pending, 0);

    let task = orch.get(task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.result_data["orphaned"], json!(true));
    assert_eq!(task.result_data["orphan_type"], json!("running_timeout"));
    assert_eq!(task.result_data["can_retry"], json!(true));
}

/// Same property, pending side: a task that never got picked up within the
/// pending-timeout is reconciled the same way.
#[tokio::test]
async fn check_orphaned_sweeps_stale_pending_tasks() {
    let pool = common::test_pool().await;
    let orch = Orchestrator::new(&pool);
    let dispatcher = NullDispatcher;

    let task_id = orch
        .enqueue(TaskKind::ImportGtfs, json!({}), 1, None, &dispatcher)
        .await
        .unwrap();

    let stale = (Utc::now() - ChronoDuration::hours(3)).to_rfc3339();
    sqlx::query("UPDATE async_tasks SET created_at = ? WHERE id = ?")
        .bind(&stale)
        .bind(task_id)
        .execute(&pool)
        .await
        .unwrap();

    let swept = orch
        .check_orphaned(ChronoDuration::minutes(30), ChronoDuration::hours(1))
        .await
        .unwrap();
    assert_eq!(swept.orphaned_pending, 1);

    let task = orch.get(task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.result_data["orphan_type"], json!("pending_lost"));
}

/// A running task updated recently is left alone by the sweep.
#[tokio::test]
async fn check_orphaned_leaves_fresh_running_tasks_alone() {
    let pool = common::test_pool().await;
    let orch = Orchestrator::new(&pool);
    let dispatcher = NullDispatcher;

    let task_id = orch
        .enqueue(TaskKind::ImportGtfs, json!({}), 1, None, &dispatcher)
        .await
        .unwrap();
    orch.begin_run(task_id).await.unwrap();

    let swept = orch
        .check_orphaned(ChronoDuration::minutes(30), ChronoDuration::hours(1))
        .await
        .unwrap();
    assert_eq!(swept.orphaned_running, 0);

    let task = orch.get(task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Running);
}

/// `cleanup_old_tasks` removes only terminal tasks whose `completed_at`
/// predates the retention window.
#[tokio::test]
async fn cleanup_old_tasks_removes_only_stale_terminal_tasks() {
    let pool = common::test_pool().await;
    let orch = Orchestrator::new(&pool);
    let dispatcher = NullDispatcher;

    let old_task = orch
        .enqueue(TaskKind::ImportGtfs, json!({}), 1, None, &dispatcher)
        .await
        .unwrap();
    orch.begin_run(old_task).await.unwrap();
    orch.complete(old_task, json!({})).await.unwrap();
    let ancient = (Utc::now() - ChronoDuration::days(60)).to_rfc3339();
    sqlx::query("UPDATE async_tasks SET completed_at = ? WHERE id = ?")
        .bind(&ancient)
        .bind(old_task)
        .execute(&pool)
        .await
        .unwrap();

    let recent_task = orch
        .enqueue(TaskKind::ImportGtfs, json!({}), 1, None, &dispatcher)
        .await
        .unwrap();
    orch.begin_run(recent_task).await.unwrap();
    orch.complete(recent_task, json!({})).await.unwrap();

    let still_pending = orch
        .enqueue(TaskKind::ImportGtfs, json!({}), 1, None, &dispatcher)
        .await
        .unwrap();

    let removed = orch.cleanup_old_tasks(ChronoDuration::days(30)).await.unwrap();
    assert_eq!(removed, 1);

    assert!(orch.get(old_task).await.is_err());
    assert!(orch.get(recent_task).await.is_ok());
    assert!(orch.get(still_pending).await.is_ok());
}

#[tokio::test]
async fn get_unknown_task_is_an_error() {
    let pool = common::test_pool().await;
    let orch = Orchestrator::new(&pool);
    assert!(orch.get(999_999).await.is_err());
}

#[tokio::test]
async fn report_progress_preserves_existing_result_fields() {
    let pool = common::test_pool().await;
    let orch = Orchestrator::new(&pool);
    let dispatcher = NullDispatcher;

    let task_id = orch
        .enqueue(TaskKind::ImportGtfs, json!({}), 1, None, &dispatcher)
        .await
        .unwrap();
    orch.begin_run(task_id).await.unwrap();

    orch.report_progress(task_id, 10.0, Some("step one")).await.unwrap();
    orch.report_progress(task_id, 20.0, Some("step two")).await.unwrap();

    let task = orch.get(task_id).await.unwrap();
    assert_eq!(task.result_data["current_step"], json!("step two"));
}

#[tokio::test]
async fn agency_scoped_tasks_carry_the_agency_id() {
    let pool = common::test_pool().await;
    let agency_id = common::insert_agency(&pool, "Scoped Agency").await;
    let orch = Orchestrator::new(&pool);
    let dispatcher = NullDispatcher;

    let task_id = orch
        .enqueue(TaskKind::DeleteAgency, json!({"agency_id": agency_id}), 7, Some(agency_id), &dispatcher)
        .await
        .unwrap();

    let task = orch.get(task_id).await.unwrap();
    assert_eq!(task.agency_id, Some(agency_id));
    assert_eq!(task.user_id, 7);

    let row = sqlx::query("SELECT task_kind FROM async_tasks WHERE id = ?")
        .bind(task_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    let kind: String = row.get("task_kind");
    assert_eq!(kind, "delete_agency");
}
