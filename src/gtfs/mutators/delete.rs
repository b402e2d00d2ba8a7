//! Delete (spec §4.D.4): remove a feed or an entire agency.
//!
//! Leaf tables first, then parents, then the row itself — the same order
//! `gtfs::importer::delete_feed_rows` already uses for `replace_existing`.
//! Explicitly asynchronous: "Deletion is explicitly asynchronous for both
//! agency and feed because the row counts reach millions on large feeds."

use sqlx::{Row, SqlitePool};

use crate::error::MutatorError;
use crate::gtfs::importer::delete_feed_rows;
use crate::orchestrator::Orchestrator;

pub async fn delete_feed(pool: &SqlitePool, feed_id: i64, task_id: Option<i64>) -> Result<(), MutatorError> {
    let exists: Option<i64> = sqlx::query("SELECT id FROM feeds WHERE id = ?")
        .bind(feed_id)
        .fetch_optional(pool)
        .await?
        .map(|r| r.get("id"));
    if exists.is_none() {
        return Err(MutatorError::UnknownFeed(feed_id));
    }

    let mut tx = pool.begin().await?;
    delete_feed_rows(&mut tx, feed_id).await?;
    sqlx::query("DELETE FROM feeds WHERE id = ?").bind(feed_id).execute(&mut *tx).await?;
    tx.commit().await?;

    if let Some(tid) = task_id {
        let orch = Orchestrator::new(pool);
        let _ = orch.report_progress(tid, 100.0, Some("feed deleted")).await;
    }
    Ok(())
}

/// Enumerates all feeds of an agency, deletes each (leaf tables, then the
/// Feed row), then removes validation preferences, membership rows, audit
/// logs, and finally the Agency row itself (spec §4.D.4).
pub async fn delete_agency(pool: &SqlitePool, agency_id: i64, task_id: Option<i64>) -> Result<(), MutatorError> {
    let exists: Option<i64> = sqlx::query("SELECT id FROM agencies WHERE id = ?")
        .bind(agency_id)
        .fetch_optional(pool)
        .await?
        .map(|r| r.get("id"));
    if exists.is_none() {
        return Err(MutatorError::UnknownAgency(agency_id));
    }

    let feed_ids: Vec<i64> = sqlx::query("SELECT id FROM feeds WHERE agency_id = ?")
        .bind(agency_id)
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(|r| r.get("id"))
        .collect();

    let total = feed_ids.len().max(1) as f64;
    for (i, feed_id) in feed_ids.iter().enumerate() {
        let mut tx = pool.begin().await?;
        delete_feed_rows(&mut tx, *feed_id).await?;
        sqlx::query("DELETE FROM feeds WHERE id = ?").bind(feed_id).execute(&mut *tx).await?;
        tx.commit().await?;

        if let Some(tid) = task_id {
            let orch = Orchestrator::new(pool);
            let pct = 90.0 * (i as f64 + 1.0) / total;
            let _ = orch.report_progress(tid, pct, Some("deleting feeds")).await;
            if orch.check_cancelled(tid).await.unwrap_or(false) {
                return Err(crate::error::CancellationError(tid).into());
            }
        }
    }

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM validation_preferences WHERE agency_id = ?").bind(agency_id).execute(&mut *tx).await?;
    sqlx::query("DELETE FROM audit_logs WHERE agency_id = ?").bind(agency_id).execute(&mut *tx).await?;
    sqlx::query("DELETE FROM agency_memberships WHERE agency_id = ?").bind(agency_id).execute(&mut *tx).await?;
    sqlx::query("DELETE FROM feed_sources WHERE agency_id = ?").bind(agency_id).execute(&mut *tx).await?;
    sqlx::query("DELETE FROM agencies WHERE id = ?").bind(agency_id).execute(&mut *tx).await?;
    tx.commit().await?;

    if let Some(tid) = task_id {
        let orch = Orchestrator::new(pool);
        let _ = orch.report_progress(tid, 100.0, Some("agency deleted")).await;
    }
    Ok(())
}
