//! Clone (spec §4.D.3): a simplified Merge with a single source feed.
//!
//! All rows are copied verbatim — natural keys are preserved, so no remap
//! table is required (spec §4.D.3). Reuses `merge::merge_feeds` with a
//! strategy that can never actually collide, since a clone's destination
//! starts empty and has exactly one source.

use sqlx::SqlitePool;

use crate::error::MutatorError;

use super::merge::{merge_feeds, MergeOptions, MergeResult};
use super::MergeStrategy;

pub struct CloneOptions {
    pub source_feed_id: i64,
    pub target_agency_id: i64,
    pub name: Option<String>,
    pub description: Option<String>,
}

pub async fn clone_feed(
    pool: &SqlitePool,
    options: &CloneOptions,
    task_id: Option<i64>,
) -> Result<MergeResult, MutatorError> {
    let merge_options = MergeOptions {
        sources: vec![options.source_feed_id],
        target_agency_id: options.target_agency_id,
        // A single source can never collide with itself, so the strategy
        // choice is moot; fail_on_conflict documents that intent.
        strategy: MergeStrategy::FailOnConflict,
        name: options.name.clone(),
        description: options.description.clone(),
        activate: false,
    };
    merge_feeds(pool, &merge_options, task_id).await
}
