//! Structural mutators (spec §4.D) — component D.
//!
//! All four share the runner scaffold described in spec §4.D: orchestrator
//! hookup, cancellation checkpoints, per-step progress reporting, and a
//! single-transaction commit. `merge`/`split`/`clone` build on the same
//! row-copy-with-remap primitives; `delete` reuses the cascading order the
//! importer's `replace_existing` path also needs
//! (`crate::gtfs::importer::delete_feed_rows`).

pub mod clone;
pub mod delete;
pub mod merge;
pub mod split;

use serde::Serialize;

/// Natural-key collision strategy for Merge (spec §4.D.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MergeStrategy {
    FailOnConflict,
    AutoPrefix,
}

impl MergeStrategy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fail_on_conflict" => Some(MergeStrategy::FailOnConflict),
            "auto_prefix" => Some(MergeStrategy::AutoPrefix),
            _ => None,
        }
    }
}

/// `(source_feed_id, original_natural_key) -> key_used_in_destination`, one
/// per entity kind that has a natural key other tables reference (spec
/// §4.D.1, "maintains a map ... foreign references remain consistent").
pub type RemapTable = std::collections::HashMap<(i64, String), String>;

#[derive(Debug, Default)]
pub struct RemapTables {
    pub stops: RemapTable,
    pub calendars: RemapTable,
    pub shapes: RemapTable,
    pub routes: RemapTable,
    pub trips: RemapTable,
    pub fare_attributes: RemapTable,
}

impl RemapTables {
    pub fn resolve(table: &RemapTable, source_feed_id: i64, key: &str) -> Option<String> {
        table.get(&(source_feed_id, key.to_string())).cloned()
    }
}
