//! Relational store access.
//!
//! Treated per spec §1 as "a relational store supporting composite primary
//! keys, foreign keys, JSON columns, geospatial point/linestring columns,
//! transactions, and batched multi-row inserts." SQLite (via sqlx, the
//! teacher's own pool type) is the concrete backend: JSON columns are TEXT
//! holding serialized `serde_json::Value`, geometry columns are TEXT holding
//! WKT, both round-tripped by `models.rs`.

pub mod models;

use crate::config::Config;
use sqlx::sqlite::{SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;

pub async fn init_pool(cfg: &Config) -> Result<SqlitePool, sqlx::Error> {
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect(&cfg.database_url)
        .await?;
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;
    let _ = SqliteSynchronous::Normal; // documents the intended durability tradeoff
    bootstrap_schema(&pool).await?;
    Ok(pool)
}

/// Idempotent schema bootstrap. The persistent store's migration machinery
/// is out of scope (spec §1); this mirrors the teacher's approach of owning
/// a single, directly-executed schema rather than introducing a migration
/// framework the core doesn't otherwise need.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    const SCHEMA: &str = include_str!("schema.sql");
    for stmt in SCHEMA.split(';') {
        let stmt = stmt.trim();
        if stmt.is_empty() {
            continue;
        }
        sqlx::query(stmt).execute(pool).await?;
    }
    Ok(())
}
