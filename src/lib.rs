//! Multi-tenant GTFS data-management backend: an async task pipeline for
//! bulk GTFS operations, a native validator, and a GTFS-Realtime fetch
//! layer, built around the teacher's Rocket + sqlx(SQLite) stack.

pub mod config;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod gtfs;
pub mod liveupdates;
pub mod orchestrator;
pub mod realtime;
pub mod validator;
