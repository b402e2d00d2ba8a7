//! GTFS static-data domain logic: the importer (component B), exporter
//! (component C), and structural mutators (component D).

pub mod csv_common;
pub mod exporter;
pub mod importer;
pub mod mutators;
