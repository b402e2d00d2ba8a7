//! GTFS validators (spec §4.E): a native rule engine plus a wrapper around
//! the containerized MobilityData reference validator. Both share the same
//! `ValidationResult` shape and are invoked as asynchronous tasks through
//! the Orchestrator, same as the importer and the mutators.

pub mod mobilitydata;
pub mod native;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub category: String,
    pub message: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ValidationIssue {
    fn new(severity: Severity, category: &str, message: impl Into<String>) -> Self {
        ValidationIssue {
            severity,
            category: category.to_string(),
            message: message.into(),
            entity_type: None,
            entity_id: None,
            field: None,
            details: None,
        }
    }

    pub fn entity(&mut self, entity_type: &str, entity_id: impl Into<String>) -> &mut Self {
        self.entity_type = Some(entity_type.to_string());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn field(&mut self, field: &str) -> &mut Self {
        self.field = Some(field.to_string());
        self
    }

    pub fn details(&mut self, details: serde_json::Value) -> &mut Self {
        self.details = Some(details);
        self
    }
}

/// Accumulates issues of three severities (spec §4.E.1). `is_valid` holds
/// iff no issue at `Error` severity was ever recorded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub issues: Vec<ValidationIssue>,
    pub error_count: u64,
    pub warning_count: u64,
    pub info_count: u64,
}

impl ValidationResult {
    pub fn push(&mut self, issue: ValidationIssue) {
        match issue.severity {
            Severity::Error => self.error_count += 1,
            Severity::Warning => self.warning_count += 1,
            Severity::Info => self.info_count += 1,
        }
        self.issues.push(issue);
    }

    pub fn error(&mut self, category: &str, message: impl Into<String>) -> &mut ValidationIssue {
        self.push(ValidationIssue::new(Severity::Error, category, message));
        self.issues.last_mut().unwrap()
    }

    pub fn warning(&mut self, category: &str, message: impl Into<String>) -> &mut ValidationIssue {
        self.push(ValidationIssue::new(Severity::Warning, category, message));
        self.issues.last_mut().unwrap()
    }

    pub fn info(&mut self, category: &str, message: impl Into<String>) -> &mut ValidationIssue {
        self.push(ValidationIssue::new(Severity::Info, category, message));
        self.issues.last_mut().unwrap()
    }

    pub fn is_valid(&self) -> bool {
        self.error_count == 0
    }

    pub fn summary(&self) -> String {
        if self.is_valid() {
            if self.warning_count == 0 {
                "Validation passed with no issues".to_string()
            } else {
                format!("Validation passed with {} warning(s)", self.warning_count)
            }
        } else {
            format!(
                "Validation failed with {} error(s) and {} warning(s)",
                self.error_count, self.warning_count
            )
        }
    }
}

/// Per-agency rule toggles (spec §4.E.1). Every field defaults to enabled;
/// a missing row for an agency is treated the same as all-enabled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationPreferences {
    pub validate_route_mandatory: bool,
    pub validate_route_duplicates: bool,
    pub validate_route_agency: bool,
    pub validate_stop_mandatory: bool,
    pub validate_stop_duplicates: bool,
    pub validate_calendar_mandatory: bool,
    pub validate_calendar_date_mandatory: bool,
    pub validate_fare_attribute_mandatory: bool,
    pub validate_feed_info_mandatory: bool,
    pub validate_trip_mandatory: bool,
    pub validate_trip_duplicates: bool,
    pub validate_trip_service: bool,
    pub validate_trip_shape: bool,
    pub validate_shape_mandatory: bool,
    pub validate_shape_sequence: bool,
    pub validate_shape_dist_traveled: bool,
    pub validate_shape_dist_accuracy: bool,
    pub validate_stop_time_mandatory: bool,
    pub validate_stop_time_trip: bool,
    pub validate_stop_time_stop: bool,
    pub validate_stop_time_sequence: bool,
}

impl Default for ValidationPreferences {
    fn default() -> Self {
        ValidationPreferences {
            validate_route_mandatory: true,
            validate_route_duplicates: true,
            validate_route_agency: true,
            validate_stop_mandatory: true,
            validate_stop_duplicates: true,
            validate_calendar_mandatory: true,
            validate_calendar_date_mandatory: true,
            validate_fare_attribute_mandatory: true,
            validate_feed_info_mandatory: true,
            validate_trip_mandatory: true,
            validate_trip_duplicates: true,
            validate_trip_service: true,
            validate_trip_shape: true,
            validate_shape_mandatory: true,
            validate_shape_sequence: true,
            validate_shape_dist_traveled: true,
            validate_shape_dist_accuracy: true,
            validate_stop_time_mandatory: true,
            validate_stop_time_trip: true,
            validate_stop_time_stop: true,
            validate_stop_time_sequence: true,
        }
    }
}

/// Haversine great-circle distance in meters.
pub(crate) fn haversine_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_M: f64 = 6_371_000.0;
    let (lat1_r, lat2_r) = (lat1.to_radians(), lat2.to_radians());
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();
    let a = (delta_lat / 2.0).sin().powi(2) + lat1_r.cos() * lat2_r.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}
