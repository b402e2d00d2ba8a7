//! Containerized reference validator (spec §4.E.2).
//!
//! Grounded on
//! `examples/original_source/backend/app/services/mobilitydata_validator.py`
//! (`MobilityDataValidator`): same Docker image, same `-i`/`-u`/`-o`/`-c`
//! argument shape, same three-file output contract (`report.json`,
//! `report.html`, `system_errors.json`), same non-GTFS-file notice filter
//! and branded-HTML regeneration. The Python original shells out to the
//! `docker` SDK from a thread pool; here `bollard` talks to the daemon
//! directly over async I/O, so no executor hand-off is needed.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, RemoveContainerOptions,
    WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::config::Config;
use crate::error::ValidationError;
use crate::gtfs::exporter::Exporter;
use crate::orchestrator::Orchestrator;

/// Files recognized by the public GTFS spec; notices anchored to anything
/// else (`__MACOSX/`, `version_chrono.txt`, license files bundled by some
/// publishers, ...) are not relevant to GTFS validation.
const GTFS_STANDARD_FILES: &[&str] = &[
    "agency.txt", "stops.txt", "routes.txt", "trips.txt", "stop_times.txt",
    "calendar.txt", "calendar_dates.txt", "fare_attributes.txt", "fare_rules.txt",
    "fare_products.txt", "fare_leg_rules.txt", "fare_transfer_rules.txt", "fare_media.txt",
    "areas.txt", "stop_areas.txt", "shapes.txt", "frequencies.txt", "transfers.txt",
    "pathways.txt", "levels.txt", "feed_info.txt", "translations.txt", "attributions.txt",
    "timeframes.txt", "rider_categories.txt", "fare_containers.txt", "booking_rules.txt",
    "location_groups.txt", "location_group_stops.txt", "networks.txt", "route_networks.txt",
];

/// A sample of the upstream notice catalog, used only to enrich the branded
/// report with a one-line description per code; an unrecognized code is
/// rendered without one rather than failing the report.
const NOTICE_DESCRIPTIONS: &[(&str, &str)] = &[
    ("block_trips_with_overlapping_stop_times", "Trips within the same block have overlapping stop times, which is physically impossible."),
    ("csv_parsing_failed", "A CSV file could not be parsed. Check for malformed CSV syntax."),
    ("decreasing_shape_distance", "Shape distances decrease along the route instead of increasing."),
    ("duplicate_key", "A row has a duplicate primary key value."),
    ("empty_file", "A required file exists but contains no data rows."),
    ("foreign_key_violation", "A reference to another table has no matching record."),
    ("invalid_color", "A color value is not a valid 6-character hex color."),
    ("invalid_currency", "A currency code is not a valid ISO 4217 code."),
    ("invalid_date", "A date is not in YYYYMMDD format."),
    ("invalid_email", "An email address is not in a valid format."),
    ("invalid_phone_number", "A phone number contains invalid characters."),
    ("invalid_row_length", "A row has more or fewer columns than the header."),
    ("invalid_time", "A time is not in HH:MM:SS format."),
    ("invalid_timezone", "A timezone is not a valid IANA timezone."),
    ("invalid_url", "A URL is not in a valid format."),
    ("missing_required_column", "A required column is missing from a file."),
    ("missing_required_field", "A required field value is empty."),
    ("missing_required_file", "A required GTFS file is missing from the archive."),
    ("missing_trip_edge", "A trip is missing its first or last stop time."),
    ("number_out_of_range", "A numeric value is outside the allowed range."),
    ("overlapping_frequency", "Two frequency entries for the same trip overlap in time."),
    ("route_both_short_and_long_name_missing", "A route has neither short_name nor long_name."),
    ("shape_points_too_far", "Consecutive shape points are unrealistically far apart."),
    ("stop_time_with_arrival_before_previous_departure", "A stop's arrival time is before the previous stop's departure."),
    ("stop_times_out_of_order", "Stop times are not in chronological order."),
    ("too_fast_travel", "Travel between stops is faster than possible."),
    ("trip_with_no_stop_times", "A trip has no stop_times entries."),
    ("unusable_trip", "A trip has fewer than 2 stop_times."),
    ("duplicate_route_name", "Multiple routes have the same name."),
    ("expired_calendar", "Service dates have already passed."),
    ("fast_travel_between_consecutive_stops", "Travel speed between stops is unusually fast (but physically possible)."),
    ("feed_expiration_date_7_days", "The feed expires within 7 days."),
    ("leading_or_trailing_whitespace", "A field value has leading or trailing spaces."),
    ("missing_recommended_column", "A recommended column is missing."),
    ("missing_recommended_field", "A recommended field value is empty."),
    ("missing_recommended_file", "A recommended GTFS file is missing."),
    ("route_color_contrast", "Route text color has poor contrast with background."),
    ("shape_unused", "A shape is defined but not used by any trip."),
    ("stop_too_far_from_trip_shape", "A stop is far from the shape of its trip."),
    ("stop_without_stop_time", "A stop is defined but never used in stop_times."),
    ("unknown_column", "A file contains an unrecognized column."),
    ("unknown_file", "The archive contains an unrecognized file."),
];

fn notice_description(code: &str) -> Option<&'static str> {
    NOTICE_DESCRIPTIONS.iter().find(|(c, _)| *c == code).map(|(_, d)| *d)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MobilityDataReport {
    pub validation_id: String,
    pub report_json: Json,
    pub system_errors: Json,
    pub branded_html: String,
    pub is_valid: bool,
    pub error_count: usize,
    pub warning_count: usize,
    pub info_count: usize,
}

pub struct MobilityDataValidator<'a> {
    pool: &'a SqlitePool,
    config: &'a Config,
    task_id: Option<i64>,
}

impl<'a> MobilityDataValidator<'a> {
    pub fn new(pool: &'a SqlitePool, config: &'a Config, task_id: Option<i64>) -> Self {
        MobilityDataValidator { pool, config, task_id }
    }

    async fn report(&self, percent: f64, message: &str) {
        if let Some(task_id) = self.task_id {
            let orch = Orchestrator::new(self.pool);
            orch.report_progress(task_id, percent, Some(message)).await.ok();
        }
    }

    /// Validates a stored feed by exporting it to a scratch ZIP first, then
    /// running it through [`Self::validate_file`].
    pub async fn validate_feed(
        &self,
        feed_id: i64,
        feed_name: &str,
        country_code: Option<&str>,
    ) -> Result<MobilityDataReport, ValidationError> {
        self.report(5.0, "exporting feed for validation").await;
        let exporter = Exporter::new(self.pool, None);
        let zip_bytes = exporter.export_feed(feed_id).await.map_err(|e| ValidationError::ContainerFailed(e.to_string()))?;
        self.validate_file(&zip_bytes, feed_name, country_code).await
    }

    /// Validates a raw in-memory GTFS ZIP archive against the reference
    /// validator image (spec §4.E.2).
    pub async fn validate_file(
        &self,
        zip_bytes: &[u8],
        feed_name: &str,
        country_code: Option<&str>,
    ) -> Result<MobilityDataReport, ValidationError> {
        let validation_id = format!("{}_{}", sanitize_name(feed_name), Uuid::new_v4());
        let run_dir = PathBuf::from(&self.config.scratch_dir).join(&validation_id);
        let input_dir = run_dir.join("input");
        let output_dir = run_dir.join("output");
        std::fs::create_dir_all(&input_dir)?;
        std::fs::create_dir_all(&output_dir)?;

        let input_filename = "feed.zip";
        std::fs::write(input_dir.join(input_filename), zip_bytes)?;

        self.report(15.0, "starting reference validator container").await;
        self.run_container(&input_dir, input_filename, &output_dir, country_code).await?;

        self.report(80.0, "parsing validator report").await;
        let report_json = parse_json_report(&output_dir.join("report.json"));
        let system_errors = parse_system_errors(&output_dir.join("system_errors.json"));
        let report_json = filter_notices_for_non_gtfs_files(report_json);

        let (error_count, warning_count, info_count) = tally_notices(&report_json);
        let branded_html = render_branded_report(&report_json, &validation_id, feed_name, error_count, warning_count, info_count);

        self.report(100.0, "validation complete").await;

        Ok(MobilityDataReport {
            validation_id,
            report_json,
            system_errors,
            branded_html,
            is_valid: error_count == 0,
            error_count,
            warning_count,
            info_count,
        })
    }

    /// Translates a scratch-dir path to the host path the shared Docker
    /// daemon expects, when this process itself runs inside a container
    /// (spec §4.E.2, §5 shared-resource policy).
    fn to_host_path(&self, p: &Path) -> String {
        let p = p.to_string_lossy();
        match &self.config.host_path_prefix {
            Some(prefix) => {
                if let Some(rel) = p.strip_prefix(&self.config.scratch_dir) {
                    format!("{prefix}{rel}")
                } else {
                    p.into_owned()
                }
            }
            None => p.into_owned(),
        }
    }

    async fn run_container(
        &self,
        input_dir: &Path,
        input_filename: &str,
        output_dir: &Path,
        country_code: Option<&str>,
    ) -> Result<(), ValidationError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| ValidationError::ContainerFailed(e.to_string()))?;

        let image = &self.config.mobilitydata_validator_image;
        if docker.inspect_image(image).await.is_err() {
            let mut pull = docker.create_image(
                Some(CreateImageOptions { from_image: image.as_str(), platform: "linux/amd64", ..Default::default() }),
                None,
                None,
            );
            while let Some(chunk) = pull.next().await {
                chunk.map_err(|e| ValidationError::ContainerFailed(format!("image pull failed: {e}")))?;
            }
        }

        let host_input = self.to_host_path(input_dir);
        let host_output = self.to_host_path(output_dir);

        let mut command_args = vec!["-i".to_string(), format!("/input/{input_filename}"), "-o".to_string(), "/output".to_string()];
        if let Some(cc) = country_code {
            if !cc.is_empty() {
                command_args.push("-c".to_string());
                command_args.push(cc.to_string());
            }
        }

        let container_name = format!("gtfs-validator-{}", sanitize_name(&Uuid::new_v4().to_string()));
        let cmd: Vec<&str> = command_args.iter().map(String::as_str).collect();
        let container = docker
            .create_container(
                Some(CreateContainerOptions { name: container_name.as_str(), platform: Some("linux/amd64") }),
                ContainerConfig {
                    image: Some(image.as_str()),
                    cmd: Some(cmd),
                    host_config: Some(HostConfig {
                        binds: Some(vec![
                            format!("{host_input}:/input:ro"),
                            format!("{host_output}:/output:rw"),
                        ]),
                        auto_remove: Some(true),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| ValidationError::ContainerFailed(e.to_string()))?;

        docker
            .start_container::<String>(&container.id, None)
            .await
            .map_err(|e| ValidationError::ContainerFailed(e.to_string()))?;

        // No explicit timeout (spec §5): the orphan sweeper is the liveness
        // backstop for a run that never finishes.
        let mut wait_stream = docker.wait_container::<String>(&container.id, None::<WaitContainerOptions<String>>);
        let mut wait_error = None;
        while let Some(item) = wait_stream.next().await {
            if let Err(e) = item {
                wait_error = Some(e.to_string());
            }
        }

        let _ = docker
            .remove_container(&container.id, Some(RemoveContainerOptions { force: true, ..Default::default() }))
            .await;

        // The validator may exit non-zero purely because it found feed
        // errors; only treat this as a wrapper failure if no report exists.
        if wait_error.is_some() && !output_dir.join("report.json").exists() {
            return Err(ValidationError::ContainerFailed(wait_error.unwrap_or_default()));
        }
        Ok(())
    }
}

fn sanitize_name(s: &str) -> String {
    s.chars().map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' { c } else { '_' }).collect()
}

fn parse_json_report(path: &Path) -> Json {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_else(|| serde_json::json!({"notices": []}))
}

fn parse_system_errors(path: &Path) -> Json {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| serde_json::from_str::<Json>(&s).ok())
        .map(|v| v.get("notices").cloned().unwrap_or(v))
        .unwrap_or_else(|| serde_json::json!([]))
}

fn filter_notices_for_non_gtfs_files(mut report: Json) -> Json {
    let standard: HashSet<&str> = GTFS_STANDARD_FILES.iter().copied().collect();
    if let Some(notices) = report.get("notices").and_then(|n| n.as_array()) {
        let filtered: Vec<Json> = notices
            .iter()
            .filter(|notice| {
                let filename = notice
                    .get("sampleNotices")
                    .and_then(|s| s.as_array())
                    .and_then(|samples| samples.iter().find_map(|s| s.get("filename").and_then(|f| f.as_str())))
                    .or_else(|| notice.get("filename").and_then(|f| f.as_str()));
                match filename {
                    Some(f) => {
                        let base = f.rsplit('/').next().unwrap_or(f);
                        standard.contains(base)
                    }
                    None => true,
                }
            })
            .cloned()
            .collect();
        report["notices"] = Json::Array(filtered);
    }
    report
}

fn tally_notices(report: &Json) -> (usize, usize, usize) {
    let mut errors = 0;
    let mut warnings = 0;
    let mut infos = 0;
    if let Some(notices) = report.get("notices").and_then(|n| n.as_array()) {
        for notice in notices {
            match notice.get("severity").and_then(|s| s.as_str()) {
                Some("ERROR") => errors += 1,
                Some("WARNING") => warnings += 1,
                _ => infos += 1,
            }
        }
    }
    (errors, warnings, infos)
}

fn severity_rank(s: &str) -> u8 {
    match s {
        "ERROR" => 0,
        "WARNING" => 1,
        _ => 2,
    }
}

/// Regenerates a branded HTML report from the (filtered) parsed notices,
/// grouped by notice code, each with a documentation link and a sample
/// table of the first 15 occurrences.
fn render_branded_report(
    report: &Json,
    validation_id: &str,
    feed_name: &str,
    error_count: usize,
    warning_count: usize,
    info_count: usize,
) -> String {
    let empty = Vec::new();
    let notices = report.get("notices").and_then(|n| n.as_array()).unwrap_or(&empty);

    struct Group<'a> {
        severity: &'a str,
        total: u64,
        samples: &'a [Json],
    }
    let mut by_code: HashMap<&str, Group> = HashMap::new();
    for notice in notices {
        let code = notice.get("code").and_then(|c| c.as_str()).unwrap_or("unknown");
        let severity = notice.get("severity").and_then(|s| s.as_str()).unwrap_or("INFO");
        let total = notice.get("totalNotices").and_then(|t| t.as_u64()).unwrap_or(1);
        let samples = notice.get("sampleNotices").and_then(|s| s.as_array()).map(|v| v.as_slice()).unwrap_or(&[]);
        by_code.entry(code).or_insert(Group { severity, total, samples });
    }

    let mut sorted: Vec<(&&str, &Group)> = by_code.iter().collect();
    sorted.sort_by(|a, b| severity_rank(a.1.severity).cmp(&severity_rank(b.1.severity)).then(a.0.cmp(b.0)));

    let is_valid = error_count == 0;
    let mut sections = String::new();
    if sorted.is_empty() {
        sections.push_str("<p>No validation notices found.</p>");
    }
    for (code, group) in &sorted {
        let description = notice_description(code).map(|d| format!("<p class=\"notice-description\">{d}</p>")).unwrap_or_default();
        let doc_link = format!(
            "<a href=\"https://gtfs-validator.mobilitydata.org/rules.html#{code}\" target=\"_blank\">View documentation</a>"
        );
        let shown: Vec<&Json> = group.samples.iter().take(15).collect();
        let table = render_sample_table(&shown);
        let more = if group.total as usize > shown.len() {
            format!("<p class=\"more-notices\">Showing {} of {} occurrences</p>", shown.len(), group.total)
        } else {
            String::new()
        };
        sections.push_str(&format!(
            "<div class=\"section {sev_class}\"><h2><span class=\"severity-badge {sev}\">{sev}</span> <span class=\"notice-code\">{code}</span> \
             <span class=\"occurrence-count\">{total} occurrence(s)</span></h2>{description}{doc_link}{table}{more}</div>",
            sev_class = if *group.severity == *"ERROR" { "has-errors" } else { "" },
            sev = group.severity,
            total = group.total,
        ));
    }

    format!(
        "<!DOCTYPE html><html lang=\"en\"><head><meta charset=\"UTF-8\"><title>GTFS Validation Report - {feed_name}</title></head>\
         <body><div class=\"container\"><div class=\"header\"><h1>GTFS Validation Report</h1><span class=\"brand\">{validation_id}</span></div>\
         <div class=\"status-badge {status_class}\">{status_text}</div>\
         <div class=\"summary-grid\">\
         <div class=\"summary-card error\"><h3>Errors</h3><div class=\"value\">{error_count}</div></div>\
         <div class=\"summary-card warning\"><h3>Warnings</h3><div class=\"value\">{warning_count}</div></div>\
         <div class=\"summary-card info\"><h3>Info</h3><div class=\"value\">{info_count}</div></div>\
         </div>{sections}</div></body></html>",
        status_class = if is_valid { "success" } else { "error" },
        status_text = if is_valid { "Valid" } else { "Invalid" },
    )
}

fn render_sample_table(samples: &[&Json]) -> String {
    if samples.is_empty() {
        return String::new();
    }
    const PRIORITY_FIELDS: &[&str] = &[
        "filename", "csvRowNumber", "fieldName", "fieldValue",
        "tripId", "routeId", "stopId", "shapeId", "serviceId", "agencyId",
    ];
    let mut keys: Vec<String> = Vec::new();
    for field in PRIORITY_FIELDS {
        if samples.iter().any(|s| s.get(*field).is_some()) {
            keys.push(field.to_string());
        }
    }
    let mut others: Vec<String> = samples
        .iter()
        .flat_map(|s| s.as_object().map(|o| o.keys().cloned()).into_iter().flatten())
        .filter(|k| !keys.contains(k))
        .collect();
    others.sort();
    others.dedup();
    keys.extend(others);

    let header: String = keys.iter().map(|k| format!("<th>{k}</th>")).collect();
    let rows: String = samples
        .iter()
        .map(|s| {
            let cells: String = keys
                .iter()
                .map(|k| format!("<td>{}</td>", s.get(k).map(|v| v.to_string()).unwrap_or_default()))
                .collect();
            format!("<tr>{cells}</tr>")
        })
        .collect();

    format!("<div class=\"table-container\"><table class=\"notices-table\"><thead><tr>{header}</tr></thead><tbody>{rows}</tbody></table></div>")
}
