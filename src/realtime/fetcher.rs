//! Multi-source GTFS-Realtime fetcher (spec §4.F).
//!
//! Generalizes `liveupdates.rs`'s `update_listener`: that function opened
//! one hardcoded URL on an infinite loop and projected only `trip_update`
//! into an in-memory store. This fetcher loads an agency's `feed_sources`
//! rows, groups them by URL so two subscriptions to the same feed only pay
//! for one GET, paces distinct URLs two seconds apart, and decodes every
//! entity kind the protobuf can carry rather than just trip updates.

use std::collections::HashMap;
use std::time::Duration;

use prost::Message;
use reqwest::StatusCode;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::error::RealtimeError;

use super::enums;
use super::proto::FeedMessage;
use super::{
    AlertEntity, FeedEntities, FetchResult, ShapeEntityData, SourceOutcome, StopEntityData,
    StopTimeUpdateEntity, TripModificationEntity, TripUpdateEntity, VehiclePositionEntity,
};

#[derive(Debug, Clone)]
struct FeedSource {
    id: i64,
    name: String,
    url: String,
    auth_header_name: Option<String>,
    auth_header_value: Option<String>,
    etag: Option<String>,
    last_modified: Option<String>,
}

pub struct Fetcher<'a> {
    pool: &'a SqlitePool,
    client: reqwest::Client,
    url_pacing: Duration,
}

impl<'a> Fetcher<'a> {
    pub fn new(pool: &'a SqlitePool, config: &Config) -> Result<Self, RealtimeError> {
        let client = reqwest::Client::builder()
            .timeout(config.realtime_http_timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| RealtimeError::Request { url: String::new(), source: e })?;
        Ok(Fetcher { pool, client, url_pacing: config.realtime_url_pacing })
    }

    /// Loads the agency's enabled feed sources, fetches each distinct URL
    /// once, and decorates every parsed entity with the source(s) that
    /// subscribe to it.
    pub async fn fetch_for_agency(&self, agency_id: i64) -> Result<FetchResult, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT id, name, url, auth_header_name, auth_header_value, etag, last_modified
             FROM feed_sources WHERE agency_id = ? AND enabled = 1",
        )
        .bind(agency_id)
        .fetch_all(self.pool)
        .await?;

        let sources: Vec<FeedSource> = rows
            .into_iter()
            .map(|r| FeedSource {
                id: r.get("id"),
                name: r.get("name"),
                url: r.get("url"),
                auth_header_name: r.get("auth_header_name"),
                auth_header_value: r.get("auth_header_value"),
                etag: r.get("etag"),
                last_modified: r.get("last_modified"),
            })
            .collect();

        let mut by_url: HashMap<String, Vec<FeedSource>> = HashMap::new();
        for source in sources {
            by_url.entry(source.url.clone()).or_default().push(source);
        }

        let mut result = FetchResult::default();
        let mut first = true;
        for (url, group) in by_url {
            if !first {
                tokio::time::sleep(self.url_pacing).await;
            }
            first = false;

            let representative = &group[0];
            let outcome = self.fetch_one(&url, representative).await;

            match outcome {
                Ok((entities, etag, last_modified)) => {
                    for source in &group {
                        self.persist_conditional_headers(source.id, etag.as_deref(), last_modified.as_deref()).await;
                        result.sources.push(SourceOutcome {
                            feed_source_id: source.id,
                            feed_source_name: source.name.clone(),
                            url: url.clone(),
                            error: None,
                            not_modified: false,
                        });
                        result.entities.extend(decorate(entities.clone(), source.id, &source.name));
                    }
                }
                Err(NotModified) => {
                    for source in &group {
                        result.sources.push(SourceOutcome {
                            feed_source_id: source.id,
                            feed_source_name: source.name.clone(),
                            url: url.clone(),
                            error: None,
                            not_modified: true,
                        });
                    }
                }
                Err(FetchError::Failed(err)) => {
                    // Spec §4.F: a failed source does not block the others.
                    for source in &group {
                        result.sources.push(SourceOutcome {
                            feed_source_id: source.id,
                            feed_source_name: source.name.clone(),
                            url: url.clone(),
                            error: Some(err.to_string()),
                            not_modified: false,
                        });
                    }
                }
            }
        }

        Ok(result)
    }

    async fn persist_conditional_headers(&self, source_id: i64, etag: Option<&str>, last_modified: Option<&str>) {
        let _ = sqlx::query("UPDATE feed_sources SET etag = ?, last_modified = ? WHERE id = ?")
            .bind(etag)
            .bind(last_modified)
            .bind(source_id)
            .execute(self.pool)
            .await;
    }

    async fn fetch_one(
        &self,
        url: &str,
        representative: &FeedSource,
    ) -> Result<(FeedEntities, Option<String>, Option<String>), FetchError> {
        let mut req = self.client.get(url);
        if let Some(etag) = &representative.etag {
            req = req.header("If-None-Match", etag);
        }
        if let Some(last_modified) = &representative.last_modified {
            req = req.header("If-Modified-Since", last_modified);
        }
        // Credentials live only on the source row and this request; never
        // surfaced in logs or the returned FetchResult (spec §5).
        if let (Some(name), Some(value)) = (&representative.auth_header_name, &representative.auth_header_value) {
            req = req.header(name.as_str(), value.as_str());
        }

        let resp = req
            .send()
            .await
            .map_err(|e| FetchError::Failed(RealtimeError::Request { url: url.to_string(), source: e }))?;

        if resp.status() == StatusCode::NOT_MODIFIED {
            return Err(FetchError::NotModified);
        }
        if resp.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::Failed(RealtimeError::RateLimited));
        }
        let resp = resp.error_for_status().map_err(|e| FetchError::Failed(RealtimeError::Request { url: url.to_string(), source: e }))?;

        let etag = resp.headers().get("ETag").and_then(|v| v.to_str().ok()).map(str::to_string);
        let last_modified = resp.headers().get("Last-Modified").and_then(|v| v.to_str().ok()).map(str::to_string);

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| FetchError::Failed(RealtimeError::Request { url: url.to_string(), source: e }))?;

        let message = FeedMessage::decode(bytes.as_ref()).map_err(|e| FetchError::Failed(RealtimeError::Decode(e)))?;

        Ok((parse_feed_message(&message), etag, last_modified))
    }
}

enum FetchError {
    NotModified,
    Failed(RealtimeError),
}

use FetchError::NotModified;

fn decorate(mut entities: FeedEntities, feed_source_id: i64, feed_source_name: &str) -> FeedEntities {
    for e in &mut entities.vehicle_positions {
        e.feed_source_id = feed_source_id;
        e.feed_source_name = feed_source_name.to_string();
    }
    for e in &mut entities.trip_updates {
        e.feed_source_id = feed_source_id;
        e.feed_source_name = feed_source_name.to_string();
    }
    for e in &mut entities.alerts {
        e.feed_source_id = feed_source_id;
        e.feed_source_name = feed_source_name.to_string();
    }
    for e in &mut entities.shapes {
        e.feed_source_id = feed_source_id;
        e.feed_source_name = feed_source_name.to_string();
    }
    for e in &mut entities.stops {
        e.feed_source_id = feed_source_id;
        e.feed_source_name = feed_source_name.to_string();
    }
    for e in &mut entities.trip_modifications {
        e.feed_source_id = feed_source_id;
        e.feed_source_name = feed_source_name.to_string();
    }
    entities
}

fn parse_feed_message(message: &FeedMessage) -> FeedEntities {
    let mut entities = FeedEntities::default();

    for entity in &message.entity {
        if entity.is_deleted.unwrap_or(false) {
            continue;
        }

        if let Some(vehicle) = &entity.vehicle {
            let trip = vehicle.trip.as_ref();
            entities.vehicle_positions.push(VehiclePositionEntity {
                feed_source_id: 0,
                feed_source_name: String::new(),
                entity_id: entity.id.clone(),
                trip_id: trip.and_then(|t| t.trip_id.clone()),
                route_id: trip.and_then(|t| t.route_id.clone()),
                vehicle_id: vehicle.vehicle.as_ref().and_then(|v| v.id.clone()),
                vehicle_label: vehicle.vehicle.as_ref().and_then(|v| v.label.clone()),
                latitude: vehicle.position.as_ref().map(|p| p.latitude),
                longitude: vehicle.position.as_ref().map(|p| p.longitude),
                bearing: vehicle.position.as_ref().and_then(|p| p.bearing),
                speed: vehicle.position.as_ref().and_then(|p| p.speed),
                current_stop_sequence: vehicle.current_stop_sequence,
                stop_id: vehicle.stop_id.clone(),
                current_status: vehicle.current_status.map(enums::vehicle_stop_status),
                congestion_level: vehicle.congestion_level.map(enums::congestion_level),
                occupancy_status: vehicle.occupancy_status.map(enums::occupancy_status),
                timestamp: vehicle.timestamp,
            });
        }

        if let Some(trip_update) = &entity.trip_update {
            let trip = &trip_update.trip;
            let stop_time_updates = trip_update
                .stop_time_update
                .iter()
                .map(|stu| StopTimeUpdateEntity {
                    stop_sequence: stu.stop_sequence,
                    stop_id: stu.stop_id.clone(),
                    arrival_delay: stu.arrival.as_ref().and_then(|a| a.delay),
                    arrival_time: stu.arrival.as_ref().and_then(|a| a.time),
                    departure_delay: stu.departure.as_ref().and_then(|d| d.delay),
                    departure_time: stu.departure.as_ref().and_then(|d| d.time),
                    schedule_relationship: enums::stop_time_schedule_relationship(
                        stu.schedule_relationship.unwrap_or(0),
                    ),
                })
                .collect();

            entities.trip_updates.push(TripUpdateEntity {
                feed_source_id: 0,
                feed_source_name: String::new(),
                entity_id: entity.id.clone(),
                trip_id: trip.trip_id.clone(),
                route_id: trip.route_id.clone(),
                start_date: trip.start_date.clone(),
                start_time: trip.start_time.clone(),
                schedule_relationship: enums::trip_schedule_relationship(trip.schedule_relationship.unwrap_or(0)),
                vehicle_id: trip_update.vehicle.as_ref().and_then(|v| v.id.clone()),
                delay: trip_update.delay,
                stop_time_updates,
                timestamp: trip_update.timestamp,
            });
        }

        if let Some(alert) = &entity.alert {
            let mut informed_route_ids = Vec::new();
            let mut informed_stop_ids = Vec::new();
            for selector in &alert.informed_entity {
                if let Some(route_id) = &selector.route_id {
                    informed_route_ids.push(route_id.clone());
                }
                if let Some(stop_id) = &selector.stop_id {
                    informed_stop_ids.push(stop_id.clone());
                }
            }
            entities.alerts.push(AlertEntity {
                feed_source_id: 0,
                feed_source_name: String::new(),
                entity_id: entity.id.clone(),
                cause: enums::cause(alert.cause.unwrap_or(1)),
                effect: enums::effect(alert.effect.unwrap_or(8)),
                severity_level: enums::severity_level(alert.severity_level.unwrap_or(1)),
                header_text: first_translation(&alert.header_text),
                description_text: first_translation(&alert.description_text),
                url: first_translation(&alert.url),
                informed_route_ids,
                informed_stop_ids,
                active_periods: alert.active_period.iter().map(|p| (p.start, p.end)).collect(),
            });
        }

        if let Some(shape) = &entity.shape {
            let points = shape
                .shape_pt_lat
                .iter()
                .zip(shape.shape_pt_lon.iter())
                .map(|(lat, lon)| (*lat, *lon))
                .collect();
            entities.shapes.push(ShapeEntityData {
                feed_source_id: 0,
                feed_source_name: String::new(),
                entity_id: entity.id.clone(),
                shape_id: shape.shape_id.clone(),
                encoded_polyline: shape.encoded_polyline.clone(),
                points,
            });
        }

        if let Some(stop) = &entity.stop {
            entities.stops.push(StopEntityData {
                feed_source_id: 0,
                feed_source_name: String::new(),
                entity_id: entity.id.clone(),
                stop_id: stop.stop_id.clone(),
                stop_name: stop.stop_name.clone(),
                stop_lat: stop.stop_lat,
                stop_lon: stop.stop_lon,
                platform_code: stop.platform_code.clone(),
            });
        }

        if let Some(modifications) = &entity.trip_modifications {
            let affected_trip_ids = modifications
                .selected_trips
                .iter()
                .filter_map(|t| t.trip_id.clone())
                .collect();
            let replacement_stop_ids = modifications
                .replacement_stops
                .iter()
                .filter_map(|r| r.stop_id.clone())
                .collect();
            entities.trip_modifications.push(TripModificationEntity {
                feed_source_id: 0,
                feed_source_name: String::new(),
                entity_id: entity.id.clone(),
                affected_trip_ids,
                start_times: modifications.start_times.clone(),
                replacement_stop_ids,
            });
        }
    }

    entities
}

fn first_translation(ts: &Option<super::proto::TranslatedString>) -> Option<String> {
    ts.as_ref().and_then(|t| t.translation.first()).map(|t| t.text.clone())
}
