use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::TrackingConfig;
use crate::engine::channel::TrackingChannel;
use crate::error::AppError;
use crate::geo;
use crate::models::location::{GeoPoint, LocationReport, LocationSample};
use crate::models::order::Order;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    Accepted {
        distance_km: f64,
        eta_minutes: u32,
        delivered: bool,
    },
    Dropped,
}

#[derive(Debug, Clone)]
pub struct LocationFix {
    pub sample: LocationSample,
    pub distance_km: f64,
    pub eta_minutes: u32,
    pub within_radius: bool,
}

#[derive(Debug)]
pub enum SampleDecision {
    Accepted(LocationFix),
    Dropped,
}

#[derive(Debug, Default)]
pub struct RateLimiter {
    last_accepted: HashMap<Uuid, Instant>,
}

impl RateLimiter {
    pub fn admit(&mut self, partner_id: Uuid, interval: Duration, now: Instant) -> bool {
        if let Some(last) = self.last_accepted.get(&partner_id) {
            if now.saturating_duration_since(*last) < interval {
                return false;
            }
        }
        self.last_accepted.insert(partner_id, now);
        true
    }
}

#[derive(Debug, Clone)]
pub struct LocationIngest {
    minutes_per_km: f64,
    delivery_radius_m: f64,
    interval: Duration,
}

impl LocationIngest {
    pub fn new(config: &TrackingConfig) -> Self {
        Self {
            minutes_per_km: config.minutes_per_km,
            delivery_radius_m: config.delivery_radius_m,
            interval: config.ingest_interval,
        }
    }

    pub fn validate(
        &self,
        order: &Order,
        partner_id: Uuid,
        report: &LocationReport,
    ) -> Result<GeoPoint, AppError> {
        if order.delivery_partner_id != Some(partner_id) {
            warn!(order_id = %order.id, %partner_id, "location from unassigned partner");
            return Err(AppError::Unauthorized(format!(
                "partner {partner_id} is not assigned to order {}",
                order.id
            )));
        }

        let point = report.point();
        if !point.is_plausible() {
            return Err(AppError::InvalidSample(format!(
                "coordinates out of range: lat={}, lng={}",
                report.lat, report.lng
            )));
        }

        if let Some(accuracy) = report.accuracy_m {
            if !accuracy.is_finite() || accuracy < 0.0 {
                return Err(AppError::InvalidSample(format!(
                    "accuracy must be a non-negative number, got {accuracy}"
                )));
            }
        }

        Ok(point)
    }

    pub fn process(
        &self,
        order: &Order,
        partner_id: Uuid,
        report: &LocationReport,
        channel: &mut TrackingChannel,
        limiter: &mut RateLimiter,
        now: Instant,
        received_at: DateTime<Utc>,
    ) -> Result<SampleDecision, AppError> {
        let position = self.validate(order, partner_id, report)?;

        // Terminal orders keep their channel for the grace period, frozen.
        if channel.is_closed() || order.status.is_terminal() {
            debug!(order_id = %order.id, status = %order.status, "sample for untrackable order");
            return Err(AppError::OrderNotTrackable(order.id));
        }

        if !limiter.admit(partner_id, self.interval, now) {
            debug!(order_id = %order.id, %partner_id, "sample dropped by rate limit");
            return Ok(SampleDecision::Dropped);
        }

        let destination = order.destination.point();
        let distance_km = geo::distance_km(&position, &destination);
        let eta_minutes = geo::estimate_minutes(distance_km, self.minutes_per_km);
        let within_radius =
            geo::is_within_delivery_radius(&position, &destination, self.delivery_radius_m);

        let sample = LocationSample {
            partner_id,
            order_id: order.id,
            position,
            accuracy_m: report.accuracy_m,
            client_timestamp: report.client_timestamp,
            received_at,
        };
        channel.record_position(sample.clone(), distance_km, eta_minutes);

        Ok(SampleDecision::Accepted(LocationFix {
            sample,
            distance_km,
            eta_minutes,
            within_radius,
        }))
    }
}
