use std::env;
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub tracking: TrackingConfig,
}

#[derive(Debug, Clone)]
pub struct TrackingConfig {
    pub minutes_per_km: f64,
    pub delivery_radius_m: f64,
    pub history_capacity: usize,
    pub ingest_interval: Duration,
    pub grace_period: Duration,
    pub stale_after: Duration,
    pub max_delivery_failures: u32,
    pub subscriber_buffer: usize,
    pub notification_buffer: usize,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            minutes_per_km: 2.0,
            delivery_radius_m: 50.0,
            history_capacity: 50,
            ingest_interval: Duration::from_secs(3),
            grace_period: Duration::from_secs(300),
            stale_after: Duration::from_secs(120),
            max_delivery_failures: 3,
            subscriber_buffer: 64,
            notification_buffer: 1024,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        let defaults = TrackingConfig::default();

        let tracking = TrackingConfig {
            minutes_per_km: parse_or_default("MINUTES_PER_KM", defaults.minutes_per_km)?,
            delivery_radius_m: parse_or_default("DELIVERY_RADIUS_M", defaults.delivery_radius_m)?,
            history_capacity: parse_or_default("HISTORY_CAPACITY", defaults.history_capacity)?,
            ingest_interval: Duration::from_millis(parse_or_default("INGEST_INTERVAL_MS", 3_000)?),
            grace_period: Duration::from_secs(parse_or_default("GRACE_PERIOD_SECS", 300)?),
            stale_after: Duration::from_secs(parse_or_default("STALE_AFTER_SECS", 120)?),
            max_delivery_failures: parse_or_default(
                "MAX_DELIVERY_FAILURES",
                defaults.max_delivery_failures,
            )?,
            subscriber_buffer: parse_or_default("SUBSCRIBER_BUFFER", defaults.subscriber_buffer)?,
            notification_buffer: parse_or_default(
                "NOTIFICATION_BUFFER",
                defaults.notification_buffer,
            )?,
        };

        if tracking.minutes_per_km <= 0.0 {
            return Err(AppError::Internal(
                "invalid MINUTES_PER_KM: must be > 0".to_string(),
            ));
        }
        if tracking.history_capacity == 0 || tracking.subscriber_buffer == 0 {
            return Err(AppError::Internal(
                "invalid HISTORY_CAPACITY/SUBSCRIBER_BUFFER: must be > 0".to_string(),
            ));
        }

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            tracking,
        })
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
