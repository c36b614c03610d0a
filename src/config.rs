use std::env;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    /// Capacity of the dispatch request queue feeding the engine.
    pub dispatch_queue_size: usize,
    /// Capacity of each delivery topic's broadcast buffer; slow subscribers
    /// lose the oldest events beyond this.
    pub event_buffer_size: usize,
    /// Candidate search radius around the restaurant.
    pub search_radius_km: f64,
    /// Assumed courier speed for ETA estimates.
    pub avg_speed_kmh: f64,
    /// Budget for one dispatch attempt; elapsing yields NoCourierAvailable.
    pub dispatch_timeout_ms: u64,
    /// Delay before re-queueing a delivery that found no courier.
    pub redispatch_delay_ms: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            dispatch_queue_size: parse_or_default("DISPATCH_QUEUE_SIZE", 1024)?,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 64)?,
            search_radius_km: parse_or_default("SEARCH_RADIUS_KM", 10.0)?,
            avg_speed_kmh: parse_or_default("AVG_SPEED_KMH", 20.0)?,
            dispatch_timeout_ms: parse_or_default("DISPATCH_TIMEOUT_MS", 2_000)?,
            redispatch_delay_ms: parse_or_default("REDISPATCH_DELAY_MS", 3_000)?,
        })
    }
}

impl Default for Config {
    /// Defaults used by tests; `from_env` is the production path.
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            dispatch_queue_size: 1024,
            event_buffer_size: 64,
            search_radius_km: 10.0,
            avg_speed_kmh: 20.0,
            dispatch_timeout_ms: 2_000,
            redispatch_delay_ms: 3_000,
        }
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
