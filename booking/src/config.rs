//! Configuration management for the booking service.
//!
//! Loads configuration from environment variables with sensible defaults.
//! `main` loads `.env` first, so values there behave like real variables.

use crate::conditions::{FlightMinimums, WeatherApiConfig};
use crate::saga::SagaKeying;
use flightdeck_runtime::RetryPolicy;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Weather API configuration
    pub weather: WeatherApiConfig,
    /// Booking saga configuration
    pub saga: SagaConfig,
    /// Flight minimums applied to forecasts
    pub minimums: FlightMinimums,
    /// Event consumer configuration
    pub consumers: ConsumerConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout: u64,
}

/// Booking saga configuration
#[derive(Debug, Clone)]
pub struct SagaConfig {
    /// Bound on the condition check
    pub condition_check_timeout: Duration,
    /// Saga key derivation
    pub keying: SagaKeying,
    /// Treat malformed condition reports as favourable
    pub fail_open_on_malformed: bool,
}

/// Event consumer configuration
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Retries before an event is dead-lettered
    pub max_retries: usize,
    /// Delay before the first retry
    pub retry_delay: Duration,
    /// Delay before resubscribing after a bus error
    pub reconnect_delay: Duration,
    /// Size above which a dead letter queue raises an alert
    pub dlq_alert_threshold: usize,
}

impl ConsumerConfig {
    /// Retry policy for event handlers.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(self.max_retries)
            .initial_delay(self.retry_delay)
            .build()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl Config {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from `lookup`, falling back to defaults for
    /// missing or unparseable values.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parse_or = |name: &str, default| parsed(&lookup, name).unwrap_or(default);
        let weather_defaults = WeatherApiConfig::default();
        let minimum_defaults = FlightMinimums::default();

        Self {
            server: ServerConfig {
                host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: parsed(&lookup, "PORT").unwrap_or(8080),
                shutdown_timeout: parsed(&lookup, "SHUTDOWN_TIMEOUT").unwrap_or(30),
            },
            weather: WeatherApiConfig {
                base_url: lookup("WEATHER_API_BASE_URL").unwrap_or(weather_defaults.base_url),
                api_key: lookup("WEATHER_API_KEY").unwrap_or_default(),
                latitude: parse_or("WEATHER_LATITUDE", weather_defaults.latitude),
                longitude: parse_or("WEATHER_LONGITUDE", weather_defaults.longitude),
                timeout: Duration::from_secs(
                    parsed(&lookup, "WEATHER_HTTP_TIMEOUT_SECS").unwrap_or(10),
                ),
            },
            saga: SagaConfig {
                condition_check_timeout: Duration::from_secs(
                    parsed(&lookup, "CONDITION_CHECK_TIMEOUT_SECS").unwrap_or(30),
                ),
                keying: parsed(&lookup, "SAGA_KEYING").unwrap_or_default(),
                fail_open_on_malformed: parsed(&lookup, "SAGA_FAIL_OPEN_ON_MALFORMED")
                    .unwrap_or(true),
            },
            minimums: FlightMinimums {
                min_visibility_km: parse_or("MIN_VISIBILITY_KM", minimum_defaults.min_visibility_km),
                max_wind_speed: parse_or("MAX_WIND_SPEED", minimum_defaults.max_wind_speed),
                max_wind_gust: parse_or("MAX_WIND_GUST", minimum_defaults.max_wind_gust),
                max_thunderstorm_probability: parse_or(
                    "MAX_THUNDERSTORM_PROBABILITY",
                    minimum_defaults.max_thunderstorm_probability,
                ),
            },
            consumers: ConsumerConfig {
                max_retries: parsed(&lookup, "PROPAGATION_MAX_RETRIES").unwrap_or(5),
                retry_delay: Duration::from_millis(
                    parsed(&lookup, "PROPAGATION_RETRY_DELAY_MS").unwrap_or(100),
                ),
                reconnect_delay: Duration::from_millis(
                    parsed(&lookup, "CONSUMER_RECONNECT_DELAY_MS").unwrap_or(1000),
                ),
                dlq_alert_threshold: parsed(&lookup, "DLQ_ALERT_THRESHOLD").unwrap_or(1000),
            },
        }
    }

    /// Address the HTTP server binds to.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, "Ignoring unparseable configuration value");
            None
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_match_reference_deployment() {
        let config = config(&[]);
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
        assert_eq!(config.saga.condition_check_timeout, Duration::from_secs(30));
        assert_eq!(config.saga.keying, SagaKeying::PerBooking);
        assert!(config.saga.fail_open_on_malformed);
        assert_eq!(config.minimums, FlightMinimums::default());
        assert!((config.weather.latitude - 51.5072).abs() < f64::EPSILON);
    }

    #[test]
    fn variables_override_defaults() {
        let config = config(&[
            ("PORT", "9090"),
            ("SAGA_KEYING", "per_slot"),
            ("SAGA_FAIL_OPEN_ON_MALFORMED", "false"),
            ("MAX_WIND_GUST", "25"),
            ("PROPAGATION_MAX_RETRIES", "2"),
        ]);
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.saga.keying, SagaKeying::PerSlot);
        assert!(!config.saga.fail_open_on_malformed);
        assert!((config.minimums.max_wind_gust - 25.0).abs() < f64::EPSILON);
        assert_eq!(config.consumers.retry_policy().max_retries, 2);
    }

    #[test]
    fn unparseable_values_fall_back() {
        let config = config(&[("PORT", "eighty"), ("SAGA_KEYING", "per_hour")]);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.saga.keying, SagaKeying::PerBooking);
    }
}
