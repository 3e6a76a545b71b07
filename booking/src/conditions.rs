//! Go/no-go flight condition checks.
//!
//! The booking saga only sees [`ConditionCheck`]: slot id in, report out.
//! [`WeatherConditionCheck`] is the bundled implementation. It pulls an
//! hourly forecast from a [`ForecastSource`], picks the hour matching the
//! slot and compares it against [`FlightMinimums`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result of a condition check for one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionsReport {
    /// Slot the report is for
    pub slot_id: String,
    /// Whether the slot is flyable
    pub meets_requirements: bool,
    /// Percent
    pub thunderstorm_probability: i32,
    /// Wind speed
    pub wind_speed: i32,
    /// Wind gust
    pub wind_gust: i32,
    /// Visibility in kilometres
    pub visibility: i32,
    /// Precipitation probability in percent
    pub precipitation: i32,
}

impl ConditionsReport {
    /// Favourable report with every reading zeroed.
    #[must_use]
    pub fn permissive(slot_id: impl Into<String>) -> Self {
        Self {
            slot_id: slot_id.into(),
            meets_requirements: true,
            thunderstorm_probability: 0,
            wind_speed: 0,
            wind_gust: 0,
            visibility: 0,
            precipitation: 0,
        }
    }
}

/// Why a condition check produced no report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConditionCheckError {
    /// The collaborator could not be reached or answered with an error.
    #[error("Condition check unavailable: {0}")]
    Unavailable(String),

    /// The collaborator answered with something that could not be read.
    #[error("Condition check returned a malformed report: {0}")]
    Malformed(String),
}

/// External go/no-go collaborator.
#[async_trait]
pub trait ConditionCheck: Send + Sync {
    /// Evaluate the conditions for `slot_id`.
    ///
    /// # Errors
    ///
    /// [`ConditionCheckError::Unavailable`] on transport failures,
    /// [`ConditionCheckError::Malformed`] when the answer cannot be parsed.
    async fn check(&self, slot_id: &str) -> Result<ConditionsReport, ConditionCheckError>;
}

/// Limits a slot must satisfy to be flyable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlightMinimums {
    /// Visibility must be strictly above this, in kilometres
    pub min_visibility_km: f64,
    /// Wind speed must be strictly below this
    pub max_wind_speed: f64,
    /// Wind gust must be strictly below this
    pub max_wind_gust: f64,
    /// Thunderstorm probability must be strictly below this, in percent
    pub max_thunderstorm_probability: f64,
}

impl Default for FlightMinimums {
    fn default() -> Self {
        Self {
            min_visibility_km: 4.0,
            max_wind_speed: 35.0,
            max_wind_gust: 35.0,
            max_thunderstorm_probability: 40.0,
        }
    }
}

impl FlightMinimums {
    /// Build the report for one forecast hour.
    #[must_use]
    pub fn evaluate(&self, slot_id: &str, hour: &ForecastHour) -> ConditionsReport {
        let visibility = hour.visibility_km();
        let wind_speed = hour.wind.speed.value;
        let wind_gust = hour.wind.gust.value;
        let thunderstorm = hour.thunderstorm_probability;
        let precipitation = &hour.precipitation.probability;

        let frozen = precipitation.kind.as_deref().is_some_and(|kind| {
            let kind = kind.to_ascii_uppercase();
            kind.contains("ICE") || kind.contains("SNOW")
        }) && precipitation.percent > 0.0;

        let meets_requirements = visibility > self.min_visibility_km
            && wind_speed < self.max_wind_speed
            && wind_gust < self.max_wind_gust
            && thunderstorm < self.max_thunderstorm_probability
            && !frozen;

        ConditionsReport {
            slot_id: slot_id.to_string(),
            meets_requirements,
            thunderstorm_probability: reading(thunderstorm),
            wind_speed: reading(wind_speed),
            wind_gust: reading(wind_gust),
            visibility: reading(visibility),
            precipitation: reading(precipitation.percent),
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn reading(value: f64) -> i32 {
    value.round() as i32
}

// ============================================================================
// Forecast payload
// ============================================================================

/// Hourly forecast response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Forecast {
    /// Forecast hours, in any order
    #[serde(default)]
    pub forecast_hours: Vec<ForecastHour>,
}

/// Forecast of one hour. Missing readings count as zero.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ForecastHour {
    /// Hour covered
    pub interval: Interval,
    /// Percent
    pub thunderstorm_probability: f64,
    /// Wind readings
    pub wind: Wind,
    /// Visibility reading
    pub visibility: Visibility,
    /// Precipitation reading
    pub precipitation: Precipitation,
}

impl ForecastHour {
    /// Visibility in kilometres; miles are converted.
    #[must_use]
    pub fn visibility_km(&self) -> f64 {
        match self.visibility.unit.as_deref() {
            Some(unit) if unit.eq_ignore_ascii_case("MILES") => self.visibility.distance * 1.609_344,
            _ => self.visibility.distance,
        }
    }

    /// Slot id of the hour, `YYYY-MM-DD-HH` in UTC.
    #[must_use]
    pub fn slot_id(&self) -> Option<String> {
        let start = self.interval.start_time.as_deref()?;
        let start: DateTime<Utc> = DateTime::parse_from_rfc3339(start).ok()?.with_timezone(&Utc);
        Some(start.format("%Y-%m-%d-%H").to_string())
    }
}

/// Start and end of a forecast hour.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Interval {
    /// RFC 3339 start time
    pub start_time: Option<String>,
}

/// Wind readings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Wind {
    /// Sustained speed
    pub speed: Measure,
    /// Gust speed
    pub gust: Measure,
}

/// A value with a unit.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Measure {
    /// Reading
    pub value: f64,
}

/// Visibility reading.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Visibility {
    /// Distance in `unit`
    pub distance: f64,
    /// `KILOMETERS` or `MILES`
    pub unit: Option<String>,
}

/// Precipitation reading.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Precipitation {
    /// Chance and kind of precipitation
    pub probability: PrecipitationProbability,
}

/// Chance and kind of precipitation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PrecipitationProbability {
    /// Percent
    pub percent: f64,
    /// `RAIN`, `SNOW`, `ICE`, ...
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

// ============================================================================
// Forecast sources
// ============================================================================

/// Source of the raw hourly forecast body.
#[async_trait]
pub trait ForecastSource: Send + Sync {
    /// Fetch the forecast as JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`ConditionCheckError::Unavailable`] when the forecast cannot be fetched.
    async fn fetch_forecast(&self) -> Result<String, ConditionCheckError>;
}

/// Settings of [`GoogleWeatherClient`].
#[derive(Debug, Clone)]
pub struct WeatherApiConfig {
    /// API root, without the `/v1/...` path
    pub base_url: String,
    /// API key
    pub api_key: String,
    /// Latitude of the airfield
    pub latitude: f64,
    /// Longitude of the airfield
    pub longitude: f64,
    /// Request timeout
    pub timeout: Duration,
}

impl Default for WeatherApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://weather.googleapis.com".to_string(),
            api_key: String::new(),
            latitude: 51.5072,
            longitude: -0.1276,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Hourly forecast lookup against the Google Weather API.
#[derive(Clone)]
pub struct GoogleWeatherClient {
    client: reqwest::Client,
    config: WeatherApiConfig,
}

impl GoogleWeatherClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns [`ConditionCheckError::Unavailable`] if the HTTP client cannot be built.
    pub fn new(config: WeatherApiConfig) -> Result<Self, ConditionCheckError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ConditionCheckError::Unavailable(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn lookup_url(&self) -> String {
        format!(
            "{}/v1/forecast/hours:lookup",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl ForecastSource for GoogleWeatherClient {
    async fn fetch_forecast(&self) -> Result<String, ConditionCheckError> {
        let response = self
            .client
            .get(self.lookup_url())
            .query(&[
                ("key", self.config.api_key.clone()),
                ("location.latitude", self.config.latitude.to_string()),
                ("location.longitude", self.config.longitude.to_string()),
            ])
            .send()
            .await
            .map_err(|e| ConditionCheckError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ConditionCheckError::Unavailable(format!(
                "weather API returned {}: {body}",
                status.as_u16()
            )));
        }

        response
            .text()
            .await
            .map_err(|e| ConditionCheckError::Unavailable(e.to_string()))
    }
}

/// Condition check evaluating a forecast against flight minimums.
#[derive(Clone)]
pub struct WeatherConditionCheck {
    source: Arc<dyn ForecastSource>,
    minimums: FlightMinimums,
}

impl WeatherConditionCheck {
    /// Check `source` forecasts against `minimums`.
    #[must_use]
    pub fn new(source: Arc<dyn ForecastSource>, minimums: FlightMinimums) -> Self {
        Self { source, minimums }
    }
}

#[async_trait]
impl ConditionCheck for WeatherConditionCheck {
    async fn check(&self, slot_id: &str) -> Result<ConditionsReport, ConditionCheckError> {
        let body = self.source.fetch_forecast().await?;
        let forecast: Forecast = serde_json::from_str(&body)
            .map_err(|e| ConditionCheckError::Malformed(e.to_string()))?;

        let hour = forecast
            .forecast_hours
            .iter()
            .find(|hour| hour.slot_id().as_deref() == Some(slot_id));

        match hour {
            Some(hour) => {
                let report = self.minimums.evaluate(slot_id, hour);
                tracing::info!(
                    slot_id,
                    meets_requirements = report.meets_requirements,
                    "Flight conditions evaluated"
                );
                Ok(report)
            },
            None => {
                tracing::info!(slot_id, "Forecast not available for slot, allowing booking");
                Ok(ConditionsReport::permissive(slot_id))
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    struct CannedForecast(&'static str);

    #[async_trait]
    impl ForecastSource for CannedForecast {
        async fn fetch_forecast(&self) -> Result<String, ConditionCheckError> {
            Ok(self.0.to_string())
        }
    }

    const FORECAST: &str = r#"{
        "forecastHours": [
            {
                "interval": {"startTime": "2030-01-01T10:00:00Z", "endTime": "2030-01-01T11:00:00Z"},
                "thunderstormProbability": 10,
                "wind": {"speed": {"value": 12, "unit": "KILOMETERS_PER_HOUR"}, "gust": {"value": 20}},
                "visibility": {"distance": 16, "unit": "KILOMETERS"},
                "precipitation": {"probability": {"percent": 5, "type": "RAIN"}}
            },
            {
                "interval": {"startTime": "2030-01-01T11:00:00Z"},
                "thunderstormProbability": 0,
                "wind": {"speed": {"value": 8}, "gust": {"value": 10}},
                "visibility": {"distance": 10},
                "precipitation": {"probability": {"percent": 30, "type": "SNOW"}}
            },
            {
                "interval": {"startTime": "2030-01-01T12:00:00Z"},
                "thunderstormProbability": 0,
                "wind": {"speed": {"value": 40}, "gust": {"value": 55}},
                "visibility": {"distance": 10},
                "precipitation": {"probability": {"percent": 0, "type": "NONE"}}
            }
        ]
    }"#;

    fn check(body: &'static str) -> WeatherConditionCheck {
        WeatherConditionCheck::new(Arc::new(CannedForecast(body)), FlightMinimums::default())
    }

    #[tokio::test]
    async fn fair_hour_meets_requirements() {
        let report = check(FORECAST).check("2030-01-01-10").await.expect("report");
        assert_eq!(
            report,
            ConditionsReport {
                slot_id: "2030-01-01-10".to_string(),
                meets_requirements: true,
                thunderstorm_probability: 10,
                wind_speed: 12,
                wind_gust: 20,
                visibility: 16,
                precipitation: 5,
            }
        );
    }

    #[tokio::test]
    async fn snow_with_any_chance_fails() {
        let report = check(FORECAST).check("2030-01-01-11").await.expect("report");
        assert!(!report.meets_requirements);
    }

    #[tokio::test]
    async fn strong_wind_fails() {
        let report = check(FORECAST).check("2030-01-01-12").await.expect("report");
        assert!(!report.meets_requirements);
        assert_eq!(report.wind_gust, 55);
    }

    #[tokio::test]
    async fn missing_hour_is_permissive() {
        let report = check(FORECAST).check("2031-01-01-10").await.expect("report");
        assert_eq!(report, ConditionsReport::permissive("2031-01-01-10"));
    }

    #[tokio::test]
    async fn unparseable_body_is_malformed() {
        let result = check("Forecast not available").check("2030-01-01-10").await;
        assert!(matches!(result, Err(ConditionCheckError::Malformed(_))));
    }

    #[test]
    fn limits_are_strict() {
        let minimums = FlightMinimums::default();
        let mut hour = ForecastHour::default();
        hour.visibility.distance = 4.0;
        assert!(!minimums.evaluate("2030-01-01-10", &hour).meets_requirements);

        hour.visibility.distance = 4.5;
        assert!(minimums.evaluate("2030-01-01-10", &hour).meets_requirements);

        hour.thunderstorm_probability = 40.0;
        assert!(!minimums.evaluate("2030-01-01-10", &hour).meets_requirements);
    }

    #[test]
    fn lookup_url_joins_base_and_path() {
        let client = GoogleWeatherClient::new(WeatherApiConfig {
            base_url: "http://localhost:9999/".to_string(),
            ..WeatherApiConfig::default()
        })
        .expect("client builds");
        assert_eq!(client.lookup_url(), "http://localhost:9999/v1/forecast/hours:lookup");
    }
}
