//! HTTP surface of the booking service.
//!
//! Thin axum layer over [`FlightService`]: request parsing, JSON bodies in
//! camelCase and error mapping. No domain logic lives here.

pub mod error;
pub mod handlers;
pub mod health;
pub mod routes;

pub use error::AppError;
pub use routes::build_router;

use crate::service::FlightService;
use flightdeck_runtime::metrics::MetricsRecorder;

/// State shared with every handler.
#[derive(Clone)]
pub struct AppState {
    /// Boundary operations
    pub service: FlightService,
    /// Prometheus handle rendered on `/metrics`, if one was installed
    pub metrics: Option<MetricsRecorder>,
}

impl AppState {
    /// State without a metrics recorder.
    #[must_use]
    pub const fn new(service: FlightService) -> Self {
        Self {
            service,
            metrics: None,
        }
    }

    /// Attach the metrics recorder.
    #[must_use]
    pub fn with_metrics(mut self, metrics: MetricsRecorder) -> Self {
        self.metrics = Some(metrics);
        self
    }
}
