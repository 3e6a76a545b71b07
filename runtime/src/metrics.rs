//! Prometheus metrics for the store, repositories, consumers and sagas.
//!
//! The recorder is installed once per process. The HTTP layer renders the
//! handle on `GET /metrics`.
//!
//! ```rust,no_run
//! use flightdeck_runtime::metrics::MetricsRecorder;
//!
//! # fn example() -> Result<(), flightdeck_runtime::metrics::MetricsError> {
//! let recorder = MetricsRecorder::install()?;
//! let body = recorder.render();
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Handle to the process-wide Prometheus recorder.
#[derive(Clone)]
pub struct MetricsRecorder {
    handle: PrometheusHandle,
}

impl std::fmt::Debug for MetricsRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRecorder").finish_non_exhaustive()
    }
}

impl MetricsRecorder {
    /// Install the Prometheus recorder as the global metrics recorder.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Install`] if a recorder is already installed
    /// (tests that spin up several apps should use [`MetricsRecorder::detached`]).
    pub fn install() -> Result<Self, MetricsError> {
        let handle = builder()?
            .install_recorder()
            .map_err(|e| MetricsError::Install(e.to_string()))?;
        register_metrics();
        tracing::info!("Prometheus recorder installed");
        Ok(Self { handle })
    }

    /// Build a recorder handle without installing it globally.
    ///
    /// Metrics emitted through the `metrics` macros do not reach a detached
    /// handle; its rendering only reflects what was recorded on it directly.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Build`] if the bucket configuration is rejected.
    pub fn detached() -> Result<Self, MetricsError> {
        let recorder = builder()?.build_recorder();
        Ok(Self {
            handle: recorder.handle(),
        })
    }

    /// Render current metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

fn builder() -> Result<PrometheusBuilder, MetricsError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
            ],
        )
        .map_err(|e| MetricsError::Build(e.to_string()))
}

fn register_metrics() {
    // Store
    describe_counter!("store.actions", "Actions reduced by any store");
    describe_counter!("store.actions.refused", "Actions refused by stores shutting down");
    describe_counter!("store.shutdown.timeout", "Store shutdowns that left effects running");
    describe_histogram!(
        "store.reducer.duration_seconds",
        "Time spent inside reducers"
    );

    // Aggregate repositories
    describe_counter!(
        "repository.commands",
        "Aggregate commands, labelled by aggregate and outcome"
    );
    describe_counter!(
        "repository.hydrations",
        "Aggregate instances rebuilt from their event stream"
    );

    // Event delivery
    describe_counter!("consumer.events.handled", "Events handled by consumers");
    describe_counter!(
        "consumer.events.dead_lettered",
        "Events parked after exhausting delivery retries"
    );
    describe_counter!("retry.attempts", "Retries scheduled by the backoff helper");
    describe_counter!("retry.exhausted", "Operations that failed after all retries");
    describe_gauge!("dlq.size", "Entries currently held in dead letter queues");
    describe_counter!("dlq.over_threshold", "Dead letters parked while their queue was above its alert threshold");

    // Booking workflow
    describe_counter!("saga.started", "Flight booking workflows started");
    describe_counter!(
        "saga.resolved",
        "Flight booking workflows resolved, labelled by resolution"
    );
    describe_counter!("saga.failed", "Flight booking workflows that failed a step");
    describe_counter!(
        "saga.fail_open",
        "Condition reports replaced by the favourable fallback"
    );
}
