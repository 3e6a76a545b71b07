//! Flight booking HTTP server.
//!
//! Runs the booking application on the in-memory event store and bus, with
//! the Google Weather API as condition check.

use flightdeck_booking::conditions::{GoogleWeatherClient, WeatherConditionCheck};
use flightdeck_booking::server::{AppState, build_router};
use flightdeck_booking::{App, Config, Dependencies};
use flightdeck_core::environment::SystemClock;
use flightdeck_runtime::metrics::MetricsRecorder;
use flightdeck_runtime::in_memory::{InMemoryEventBus, InMemoryEventStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flightdeck_booking=info,flightdeck_runtime=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    info!(
        address = %config.bind_address(),
        saga_keying = ?config.saga.keying,
        condition_check_timeout = ?config.saga.condition_check_timeout,
        "Configuration loaded"
    );
    if config.weather.api_key.is_empty() {
        warn!("WEATHER_API_KEY is not set, condition checks will fail");
    }

    let metrics = MetricsRecorder::install()?;

    let forecast = GoogleWeatherClient::new(config.weather.clone())?;
    let condition_check = WeatherConditionCheck::new(Arc::new(forecast), config.minimums);

    let app = App::start(
        &config,
        Dependencies {
            event_store: Arc::new(InMemoryEventStore::new()),
            event_bus: Arc::new(InMemoryEventBus::new()),
            condition_check: Arc::new(condition_check),
            clock: Arc::new(SystemClock),
        },
    )
    .await?;

    let router = build_router(AppState::new(app.service()).with_metrics(metrics));
    let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
    info!(address = %config.bind_address(), "HTTP server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, shutting down");
    app.shutdown(Duration::from_secs(config.server.shutdown_timeout))
        .await;
    info!("Shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(%error, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(error) => {
                warn!(%error, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C signal"),
        () = terminate => info!("Received SIGTERM signal"),
    }
}
