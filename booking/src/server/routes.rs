//! Router configuration.

use super::health::{health_check, metrics};
use super::{AppState, handlers};
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

/// Build the complete router.
///
/// Booking, availability, view and saga routes live under `/flight`;
/// `/health` and `/metrics` sit at the root.
pub fn build_router(state: AppState) -> Router {
    let flight_routes = Router::new()
        .route("/bookings/:slot_id", post(handlers::create_booking))
        .route("/bookings/:slot_id/:booking_id", delete(handlers::cancel_booking))
        .route("/slots/:participant_id", get(handlers::slots_by_participant))
        .route(
            "/slots/:participant_id/:status",
            get(handlers::slots_by_participant_and_status),
        )
        .route(
            "/availability/:slot_id",
            get(handlers::get_slot)
                .post(handlers::mark_available)
                .delete(handlers::unmark_available),
        )
        .route("/sagas/:key", get(handlers::saga_status));

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .nest("/flight", flight_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
