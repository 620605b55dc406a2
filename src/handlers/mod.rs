pub mod admin;
pub mod calendar;
pub mod health;
pub mod public;

use std::sync::Arc;

use axum::http::HeaderValue;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(state.config.cors_origin.as_deref());

    Router::new()
        .route("/health", get(health::health))
        // Public booking widget
        .route("/api/cities", get(public::list_cities))
        .route("/api/services", get(public::list_services))
        .route("/api/cities/:city_id/periods", get(public::list_periods))
        .route("/api/cities/:city_id/slots", get(public::day_slots))
        .route("/api/cities/:city_id/available", get(public::available_slots))
        .route("/api/bookings", post(public::create_bookings))
        .route("/api/slots/events", get(public::slot_events))
        .route("/calendar/:booking_id", get(calendar::download_ics))
        // Catalog
        .route("/api/admin/cities", get(admin::list_cities).post(admin::create_city))
        .route("/api/admin/cities/:id", delete(admin::delete_city))
        .route("/api/admin/services", post(admin::create_service))
        // Periods
        .route("/api/admin/periods", get(admin::list_periods).post(admin::create_period))
        .route(
            "/api/admin/periods/:id",
            get(admin::get_period)
                .put(admin::update_period)
                .delete(admin::delete_period),
        )
        .route("/api/admin/periods/:id/release", post(admin::release_period))
        .route("/api/admin/periods/:id/preview", get(admin::preview_period))
        // Bookings
        .route("/api/admin/bookings", get(admin::list_bookings).post(admin::create_bookings))
        .route(
            "/api/admin/bookings/:id",
            get(admin::get_booking).delete(admin::delete_booking),
        )
        .route("/api/admin/bookings/:id/confirm", post(admin::confirm_booking))
        .route("/api/admin/bookings/:id/complete", post(admin::complete_booking))
        .route("/api/admin/bookings/:id/cancel", post(admin::cancel_booking))
        .route("/api/admin/bookings/:id/notes", post(admin::update_notes))
        .route("/api/admin/status", get(admin::get_status))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

fn cors_layer(origin: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    match origin.map(HeaderValue::from_str) {
        Some(Ok(origin)) => cors.allow_origin(origin),
        Some(Err(_)) => {
            tracing::warn!("CORS_ORIGIN is not a valid header value, allowing any origin");
            cors.allow_origin(Any)
        }
        None => cors.allow_origin(Any),
    }
}
