use axum::{routing::get, Router};

use shared_database::DbHandle;

use crate::handlers;

/// Availability is public: patients browse slots before they sign in.
pub fn doctor_routes(store: DbHandle) -> Router {
    Router::new()
        .route("/{doctor_id}/slots", get(handlers::get_open_slots))
        .route("/{doctor_id}/availability", get(handlers::get_weekly_schedule))
        .with_state(store)
}
