use axum::{routing::get, Json, Router};
use serde_json::{json, Value};

use appointment_cell::router::{appointment_routes, checkin_routes, payment_routes};
use appointment_cell::LifecycleState;
use doctor_cell::router::doctor_routes;

pub fn create_router(state: LifecycleState) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic check-in API is running!" }))
        .route("/health", get(health))
        .nest("/doctors", doctor_routes(state.store.clone()))
        .nest("/appointments", appointment_routes(state.clone()))
        .nest("/payments", payment_routes(state.clone()))
        .merge(checkin_routes(state))
}

async fn health() -> Json<Value> {
    Json(json!({
        "success": true,
        "status": "ok"
    }))
}
