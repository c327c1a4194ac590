use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::state::LifecycleState;

/// Mounted under `/appointments`. Every route needs a bearer token.
pub fn appointment_routes(state: LifecycleState) -> Router {
    Router::new()
        .route("/", post(handlers::book_appointment))
        .route("/{appointment_id}", get(handlers::get_appointment))
        .route("/{appointment_id}/confirm", post(handlers::confirm_appointment))
        .route("/{appointment_id}/reject", post(handlers::reject_appointment))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware))
        .with_state(state)
}

/// Mounted under `/payments`. Gateway redirects and callbacks are public;
/// their payloads are signed and checked.
pub fn payment_routes(state: LifecycleState) -> Router {
    let public_routes = Router::new()
        .route("/success", get(handlers::payment_success))
        .route("/failure", get(handlers::payment_failure))
        .route("/callback", post(handlers::payment_callback));

    let protected_routes = Router::new()
        .route("/{transaction_uuid}/poll", post(handlers::poll_payment))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}

/// The check-in desk scans credentials without signing in; the credential is the proof.
pub fn checkin_routes(state: LifecycleState) -> Router {
    Router::new()
        .route("/verify", get(handlers::verify_check_in))
        .with_state(state)
}
