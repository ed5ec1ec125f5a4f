// libs/emergency-cell/src/router.rs
use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers::*;

/// Emergency consultation routes, nested under `/emergency` by the API.
pub fn emergency_routes(state: EmergencyState) -> Router {
    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/health", get(emergency_health_check));

    // Protected routes (authentication required)
    let protected_routes = Router::new()
        // Session lifecycle
        .route("/start", post(start_emergency_session))
        .route("/notifications/{doctor_id}", get(get_doctor_notifications))
        .route("/join/{session_id}", post(join_emergency_session))
        .route("/consultation/{session_id}", get(get_emergency_consultation))
        .route("/end/{session_id}", post(end_emergency_session))
        .route("/complete/{session_id}", post(complete_emergency_session))

        // Billing and polling
        .route("/status/{session_id}", get(get_emergency_status))
        .route("/check-time/{session_id}", post(check_emergency_time))
        .route("/verify-room/{room_name}", get(verify_emergency_room))

        // Admin endpoints
        .route("/admin/cleanup", post(cleanup_stale_sessions))

        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
