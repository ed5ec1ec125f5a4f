use axum::{routing::get, Router};

use emergency_cell::{emergency_routes, EmergencyState};

pub fn create_router(emergency: EmergencyState) -> Router {
    Router::new()
        .route("/", get(|| async { "Telehealth emergency API is running!" }))
        .nest("/emergency", emergency_routes(emergency))
}
