// libs/emergency-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    Json,
};
use serde_json::{json, Value};
use tracing::error;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{
    CheckAndBillResponse, ClaimSessionResponse, CleanupResponse, CompleteSessionRequest,
    CompleteSessionResponse, ConsultationView, EmergencyError, EndSessionRequest,
    EndSessionResponse, NotificationsResponse, RoomDetails, SessionStatusResponse,
    StartSessionRequest, StartSessionResponse,
};
use crate::services::EmergencyService;

// ==============================================================================
// ROUTER STATE
// ==============================================================================

/// Shared by every emergency route. `service` is absent when the cell could
/// not be wired from configuration; only `/health` answers in that case.
#[derive(Clone)]
pub struct EmergencyState {
    pub config: Arc<AppConfig>,
    pub service: Option<Arc<EmergencyService>>,
}

impl EmergencyState {
    pub fn new(config: Arc<AppConfig>, service: Arc<EmergencyService>) -> Self {
        Self {
            config,
            service: Some(service),
        }
    }

    pub fn unconfigured(config: Arc<AppConfig>) -> Self {
        Self {
            config,
            service: None,
        }
    }

    /// Builds the service from configuration, falling back to an
    /// unconfigured state when a required backend is missing.
    pub async fn from_config(config: Arc<AppConfig>) -> Self {
        match EmergencyService::from_config(&config).await {
            Ok(service) => Self::new(config, Arc::new(service)),
            Err(e) => {
                error!("Emergency consultations disabled: {}", e);
                Self::unconfigured(config)
            }
        }
    }

    fn service(&self) -> Result<&EmergencyService, AppError> {
        self.service
            .as_deref()
            .ok_or_else(|| AppError::from(EmergencyError::NotConfigured))
    }
}

impl From<EmergencyError> for AppError {
    fn from(e: EmergencyError) -> Self {
        match e {
            EmergencyError::ValidationError { message } => AppError::ValidationError(message),
            EmergencyError::InsufficientCredits => AppError::Rejected {
                kind: "insufficient_credits",
                message: e.to_string(),
            },
            EmergencyError::DoctorUnavailable => AppError::Rejected {
                kind: "doctor_unavailable",
                message: e.to_string(),
            },
            EmergencyError::InvalidSessionState { .. } => AppError::Rejected {
                kind: "invalid_session_state",
                message: e.to_string(),
            },
            EmergencyError::NotFound { .. } => AppError::NotFound(e.to_string()),
            EmergencyError::Forbidden { message } => AppError::Forbidden(message),
            EmergencyError::AlreadyClaimed => AppError::Conflict(e.to_string()),
            EmergencyError::ProviderUnavailable { .. } | EmergencyError::ProviderTimeout { .. } => {
                AppError::ExternalService(e.to_string())
            }
            EmergencyError::StorageError { message } => AppError::Database(message),
            EmergencyError::NotConfigured | EmergencyError::Internal { .. } => {
                AppError::Internal(e.to_string())
            }
        }
    }
}

// ==============================================================================
// SESSION LIFECYCLE HANDLERS
// ==============================================================================

/// Patient opens an emergency request to a specific doctor.
#[axum::debug_handler]
pub async fn start_emergency_session(
    State(state): State<EmergencyState>,
    Extension(user): Extension<User>,
    Json(request): Json<StartSessionRequest>,
) -> Result<Json<StartSessionResponse>, AppError> {
    let response = state.service()?.start_session(&user, request).await?;
    Ok(Json(response))
}

#[axum::debug_handler]
pub async fn get_doctor_notifications(
    State(state): State<EmergencyState>,
    Path(doctor_id): Path<String>,
    Extension(user): Extension<User>,
) -> Result<Json<NotificationsResponse>, AppError> {
    let response = state.service()?.get_notifications(&user, &doctor_id).await?;
    Ok(Json(response))
}

/// Doctor claims the session offered to them and receives an owner token.
#[axum::debug_handler]
pub async fn join_emergency_session(
    State(state): State<EmergencyState>,
    Path(session_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<ClaimSessionResponse>, AppError> {
    let response = state.service()?.claim_session(&user, session_id).await?;
    Ok(Json(response))
}

#[axum::debug_handler]
pub async fn get_emergency_consultation(
    State(state): State<EmergencyState>,
    Path(session_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<ConsultationView>, AppError> {
    let response = state.service()?.get_consultation(&user, session_id).await?;
    Ok(Json(response))
}

/// Either participant ends the session. The body is optional.
#[axum::debug_handler]
pub async fn end_emergency_session(
    State(state): State<EmergencyState>,
    Path(session_id): Path<Uuid>,
    Extension(user): Extension<User>,
    request: Option<Json<EndSessionRequest>>,
) -> Result<Json<EndSessionResponse>, AppError> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let response = state.service()?.end_session(&user, session_id, request).await?;
    Ok(Json(response))
}

#[axum::debug_handler]
pub async fn complete_emergency_session(
    State(state): State<EmergencyState>,
    Path(session_id): Path<Uuid>,
    Extension(user): Extension<User>,
    request: Option<Json<CompleteSessionRequest>>,
) -> Result<Json<CompleteSessionResponse>, AppError> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let response = state.service()?.complete_session(&user, session_id, request).await?;
    Ok(Json(response))
}

// ==============================================================================
// BILLING & POLLING HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_emergency_status(
    State(state): State<EmergencyState>,
    Path(session_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<SessionStatusResponse>, AppError> {
    let response = state.service()?.get_status(&user, session_id).await?;
    Ok(Json(response))
}

/// Polled by clients; charges one credit once the threshold is crossed.
#[axum::debug_handler]
pub async fn check_emergency_time(
    State(state): State<EmergencyState>,
    Path(session_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<CheckAndBillResponse>, AppError> {
    let response = state.service()?.check_and_bill(&user, session_id).await?;
    Ok(Json(response))
}

#[axum::debug_handler]
pub async fn verify_emergency_room(
    State(state): State<EmergencyState>,
    Path(room_name): Path<String>,
    Extension(user): Extension<User>,
) -> Result<Json<RoomDetails>, AppError> {
    let response = state.service()?.verify_room(&user, &room_name).await?;
    Ok(Json(response))
}

// ==============================================================================
// SYSTEM HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn emergency_health_check(State(state): State<EmergencyState>) -> Json<Value> {
    let Some(service) = state.service.as_deref() else {
        return Json(json!({
            "status": "not_configured",
            "emergency_configured": false,
            "room_provider_configured": state.config.is_room_provider_configured(),
        }));
    };

    let health = service.health().await;
    Json(json!({
        "status": health.status,
        "emergency_configured": true,
        "storage_backend": health.storage_backend,
        "notification_registry": health.notification_registry,
        "room_provider_reachable": health.room_provider_reachable,
        "billing_threshold_minutes": service.settings().billing.threshold.num_minutes(),
    }))
}

#[axum::debug_handler]
pub async fn cleanup_stale_sessions(
    State(state): State<EmergencyState>,
    Extension(user): Extension<User>,
) -> Result<Json<CleanupResponse>, AppError> {
    let response = state.service()?.cleanup_stale_sessions(&user).await?;
    Ok(Json(response))
}
