// libs/emergency-cell/src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ==============================================================================
// EMERGENCY SESSION DOMAIN MODELS
// ==============================================================================

/// One emergency encounter between a patient and a single doctor.
///
/// Stored as-is by the session stores; handlers never serialize it directly
/// to callers because it carries both parties' join tokens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmergencySession {
    pub id: Uuid,
    pub patient_id: String,
    pub doctor_id: Option<String>,
    pub status: SessionStatus,
    pub is_emergency: bool,

    pub room_name: String,
    pub room_url: String,
    pub patient_token: String,
    pub doctor_token: Option<String>,

    pub notes: String,
    pub scheduled_duration_minutes: i64,
    pub duration_minutes: Option<i64>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub doctor_joined_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub concluded_at: Option<DateTime<Utc>>,
    pub billed_at: Option<DateTime<Utc>>,
    pub billed_after_minutes: Option<i64>,

    /// Bumped on every write; conditional updates compare against it.
    #[serde(default)]
    pub version: u64,
}

impl EmergencySession {
    pub fn is_participant(&self, user_id: &str) -> bool {
        self.patient_id == user_id || self.doctor_id.as_deref() == Some(user_id)
    }

    pub fn participant_role(&self, user_id: &str) -> Option<ParticipantRole> {
        if self.doctor_id.as_deref() == Some(user_id) {
            Some(ParticipantRole::Doctor)
        } else if self.patient_id == user_id {
            Some(ParticipantRole::Patient)
        } else {
            None
        }
    }

    pub fn append_note(&mut self, note: &str) {
        if note.trim().is_empty() {
            return;
        }
        if !self.notes.is_empty() {
            self.notes.push('\n');
        }
        self.notes.push_str(note.trim());
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionStatus {
    #[serde(rename = "waiting")]
    Waiting,
    #[serde(rename = "in_progress")]
    InProgress,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Cancelled)
    }

    pub fn can_transition_to(&self, target: &SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, target) {
            (Waiting, InProgress) => true,
            (Waiting, Completed) => true, // ended before any doctor joined, never billed
            (InProgress, Completed) => true,
            (_, Cancelled) => !self.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Waiting => "waiting",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Patient,
    Doctor,
}

/// Single-slot offer of a pending emergency request to one doctor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub doctor_id: String,
    pub patient_id: String,
    pub patient_name: String,
    pub room_name: String,
    pub room_url: String,
    pub session_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        now - self.timestamp > ttl
    }
}

// ==============================================================================
// EXTERNAL DIRECTORY PROJECTIONS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatientProfile {
    pub id: String,
    pub full_name: String,
    pub role: String,
    pub emergency_consultations_left: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DoctorProfile {
    pub id: String,
    pub full_name: String,
    pub available_for_emergency: bool,
}

// ==============================================================================
// ROOM PROVIDER TYPES
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProvisionedRoom {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomDetails {
    pub exists: bool,
    pub url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ProviderRoomRequest {
    pub name: String,
    pub privacy: String,
    pub properties: ProviderRoomProperties,
}

#[derive(Debug, Serialize)]
pub(crate) struct ProviderRoomProperties {
    pub exp: i64,
    pub enable_chat: bool,
    pub max_participants: u32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProviderRoomResponse {
    pub name: String,
    pub url: String,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ProviderTokenRequest {
    pub properties: ProviderTokenProperties,
}

#[derive(Debug, Serialize)]
pub(crate) struct ProviderTokenProperties {
    pub room_name: String,
    pub user_id: String,
    pub user_name: String,
    pub is_owner: bool,
    pub exp: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProviderTokenResponse {
    pub token: String,
}

// ==============================================================================
// REQUEST / RESPONSE DTOs
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSessionRequest {
    #[serde(default)]
    pub doctor_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StartSessionResponse {
    pub session_id: Uuid,
    pub room_name: String,
    pub room_url: String,
    pub token: String,
    pub status: SessionStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationView {
    pub id: String,
    pub patient_name: String,
    pub room_url: String,
    pub session_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

impl From<&Notification> for NotificationView {
    fn from(notification: &Notification) -> Self {
        Self {
            id: format!(
                "emergency-{}",
                notification.timestamp.timestamp_millis()
            ),
            patient_name: notification.patient_name.clone(),
            room_url: notification.room_url.clone(),
            session_id: notification.session_id,
            timestamp: notification.timestamp,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationsResponse {
    pub notifications: Vec<NotificationView>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClaimSessionResponse {
    pub session_id: Uuid,
    pub room_name: String,
    pub room_url: String,
    pub token: String,
    pub patient_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndSessionRequest {
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub duration: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndSessionResponse {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub duration_minutes: i64,
    pub consultation_charged: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompleteSessionRequest {
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompleteSessionResponse {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub concluded_at: DateTime<Utc>,
    pub duration_minutes: Option<i64>,
    pub consultation_charged: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckAndBillResponse {
    pub session_id: Uuid,
    pub charged: bool,
    pub already_billed: bool,
    pub elapsed_minutes: i64,
    pub minutes_remaining: i64,
    pub remaining_credits: Option<u32>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionStatusResponse {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub elapsed_seconds: i64,
    pub elapsed_minutes: i64,
    pub threshold_minutes: i64,
    pub minutes_remaining: i64,
    pub seconds_remaining: i64,
    pub should_charge: bool,
    pub already_billed: bool,
}

/// Role-filtered session detail. Token and notes depend on who asks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsultationView {
    pub session_id: Uuid,
    pub role: ParticipantRole,
    pub status: SessionStatus,
    pub is_emergency: bool,
    pub room_name: String,
    pub room_url: String,
    pub token: Option<String>,
    pub counterpart_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub doctor_joined_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub concluded_at: Option<DateTime<Utc>>,
    pub duration_minutes: Option<i64>,
    pub consultation_charged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CleanupResponse {
    pub cancelled_sessions: usize,
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Error, Debug)]
pub enum EmergencyError {
    #[error("Validation error: {message}")]
    ValidationError { message: String },

    #[error("No emergency consultations left")]
    InsufficientCredits,

    #[error("Doctor is not available for emergency consultations")]
    DoctorUnavailable,

    #[error("{entity} not found")]
    NotFound { entity: String },

    #[error("Not authorized: {message}")]
    Forbidden { message: String },

    #[error("Session already claimed by another doctor")]
    AlreadyClaimed,

    #[error("Session is not in a state that allows this operation: {status}")]
    InvalidSessionState { status: String },

    #[error("Room provider unavailable: {message}")]
    ProviderUnavailable { message: String },

    #[error("Room provider did not confirm readiness within {timeout_secs} seconds")]
    ProviderTimeout { timeout_secs: u64 },

    #[error("Storage error: {message}")]
    StorageError { message: String },

    #[error("Emergency consultations not configured")]
    NotConfigured,

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl EmergencyError {
    pub fn not_found(entity: &str) -> Self {
        EmergencyError::NotFound {
            entity: entity.to_string(),
        }
    }

    pub fn forbidden(message: &str) -> Self {
        EmergencyError::Forbidden {
            message: message.to_string(),
        }
    }

    pub fn validation(message: &str) -> Self {
        EmergencyError::ValidationError {
            message: message.to_string(),
        }
    }

    pub fn storage(message: impl std::fmt::Display) -> Self {
        EmergencyError::StorageError {
            message: message.to_string(),
        }
    }
}

impl From<anyhow::Error> for EmergencyError {
    fn from(err: anyhow::Error) -> Self {
        EmergencyError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for EmergencyError {
    fn from(err: reqwest::Error) -> Self {
        EmergencyError::ProviderUnavailable {
            message: match err.status() {
                Some(status) => format!("request failed with HTTP {}", status),
                None if err.is_timeout() => "request timed out".to_string(),
                None => "request could not be completed".to_string(),
            },
        }
    }
}

impl From<redis::RedisError> for EmergencyError {
    fn from(err: redis::RedisError) -> Self {
        EmergencyError::StorageError {
            message: format!("redis: {}", err),
        }
    }
}

impl From<serde_json::Error> for EmergencyError {
    fn from(err: serde_json::Error) -> Self {
        EmergencyError::StorageError {
            message: format!("serialization: {}", err),
        }
    }
}
