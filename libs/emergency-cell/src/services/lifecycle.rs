// libs/emergency-cell/src/services/lifecycle.rs
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use shared_config::{AppConfig, StorageBackend};
use shared_models::auth::User;

use crate::models::{
    CheckAndBillResponse, ClaimSessionResponse, CleanupResponse, CompleteSessionRequest,
    CompleteSessionResponse, ConsultationView, EmergencyError, EmergencySession,
    EndSessionRequest, EndSessionResponse, Notification, NotificationView, NotificationsResponse,
    ParticipantRole, RoomDetails, SessionStatus, SessionStatusResponse, StartSessionRequest,
    StartSessionResponse,
};
use crate::services::billing::{project_billing, BillingPolicy, BillingProjection};
use crate::services::clock::{Clock, SystemClock};
use crate::services::directory::{InMemoryDirectory, SupabaseDirectory, UserDirectory};
use crate::services::ledger::CreditLedger;
use crate::services::registry::{
    InMemoryNotificationRegistry, NotificationRegistry, RedisNotificationRegistry,
};
use crate::services::rooms::{RoomProviderClient, RoomProvisioner};
use crate::services::store::{
    ClaimOutcome, InMemorySessionStore, SessionStore, SupabaseSessionStore,
};

const MAX_END_DURATION_MINUTES: i64 = 1440;
const MAX_IDENTIFIER_LEN: usize = 128;

#[derive(Debug, Clone, Copy)]
pub struct EmergencySettings {
    pub billing: BillingPolicy,
    pub notification_ttl: Duration,
    pub room_duration_minutes: i64,
}

impl EmergencySettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            billing: BillingPolicy::from_config(config),
            notification_ttl: Duration::minutes(config.emergency_notification_ttl_minutes),
            room_duration_minutes: config.emergency_room_duration_minutes,
        }
    }
}

impl Default for EmergencySettings {
    fn default() -> Self {
        Self {
            billing: BillingPolicy::default(),
            notification_ttl: Duration::minutes(30),
            room_duration_minutes: 60,
        }
    }
}

/// The collaborators an `EmergencyService` runs against.
#[derive(Clone)]
pub struct EmergencyBackends {
    pub sessions: Arc<dyn SessionStore>,
    pub registry: Arc<dyn NotificationRegistry>,
    pub directory: Arc<dyn UserDirectory>,
    pub ledger: Arc<dyn CreditLedger>,
    pub rooms: Arc<dyn RoomProvisioner>,
    pub clock: Arc<dyn Clock>,
}

impl EmergencyBackends {
    /// Process-local stores around the given room provider. Returns the
    /// directory handle so callers can seed profiles and credits.
    pub fn in_memory(
        rooms: Arc<dyn RoomProvisioner>,
        clock: Arc<dyn Clock>,
    ) -> (Self, Arc<InMemoryDirectory>) {
        let directory = Arc::new(InMemoryDirectory::new());
        let backends = Self {
            sessions: Arc::new(InMemorySessionStore::new()),
            registry: Arc::new(InMemoryNotificationRegistry::new()),
            directory: directory.clone(),
            ledger: directory.clone(),
            rooms,
            clock,
        };
        (backends, directory)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EmergencyHealth {
    pub status: &'static str,
    pub storage_backend: &'static str,
    pub notification_registry: &'static str,
    pub room_provider_reachable: bool,
}

/// Outcome of one pass through the time-gated billing rule.
#[derive(Debug, Clone, Copy)]
struct BillingAttempt {
    projection: BillingProjection,
    status: SessionStatus,
    charged: bool,
    already_billed: bool,
    remaining_credits: Option<u32>,
}

/// Orchestrates the emergency session lifecycle: provisioning, offering,
/// claiming, time-gated billing and completion.
pub struct EmergencyService {
    sessions: Arc<dyn SessionStore>,
    registry: Arc<dyn NotificationRegistry>,
    directory: Arc<dyn UserDirectory>,
    ledger: Arc<dyn CreditLedger>,
    rooms: Arc<dyn RoomProvisioner>,
    clock: Arc<dyn Clock>,
    settings: EmergencySettings,
    storage_label: &'static str,
    registry_label: &'static str,
}

impl EmergencyService {
    pub fn new(backends: EmergencyBackends, settings: EmergencySettings) -> Self {
        Self {
            sessions: backends.sessions,
            registry: backends.registry,
            directory: backends.directory,
            ledger: backends.ledger,
            rooms: backends.rooms,
            clock: backends.clock,
            settings,
            storage_label: "custom",
            registry_label: "custom",
        }
    }

    /// Wires the backends selected by configuration.
    pub async fn from_config(config: &AppConfig) -> Result<Self, EmergencyError> {
        let rooms: Arc<dyn RoomProvisioner> = Arc::new(RoomProviderClient::new(config)?);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let settings = EmergencySettings::from_config(config);

        let (mut backends, storage_label) = match config.storage_backend {
            StorageBackend::Memory => {
                warn!("Emergency sessions use in-memory storage; state is lost on restart");
                (EmergencyBackends::in_memory(rooms, clock).0, "memory")
            }
            StorageBackend::Supabase => {
                let directory = Arc::new(SupabaseDirectory::new(config)?);
                let backends = EmergencyBackends {
                    sessions: Arc::new(SupabaseSessionStore::new(config)?),
                    registry: Arc::new(InMemoryNotificationRegistry::new()),
                    directory: directory.clone(),
                    ledger: directory,
                    rooms,
                    clock,
                };
                (backends, "supabase")
            }
        };

        let registry_label = match config.redis_url.as_deref() {
            Some(url) => {
                backends.registry =
                    Arc::new(RedisNotificationRegistry::new(url, settings.notification_ttl).await?);
                "redis"
            }
            None => "memory",
        };

        info!(
            "Emergency service ready (storage: {}, notifications: {})",
            storage_label, registry_label
        );

        let mut service = Self::new(backends, settings);
        service.storage_label = storage_label;
        service.registry_label = registry_label;
        Ok(service)
    }

    pub fn settings(&self) -> &EmergencySettings {
        &self.settings
    }

    // ==========================================================================
    // START
    // ==========================================================================

    pub async fn start_session(
        &self,
        patient: &User,
        request: StartSessionRequest,
    ) -> Result<StartSessionResponse, EmergencyError> {
        let doctor_id = request
            .doctor_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| EmergencyError::validation("doctor_id is required"))?;
        validate_identifier(doctor_id, "doctor_id")?;

        let profile = self
            .directory
            .patient(&patient.id)
            .await?
            .ok_or_else(|| EmergencyError::not_found("Patient"))?;
        if profile.role != "patient" {
            return Err(EmergencyError::forbidden(
                "Only patients can start emergency consultations",
            ));
        }

        if self.ledger.remaining(&patient.id).await? == 0 {
            info!("Patient {} has no emergency consultations left", patient.id);
            return Err(EmergencyError::InsufficientCredits);
        }

        let doctor = self
            .directory
            .doctor(doctor_id)
            .await?
            .ok_or_else(|| EmergencyError::not_found("Doctor"))?;
        if !doctor.available_for_emergency {
            return Err(EmergencyError::DoctorUnavailable);
        }

        let now = self.clock.now();
        let room_name = generate_room_name(now);
        let room = self
            .rooms
            .create_room(&room_name, self.settings.room_duration_minutes, true)
            .await?;

        let session_id = Uuid::new_v4();
        let provisioned = async {
            let token = self
                .rooms
                .mint_token(&room.name, &patient.id, &profile.full_name, false)
                .await?;

            let session = EmergencySession {
                id: session_id,
                patient_id: patient.id.clone(),
                doctor_id: Some(doctor.id.clone()),
                status: SessionStatus::Waiting,
                is_emergency: true,
                room_name: room.name.clone(),
                room_url: room.url.clone(),
                patient_token: token,
                doctor_token: None,
                notes: String::new(),
                scheduled_duration_minutes: self.settings.room_duration_minutes,
                duration_minutes: None,
                created_at: now,
                updated_at: now,
                doctor_joined_at: None,
                ended_at: None,
                concluded_at: None,
                billed_at: None,
                billed_after_minutes: None,
                version: 0,
            };
            self.sessions.insert(&session).await?;
            Ok::<_, EmergencyError>(session)
        }
        .await;

        let session = match provisioned {
            Ok(session) => session,
            Err(e) => {
                error!("Emergency session setup failed, removing room {}: {}", room.name, e);
                self.discard_room(&room.name).await;
                return Err(e);
            }
        };

        let offer = Notification {
            doctor_id: doctor.id.clone(),
            patient_id: patient.id.clone(),
            patient_name: profile.full_name.clone(),
            room_name: session.room_name.clone(),
            room_url: session.room_url.clone(),
            session_id,
            timestamp: now,
        };
        if let Err(e) = self.registry.offer(offer).await {
            error!("Failed to notify doctor {} of session {}: {}", doctor.id, session_id, e);
            self.discard_unannounced(session_id, now).await;
            self.discard_room(&room.name).await;
            return Err(e);
        }

        info!(
            "Emergency session {} started by patient {} for doctor {}",
            session_id, patient.id, doctor.id
        );

        Ok(StartSessionResponse {
            session_id,
            room_name: session.room_name,
            room_url: session.room_url,
            token: session.patient_token,
            status: session.status,
        })
    }

    // ==========================================================================
    // NOTIFICATIONS & CLAIM
    // ==========================================================================

    pub async fn get_notifications(
        &self,
        caller: &User,
        doctor_id: &str,
    ) -> Result<NotificationsResponse, EmergencyError> {
        if caller.id != doctor_id {
            return Err(EmergencyError::forbidden(
                "Doctors can only read their own notifications",
            ));
        }

        let current = self
            .registry
            .current(doctor_id, self.clock.now(), self.settings.notification_ttl)
            .await?;

        Ok(NotificationsResponse {
            notifications: current.iter().map(NotificationView::from).collect(),
        })
    }

    pub async fn claim_session(
        &self,
        doctor: &User,
        session_id: Uuid,
    ) -> Result<ClaimSessionResponse, EmergencyError> {
        let session = self.load_emergency_session(session_id).await?;

        match session.doctor_id.as_deref() {
            Some(assigned) if assigned != doctor.id => return Err(EmergencyError::AlreadyClaimed),
            Some(_) => {}
            None => {
                if self.directory.doctor(&doctor.id).await?.is_none() {
                    return Err(EmergencyError::forbidden(
                        "Only doctors can join emergency sessions",
                    ));
                }
            }
        }

        if session.status.is_terminal() {
            return Err(EmergencyError::InvalidSessionState {
                status: session.status.to_string(),
            });
        }

        let (session, token) = match (session.status, session.doctor_token.clone()) {
            (SessionStatus::InProgress, Some(token)) => {
                debug!("Doctor {} rejoining session {}", doctor.id, session_id);
                (session, token)
            }
            _ => {
                let doctor_name = self.doctor_display_name(doctor).await?;
                let fresh = self
                    .rooms
                    .mint_token(&session.room_name, &doctor.id, &doctor_name, true)
                    .await?;

                let outcome = self
                    .sessions
                    .claim(session_id, &doctor.id, &fresh, self.clock.now())
                    .await?;
                if let ClaimOutcome::Claimed(_) = outcome {
                    info!("Doctor {} claimed emergency session {}", doctor.id, session_id);
                }

                let session = outcome.into_session();
                let token = session.doctor_token.clone().unwrap_or(fresh);
                (session, token)
            }
        };

        self.withdraw_offer(&doctor.id, session_id).await;

        let patient_name = self
            .directory
            .patient(&session.patient_id)
            .await?
            .map(|p| p.full_name)
            .unwrap_or_else(|| "Patient".to_string());

        Ok(ClaimSessionResponse {
            session_id,
            room_name: session.room_name,
            room_url: session.room_url,
            token,
            patient_name,
        })
    }

    // ==========================================================================
    // END / COMPLETE
    // ==========================================================================

    pub async fn end_session(
        &self,
        caller: &User,
        session_id: Uuid,
        request: EndSessionRequest,
    ) -> Result<EndSessionResponse, EmergencyError> {
        if let Some(duration) = request.duration {
            if !(1..=MAX_END_DURATION_MINUTES).contains(&duration) {
                return Err(EmergencyError::validation(&format!(
                    "duration must be between 1 and {} minutes",
                    MAX_END_DURATION_MINUTES
                )));
            }
        }

        let session = self.load_emergency_session(session_id).await?;
        if !session.is_participant(&caller.id) {
            return Err(EmergencyError::forbidden("Not a participant of this session"));
        }

        let finished = self
            .finish_session(&session, request.duration, request.notes.as_deref())
            .await?;

        Ok(EndSessionResponse {
            session_id,
            status: finished.status,
            duration_minutes: finished
                .duration_minutes
                .unwrap_or(finished.scheduled_duration_minutes),
            consultation_charged: finished.billed_at.is_some(),
        })
    }

    pub async fn complete_session(
        &self,
        doctor: &User,
        session_id: Uuid,
        request: CompleteSessionRequest,
    ) -> Result<CompleteSessionResponse, EmergencyError> {
        let session = self.load_emergency_session(session_id).await?;
        if session.participant_role(&doctor.id) != Some(ParticipantRole::Doctor) {
            return Err(EmergencyError::forbidden(
                "Only the assigned doctor can conclude this session",
            ));
        }

        match session.status {
            SessionStatus::Cancelled => {
                return Err(EmergencyError::InvalidSessionState {
                    status: session.status.to_string(),
                })
            }
            SessionStatus::Completed => {}
            _ => {
                self.finish_session(&session, None, None).await?;
            }
        }

        let concluded = self
            .sessions
            .conclude(session_id, request.notes.as_deref(), self.clock.now())
            .await?;
        let concluded_at = concluded.concluded_at.ok_or_else(|| EmergencyError::Internal {
            message: "conclusion was not recorded".to_string(),
        })?;

        info!("Doctor {} concluded emergency session {}", doctor.id, session_id);

        Ok(CompleteSessionResponse {
            session_id,
            status: concluded.status,
            concluded_at,
            duration_minutes: concluded.duration_minutes,
            consultation_charged: concluded.billed_at.is_some(),
        })
    }

    /// Bills if due, then moves the session to `completed`.
    async fn finish_session(
        &self,
        session: &EmergencySession,
        duration: Option<i64>,
        notes: Option<&str>,
    ) -> Result<EmergencySession, EmergencyError> {
        let now = self.clock.now();

        if session.status == SessionStatus::InProgress {
            self.bill_if_due(session, now).await?;
        }

        let outcome = self.sessions.finish(session.id, duration, notes, now).await?;
        if outcome.previous_status != SessionStatus::Completed {
            info!(
                "Emergency session {} completed (was {}, charged: {})",
                session.id,
                outcome.previous_status,
                outcome.session.billed_at.is_some()
            );
        }

        if let Some(doctor_id) = outcome.session.doctor_id.as_deref() {
            self.withdraw_offer(doctor_id, session.id).await;
        }

        Ok(outcome.session)
    }

    // ==========================================================================
    // BILLING & STATUS
    // ==========================================================================

    pub async fn check_and_bill(
        &self,
        caller: &User,
        session_id: Uuid,
    ) -> Result<CheckAndBillResponse, EmergencyError> {
        let session = self.load_participant_session(caller, session_id).await?;
        let attempt = self.bill_if_due(&session, self.clock.now()).await?;
        let projection = attempt.projection;

        let message = if attempt.charged {
            format!("Consultation charged after {} minutes", projection.elapsed_minutes)
        } else if attempt.already_billed {
            "Consultation already charged".to_string()
        } else if !projection.billable_state {
            format!("Session is {}; nothing to charge", attempt.status)
        } else if attempt.remaining_credits == Some(0) {
            "No emergency consultations left; session continues unbilled".to_string()
        } else {
            format!("{} minutes remaining before charge", projection.minutes_remaining)
        };

        Ok(CheckAndBillResponse {
            session_id,
            charged: attempt.charged,
            already_billed: attempt.already_billed,
            elapsed_minutes: projection.elapsed_minutes,
            minutes_remaining: projection.minutes_remaining,
            remaining_credits: attempt.remaining_credits,
            message,
        })
    }

    pub async fn get_status(
        &self,
        caller: &User,
        session_id: Uuid,
    ) -> Result<SessionStatusResponse, EmergencyError> {
        let session = self.load_participant_session(caller, session_id).await?;
        let projection = project_billing(&session, self.clock.now(), &self.settings.billing);

        Ok(SessionStatusResponse {
            session_id,
            status: session.status,
            elapsed_seconds: projection.elapsed_seconds,
            elapsed_minutes: projection.elapsed_minutes,
            threshold_minutes: projection.threshold_minutes,
            minutes_remaining: projection.minutes_remaining,
            seconds_remaining: projection.seconds_remaining,
            should_charge: projection.should_charge,
            already_billed: projection.already_billed,
        })
    }

    async fn bill_if_due(
        &self,
        session: &EmergencySession,
        now: DateTime<Utc>,
    ) -> Result<BillingAttempt, EmergencyError> {
        let projection = project_billing(session, now, &self.settings.billing);
        let mut attempt = BillingAttempt {
            projection,
            status: session.status,
            charged: false,
            already_billed: projection.already_billed,
            remaining_credits: None,
        };

        if projection.already_billed {
            attempt.remaining_credits = Some(self.ledger.remaining(&session.patient_id).await?);
            return Ok(attempt);
        }
        if !projection.should_charge {
            return Ok(attempt);
        }

        let available = self.ledger.remaining(&session.patient_id).await?;
        if available == 0 {
            warn!(
                "Session {} passed the billing threshold but patient {} has no credits left",
                session.id, session.patient_id
            );
            attempt.remaining_credits = Some(0);
            return Ok(attempt);
        }

        if !self
            .sessions
            .mark_billed(session.id, now, projection.elapsed_minutes)
            .await?
        {
            // Lost the mark: either another check billed it or the session
            // left `in_progress` in the meantime.
            let current = self
                .sessions
                .get(session.id)
                .await?
                .ok_or_else(|| EmergencyError::not_found("Session"))?;
            attempt.status = current.status;
            attempt.already_billed = current.billed_at.is_some();
            attempt.projection.billable_state = current.status == SessionStatus::InProgress;
            if attempt.already_billed {
                debug!("Session {} was billed by a concurrent check", session.id);
            } else {
                debug!("Session {} became {} before it could be billed", session.id, current.status);
            }
            attempt.remaining_credits = Some(self.ledger.remaining(&session.patient_id).await?);
            return Ok(attempt);
        }

        match self.ledger.consume_one(&session.patient_id).await {
            Ok(Some(left)) => {
                info!(
                    "Charged patient {} for session {} after {} minutes ({} left)",
                    session.patient_id, session.id, projection.elapsed_minutes, left
                );
                attempt.charged = true;
                attempt.remaining_credits = Some(left);
                Ok(attempt)
            }
            Ok(None) => {
                warn!(
                    "Credits for patient {} ran out before session {} could be charged",
                    session.patient_id, session.id
                );
                self.sessions
                    .release_billing(session.id, "no emergency consultations left", now)
                    .await?;
                attempt.remaining_credits = Some(0);
                Ok(attempt)
            }
            Err(e) => {
                error!("Failed to charge session {}: {}", session.id, e);
                if let Err(release_err) = self
                    .sessions
                    .release_billing(session.id, "credit ledger unavailable", now)
                    .await
                {
                    error!("Failed to release billing mark on {}: {}", session.id, release_err);
                }
                Err(e)
            }
        }
    }

    // ==========================================================================
    // READS
    // ==========================================================================

    pub async fn get_consultation(
        &self,
        caller: &User,
        session_id: Uuid,
    ) -> Result<ConsultationView, EmergencyError> {
        let session = self.load_emergency_session(session_id).await?;
        let role = session
            .participant_role(&caller.id)
            .ok_or_else(|| EmergencyError::forbidden("Not a participant of this session"))?;

        let (token, counterpart_name, notes) = match role {
            ParticipantRole::Patient => {
                let doctor_name = match session.doctor_id.as_deref() {
                    Some(id) => self.directory.doctor(id).await?.map(|d| d.full_name),
                    None => None,
                };
                (Some(session.patient_token.clone()), doctor_name, None)
            }
            ParticipantRole::Doctor => {
                let patient_name = self
                    .directory
                    .patient(&session.patient_id)
                    .await?
                    .map(|p| p.full_name);
                (session.doctor_token.clone(), patient_name, Some(session.notes.clone()))
            }
        };

        Ok(ConsultationView {
            session_id,
            role,
            status: session.status,
            is_emergency: session.is_emergency,
            room_name: session.room_name,
            room_url: session.room_url,
            token,
            counterpart_name,
            created_at: session.created_at,
            doctor_joined_at: session.doctor_joined_at,
            ended_at: session.ended_at,
            concluded_at: session.concluded_at,
            duration_minutes: session.duration_minutes,
            consultation_charged: session.billed_at.is_some(),
            notes,
        })
    }

    pub async fn verify_room(
        &self,
        caller: &User,
        room_name: &str,
    ) -> Result<RoomDetails, EmergencyError> {
        validate_identifier(room_name, "room_name")?;

        let session = self
            .sessions
            .find_by_room(room_name)
            .await?
            .ok_or_else(|| EmergencyError::not_found("Room"))?;
        if !session.is_participant(&caller.id) {
            return Err(EmergencyError::forbidden("Not a participant of this room"));
        }

        self.rooms.get_room_details(room_name).await
    }

    // ==========================================================================
    // ADMINISTRATION
    // ==========================================================================

    /// Cancels `waiting` sessions nobody claimed within the notification ttl.
    pub async fn cleanup_stale_sessions(
        &self,
        admin: &User,
    ) -> Result<CleanupResponse, EmergencyError> {
        if !admin.has_role("admin") {
            return Err(EmergencyError::forbidden("Admin access required"));
        }

        let now = self.clock.now();
        let ttl = self.settings.notification_ttl;
        let stale = self.sessions.list_stale_waiting(now - ttl).await?;
        let reason = format!("no doctor joined within {} minutes", ttl.num_minutes());

        let mut cancelled_sessions = 0;
        for session in stale {
            let cancelled = self
                .sessions
                .cancel(session.id, SessionStatus::Waiting, &reason, now)
                .await?;
            let Some(cancelled) = cancelled else {
                continue;
            };

            cancelled_sessions += 1;
            if let Some(doctor_id) = cancelled.doctor_id.as_deref() {
                self.withdraw_offer(doctor_id, cancelled.id).await;
            }
            self.discard_room(&cancelled.room_name).await;
        }

        info!("Cancelled {} stale emergency sessions", cancelled_sessions);
        Ok(CleanupResponse { cancelled_sessions })
    }

    pub async fn health(&self) -> EmergencyHealth {
        let room_provider_reachable = match self.rooms.health_check().await {
            Ok(healthy) => healthy,
            Err(e) => {
                warn!("Room provider health check failed: {}", e);
                false
            }
        };

        EmergencyHealth {
            status: if room_provider_reachable { "healthy" } else { "degraded" },
            storage_backend: self.storage_label,
            notification_registry: self.registry_label,
            room_provider_reachable,
        }
    }

    // ==========================================================================
    // HELPERS
    // ==========================================================================

    async fn load_emergency_session(&self, session_id: Uuid) -> Result<EmergencySession, EmergencyError> {
        self.sessions
            .get(session_id)
            .await?
            .filter(|s| s.is_emergency)
            .ok_or_else(|| EmergencyError::not_found("Emergency session"))
    }

    async fn load_participant_session(
        &self,
        caller: &User,
        session_id: Uuid,
    ) -> Result<EmergencySession, EmergencyError> {
        let session = self.load_emergency_session(session_id).await?;
        if !session.is_participant(&caller.id) {
            return Err(EmergencyError::forbidden("Not a participant of this session"));
        }
        Ok(session)
    }

    async fn doctor_display_name(&self, doctor: &User) -> Result<String, EmergencyError> {
        Ok(match self.directory.doctor(&doctor.id).await? {
            Some(profile) => profile.full_name,
            None => doctor.display_name().unwrap_or_else(|| "Doctor".to_string()),
        })
    }

    async fn withdraw_offer(&self, doctor_id: &str, session_id: Uuid) {
        match self.registry.withdraw(doctor_id, session_id).await {
            Ok(true) => debug!("Withdrew offer of session {} from doctor {}", session_id, doctor_id),
            Ok(false) => {}
            Err(e) => warn!("Failed to withdraw offer of session {}: {}", session_id, e),
        }
    }

    /// Removes a session whose doctor was never notified. If the delete
    /// fails the record is cancelled instead so it cannot be claimed.
    async fn discard_unannounced(&self, session_id: Uuid, now: DateTime<Utc>) {
        match self.sessions.remove_waiting(session_id).await {
            Ok(_) => debug!("Removed unannounced session {}", session_id),
            Err(e) => {
                warn!("Failed to remove unannounced session {}: {}", session_id, e);
                if let Err(cancel_err) = self
                    .sessions
                    .cancel(session_id, SessionStatus::Waiting, "doctor could not be notified", now)
                    .await
                {
                    warn!("Failed to cancel unannounced session {}: {}", session_id, cancel_err);
                }
            }
        }
    }

    async fn discard_room(&self, room_name: &str) {
        if let Err(e) = self.rooms.delete_room(room_name).await {
            warn!("Failed to delete room {}: {}", room_name, e);
        }
    }
}

fn generate_room_name(now: DateTime<Utc>) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("emergency-{}-{}", &id[..8], now.timestamp())
}

/// Identifiers end up inside PostgREST filters and provider URLs.
fn validate_identifier(value: &str, field: &str) -> Result<(), EmergencyError> {
    let well_formed = !value.is_empty()
        && value.len() <= MAX_IDENTIFIER_LEN
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if well_formed {
        Ok(())
    } else {
        Err(EmergencyError::validation(&format!("{} is malformed", field)))
    }
}
