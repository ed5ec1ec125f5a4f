// libs/emergency-cell/src/services/store.rs
//! Durable record of emergency sessions.
//!
//! Every state change is decided by one of the `apply_*` functions below and
//! committed as a single conditional write, so the in-memory and Supabase
//! stores enforce the same transitions and the same exclusivity rules.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Method;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{EmergencyError, EmergencySession, SessionStatus};

const MAX_CONDITIONAL_WRITE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// This call moved the session from `waiting` to `in_progress`.
    Claimed(EmergencySession),
    /// The same doctor already holds the session; nothing changed.
    AlreadyHeld(EmergencySession),
}

impl ClaimOutcome {
    pub fn session(&self) -> &EmergencySession {
        match self {
            ClaimOutcome::Claimed(s) | ClaimOutcome::AlreadyHeld(s) => s,
        }
    }

    pub fn into_session(self) -> EmergencySession {
        match self {
            ClaimOutcome::Claimed(s) | ClaimOutcome::AlreadyHeld(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FinishOutcome {
    pub session: EmergencySession,
    pub previous_status: SessionStatus,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: &EmergencySession) -> Result<(), EmergencyError>;

    async fn get(&self, id: Uuid) -> Result<Option<EmergencySession>, EmergencyError>;

    async fn find_by_room(&self, room_name: &str) -> Result<Option<EmergencySession>, EmergencyError>;

    /// Atomic check-and-set of `doctor_id` and `waiting -> in_progress`.
    async fn claim(
        &self,
        id: Uuid,
        doctor_id: &str,
        doctor_token: &str,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, EmergencyError>;

    /// Moves an active session to `completed`. A completed session is
    /// returned unchanged.
    async fn finish(
        &self,
        id: Uuid,
        duration_minutes: Option<i64>,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<FinishOutcome, EmergencyError>;

    /// Cancels the session only if it is still in `expected`.
    async fn cancel(
        &self,
        id: Uuid,
        expected: SessionStatus,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<EmergencySession>, EmergencyError>;

    /// Deletes a session that is still `waiting`, used when a start fails
    /// after the record was written. Returns whether a row was removed.
    async fn remove_waiting(&self, id: Uuid) -> Result<bool, EmergencyError>;

    /// Sets `billed_at` if unset while `in_progress`. Only the caller that
    /// gets `true` may take the patient's credit.
    async fn mark_billed(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        elapsed_minutes: i64,
    ) -> Result<bool, EmergencyError>;

    /// Clears a `billed_at` mark whose credit could not be taken.
    async fn release_billing(
        &self,
        id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), EmergencyError>;

    /// Records the doctor's clinical conclusion on a completed session.
    async fn conclude(
        &self,
        id: Uuid,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<EmergencySession, EmergencyError>;

    async fn list_stale_waiting(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<EmergencySession>, EmergencyError>;
}

// ==============================================================================
// TRANSITION RULES
// ==============================================================================

pub(crate) enum Change<T> {
    Write(T),
    Unchanged(T),
}

fn touch(session: &mut EmergencySession, now: DateTime<Utc>) {
    session.updated_at = now;
    session.version += 1;
}

fn invalid_state(session: &EmergencySession) -> EmergencyError {
    EmergencyError::InvalidSessionState {
        status: session.status.to_string(),
    }
}

pub(crate) fn apply_claim(
    session: &mut EmergencySession,
    doctor_id: &str,
    doctor_token: &str,
    now: DateTime<Utc>,
) -> Result<Change<()>, EmergencyError> {
    if !session.is_emergency {
        return Err(EmergencyError::not_found("Emergency session"));
    }

    if let Some(assigned) = session.doctor_id.as_deref() {
        if assigned != doctor_id {
            return Err(EmergencyError::AlreadyClaimed);
        }
    }

    match session.status {
        SessionStatus::Waiting => {
            session.doctor_id = Some(doctor_id.to_string());
            session.doctor_token = Some(doctor_token.to_string());
            session.status = SessionStatus::InProgress;
            session.doctor_joined_at = Some(now);
            session.append_note(&format!("Doctor joined at {}", now.to_rfc3339()));
            touch(session, now);
            Ok(Change::Write(()))
        }
        SessionStatus::InProgress => Ok(Change::Unchanged(())),
        _ => Err(invalid_state(session)),
    }
}

pub(crate) fn apply_finish(
    session: &mut EmergencySession,
    duration_minutes: Option<i64>,
    note: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Change<SessionStatus>, EmergencyError> {
    let previous = session.status;
    match previous {
        SessionStatus::Completed => Ok(Change::Unchanged(previous)),
        status if status.can_transition_to(&SessionStatus::Completed) => {
            session.status = SessionStatus::Completed;
            session.duration_minutes =
                Some(duration_minutes.unwrap_or(session.scheduled_duration_minutes));
            session.ended_at = Some(now);
            if let Some(note) = note {
                session.append_note(note);
            }
            touch(session, now);
            Ok(Change::Write(previous))
        }
        _ => Err(invalid_state(session)),
    }
}

pub(crate) fn apply_cancel(
    session: &mut EmergencySession,
    expected: SessionStatus,
    reason: &str,
    now: DateTime<Utc>,
) -> Change<bool> {
    if session.status != expected || !session.status.can_transition_to(&SessionStatus::Cancelled) {
        return Change::Unchanged(false);
    }

    session.status = SessionStatus::Cancelled;
    session.ended_at = Some(now);
    session.append_note(&format!("Cancelled at {}: {}", now.to_rfc3339(), reason));
    touch(session, now);
    Change::Write(true)
}

pub(crate) fn apply_billing(
    session: &mut EmergencySession,
    at: DateTime<Utc>,
    elapsed_minutes: i64,
) -> Change<bool> {
    if session.billed_at.is_some() || session.status != SessionStatus::InProgress {
        return Change::Unchanged(false);
    }

    session.billed_at = Some(at);
    session.billed_after_minutes = Some(elapsed_minutes);
    session.append_note(&format!("Billed after {} minutes", elapsed_minutes));
    touch(session, at);
    Change::Write(true)
}

pub(crate) fn apply_release(
    session: &mut EmergencySession,
    reason: &str,
    now: DateTime<Utc>,
) -> Change<()> {
    if session.billed_at.is_none() {
        return Change::Unchanged(());
    }

    session.billed_at = None;
    session.billed_after_minutes = None;
    session.append_note(&format!("Billing released: {}", reason));
    touch(session, now);
    Change::Write(())
}

pub(crate) fn apply_conclude(
    session: &mut EmergencySession,
    note: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Change<()>, EmergencyError> {
    if session.status != SessionStatus::Completed {
        return Err(invalid_state(session));
    }
    if session.concluded_at.is_some() {
        return Ok(Change::Unchanged(()));
    }

    session.concluded_at = Some(now);
    session.append_note(&format!("Clinically concluded at {}", now.to_rfc3339()));
    if let Some(note) = note {
        session.append_note(note);
    }
    touch(session, now);
    Ok(Change::Write(()))
}

// ==============================================================================
// IN-MEMORY STORE
// ==============================================================================

/// Process-local store. Each operation holds the write lock for its whole
/// check-and-set, which is what makes claims and billing exclusive.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<Uuid, EmergencySession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn modify<T>(
        &self,
        id: Uuid,
        rule: impl FnOnce(&mut EmergencySession) -> Result<Change<T>, EmergencyError> + Send,
    ) -> Result<(T, EmergencySession), EmergencyError> {
        let mut sessions = self.sessions.write().await;
        let stored = sessions
            .get_mut(&id)
            .ok_or_else(|| EmergencyError::not_found("Emergency session"))?;

        let mut draft = stored.clone();
        match rule(&mut draft)? {
            Change::Write(value) => {
                *stored = draft.clone();
                Ok((value, draft))
            }
            Change::Unchanged(value) => Ok((value, stored.clone())),
        }
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert(&self, session: &EmergencySession) -> Result<(), EmergencyError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            return Err(EmergencyError::storage(format!("session {} already exists", session.id)));
        }
        sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<EmergencySession>, EmergencyError> {
        Ok(self.sessions.read().await.get(&id).cloned())
    }

    async fn find_by_room(&self, room_name: &str) -> Result<Option<EmergencySession>, EmergencyError> {
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .find(|s| s.room_name == room_name)
            .cloned())
    }

    async fn claim(
        &self,
        id: Uuid,
        doctor_id: &str,
        doctor_token: &str,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, EmergencyError> {
        let mut transitioned = false;
        let (_, session) = self
            .modify(id, |s| {
                let change = apply_claim(s, doctor_id, doctor_token, now)?;
                transitioned = matches!(change, Change::Write(_));
                Ok(change)
            })
            .await?;

        Ok(if transitioned {
            ClaimOutcome::Claimed(session)
        } else {
            ClaimOutcome::AlreadyHeld(session)
        })
    }

    async fn finish(
        &self,
        id: Uuid,
        duration_minutes: Option<i64>,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<FinishOutcome, EmergencyError> {
        let (previous_status, session) = self
            .modify(id, |s| apply_finish(s, duration_minutes, note, now))
            .await?;
        Ok(FinishOutcome {
            session,
            previous_status,
        })
    }

    async fn cancel(
        &self,
        id: Uuid,
        expected: SessionStatus,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<EmergencySession>, EmergencyError> {
        let (cancelled, session) = self
            .modify(id, |s| Ok(apply_cancel(s, expected, reason, now)))
            .await?;
        Ok(cancelled.then_some(session))
    }

    async fn remove_waiting(&self, id: Uuid) -> Result<bool, EmergencyError> {
        let mut sessions = self.sessions.write().await;
        match sessions.get(&id) {
            Some(session) if session.status == SessionStatus::Waiting => {
                sessions.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_billed(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        elapsed_minutes: i64,
    ) -> Result<bool, EmergencyError> {
        let (won, _) = self
            .modify(id, |s| Ok(apply_billing(s, at, elapsed_minutes)))
            .await?;
        Ok(won)
    }

    async fn release_billing(
        &self,
        id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), EmergencyError> {
        self.modify(id, |s| Ok(apply_release(s, reason, now))).await?;
        Ok(())
    }

    async fn conclude(
        &self,
        id: Uuid,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<EmergencySession, EmergencyError> {
        let (_, session) = self.modify(id, |s| apply_conclude(s, note, now)).await?;
        Ok(session)
    }

    async fn list_stale_waiting(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<EmergencySession>, EmergencyError> {
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.status == SessionStatus::Waiting && s.created_at < created_before)
            .cloned()
            .collect())
    }
}

// ==============================================================================
// SUPABASE STORE
// ==============================================================================

/// Sessions in the `emergency_sessions` table. Writes are PATCHes filtered on
/// the `version` that was read, so a lost race matches zero rows and is retried
/// against the fresh row.
pub struct SupabaseSessionStore {
    supabase: SupabaseClient,
}

impl SupabaseSessionStore {
    pub fn new(config: &AppConfig) -> Result<Self, EmergencyError> {
        if !config.is_supabase_storage_configured() {
            return Err(EmergencyError::NotConfigured);
        }

        Ok(Self {
            supabase: SupabaseClient::service_role(config),
        })
    }

    async fn select(&self, filter: &str) -> Result<Vec<EmergencySession>, EmergencyError> {
        let path = format!("/rest/v1/emergency_sessions?{}", filter);
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, self.supabase.service_token(), None)
            .await
            .map_err(EmergencyError::storage)?;

        rows.into_iter()
            .map(|row| serde_json::from_value(row).map_err(EmergencyError::from))
            .collect()
    }

    async fn write_if_version(
        &self,
        session: &EmergencySession,
        observed_version: u64,
    ) -> Result<bool, EmergencyError> {
        let path = format!(
            "/rest/v1/emergency_sessions?id=eq.{}&version=eq.{}",
            session.id, observed_version
        );
        let rows: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                self.supabase.service_token(),
                Some(serde_json::to_value(session)?),
                Some(SupabaseClient::representation_headers()),
            )
            .await
            .map_err(EmergencyError::storage)?;

        Ok(!rows.is_empty())
    }

    async fn modify<T, F>(&self, id: Uuid, rule: F) -> Result<(T, EmergencySession), EmergencyError>
    where
        T: Send,
        F: Fn(&mut EmergencySession) -> Result<Change<T>, EmergencyError> + Send + Sync,
    {
        for attempt in 1..=MAX_CONDITIONAL_WRITE_ATTEMPTS {
            let current = self
                .get(id)
                .await?
                .ok_or_else(|| EmergencyError::not_found("Emergency session"))?;

            let mut draft = current.clone();
            match rule(&mut draft)? {
                Change::Unchanged(value) => return Ok((value, current)),
                Change::Write(value) => {
                    if self.write_if_version(&draft, current.version).await? {
                        return Ok((value, draft));
                    }
                    debug!(
                        "Session {} changed underneath write (attempt {}/{})",
                        id, attempt, MAX_CONDITIONAL_WRITE_ATTEMPTS
                    );
                }
            }
        }

        warn!("Giving up on session {} after repeated write conflicts", id);
        Err(EmergencyError::storage(format!(
            "session {} is being modified concurrently",
            id
        )))
    }
}

#[async_trait]
impl SessionStore for SupabaseSessionStore {
    async fn insert(&self, session: &EmergencySession) -> Result<(), EmergencyError> {
        let _: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/emergency_sessions",
                self.supabase.service_token(),
                Some(serde_json::to_value(session)?),
                Some(SupabaseClient::representation_headers()),
            )
            .await
            .map_err(|e| EmergencyError::storage(format!("Failed to store emergency session: {}", e)))?;

        info!("Stored emergency session {}", session.id);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<EmergencySession>, EmergencyError> {
        Ok(self.select(&format!("id=eq.{}", id)).await?.into_iter().next())
    }

    async fn find_by_room(&self, room_name: &str) -> Result<Option<EmergencySession>, EmergencyError> {
        Ok(self
            .select(&format!("room_name=eq.{}", room_name))
            .await?
            .into_iter()
            .next())
    }

    async fn claim(
        &self,
        id: Uuid,
        doctor_id: &str,
        doctor_token: &str,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, EmergencyError> {
        let (transitioned, session) = self
            .modify(id, |s| {
                Ok(match apply_claim(s, doctor_id, doctor_token, now)? {
                    Change::Write(()) => Change::Write(true),
                    Change::Unchanged(()) => Change::Unchanged(false),
                })
            })
            .await?;

        Ok(if transitioned {
            ClaimOutcome::Claimed(session)
        } else {
            ClaimOutcome::AlreadyHeld(session)
        })
    }

    async fn finish(
        &self,
        id: Uuid,
        duration_minutes: Option<i64>,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<FinishOutcome, EmergencyError> {
        let (previous_status, session) = self
            .modify(id, |s| apply_finish(s, duration_minutes, note, now))
            .await?;
        Ok(FinishOutcome {
            session,
            previous_status,
        })
    }

    async fn cancel(
        &self,
        id: Uuid,
        expected: SessionStatus,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<EmergencySession>, EmergencyError> {
        let (cancelled, session) = self
            .modify(id, |s| Ok(apply_cancel(s, expected, reason, now)))
            .await?;
        Ok(cancelled.then_some(session))
    }

    async fn remove_waiting(&self, id: Uuid) -> Result<bool, EmergencyError> {
        let path = format!("/rest/v1/emergency_sessions?id=eq.{}&status=eq.waiting", id);
        let rows: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::DELETE,
                &path,
                self.supabase.service_token(),
                None,
                Some(SupabaseClient::representation_headers()),
            )
            .await
            .map_err(EmergencyError::storage)?;

        Ok(!rows.is_empty())
    }

    async fn mark_billed(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        elapsed_minutes: i64,
    ) -> Result<bool, EmergencyError> {
        let (won, _) = self
            .modify(id, |s| Ok(apply_billing(s, at, elapsed_minutes)))
            .await?;
        Ok(won)
    }

    async fn release_billing(
        &self,
        id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), EmergencyError> {
        self.modify(id, |s| Ok(apply_release(s, reason, now))).await?;
        Ok(())
    }

    async fn conclude(
        &self,
        id: Uuid,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<EmergencySession, EmergencyError> {
        let (_, session) = self.modify(id, |s| apply_conclude(s, note, now)).await?;
        Ok(session)
    }

    async fn list_stale_waiting(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<EmergencySession>, EmergencyError> {
        self.select(&format!(
            "status=eq.waiting&created_at=lt.{}",
            created_before.to_rfc3339_opts(SecondsFormat::Secs, true)
        ))
        .await
    }
}
