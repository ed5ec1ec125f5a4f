use std::sync::atomic::Ordering;
use std::sync::Arc;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use emergency_cell::models::{
    CompleteSessionRequest, EmergencyError, EmergencySession, EndSessionRequest, Notification,
    ParticipantRole, SessionStatus, StartSessionRequest,
};
use emergency_cell::services::{
    ClaimOutcome, CreditLedger, EmergencySettings, FinishOutcome, InMemorySessionStore,
    NotificationRegistry, SessionStore,
};
use shared_config::BillingAnchor;
use shared_utils::test_utils::TestUser;

mod common;
use common::{t0, Harness};

// ==============================================================================
// START
// ==============================================================================

#[tokio::test]
async fn start_creates_waiting_session_and_offers_it() {
    let h = Harness::new(2).await;

    let started = h
        .service
        .start_session(&h.patient, h.start_request())
        .await
        .unwrap();

    assert_eq!(started.status, SessionStatus::Waiting);
    assert!(started.room_name.starts_with("emergency-"));
    assert!(started.token.starts_with("guest-"));
    assert_eq!(h.rooms.created_count(), 1);
    assert_eq!(h.directory.remaining(&h.patient.id).await.unwrap(), 2);

    let offers = h
        .service
        .get_notifications(&h.doctor, &h.doctor.id)
        .await
        .unwrap()
        .notifications;
    assert_eq!(offers.len(), 1);
    assert_eq!(offers[0].session_id, started.session_id);
    assert_eq!(offers[0].patient_name, "Pat Patient");
    assert_eq!(offers[0].room_url, started.room_url);
}

#[tokio::test]
async fn start_without_credits_creates_nothing() {
    let h = Harness::new(0).await;

    let result = h.service.start_session(&h.patient, h.start_request()).await;

    assert_matches!(result, Err(EmergencyError::InsufficientCredits));
    assert_eq!(h.rooms.created_count(), 0);
    let offers = h.service.get_notifications(&h.doctor, &h.doctor.id).await.unwrap();
    assert!(offers.notifications.is_empty());
}

#[tokio::test]
async fn start_rejects_bad_requests_before_provisioning() {
    let h = Harness::new(1).await;

    let missing = h
        .service
        .start_session(&h.patient, StartSessionRequest { doctor_id: None })
        .await;
    assert_matches!(missing, Err(EmergencyError::ValidationError { .. }));

    let blank = h
        .service
        .start_session(&h.patient, StartSessionRequest { doctor_id: Some("  ".to_string()) })
        .await;
    assert_matches!(blank, Err(EmergencyError::ValidationError { .. }));

    let unknown = h
        .service
        .start_session(&h.patient, StartSessionRequest { doctor_id: Some("ghost".to_string()) })
        .await;
    assert_matches!(unknown, Err(EmergencyError::NotFound { .. }));

    let busy = h.add_doctor("busy@example.com", false).await;
    let unavailable = h
        .service
        .start_session(&h.patient, StartSessionRequest { doctor_id: Some(busy.id.clone()) })
        .await;
    assert_matches!(unavailable, Err(EmergencyError::DoctorUnavailable));

    let admin = TestUser::admin("root@example.com").to_user();
    h.directory.upsert_user_with_role(&admin.id, "Root", "admin").await;
    let not_patient = h.service.start_session(&admin, h.start_request()).await;
    assert_matches!(not_patient, Err(EmergencyError::Forbidden { .. }));

    assert_eq!(h.rooms.created_count(), 0);
}

#[tokio::test]
async fn provider_timeout_leaves_no_session() {
    let h = Harness::new(1).await;
    h.rooms.fail_create.store(true, Ordering::SeqCst);

    let result = h.service.start_session(&h.patient, h.start_request()).await;

    assert_matches!(result, Err(EmergencyError::ProviderTimeout { .. }));
    let offers = h.service.get_notifications(&h.doctor, &h.doctor.id).await.unwrap();
    assert!(offers.notifications.is_empty());
}

#[tokio::test]
async fn failed_token_mint_rolls_back_the_room() {
    let h = Harness::new(1).await;
    h.rooms.fail_mint.store(true, Ordering::SeqCst);

    let result = h.service.start_session(&h.patient, h.start_request()).await;

    assert_matches!(result, Err(EmergencyError::ProviderUnavailable { .. }));
    let created = h.rooms.created.lock().unwrap().clone();
    assert_eq!(created.len(), 1);
    assert!(h.rooms.was_deleted(&created[0]));
    let offers = h.service.get_notifications(&h.doctor, &h.doctor.id).await.unwrap();
    assert!(offers.notifications.is_empty());
}

/// Registry whose writes always fail, as when Redis is unreachable.
struct UnreachableRegistry;

#[async_trait]
impl NotificationRegistry for UnreachableRegistry {
    async fn offer(&self, _notification: Notification) -> Result<(), EmergencyError> {
        Err(EmergencyError::storage("Redis connection error: refused"))
    }

    async fn current(
        &self,
        _doctor_id: &str,
        _now: DateTime<Utc>,
        _ttl: Duration,
    ) -> Result<Option<Notification>, EmergencyError> {
        Ok(None)
    }

    async fn withdraw(&self, _doctor_id: &str, _session_id: Uuid) -> Result<bool, EmergencyError> {
        Ok(false)
    }
}

#[tokio::test]
async fn failed_offer_removes_session_and_room() {
    let sessions = Arc::new(InMemorySessionStore::new());
    let store = sessions.clone();
    let h = Harness::with_backends(1, EmergencySettings::default(), move |backends| {
        backends.sessions = store;
        backends.registry = Arc::new(UnreachableRegistry);
    })
    .await;

    let result = h.service.start_session(&h.patient, h.start_request()).await;

    assert_matches!(result, Err(EmergencyError::StorageError { .. }));
    let created = h.rooms.created.lock().unwrap().clone();
    assert_eq!(created.len(), 1);
    assert!(h.rooms.was_deleted(&created[0]));
    assert!(sessions.find_by_room(&created[0]).await.unwrap().is_none());
    assert_eq!(h.directory.remaining(&h.patient.id).await.unwrap(), 1);
}

// ==============================================================================
// NOTIFICATIONS & CLAIM
// ==============================================================================

#[tokio::test]
async fn doctors_only_read_their_own_notifications() {
    let h = Harness::new(1).await;
    h.service.start_session(&h.patient, h.start_request()).await.unwrap();

    let other = h.add_doctor("other@example.com", true).await;
    let result = h.service.get_notifications(&other, &h.doctor.id).await;
    assert_matches!(result, Err(EmergencyError::Forbidden { .. }));
}

#[tokio::test]
async fn stale_notification_is_evicted() {
    let h = Harness::new(1).await;
    h.service.start_session(&h.patient, h.start_request()).await.unwrap();

    h.clock.advance(Duration::minutes(29));
    let fresh = h.service.get_notifications(&h.doctor, &h.doctor.id).await.unwrap();
    assert_eq!(fresh.notifications.len(), 1);

    h.clock.advance(Duration::minutes(2));
    let expired = h.service.get_notifications(&h.doctor, &h.doctor.id).await.unwrap();
    assert!(expired.notifications.is_empty());

    // Gone for good, not merely hidden.
    h.clock.set(t0());
    let after = h.service.get_notifications(&h.doctor, &h.doctor.id).await.unwrap();
    assert!(after.notifications.is_empty());
}

#[tokio::test]
async fn claim_moves_session_in_progress_and_clears_offer() {
    let h = Harness::new(1).await;
    let started = h.service.start_session(&h.patient, h.start_request()).await.unwrap();

    h.clock.advance(Duration::seconds(10));
    let claimed = h.service.claim_session(&h.doctor, started.session_id).await.unwrap();

    assert_eq!(claimed.room_name, started.room_name);
    assert_eq!(claimed.room_url, started.room_url);
    assert_eq!(claimed.patient_name, "Pat Patient");
    assert!(claimed.token.starts_with("owner-"));
    assert_ne!(claimed.token, started.token);

    let status = h.service.get_status(&h.patient, started.session_id).await.unwrap();
    assert_eq!(status.status, SessionStatus::InProgress);

    let offers = h.service.get_notifications(&h.doctor, &h.doctor.id).await.unwrap();
    assert!(offers.notifications.is_empty());
}

#[tokio::test]
async fn second_doctor_cannot_claim() {
    let h = Harness::new(1).await;
    let started = h.service.start_session(&h.patient, h.start_request()).await.unwrap();
    h.service.claim_session(&h.doctor, started.session_id).await.unwrap();

    let intruder = h.add_doctor("intruder@example.com", true).await;
    let result = h.service.claim_session(&intruder, started.session_id).await;
    assert_matches!(result, Err(EmergencyError::AlreadyClaimed));
}

#[tokio::test]
async fn reclaim_by_same_doctor_is_idempotent() {
    let h = Harness::new(1).await;
    let started = h.service.start_session(&h.patient, h.start_request()).await.unwrap();

    let first = h.service.claim_session(&h.doctor, started.session_id).await.unwrap();
    h.clock.advance(Duration::seconds(30));
    let second = h.service.claim_session(&h.doctor, started.session_id).await.unwrap();

    assert_eq!(first, second);

    let view = h.service.get_consultation(&h.doctor, started.session_id).await.unwrap();
    let notes = view.notes.unwrap();
    assert_eq!(notes.matches("Doctor joined at").count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_double_claim_yields_one_join() {
    let h = Harness::new(1).await;
    let started = h.service.start_session(&h.patient, h.start_request()).await.unwrap();

    let (a, b) = tokio::join!(
        h.service.claim_session(&h.doctor, started.session_id),
        h.service.claim_session(&h.doctor, started.session_id),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.token, b.token);
    assert_eq!(a.room_name, b.room_name);

    let view = h.service.get_consultation(&h.doctor, started.session_id).await.unwrap();
    assert_eq!(view.notes.unwrap().matches("Doctor joined at").count(), 1);
    assert_eq!(view.token.as_deref(), Some(a.token.as_str()));
}

#[tokio::test]
async fn claim_of_unknown_session_is_not_found() {
    let h = Harness::new(1).await;
    let result = h.service.claim_session(&h.doctor, uuid::Uuid::new_v4()).await;
    assert_matches!(result, Err(EmergencyError::NotFound { .. }));
}

#[tokio::test]
async fn ended_session_cannot_be_claimed() {
    let h = Harness::new(1).await;
    let started = h.service.start_session(&h.patient, h.start_request()).await.unwrap();
    h.service
        .end_session(&h.patient, started.session_id, EndSessionRequest::default())
        .await
        .unwrap();

    let result = h.service.claim_session(&h.doctor, started.session_id).await;
    assert_matches!(result, Err(EmergencyError::InvalidSessionState { .. }));
}

// ==============================================================================
// BILLING
// ==============================================================================

#[tokio::test]
async fn billing_follows_the_threshold_timeline() {
    let h = Harness::new(1).await;
    let started = h.service.start_session(&h.patient, h.start_request()).await.unwrap();
    let id = started.session_id;

    h.clock.set(t0() + Duration::seconds(10));
    h.service.claim_session(&h.doctor, id).await.unwrap();

    h.clock.set(t0() + Duration::minutes(4));
    let early = h.service.check_and_bill(&h.patient, id).await.unwrap();
    assert!(!early.charged);
    assert_eq!(early.minutes_remaining, 1);
    assert_eq!(h.directory.remaining(&h.patient.id).await.unwrap(), 1);

    h.clock.set(t0() + Duration::minutes(5) + Duration::seconds(1));
    let due = h.service.check_and_bill(&h.patient, id).await.unwrap();
    assert!(due.charged);
    assert_eq!(due.remaining_credits, Some(0));
    assert_eq!(h.directory.remaining(&h.patient.id).await.unwrap(), 0);

    h.clock.set(t0() + Duration::minutes(6));
    let again = h.service.check_and_bill(&h.doctor, id).await.unwrap();
    assert!(!again.charged);
    assert!(again.already_billed);
    assert_eq!(h.directory.remaining(&h.patient.id).await.unwrap(), 0);

    let view = h.service.get_consultation(&h.doctor, id).await.unwrap();
    assert!(view.consultation_charged);
    assert_eq!(view.notes.unwrap().matches("Billed after 5 minutes").count(), 1);
}

#[tokio::test]
async fn status_and_check_agree_at_the_same_instant() {
    let h = Harness::new(2).await;
    let started = h.service.start_session(&h.patient, h.start_request()).await.unwrap();
    let id = started.session_id;
    h.service.claim_session(&h.doctor, id).await.unwrap();

    for offset in [Duration::minutes(2), Duration::minutes(4) + Duration::seconds(59)] {
        h.clock.set(t0() + offset);
        let status = h.service.get_status(&h.patient, id).await.unwrap();
        let check = h.service.check_and_bill(&h.patient, id).await.unwrap();
        assert!(!status.should_charge);
        assert_eq!(status.should_charge, check.charged);
        assert_eq!(status.minutes_remaining, check.minutes_remaining);
        assert_eq!(status.elapsed_minutes, check.elapsed_minutes);
    }

    h.clock.set(t0() + Duration::minutes(5));
    let status = h.service.get_status(&h.patient, id).await.unwrap();
    assert!(status.should_charge);
    assert_eq!(status.seconds_remaining, 0);
    let check = h.service.check_and_bill(&h.patient, id).await.unwrap();
    assert!(check.charged);

    let status = h.service.get_status(&h.patient, id).await.unwrap();
    assert!(!status.should_charge);
    assert!(status.already_billed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_checks_charge_exactly_once() {
    let h = Harness::new(3).await;
    let started = h.service.start_session(&h.patient, h.start_request()).await.unwrap();
    let id = started.session_id;
    h.service.claim_session(&h.doctor, id).await.unwrap();
    h.clock.advance(Duration::minutes(6));

    let handles: Vec<_> = (0..10)
        .map(|i| {
            let service = Arc::clone(&h.service);
            let caller = if i % 2 == 0 { h.patient.clone() } else { h.doctor.clone() };
            tokio::spawn(async move { service.check_and_bill(&caller, id).await.unwrap() })
        })
        .collect();

    let mut charged = 0;
    for handle in handles {
        if handle.await.unwrap().charged {
            charged += 1;
        }
    }

    assert_eq!(charged, 1);
    assert_eq!(h.directory.remaining(&h.patient.id).await.unwrap(), 2);
}

#[tokio::test]
async fn waiting_session_is_never_billed() {
    let h = Harness::new(1).await;
    let started = h.service.start_session(&h.patient, h.start_request()).await.unwrap();

    h.clock.advance(Duration::minutes(10));
    let check = h.service.check_and_bill(&h.patient, started.session_id).await.unwrap();
    assert!(!check.charged);
    assert_eq!(h.directory.remaining(&h.patient.id).await.unwrap(), 1);
}

/// Ends the session right before the billing mark is attempted, the way a
/// concurrent `end` from the other participant would.
struct EndsBeforeBillingMark {
    inner: InMemorySessionStore,
}

#[async_trait]
impl SessionStore for EndsBeforeBillingMark {
    async fn insert(&self, session: &EmergencySession) -> Result<(), EmergencyError> {
        self.inner.insert(session).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<EmergencySession>, EmergencyError> {
        self.inner.get(id).await
    }

    async fn find_by_room(&self, room_name: &str) -> Result<Option<EmergencySession>, EmergencyError> {
        self.inner.find_by_room(room_name).await
    }

    async fn claim(
        &self,
        id: Uuid,
        doctor_id: &str,
        doctor_token: &str,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, EmergencyError> {
        self.inner.claim(id, doctor_id, doctor_token, now).await
    }

    async fn finish(
        &self,
        id: Uuid,
        duration_minutes: Option<i64>,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<FinishOutcome, EmergencyError> {
        self.inner.finish(id, duration_minutes, note, now).await
    }

    async fn cancel(
        &self,
        id: Uuid,
        expected: SessionStatus,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<EmergencySession>, EmergencyError> {
        self.inner.cancel(id, expected, reason, now).await
    }

    async fn remove_waiting(&self, id: Uuid) -> Result<bool, EmergencyError> {
        self.inner.remove_waiting(id).await
    }

    async fn mark_billed(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        elapsed_minutes: i64,
    ) -> Result<bool, EmergencyError> {
        self.inner.finish(id, None, Some("Ended by patient"), at).await?;
        self.inner.mark_billed(id, at, elapsed_minutes).await
    }

    async fn release_billing(
        &self,
        id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), EmergencyError> {
        self.inner.release_billing(id, reason, now).await
    }

    async fn conclude(
        &self,
        id: Uuid,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<EmergencySession, EmergencyError> {
        self.inner.conclude(id, note, now).await
    }

    async fn list_stale_waiting(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<EmergencySession>, EmergencyError> {
        self.inner.list_stale_waiting(created_before).await
    }
}

#[tokio::test]
async fn session_ended_during_check_is_not_reported_as_charged() {
    let h = Harness::with_backends(1, EmergencySettings::default(), |backends| {
        backends.sessions = Arc::new(EndsBeforeBillingMark {
            inner: InMemorySessionStore::new(),
        });
    })
    .await;
    let started = h.service.start_session(&h.patient, h.start_request()).await.unwrap();
    let id = started.session_id;
    h.service.claim_session(&h.doctor, id).await.unwrap();
    h.clock.advance(Duration::minutes(6));

    let check = h.service.check_and_bill(&h.patient, id).await.unwrap();

    assert!(!check.charged);
    assert!(!check.already_billed);
    assert!(check.message.contains("completed"), "message: {}", check.message);
    assert_eq!(check.remaining_credits, Some(1));
    assert_eq!(h.directory.remaining(&h.patient.id).await.unwrap(), 1);

    let view = h.service.get_consultation(&h.patient, id).await.unwrap();
    assert_eq!(view.status, SessionStatus::Completed);
}

#[tokio::test]
async fn empty_ledger_is_a_soft_no_op() {
    let h = Harness::new(1).await;
    let started = h.service.start_session(&h.patient, h.start_request()).await.unwrap();
    let id = started.session_id;
    h.service.claim_session(&h.doctor, id).await.unwrap();

    // Another session spent the last credit meanwhile.
    h.directory.upsert_patient(&h.patient.id, "Pat Patient", 0).await;
    h.clock.advance(Duration::minutes(6));

    let check = h.service.check_and_bill(&h.patient, id).await.unwrap();
    assert!(!check.charged);
    assert!(!check.already_billed);
    assert_eq!(check.remaining_credits, Some(0));

    let status = h.service.get_status(&h.patient, id).await.unwrap();
    assert_eq!(status.status, SessionStatus::InProgress);
    assert!(!status.already_billed);
}

#[tokio::test]
async fn billing_can_start_from_doctor_join() {
    let settings = EmergencySettings {
        billing: emergency_cell::services::BillingPolicy {
            threshold: Duration::minutes(5),
            anchor: BillingAnchor::DoctorJoined,
        },
        ..EmergencySettings::default()
    };
    let h = Harness::with_settings(1, settings).await;
    let started = h.service.start_session(&h.patient, h.start_request()).await.unwrap();
    let id = started.session_id;

    h.clock.set(t0() + Duration::minutes(3));
    h.service.claim_session(&h.doctor, id).await.unwrap();

    h.clock.set(t0() + Duration::minutes(6));
    let check = h.service.check_and_bill(&h.patient, id).await.unwrap();
    assert!(!check.charged);
    assert_eq!(check.elapsed_minutes, 3);
    assert_eq!(check.minutes_remaining, 2);

    h.clock.set(t0() + Duration::minutes(8));
    assert!(h.service.check_and_bill(&h.patient, id).await.unwrap().charged);
}

// ==============================================================================
// END / COMPLETE
// ==============================================================================

#[tokio::test]
async fn unattended_session_ends_unbilled() {
    let h = Harness::new(1).await;
    let started = h.service.start_session(&h.patient, h.start_request()).await.unwrap();

    h.clock.advance(Duration::minutes(12));
    let ended = h
        .service
        .end_session(&h.patient, started.session_id, EndSessionRequest::default())
        .await
        .unwrap();

    assert_eq!(ended.status, SessionStatus::Completed);
    assert!(!ended.consultation_charged);
    assert_eq!(ended.duration_minutes, 60);
    assert_eq!(h.directory.remaining(&h.patient.id).await.unwrap(), 1);

    let offers = h.service.get_notifications(&h.doctor, &h.doctor.id).await.unwrap();
    assert!(offers.notifications.is_empty());
}

#[tokio::test]
async fn ending_an_active_session_bills_first() {
    let h = Harness::new(2).await;
    let started = h.service.start_session(&h.patient, h.start_request()).await.unwrap();
    let id = started.session_id;
    h.service.claim_session(&h.doctor, id).await.unwrap();

    h.clock.advance(Duration::minutes(7));
    let ended = h
        .service
        .end_session(
            &h.doctor,
            id,
            EndSessionRequest {
                notes: Some("Advised rest".to_string()),
                duration: Some(7),
            },
        )
        .await
        .unwrap();

    assert!(ended.consultation_charged);
    assert_eq!(ended.duration_minutes, 7);
    assert_eq!(h.directory.remaining(&h.patient.id).await.unwrap(), 1);

    // Ending again changes nothing.
    let again = h
        .service
        .end_session(&h.patient, id, EndSessionRequest::default())
        .await
        .unwrap();
    assert_eq!(again, ended);
    assert_eq!(h.directory.remaining(&h.patient.id).await.unwrap(), 1);
}

#[tokio::test]
async fn end_validates_duration_and_participant() {
    let h = Harness::new(1).await;
    let started = h.service.start_session(&h.patient, h.start_request()).await.unwrap();

    for duration in [0, -5, 1441] {
        let result = h
            .service
            .end_session(
                &h.patient,
                started.session_id,
                EndSessionRequest {
                    notes: None,
                    duration: Some(duration),
                },
            )
            .await;
        assert_matches!(result, Err(EmergencyError::ValidationError { .. }));
    }

    let stranger = TestUser::patient("stranger@example.com").to_user();
    let result = h
        .service
        .end_session(&stranger, started.session_id, EndSessionRequest::default())
        .await;
    assert_matches!(result, Err(EmergencyError::Forbidden { .. }));
}

#[tokio::test]
async fn doctor_concludes_an_active_session() {
    let h = Harness::new(1).await;
    let started = h.service.start_session(&h.patient, h.start_request()).await.unwrap();
    let id = started.session_id;
    h.service.claim_session(&h.doctor, id).await.unwrap();

    let by_patient = h
        .service
        .complete_session(&h.patient, id, CompleteSessionRequest::default())
        .await;
    assert_matches!(by_patient, Err(EmergencyError::Forbidden { .. }));

    h.clock.advance(Duration::minutes(9));
    let completed = h
        .service
        .complete_session(
            &h.doctor,
            id,
            CompleteSessionRequest {
                notes: Some("Referred to cardiology".to_string()),
            },
        )
        .await
        .unwrap();

    assert_eq!(completed.status, SessionStatus::Completed);
    assert_eq!(completed.concluded_at, t0() + Duration::minutes(9));
    assert!(completed.consultation_charged);

    let doctor_view = h.service.get_consultation(&h.doctor, id).await.unwrap();
    assert_eq!(doctor_view.role, ParticipantRole::Doctor);
    assert!(doctor_view.notes.unwrap().contains("Referred to cardiology"));

    let patient_view = h.service.get_consultation(&h.patient, id).await.unwrap();
    assert_eq!(patient_view.role, ParticipantRole::Patient);
    assert!(patient_view.notes.is_none());
    assert_eq!(patient_view.token.as_deref(), Some(started.token.as_str()));
    assert_eq!(patient_view.counterpart_name.as_deref(), Some("Dr House"));
}

// ==============================================================================
// ROOMS & ADMINISTRATION
// ==============================================================================

#[tokio::test]
async fn verify_room_is_limited_to_participants() {
    let h = Harness::new(1).await;
    let started = h.service.start_session(&h.patient, h.start_request()).await.unwrap();

    let details = h.service.verify_room(&h.patient, &started.room_name).await.unwrap();
    assert!(details.exists);

    let stranger = TestUser::patient("stranger@example.com").to_user();
    let result = h.service.verify_room(&stranger, &started.room_name).await;
    assert_matches!(result, Err(EmergencyError::Forbidden { .. }));

    let result = h.service.verify_room(&h.patient, "emergency-unknown").await;
    assert_matches!(result, Err(EmergencyError::NotFound { .. }));

    let result = h.service.verify_room(&h.patient, "../rooms").await;
    assert_matches!(result, Err(EmergencyError::ValidationError { .. }));
}

#[tokio::test]
async fn cleanup_cancels_only_stale_waiting_sessions() {
    let h = Harness::new(3).await;
    let stale = h.service.start_session(&h.patient, h.start_request()).await.unwrap();

    let other = h.add_doctor("night@example.com", true).await;
    let active = h
        .service
        .start_session(&h.patient, StartSessionRequest { doctor_id: Some(other.id.clone()) })
        .await
        .unwrap();
    h.service.claim_session(&other, active.session_id).await.unwrap();

    h.clock.advance(Duration::minutes(45));

    let result = h.service.cleanup_stale_sessions(&h.doctor).await;
    assert_matches!(result, Err(EmergencyError::Forbidden { .. }));

    let admin = TestUser::admin("ops@example.com").to_user();
    let cleaned = h.service.cleanup_stale_sessions(&admin).await.unwrap();
    assert_eq!(cleaned.cancelled_sessions, 1);
    assert!(h.rooms.was_deleted(&stale.room_name));
    assert!(!h.rooms.was_deleted(&active.room_name));

    let view = h.service.get_consultation(&h.patient, stale.session_id).await.unwrap();
    assert_eq!(view.status, SessionStatus::Cancelled);
    let view = h.service.get_consultation(&h.patient, active.session_id).await.unwrap();
    assert_eq!(view.status, SessionStatus::InProgress);

    let again = h.service.cleanup_stale_sessions(&admin).await.unwrap();
    assert_eq!(again.cancelled_sessions, 0);
}

#[tokio::test]
async fn health_reports_backends() {
    let h = Harness::new(1).await;
    let health = h.service.health().await;
    assert_eq!(health.status, "healthy");
    assert!(health.room_provider_reachable);
}
