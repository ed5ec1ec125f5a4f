// libs/emergency-cell/src/services/billing.rs
//! Time-gated billing rule, shared by the read-only status projection and the
//! mutating check-and-bill path so the two can never disagree.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use shared_config::{AppConfig, BillingAnchor};

use crate::models::{EmergencySession, SessionStatus};

#[derive(Debug, Clone, Copy)]
pub struct BillingPolicy {
    pub threshold: Duration,
    pub anchor: BillingAnchor,
}

impl BillingPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            threshold: Duration::minutes(config.emergency_billing_threshold_minutes),
            anchor: config.emergency_billing_anchor,
        }
    }
}

impl Default for BillingPolicy {
    fn default() -> Self {
        Self {
            threshold: Duration::minutes(5),
            anchor: BillingAnchor::SessionCreated,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingProjection {
    pub elapsed_seconds: i64,
    pub elapsed_minutes: i64,
    pub threshold_minutes: i64,
    pub minutes_remaining: i64,
    pub seconds_remaining: i64,
    /// Session is `in_progress`, so the clock counts toward a charge.
    pub billable_state: bool,
    pub already_billed: bool,
    pub should_charge: bool,
}

/// Where the attendance clock starts for `session` under `anchor`.
///
/// `DoctorJoined` falls back to creation time for sessions that never
/// recorded a join.
pub fn billing_anchor_time(session: &EmergencySession, anchor: BillingAnchor) -> DateTime<Utc> {
    match anchor {
        BillingAnchor::SessionCreated => session.created_at,
        BillingAnchor::DoctorJoined => session.doctor_joined_at.unwrap_or(session.created_at),
    }
}

pub fn project_billing(
    session: &EmergencySession,
    now: DateTime<Utc>,
    policy: &BillingPolicy,
) -> BillingProjection {
    let origin = billing_anchor_time(session, policy.anchor);
    let elapsed_seconds = (now - origin).num_seconds().max(0);
    let threshold_seconds = policy.threshold.num_seconds();
    let threshold_minutes = policy.threshold.num_minutes();
    let elapsed_minutes = elapsed_seconds / 60;

    let billable_state = session.status == SessionStatus::InProgress;
    let already_billed = session.billed_at.is_some();
    let threshold_met = elapsed_seconds >= threshold_seconds;

    BillingProjection {
        elapsed_seconds,
        elapsed_minutes,
        threshold_minutes,
        minutes_remaining: (threshold_minutes - elapsed_minutes).max(0),
        seconds_remaining: (threshold_seconds - elapsed_seconds).max(0),
        billable_state,
        already_billed,
        should_charge: billable_state && threshold_met && !already_billed,
    }
}
