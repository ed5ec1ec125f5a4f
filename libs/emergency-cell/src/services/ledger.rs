// libs/emergency-cell/src/services/ledger.rs
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, warn};

use shared_database::supabase::SupabaseClient;

use crate::models::EmergencyError;
use crate::services::directory::{InMemoryDirectory, SupabaseDirectory};

const MAX_CREDIT_CAS_ATTEMPTS: usize = 3;

/// Emergency consultation credits held on the patient record.
#[async_trait]
pub trait CreditLedger: Send + Sync {
    async fn remaining(&self, patient_id: &str) -> Result<u32, EmergencyError>;

    /// Takes one credit. `Ok(None)` when the balance is already zero; the
    /// balance never goes negative.
    async fn consume_one(&self, patient_id: &str) -> Result<Option<u32>, EmergencyError>;
}

#[async_trait]
impl CreditLedger for InMemoryDirectory {
    async fn remaining(&self, patient_id: &str) -> Result<u32, EmergencyError> {
        self.patients
            .read()
            .await
            .get(patient_id)
            .map(|p| p.emergency_consultations_left)
            .ok_or_else(|| EmergencyError::not_found("Patient"))
    }

    async fn consume_one(&self, patient_id: &str) -> Result<Option<u32>, EmergencyError> {
        let mut patients = self.patients.write().await;
        let patient = patients
            .get_mut(patient_id)
            .ok_or_else(|| EmergencyError::not_found("Patient"))?;

        if patient.emergency_consultations_left == 0 {
            return Ok(None);
        }

        patient.emergency_consultations_left -= 1;
        Ok(Some(patient.emergency_consultations_left))
    }
}

#[async_trait]
impl CreditLedger for SupabaseDirectory {
    async fn remaining(&self, patient_id: &str) -> Result<u32, EmergencyError> {
        self.fetch_profile(patient_id)
            .await?
            .map(|row| row.credits())
            .ok_or_else(|| EmergencyError::not_found("Patient"))
    }

    async fn consume_one(&self, patient_id: &str) -> Result<Option<u32>, EmergencyError> {
        // PostgREST has no atomic decrement, so swap against the observed balance.
        for attempt in 1..=MAX_CREDIT_CAS_ATTEMPTS {
            let current = self.remaining(patient_id).await?;
            if current == 0 {
                return Ok(None);
            }

            let path = format!(
                "/rest/v1/profiles?id=eq.{}&emergency_consultations_left=eq.{}",
                patient_id, current
            );
            let rows: Vec<Value> = self
                .supabase
                .request_with_headers(
                    Method::PATCH,
                    &path,
                    self.supabase.service_token(),
                    Some(json!({ "emergency_consultations_left": current - 1 })),
                    Some(SupabaseClient::representation_headers()),
                )
                .await
                .map_err(EmergencyError::storage)?;

            if !rows.is_empty() {
                debug!("Consumed emergency credit for {}: {} -> {}", patient_id, current, current - 1);
                return Ok(Some(current - 1));
            }

            warn!(
                "Credit balance for {} changed concurrently (attempt {}/{})",
                patient_id, attempt, MAX_CREDIT_CAS_ATTEMPTS
            );
        }

        Err(EmergencyError::storage(
            "credit balance kept changing while consuming a credit",
        ))
    }
}
