// libs/emergency-cell/src/services/directory.rs
use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{DoctorProfile, EmergencyError, PatientProfile};

/// Read access to the external user directory.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn patient(&self, patient_id: &str) -> Result<Option<PatientProfile>, EmergencyError>;

    async fn doctor(&self, doctor_id: &str) -> Result<Option<DoctorProfile>, EmergencyError>;
}

// ==============================================================================
// IN-MEMORY DIRECTORY
// ==============================================================================

/// Process-local directory and credit ledger.
#[derive(Default)]
pub struct InMemoryDirectory {
    pub(crate) patients: RwLock<HashMap<String, PatientProfile>>,
    pub(crate) doctors: RwLock<HashMap<String, DoctorProfile>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert_patient(&self, id: &str, full_name: &str, credits: u32) {
        self.patients.write().await.insert(
            id.to_string(),
            PatientProfile {
                id: id.to_string(),
                full_name: full_name.to_string(),
                role: "patient".to_string(),
                emergency_consultations_left: credits,
            },
        );
    }

    /// Registers a user whose role is something other than `patient`.
    pub async fn upsert_user_with_role(&self, id: &str, full_name: &str, role: &str) {
        self.patients.write().await.insert(
            id.to_string(),
            PatientProfile {
                id: id.to_string(),
                full_name: full_name.to_string(),
                role: role.to_string(),
                emergency_consultations_left: 0,
            },
        );
    }

    pub async fn upsert_doctor(&self, id: &str, full_name: &str, available: bool) {
        self.doctors.write().await.insert(
            id.to_string(),
            DoctorProfile {
                id: id.to_string(),
                full_name: full_name.to_string(),
                available_for_emergency: available,
            },
        );
    }

    pub async fn set_doctor_availability(&self, id: &str, available: bool) -> bool {
        match self.doctors.write().await.get_mut(id) {
            Some(doctor) => {
                doctor.available_for_emergency = available;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl UserDirectory for InMemoryDirectory {
    async fn patient(&self, patient_id: &str) -> Result<Option<PatientProfile>, EmergencyError> {
        Ok(self.patients.read().await.get(patient_id).cloned())
    }

    async fn doctor(&self, doctor_id: &str) -> Result<Option<DoctorProfile>, EmergencyError> {
        Ok(self.doctors.read().await.get(doctor_id).cloned())
    }
}

// ==============================================================================
// SUPABASE DIRECTORY
// ==============================================================================

/// Row of the `profiles` table as far as this cell cares.
#[derive(Debug, Deserialize)]
pub(crate) struct ProfileRow {
    pub id: String,
    pub full_name: Option<String>,
    pub role: Option<String>,
    pub emergency_consultations_left: Option<i64>,
    pub available_for_emergency: Option<bool>,
}

impl ProfileRow {
    fn display_name(&self) -> String {
        self.full_name.clone().unwrap_or_else(|| "Unknown".to_string())
    }

    pub(crate) fn credits(&self) -> u32 {
        self.emergency_consultations_left
            .map(|c| c.clamp(0, u32::MAX as i64) as u32)
            .unwrap_or(0)
    }
}

/// Directory and ledger backed by the Supabase `profiles` table.
pub struct SupabaseDirectory {
    pub(crate) supabase: SupabaseClient,
}

impl SupabaseDirectory {
    pub fn new(config: &AppConfig) -> Result<Self, EmergencyError> {
        if !config.is_supabase_storage_configured() {
            return Err(EmergencyError::NotConfigured);
        }

        Ok(Self {
            supabase: SupabaseClient::service_role(config),
        })
    }

    pub(crate) async fn fetch_profile(&self, user_id: &str) -> Result<Option<ProfileRow>, EmergencyError> {
        let path = format!(
            "/rest/v1/profiles?id=eq.{}&select=id,full_name,role,emergency_consultations_left,available_for_emergency",
            user_id
        );
        debug!("Fetching profile {}", user_id);

        let rows: Vec<ProfileRow> = self
            .supabase
            .request(Method::GET, &path, self.supabase.service_token(), None)
            .await
            .map_err(EmergencyError::storage)?;

        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl UserDirectory for SupabaseDirectory {
    async fn patient(&self, patient_id: &str) -> Result<Option<PatientProfile>, EmergencyError> {
        Ok(self.fetch_profile(patient_id).await?.map(|row| PatientProfile {
            full_name: row.display_name(),
            role: row.role.clone().unwrap_or_default(),
            emergency_consultations_left: row.credits(),
            id: row.id,
        }))
    }

    async fn doctor(&self, doctor_id: &str) -> Result<Option<DoctorProfile>, EmergencyError> {
        let row = match self.fetch_profile(doctor_id).await? {
            Some(row) if row.role.as_deref() == Some("doctor") => row,
            _ => return Ok(None),
        };

        Ok(Some(DoctorProfile {
            full_name: row.display_name(),
            available_for_emergency: row.available_for_emergency.unwrap_or(false),
            id: row.id,
        }))
    }
}
