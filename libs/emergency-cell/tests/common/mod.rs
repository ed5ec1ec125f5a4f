#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use emergency_cell::models::{EmergencyError, ProvisionedRoom, RoomDetails};
use emergency_cell::services::{
    EmergencyBackends, EmergencyService, EmergencySettings, InMemoryDirectory, ManualClock,
    RoomProvisioner,
};
use shared_models::auth::User;
use shared_utils::test_utils::TestUser;

/// Room provider double that records what the service asked for.
#[derive(Default)]
pub struct FakeRooms {
    pub created: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<String>>,
    pub minted: AtomicUsize,
    pub fail_create: AtomicBool,
    pub fail_mint: AtomicBool,
}

impl FakeRooms {
    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn was_deleted(&self, room_name: &str) -> bool {
        self.deleted.lock().unwrap().iter().any(|r| r == room_name)
    }
}

#[async_trait]
impl RoomProvisioner for FakeRooms {
    async fn create_room(
        &self,
        name: &str,
        _duration_minutes: i64,
        _wait_for_ready: bool,
    ) -> Result<ProvisionedRoom, EmergencyError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(EmergencyError::ProviderTimeout { timeout_secs: 15 });
        }
        self.created.lock().unwrap().push(name.to_string());
        Ok(ProvisionedRoom {
            name: name.to_string(),
            url: format!("https://rooms.test/{}", name),
        })
    }

    async fn mint_token(
        &self,
        room_name: &str,
        participant_id: &str,
        _participant_name: &str,
        is_owner: bool,
    ) -> Result<String, EmergencyError> {
        if self.fail_mint.load(Ordering::SeqCst) {
            return Err(EmergencyError::ProviderUnavailable {
                message: "token minting failed with HTTP 503".to_string(),
            });
        }
        let n = self.minted.fetch_add(1, Ordering::SeqCst);
        let scope = if is_owner { "owner" } else { "guest" };
        Ok(format!("{}-{}-{}-{}", scope, room_name, participant_id, n))
    }

    async fn get_room_details(&self, room_name: &str) -> Result<RoomDetails, EmergencyError> {
        let exists = self.created.lock().unwrap().iter().any(|r| r == room_name)
            && !self.was_deleted(room_name);
        Ok(RoomDetails {
            exists,
            url: exists.then(|| format!("https://rooms.test/{}", room_name)),
            created_at: None,
        })
    }

    async fn delete_room(&self, room_name: &str) -> Result<(), EmergencyError> {
        self.deleted.lock().unwrap().push(room_name.to_string());
        Ok(())
    }

    async fn health_check(&self) -> Result<bool, EmergencyError> {
        Ok(true)
    }
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
}

pub struct Harness {
    pub service: Arc<EmergencyService>,
    pub directory: Arc<InMemoryDirectory>,
    pub rooms: Arc<FakeRooms>,
    pub clock: Arc<ManualClock>,
    pub patient: User,
    pub doctor: User,
    pub patient_login: TestUser,
    pub doctor_login: TestUser,
}

impl Harness {
    pub async fn new(credits: u32) -> Self {
        Self::with_settings(credits, EmergencySettings::default()).await
    }

    pub async fn with_settings(credits: u32, settings: EmergencySettings) -> Self {
        Self::with_backends(credits, settings, |_| {}).await
    }

    /// Same seeding as `new`, with a hook to swap individual backends.
    pub async fn with_backends(
        credits: u32,
        settings: EmergencySettings,
        customize: impl FnOnce(&mut EmergencyBackends),
    ) -> Self {
        let rooms = Arc::new(FakeRooms::default());
        let clock = Arc::new(ManualClock::new(t0()));
        let (mut backends, directory) = EmergencyBackends::in_memory(rooms.clone(), clock.clone());
        customize(&mut backends);

        let patient_login = TestUser::patient("pat@example.com");
        let doctor_login = TestUser::doctor("house@example.com");
        let patient = patient_login.to_user();
        let doctor = doctor_login.to_user();
        directory.upsert_patient(&patient.id, "Pat Patient", credits).await;
        directory.upsert_doctor(&doctor.id, "Dr House", true).await;

        Self {
            service: Arc::new(EmergencyService::new(backends, settings)),
            directory,
            rooms,
            clock,
            patient,
            doctor,
            patient_login,
            doctor_login,
        }
    }

    pub async fn add_doctor(&self, email: &str, available: bool) -> User {
        let doctor = TestUser::doctor(email).to_user();
        self.directory.upsert_doctor(&doctor.id, email, available).await;
        doctor
    }

    pub fn start_request(&self) -> emergency_cell::models::StartSessionRequest {
        emergency_cell::models::StartSessionRequest {
            doctor_id: Some(self.doctor.id.clone()),
        }
    }
}
