//! Fixtures shared by the unit and integration tests: an in-memory
//! configuration, users with a role, HS256 tokens signed the way Supabase
//! signs them, and PostgREST profile rows.

use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use uuid::Uuid;

use shared_config::{AppConfig, BillingAnchor, StorageBackend};
use shared_models::auth::User;

const DEFAULT_JWT_SECRET: &str = "emergency-test-secret-with-enough-entropy-for-hs256";
const FORGED_SECRET: &str = "not-the-configured-secret";

/// Overridable subset of [`AppConfig`]; everything else gets a fixed test value.
pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub room_provider_base_url: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: DEFAULT_JWT_SECRET.into(),
            supabase_url: "http://127.0.0.1:54321".into(),
            supabase_anon_key: "anon-test-key".into(),
            room_provider_base_url: "http://127.0.0.1:54322/v1".into(),
        }
    }
}

impl TestConfig {
    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            port: 3000,
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            supabase_service_role_key: "test-service-role-key".into(),
            supabase_jwt_secret: self.jwt_secret.clone(),
            storage_backend: StorageBackend::Memory,
            redis_url: None,
            room_provider_base_url: self.room_provider_base_url.clone(),
            room_provider_api_key: "test-room-key".into(),
            room_ready_timeout_secs: 2,
            emergency_room_duration_minutes: 60,
            emergency_billing_threshold_minutes: 5,
            emergency_notification_ttl_minutes: 30,
            emergency_billing_anchor: BillingAnchor::SessionCreated,
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        self.to_app_config().into()
    }
}

/// A caller identity. The id is a fresh UUID per instance.
#[derive(Debug, Clone)]
pub struct TestUser {
    pub id: String,
    pub email: String,
    pub role: String,
    pub full_name: String,
}

impl Default for TestUser {
    fn default() -> Self {
        Self::patient("someone@example.com")
    }
}

impl TestUser {
    pub fn new(email: &str, role: &str) -> Self {
        let handle = email.split_once('@').map_or(email, |(local, _)| local);
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.into(),
            role: role.into(),
            full_name: format!("Test {}", handle),
        }
    }

    pub fn patient(email: &str) -> Self {
        Self::new(email, "patient")
    }

    pub fn doctor(email: &str) -> Self {
        Self::new(email, "doctor")
    }

    pub fn admin(email: &str) -> Self {
        Self::new(email, "admin")
    }

    /// The [`User`] the auth middleware would place in request extensions.
    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            metadata: Some(json!({ "full_name": &self.full_name })),
            created_at: Some(Utc::now()),
        }
    }

    fn claims(&self, lifetime: Duration) -> Value {
        let issued = Utc::now();
        json!({
            "sub": &self.id,
            "email": &self.email,
            "role": &self.role,
            "user_metadata": { "full_name": &self.full_name },
            "iat": issued.timestamp(),
            "exp": (issued + lifetime).timestamp(),
        })
    }
}

/// Mints compact HS256 tokens for requests in tests.
pub struct JwtTestUtils;

impl JwtTestUtils {
    /// Signs a token for `user` valid for `exp_hours` (24 when `None`).
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let lifetime = Duration::hours(exp_hours.unwrap_or(24));
        sign_hs256(&user.claims(lifetime), secret)
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        sign_hs256(&user.claims(Duration::minutes(-30)), secret)
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, FORGED_SECRET, None)
    }

    pub fn create_malformed_token() -> String {
        "only.two".to_string()
    }
}

fn sign_hs256(claims: &Value, secret: &str) -> String {
    let segments = [
        json!({ "alg": "HS256", "typ": "JWT" }).to_string(),
        claims.to_string(),
    ]
    .map(|segment| URL_SAFE_NO_PAD.encode(segment))
    .join(".");

    let mut mac = <Hmac<Sha256>>::new_from_slice(secret.as_bytes())
        .expect("hmac accepts keys of any length");
    mac.update(segments.as_bytes());

    format!("{}.{}", segments, URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}

/// Rows as PostgREST returns them from the `profiles` table.
pub struct MockSupabaseResponses;

impl MockSupabaseResponses {
    pub fn patient_profile_row(user_id: &str, full_name: &str, credits: u32) -> Value {
        Self::profile_row(user_id, full_name, "patient", credits, false)
    }

    pub fn doctor_profile_row(user_id: &str, full_name: &str, available: bool) -> Value {
        Self::profile_row(user_id, full_name, "doctor", 0, available)
    }

    fn profile_row(id: &str, name: &str, role: &str, credits: u32, available: bool) -> Value {
        json!({
            "id": id,
            "full_name": name,
            "role": role,
            "emergency_consultations_left": credits,
            "available_for_emergency": available,
        })
    }
}
