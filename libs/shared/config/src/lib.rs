use std::env;
use std::str::FromStr;
use tracing::warn;

/// Where sessions, patient credits and profile lookups live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Supabase,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" | "in_memory" => Ok(StorageBackend::Memory),
            "supabase" => Ok(StorageBackend::Supabase),
            other => Err(format!("unknown storage backend: {}", other)),
        }
    }
}

/// Point in the session timeline the billing clock starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillingAnchor {
    SessionCreated,
    DoctorJoined,
}

impl FromStr for BillingAnchor {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "session_created" | "created" => Ok(BillingAnchor::SessionCreated),
            "doctor_joined" | "joined" => Ok(BillingAnchor::DoctorJoined),
            other => Err(format!("unknown billing anchor: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    pub supabase_service_role_key: String,
    pub storage_backend: StorageBackend,
    pub redis_url: Option<String>,
    pub room_provider_base_url: String,
    pub room_provider_api_key: String,
    pub room_ready_timeout_secs: u64,
    pub emergency_room_duration_minutes: i64,
    pub emergency_billing_threshold_minutes: i64,
    pub emergency_notification_ttl_minutes: i64,
    pub emergency_billing_anchor: BillingAnchor,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            supabase_service_role_key: env::var("SUPABASE_SERVICE_ROLE_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_SERVICE_ROLE_KEY not set, using empty value");
                    String::new()
                }),
            storage_backend: parse_or("EMERGENCY_STORAGE_BACKEND", StorageBackend::Memory),
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.is_empty()),
            room_provider_base_url: env::var("ROOM_PROVIDER_BASE_URL")
                .unwrap_or_else(|_| {
                    warn!("ROOM_PROVIDER_BASE_URL not set, using default");
                    "https://api.daily.co/v1".to_string()
                }),
            room_provider_api_key: env::var("ROOM_PROVIDER_API_KEY")
                .unwrap_or_else(|_| {
                    warn!("ROOM_PROVIDER_API_KEY not set, using empty value");
                    String::new()
                }),
            room_ready_timeout_secs: parse_or("ROOM_READY_TIMEOUT_SECS", 15),
            emergency_room_duration_minutes: parse_or("EMERGENCY_ROOM_DURATION_MINUTES", 60),
            emergency_billing_threshold_minutes: parse_or("EMERGENCY_BILLING_THRESHOLD_MINUTES", 5),
            emergency_notification_ttl_minutes: parse_or("EMERGENCY_NOTIFICATION_TTL_MINUTES", 30),
            emergency_billing_anchor: parse_or("EMERGENCY_BILLING_ANCHOR", BillingAnchor::SessionCreated),
            port: parse_or("PORT", 3000),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        if config.storage_backend == StorageBackend::Supabase && !config.is_supabase_storage_configured() {
            warn!("Supabase storage selected but SUPABASE_URL or SUPABASE_SERVICE_ROLE_KEY is missing");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }

    pub fn is_supabase_storage_configured(&self) -> bool {
        !self.supabase_url.is_empty() && !self.supabase_service_role_key.is_empty()
    }

    pub fn is_room_provider_configured(&self) -> bool {
        !self.room_provider_base_url.is_empty() && !self.room_provider_api_key.is_empty()
    }
}

fn parse_or<T>(key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Debug,
{
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using default {:?}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}
