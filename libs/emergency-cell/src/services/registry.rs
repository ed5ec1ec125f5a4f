// libs/emergency-cell/src/services/registry.rs
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::AsyncCommands;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{EmergencyError, Notification};

/// One pending emergency offer per doctor.
#[async_trait]
pub trait NotificationRegistry: Send + Sync {
    /// Replaces whatever offer the doctor currently has.
    async fn offer(&self, notification: Notification) -> Result<(), EmergencyError>;

    /// The doctor's active offer, evicting it if older than `ttl`.
    async fn current(
        &self,
        doctor_id: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Option<Notification>, EmergencyError>;

    /// Removes the doctor's offer only if it is for `session_id`.
    async fn withdraw(&self, doctor_id: &str, session_id: Uuid) -> Result<bool, EmergencyError>;
}

#[derive(Default)]
pub struct InMemoryNotificationRegistry {
    offers: RwLock<HashMap<String, Notification>>,
}

impl InMemoryNotificationRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationRegistry for InMemoryNotificationRegistry {
    async fn offer(&self, notification: Notification) -> Result<(), EmergencyError> {
        debug!(
            "Offering session {} to doctor {}",
            notification.session_id, notification.doctor_id
        );
        self.offers
            .write()
            .await
            .insert(notification.doctor_id.clone(), notification);
        Ok(())
    }

    async fn current(
        &self,
        doctor_id: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Option<Notification>, EmergencyError> {
        let mut offers = self.offers.write().await;
        let expired = offers.get(doctor_id).map(|n| n.is_expired(now, ttl));
        if expired == Some(true) {
            debug!("Evicting expired offer for doctor {}", doctor_id);
            offers.remove(doctor_id);
            return Ok(None);
        }
        Ok(offers.get(doctor_id).cloned())
    }

    async fn withdraw(&self, doctor_id: &str, session_id: Uuid) -> Result<bool, EmergencyError> {
        let mut offers = self.offers.write().await;
        if offers.get(doctor_id).map(|n| n.session_id) == Some(session_id) {
            offers.remove(doctor_id);
            return Ok(true);
        }
        Ok(false)
    }
}

// ==============================================================================
// REDIS REGISTRY
// ==============================================================================

const KEY_PREFIX: &str = "emergency_notification";

// Deletes the key only while it still holds an offer for ARGV[1].
const WITHDRAW_SCRIPT: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then return 0 end
local offer = cjson.decode(raw)
if offer['session_id'] == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Registry shared by every API instance. Keys expire on their own; reads
/// still enforce the ttl so the behavior matches the in-memory registry.
pub struct RedisNotificationRegistry {
    pool: Pool,
    key_ttl_secs: u64,
}

impl RedisNotificationRegistry {
    pub async fn new(redis_url: &str, ttl: Duration) -> Result<Self, EmergencyError> {
        let pool = Config::from_url(redis_url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| EmergencyError::storage(format!("Failed to create Redis pool: {}", e)))?;

        let registry = Self {
            pool,
            key_ttl_secs: ttl.num_seconds().max(1) as u64,
        };

        let mut conn = registry.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!("Redis notification registry initialized");

        Ok(registry)
    }

    async fn connection(&self) -> Result<Connection, EmergencyError> {
        self.pool
            .get()
            .await
            .map_err(|e| EmergencyError::storage(format!("Redis connection error: {}", e)))
    }

    fn key(doctor_id: &str) -> String {
        format!("{}:{}", KEY_PREFIX, doctor_id)
    }
}

#[async_trait]
impl NotificationRegistry for RedisNotificationRegistry {
    async fn offer(&self, notification: Notification) -> Result<(), EmergencyError> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(&notification)?;
        let _: () = conn
            .set_ex(Self::key(&notification.doctor_id), payload, self.key_ttl_secs)
            .await?;
        Ok(())
    }

    async fn current(
        &self,
        doctor_id: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Option<Notification>, EmergencyError> {
        let mut conn = self.connection().await?;
        let key = Self::key(doctor_id);

        let raw: Option<String> = conn.get(&key).await?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        let notification: Notification = serde_json::from_str(&raw)?;
        if notification.is_expired(now, ttl) {
            // Session-matched so a newer offer written meanwhile survives.
            let _: i64 = redis::Script::new(WITHDRAW_SCRIPT)
                .key(&key)
                .arg(notification.session_id.to_string())
                .invoke_async(&mut conn)
                .await?;
            return Ok(None);
        }

        Ok(Some(notification))
    }

    async fn withdraw(&self, doctor_id: &str, session_id: Uuid) -> Result<bool, EmergencyError> {
        let mut conn = self.connection().await?;
        let removed: i64 = redis::Script::new(WITHDRAW_SCRIPT)
            .key(Self::key(doctor_id))
            .arg(session_id.to_string())
            .invoke_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }
}
