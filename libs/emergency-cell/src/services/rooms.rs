// libs/emergency-cell/src/services/rooms.rs
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::{debug, error, info, warn};

use shared_config::AppConfig;

use crate::models::{
    EmergencyError, ProviderRoomProperties, ProviderRoomRequest, ProviderRoomResponse,
    ProviderTokenProperties, ProviderTokenRequest, ProviderTokenResponse, ProvisionedRoom,
    RoomDetails,
};

/// Contract with the external video room provider.
#[async_trait]
pub trait RoomProvisioner: Send + Sync {
    /// Creates a room that expires after `duration_minutes`. With
    /// `wait_for_ready` the call returns only once the provider reports the
    /// room as joinable, or fails with `ProviderTimeout`.
    async fn create_room(
        &self,
        name: &str,
        duration_minutes: i64,
        wait_for_ready: bool,
    ) -> Result<ProvisionedRoom, EmergencyError>;

    /// Join credential for exactly one room and one participant. Owners
    /// control the room; everyone else joins as a guest.
    async fn mint_token(
        &self,
        room_name: &str,
        participant_id: &str,
        participant_name: &str,
        is_owner: bool,
    ) -> Result<String, EmergencyError>;

    async fn get_room_details(&self, room_name: &str) -> Result<RoomDetails, EmergencyError>;

    async fn delete_room(&self, room_name: &str) -> Result<(), EmergencyError>;

    async fn health_check(&self) -> Result<bool, EmergencyError>;
}

/// Time bounds for the provider. `request_timeout` caps every HTTP call;
/// `timeout` caps the backoff loop waiting for a new room to propagate.
#[derive(Debug, Clone, Copy)]
pub struct ReadinessPolicy {
    pub timeout: StdDuration,
    pub initial_backoff: StdDuration,
    pub max_backoff: StdDuration,
    pub request_timeout: StdDuration,
}

impl ReadinessPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        let bound = StdDuration::from_secs(config.room_ready_timeout_secs);
        Self {
            timeout: bound,
            request_timeout: bound,
            ..Self::default()
        }
    }
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            timeout: StdDuration::from_secs(15),
            initial_backoff: StdDuration::from_millis(200),
            max_backoff: StdDuration::from_secs(2),
            request_timeout: StdDuration::from_secs(10),
        }
    }
}

/// HTTP client for a Daily-style rooms API
/// (`/rooms`, `/rooms/{name}`, `/meeting-tokens`).
pub struct RoomProviderClient {
    client: Client,
    api_key: String,
    base_url: String,
    room_duration_minutes: i64,
    readiness: ReadinessPolicy,
}

impl RoomProviderClient {
    pub fn new(config: &AppConfig) -> Result<Self, EmergencyError> {
        if !config.is_room_provider_configured() {
            return Err(EmergencyError::NotConfigured);
        }

        Ok(Self {
            client: Client::new(),
            api_key: config.room_provider_api_key.clone(),
            base_url: config.room_provider_base_url.trim_end_matches('/').to_string(),
            room_duration_minutes: config.emergency_room_duration_minutes,
            readiness: ReadinessPolicy::from_config(config),
        })
    }

    pub fn with_readiness(mut self, readiness: ReadinessPolicy) -> Self {
        self.readiness = readiness;
        self
    }

    fn provider_error(status: StatusCode, operation: &str, body: &str) -> EmergencyError {
        // The raw body goes to the log only; callers see the status.
        error!("Room provider {} failed: {} - {}", operation, status, body);
        EmergencyError::ProviderUnavailable {
            message: format!("{} failed with HTTP {}", operation, status),
        }
    }

    /// Sends with the per-request bound; a timeout becomes `ProviderTimeout`.
    async fn send(&self, request: RequestBuilder, operation: &str) -> Result<Response, EmergencyError> {
        request
            .bearer_auth(&self.api_key)
            .timeout(self.readiness.request_timeout)
            .send()
            .await
            .map_err(|e| self.transport_error(e, operation))
    }

    fn transport_error(&self, err: reqwest::Error, operation: &str) -> EmergencyError {
        if err.is_timeout() {
            error!(
                "Room provider {} exceeded {:?}",
                operation, self.readiness.request_timeout
            );
            return EmergencyError::ProviderTimeout {
                timeout_secs: self.readiness.request_timeout.as_secs(),
            };
        }
        EmergencyError::from(err)
    }

    async fn wait_until_ready(&self, room_name: &str) -> Result<(), EmergencyError> {
        let policy = self.readiness;
        let poll = async {
            let mut backoff = policy.initial_backoff;
            let mut attempts = 0u32;
            loop {
                attempts += 1;
                match self.get_room_details(room_name).await {
                    Ok(details) if details.exists => {
                        debug!("Room {} ready after {} checks", room_name, attempts);
                        return;
                    }
                    Ok(_) => debug!("Room {} not visible yet (check {})", room_name, attempts),
                    Err(e) => warn!("Readiness check {} for room {} failed: {}", attempts, room_name, e),
                }
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(policy.max_backoff);
            }
        };

        tokio::time::timeout(policy.timeout, poll)
            .await
            .map_err(|_| {
                error!("Room {} did not become ready within {:?}", room_name, policy.timeout);
                EmergencyError::ProviderTimeout {
                    timeout_secs: policy.timeout.as_secs(),
                }
            })
    }
}

#[async_trait]
impl RoomProvisioner for RoomProviderClient {
    async fn create_room(
        &self,
        name: &str,
        duration_minutes: i64,
        wait_for_ready: bool,
    ) -> Result<ProvisionedRoom, EmergencyError> {
        info!("Creating room {} for {} minutes", name, duration_minutes);

        let url = format!("{}/rooms", self.base_url);
        let request_body = ProviderRoomRequest {
            name: name.to_string(),
            privacy: "private".to_string(),
            properties: ProviderRoomProperties {
                exp: (Utc::now() + Duration::minutes(duration_minutes)).timestamp(),
                enable_chat: true,
                max_participants: 2,
            },
        };

        let response = self
            .send(self.client.post(&url).json(&request_body), "room creation")
            .await?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|e| self.transport_error(e, "room creation"))?;

        if !status.is_success() {
            return Err(Self::provider_error(status, "room creation", &response_text));
        }

        let room: ProviderRoomResponse = serde_json::from_str(&response_text).map_err(|e| {
            error!("Unparseable room creation response: {}", e);
            EmergencyError::ProviderUnavailable {
                message: "room creation returned an unexpected payload".to_string(),
            }
        })?;

        if wait_for_ready {
            if let Err(e) = self.wait_until_ready(&room.name).await {
                if let Err(cleanup) = self.delete_room(&room.name).await {
                    warn!("Failed to delete unready room {}: {}", room.name, cleanup);
                }
                return Err(e);
            }
        }

        info!("Room {} created", room.name);
        Ok(ProvisionedRoom {
            name: room.name,
            url: room.url,
        })
    }

    async fn mint_token(
        &self,
        room_name: &str,
        participant_id: &str,
        participant_name: &str,
        is_owner: bool,
    ) -> Result<String, EmergencyError> {
        debug!("Minting {} token for {} in {}", if is_owner { "owner" } else { "guest" }, participant_id, room_name);

        let url = format!("{}/meeting-tokens", self.base_url);
        let request_body = ProviderTokenRequest {
            properties: ProviderTokenProperties {
                room_name: room_name.to_string(),
                user_id: participant_id.to_string(),
                user_name: participant_name.to_string(),
                is_owner,
                exp: (Utc::now() + Duration::minutes(self.room_duration_minutes)).timestamp(),
            },
        };

        let response = self
            .send(self.client.post(&url).json(&request_body), "token minting")
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::provider_error(status, "token minting", &body));
        }

        let token: ProviderTokenResponse = response
            .json()
            .await
            .map_err(|e| self.transport_error(e, "token minting"))?;
        Ok(token.token)
    }

    async fn get_room_details(&self, room_name: &str) -> Result<RoomDetails, EmergencyError> {
        let url = format!("{}/rooms/{}", self.base_url, room_name);

        let response = self.send(self.client.get(&url), "room lookup").await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(RoomDetails {
                exists: false,
                url: None,
                created_at: None,
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::provider_error(status, "room lookup", &body));
        }

        let room: ProviderRoomResponse = response
            .json()
            .await
            .map_err(|e| self.transport_error(e, "room lookup"))?;
        Ok(RoomDetails {
            exists: true,
            url: Some(room.url),
            created_at: room.created_at,
        })
    }

    async fn delete_room(&self, room_name: &str) -> Result<(), EmergencyError> {
        let url = format!("{}/rooms/{}", self.base_url, room_name);

        let response = self.send(self.client.delete(&url), "room deletion").await?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            info!("Room {} deleted", room_name);
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(Self::provider_error(status, "room deletion", &body))
    }

    async fn health_check(&self) -> Result<bool, EmergencyError> {
        let url = format!("{}/rooms?limit=1", self.base_url);

        let response = self.send(self.client.get(&url), "health check").await?;

        let is_healthy = response.status().is_success();
        if !is_healthy {
            warn!("Room provider health check failed: {}", response.status());
        }

        Ok(is_healthy)
    }
}
