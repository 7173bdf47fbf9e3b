//! Mojang authentication bridge
//!
//! Consumed by the session engine through four operations: does an
//! authenticated identity exist, its name and id, and the side-effecting
//! session join. Join failure is reported, never fatal — the upstream server
//! makes its own decision about rejecting the identity.

use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{ProxyError, Result};
use crate::logger::log;

const PROFILE_API: &str = "https://api.minecraftservices.com/minecraft/profile";
const SESSION_JOIN_API: &str = "https://sessionserver.mojang.com/session/minecraft/join";

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Authenticated player profile
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Profile {
    /// Undashed player UUID
    pub id: String,
    pub name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JoinRequest<'a> {
    access_token: &'a str,
    selected_profile: &'a str,
    server_id: &'a str,
}

#[derive(Default)]
struct AuthState {
    access_token: Option<String>,
    profile: Option<Profile>,
}

/// Process-wide auth state, written by the console and read by sessions.
pub struct MojangAuth {
    client: reqwest::Client,
    state: RwLock<AuthState>,
}

impl Default for MojangAuth {
    fn default() -> Self {
        Self::new()
    }
}

impl MojangAuth {
    pub fn new() -> Self {
        let client = match reqwest::Client::builder().timeout(HTTP_TIMEOUT).build() {
            Ok(client) => client,
            Err(e) => {
                log::warn!(error = %e, "HTTP client build failed, using defaults without timeout");
                reqwest::Client::new()
            }
        };
        Self {
            client,
            state: RwLock::new(AuthState::default()),
        }
    }

    /// Configure the bearer token. Any previously fetched profile becomes
    /// stale and is dropped until the next `fetch_profile`.
    pub async fn set_access_token(&self, token: String) {
        let mut state = self.state.write().await;
        state.access_token = Some(token);
        state.profile = None;
    }

    /// Fetch the player profile behind the configured token.
    pub async fn fetch_profile(&self) -> Result<Profile> {
        let token = {
            let state = self.state.read().await;
            state
                .access_token
                .clone()
                .ok_or_else(|| ProxyError::Auth("no access token configured".to_string()))?
        };

        let response = self
            .client
            .get(PROFILE_API)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| ProxyError::Auth(format!("profile request failed: {}", e)))?;

        if response.status() != StatusCode::OK {
            return Err(ProxyError::Auth(format!(
                "profile request rejected: HTTP {}",
                response.status()
            )));
        }

        let profile: Profile = response
            .json()
            .await
            .map_err(|e| ProxyError::Auth(format!("invalid profile response: {}", e)))?;

        log::info!(player = %profile.name, uuid = %profile.id, "Profile fetched");
        self.state.write().await.profile = Some(profile.clone());
        Ok(profile)
    }

    /// True when a token and fetched profile are both present
    pub async fn has_identity(&self) -> bool {
        let state = self.state.read().await;
        state.access_token.is_some() && state.profile.is_some()
    }

    pub async fn identity_name(&self) -> Option<String> {
        self.state.read().await.profile.as_ref().map(|p| p.name.clone())
    }

    pub async fn identity_id(&self) -> Option<String> {
        self.state.read().await.profile.as_ref().map(|p| p.id.clone())
    }

    /// Prove session legitimacy to the Mojang session service. Must be
    /// called before the Encryption Response is sent upstream. Returns
    /// false on any failure; the session proceeds either way.
    pub async fn join_upstream_session(&self, server_hash: &str) -> bool {
        let (token, profile_id, player) = {
            let state = self.state.read().await;
            match (&state.access_token, &state.profile) {
                (Some(token), Some(profile)) => {
                    (token.clone(), profile.id.clone(), profile.name.clone())
                }
                _ => {
                    log::warn!("Session join skipped: token or profile missing");
                    return false;
                }
            }
        };

        let body = JoinRequest {
            access_token: &token,
            selected_profile: &profile_id,
            server_id: server_hash,
        };

        let result = self
            .client
            .post(SESSION_JOIN_API)
            .json(&body)
            .send()
            .await;

        let success = match result {
            Ok(response) => {
                let status = response.status();
                if status == StatusCode::NO_CONTENT || status == StatusCode::OK {
                    true
                } else {
                    let detail = response.text().await.unwrap_or_default();
                    log::warn!(status = %status, detail = %detail, "Session join rejected");
                    false
                }
            }
            Err(e) => {
                log::warn!(error = %e, "Session join request failed");
                false
            }
        };

        log::session_join(&player, success);
        success
    }

    #[cfg(test)]
    pub(crate) async fn set_profile_for_tests(&self, profile: Profile) {
        self.state.write().await.profile = Some(profile);
    }
}
