use core::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

pub const MOJANG_PROFILE_API: &str = "https://api.mojang.com/users/profiles/minecraft";

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("profile lookup timed out")]
    Timeout,
    /// The service answered but did not return a profile. Carries its error detail.
    #[error("profile lookup rejected: {0}")]
    Rejected(String),
    #[error("profile lookup failed: {0}")]
    Transport(String),
}

/// Checks that a player name belongs to an existing account.
#[async_trait]
pub trait ProfileLookup: Send + Sync {
    async fn verify(&self, player: &str) -> Result<(), ProfileError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileErrorBody {
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MojangProfiles {
    http: reqwest::Client,
    base: String,
}

impl MojangProfiles {
    /// # Errors
    ///
    /// Fails when the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        Self::with_base(MOJANG_PROFILE_API, timeout)
    }

    /// # Errors
    ///
    /// Fails when the HTTP client cannot be built.
    pub fn with_base(base: &str, timeout: Duration) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base: base.trim_end_matches('/').to_owned(),
        })
    }
}

#[async_trait]
impl ProfileLookup for MojangProfiles {
    async fn verify(&self, player: &str) -> Result<(), ProfileError> {
        let url = format!("{}/{player}", self.base);
        debug!(url = %url, "Looking up player profile");
        let response = self.http.get(&url).send().await.map_err(classify)?;
        let status = response.status();
        if status.is_success() && status != StatusCode::NO_CONTENT {
            return Ok(());
        }
        let detail = response
            .json::<ProfileErrorBody>()
            .await
            .ok()
            .and_then(|b| b.error_message)
            .unwrap_or_else(|| status.to_string());
        Err(ProfileError::Rejected(detail))
    }
}

fn classify(err: reqwest::Error) -> ProfileError {
    if err.is_timeout() {
        ProfileError::Timeout
    } else {
        ProfileError::Transport(err.to_string())
    }
}
