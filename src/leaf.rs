//! Client for the LEAF content API.
//!
//! Used to decorate live activity events with BookRoll page-image URLs.
//! Authenticates with OAuth client credentials; the bearer token is cached
//! and refreshed shortly before it expires.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::LeafApiConfig;

/// Refresh the token this long before its reported expiry.
const TOKEN_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

pub struct LeafApi {
    client: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    token: RwLock<Option<CachedToken>>,
}

impl LeafApi {
    pub fn new(config: &LeafApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("Failed to build LEAF API client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            token: RwLock::new(None),
        })
    }

    /// URL of the rendered image for one page of a BookRoll content.
    ///
    /// The token is appended as a query parameter so dashboard clients can
    /// load the image directly.
    pub async fn page_image_url(&self, contents_id: &str, page: i64) -> Result<String> {
        let token = self.access_token().await?;
        Ok(format!(
            "{}/contents/{}/pages/{}/image?access_token={}",
            self.base_url, contents_id, page, token
        ))
    }

    async fn access_token(&self) -> Result<String> {
        if let Some(cached) = self.token.read().await.as_ref()
            && Instant::now() < cached.expires_at
        {
            return Ok(cached.token.clone());
        }

        let response: TokenResponse = self
            .client
            .post(format!("{}/oauth/token", self.base_url))
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await
            .context("LEAF token request failed")?
            .error_for_status()
            .context("LEAF token request rejected")?
            .json()
            .await
            .context("Failed to parse LEAF token response")?;

        let lifetime = Duration::from_secs(response.expires_in);
        let expires_at = Instant::now() + lifetime.saturating_sub(TOKEN_MARGIN);
        debug!(expires_in = response.expires_in, "LEAF access token refreshed");

        *self.token.write().await = Some(CachedToken {
            token: response.access_token.clone(),
            expires_at,
        });
        Ok(response.access_token)
    }
}
