//! Chat platform client.
//!
//! The core needs: send a message to a channel, send a threaded reply,
//! list channels, and send rich formatted blocks. `SlackClient`
//! implements the contract over the Web API.

use async_trait::async_trait;
use baton_core::ExternalError;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::warn;

use crate::ExternalRef;

const SYSTEM: &str = "chat";
const DEFAULT_API_URL: &str = "https://slack.com/api";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// A resolvable channel.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
}

/// The narrow contract the core needs from a chat platform.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Channels visible to the bot token.
    async fn list_channels(&self) -> Result<Vec<ChannelInfo>, ExternalError>;

    /// Send a message; `blocks` carries optional rich formatting.
    async fn send_message(
        &self,
        channel: &str,
        text: &str,
        blocks: Option<serde_json::Value>,
    ) -> Result<ExternalRef, ExternalError>;

    /// Reply inside a thread keyed by the parent message identity.
    async fn send_threaded(
        &self,
        channel: &str,
        thread_id: &str,
        text: &str,
    ) -> Result<ExternalRef, ExternalError>;
}

// ============================================================================
// SLACK CLIENT
// ============================================================================

/// Slack Web API implementation of `ChatPlatform`.
pub struct SlackClient {
    client: reqwest::Client,
    api_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    channel: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChannelListResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    channels: Vec<ChannelInfo>,
}

impl SlackClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_api_url(token, DEFAULT_API_URL)
    }

    pub fn with_api_url(token: impl Into<String>, api_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<T, ExternalError> {
        let response = self
            .client
            .post(format!("{}/{method}", self.api_url))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExternalError::Timeout {
                        system: SYSTEM.to_string(),
                        seconds: DEFAULT_TIMEOUT.as_secs(),
                    }
                } else {
                    ExternalError::Rejected {
                        system: SYSTEM.to_string(),
                        status: 0,
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            return Err(ExternalError::Rejected {
                system: SYSTEM.to_string(),
                status,
                message: response.text().await.unwrap_or_default(),
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ExternalError::Rejected {
                system: SYSTEM.to_string(),
                status,
                message: format!("response decode: {e}"),
            })
    }
}

/// The Web API reports failures with `ok: false` and an error token.
fn api_error(error: Option<String>) -> ExternalError {
    let message = error.unwrap_or_else(|| "unknown error".to_string());
    warn!(%message, "chat request rejected");
    ExternalError::Rejected {
        system: SYSTEM.to_string(),
        status: 200,
        message,
    }
}

#[async_trait]
impl ChatPlatform for SlackClient {
    async fn list_channels(&self) -> Result<Vec<ChannelInfo>, ExternalError> {
        let response: ChannelListResponse = self
            .post(
                "conversations.list",
                json!({"exclude_archived": true, "limit": 200}),
            )
            .await?;
        if !response.ok {
            return Err(api_error(response.error));
        }
        Ok(response.channels)
    }

    async fn send_message(
        &self,
        channel: &str,
        text: &str,
        blocks: Option<serde_json::Value>,
    ) -> Result<ExternalRef, ExternalError> {
        let mut body = json!({"channel": channel, "text": text});
        if let Some(blocks) = blocks {
            body["blocks"] = blocks;
        }
        let response: PostMessageResponse = self.post("chat.postMessage", body).await?;
        if !response.ok {
            return Err(api_error(response.error));
        }
        let ts = response.ts.unwrap_or_default();
        Ok(ExternalRef {
            url: format!(
                "https://slack.com/archives/{}/p{}",
                response.channel.as_deref().unwrap_or(channel),
                ts.replace('.', "")
            ),
            external_id: ts,
        })
    }

    async fn send_threaded(
        &self,
        channel: &str,
        thread_id: &str,
        text: &str,
    ) -> Result<ExternalRef, ExternalError> {
        let response: PostMessageResponse = self
            .post(
                "chat.postMessage",
                json!({"channel": channel, "text": text, "thread_ts": thread_id}),
            )
            .await?;
        if !response.ok {
            return Err(api_error(response.error));
        }
        let ts = response.ts.unwrap_or_default();
        Ok(ExternalRef {
            url: format!(
                "https://slack.com/archives/{}/p{}",
                response.channel.as_deref().unwrap_or(channel),
                ts.replace('.', "")
            ),
            external_id: ts,
        })
    }
}
