//! Outbound delivery over the channel's Graph-style REST API, plus media
//! download for the attachment path.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::config::Config;

use super::{MediaFetcher, OutboundSender, TransportError};

const GRAPH_API_VERSION: &str = "v18.0";
const DEFAULT_GRAPH_BASE: &str = "https://graph.facebook.com";

/// Graph API client. Missing credentials are tolerated at construction and
/// reported per call, so a partially configured deployment still boots.
pub struct GraphApiClient {
    access_token: Option<String>,
    phone_id: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl GraphApiClient {
    pub fn new(access_token: Option<String>, phone_id: Option<String>, base_url: String) -> Self {
        Self {
            access_token,
            phone_id,
            base_url,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.access_token.clone(),
            config.phone_id.clone(),
            DEFAULT_GRAPH_BASE.to_string(),
        )
    }

    fn token(&self) -> Result<&str, TransportError> {
        self.access_token
            .as_deref()
            .ok_or(TransportError::NotConfigured("access token"))
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(TransportError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[derive(Debug, Serialize)]
struct SendTextRequest<'a> {
    messaging_product: &'static str,
    to: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    text: TextBody<'a>,
}

#[derive(Debug, Serialize)]
struct TextBody<'a> {
    body: &'a str,
    preview_url: bool,
}

impl<'a> SendTextRequest<'a> {
    fn new(to: &'a str, body: &'a str) -> Self {
        Self {
            messaging_product: "whatsapp",
            to,
            kind: "text",
            text: TextBody {
                body,
                preview_url: false,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct MediaMetadata {
    url: String,
    #[serde(default)]
    mime_type: String,
}

#[async_trait]
impl OutboundSender for GraphApiClient {
    async fn send_text(&self, to: &str, body: &str) -> Result<(), TransportError> {
        let token = self.token()?;
        let phone_id = self
            .phone_id
            .as_deref()
            .ok_or(TransportError::NotConfigured("phone id"))?;

        let url = format!(
            "{}/{GRAPH_API_VERSION}/{phone_id}/messages",
            self.base_url.trim_end_matches('/')
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&SendTextRequest::new(to, body))
            .send()
            .await?;
        Self::check(response).await?;
        tracing::debug!(to = %to, chars = body.len(), "Outbound text delivered");
        Ok(())
    }
}

#[async_trait]
impl MediaFetcher for GraphApiClient {
    /// Two-step download: resolve the media id to a short-lived URL, then
    /// fetch the bytes. Returns base64-encoded content plus the mime type.
    async fn fetch_media(&self, media_id: &str) -> Result<(String, String), TransportError> {
        let token = self.token()?;

        let meta_url = format!(
            "{}/{GRAPH_API_VERSION}/{media_id}",
            self.base_url.trim_end_matches('/')
        );
        let response = self.client.get(&meta_url).bearer_auth(token).send().await?;
        let metadata: MediaMetadata = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|_| TransportError::MalformedMedia)?;

        let response = self
            .client
            .get(&metadata.url)
            .bearer_auth(token)
            .send()
            .await?;
        let bytes = Self::check(response).await?.bytes().await?;
        tracing::debug!(media_id = %media_id, bytes = bytes.len(), "Media downloaded");
        Ok((BASE64.encode(&bytes), metadata.mime_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unconfigured() -> GraphApiClient {
        GraphApiClient::new(None, None, DEFAULT_GRAPH_BASE.to_string())
    }

    #[tokio::test]
    async fn send_without_credentials_fails_fast() {
        let err = unconfigured().send_text("1", "hi").await.unwrap_err();
        assert!(matches!(err, TransportError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn fetch_without_credentials_fails_fast() {
        let err = unconfigured().fetch_media("media-1").await.unwrap_err();
        assert!(matches!(err, TransportError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn send_without_phone_id_names_the_missing_piece() {
        let client =
            GraphApiClient::new(Some("tok".into()), None, DEFAULT_GRAPH_BASE.to_string());
        let err = client.send_text("1", "hi").await.unwrap_err();
        assert!(matches!(err, TransportError::NotConfigured("phone id")));
    }

    #[test]
    fn send_text_request_has_the_expected_wire_shape() {
        let value = serde_json::to_value(SendTextRequest::new("919900000000", "hello")).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "messaging_product": "whatsapp",
                "to": "919900000000",
                "type": "text",
                "text": { "body": "hello", "preview_url": false }
            })
        );
    }

    #[test]
    fn media_metadata_tolerates_missing_mime() {
        let meta: MediaMetadata =
            serde_json::from_value(serde_json::json!({ "url": "https://x" })).unwrap();
        assert!(meta.mime_type.is_empty());
    }
}
