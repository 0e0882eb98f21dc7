//! Messaging-channel transport: webhook ingress and Graph API egress.
//!
//! The pipeline itself is transport-agnostic; everything WhatsApp-shaped
//! lives here. Outbound delivery failures are logged and swallowed; the
//! channel is at-least-once and the patient can always repeat themselves.

pub mod sender;
pub mod webhook;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport not configured: missing {0}")]
    NotConfigured(&'static str),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed media metadata")]
    MalformedMedia,
}

/// One normalized inbound event, extracted from the webhook payload.
/// Anything the channel can deliver that isn't one of these (delivery
/// statuses, reactions, unsupported types) is dropped at parse time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    Text {
        from: String,
        id: String,
        body: String,
    },
    Interactive {
        from: String,
        id: String,
        option_id: String,
    },
    Media {
        from: String,
        id: String,
        media_id: String,
        mime_type: String,
    },
}

impl InboundMessage {
    pub fn from_user(&self) -> &str {
        match self {
            Self::Text { from, .. } | Self::Interactive { from, .. } | Self::Media { from, .. } => {
                from
            }
        }
    }
}

/// Outbound reply delivery.
#[async_trait]
pub trait OutboundSender: Send + Sync {
    async fn send_text(&self, to: &str, body: &str) -> Result<(), TransportError>;
}

/// Resolves a channel media id to `(base64 bytes, mime type)`.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch_media(&self, media_id: &str) -> Result<(String, String), TransportError>;
}
