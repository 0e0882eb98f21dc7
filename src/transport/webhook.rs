//! Webhook ingress.
//!
//! The channel redelivers until it sees HTTP 200, so the POST handler acks
//! immediately and processes each message on a spawned task. All delivery
//! of replies happens off the request path.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

use crate::pipeline::orchestrator::ConversationPipeline;

use super::{InboundMessage, MediaFetcher, OutboundSender};

pub struct AppState {
    pub pipeline: Arc<ConversationPipeline>,
    pub sender: Arc<dyn OutboundSender>,
    pub media: Arc<dyn MediaFetcher>,
    /// Expected `hub.verify_token`; `None` disables webhook verification.
    pub verify_token: Option<String>,
    pub media_enabled: bool,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/webhook", get(verify).post(inbound))
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Webhook subscription handshake: echo `hub.challenge` when the mode and
/// token match, 403 otherwise (including when no token is configured).
async fn verify(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let mode = params.get("hub.mode").map(String::as_str);
    let token = params.get("hub.verify_token");
    let challenge = params.get("hub.challenge").cloned().unwrap_or_default();

    match (&state.verify_token, mode, token) {
        (Some(expected), Some("subscribe"), Some(got)) if got == expected => {
            tracing::info!("Webhook verification succeeded");
            (StatusCode::OK, challenge)
        }
        _ => {
            tracing::warn!("Webhook verification rejected");
            (StatusCode::FORBIDDEN, String::new())
        }
    }
}

/// Inbound POST: parse, spawn one task per message, ack with 200 no matter
/// what. A non-200 here only buys a redelivery of something we already
/// chose to drop.
async fn inbound(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<WebhookPayload>,
) -> StatusCode {
    for message in parse_inbound(payload) {
        let state = state.clone();
        tokio::spawn(async move {
            process_message(state, message).await;
        });
    }
    StatusCode::OK
}

async fn process_message(state: Arc<AppState>, message: InboundMessage) {
    let user = message.from_user().to_string();
    let reply = match &message {
        InboundMessage::Text { from, id, body } => {
            state
                .pipeline
                .handle_inbound_text(from, Some(id), body)
                .await
        }
        InboundMessage::Interactive {
            from,
            id,
            option_id,
        } => {
            state
                .pipeline
                .handle_interactive_option(from, Some(id), option_id)
                .await
        }
        InboundMessage::Media {
            from,
            id,
            media_id,
            mime_type,
        } => {
            if !state.media_enabled {
                tracing::debug!(user_id = %from, "Media path disabled, dropping attachment");
                return;
            }
            match state.media.fetch_media(media_id).await {
                Ok((data, fetched_mime)) => {
                    let mime = if fetched_mime.is_empty() {
                        mime_type.clone()
                    } else {
                        fetched_mime
                    };
                    state
                        .pipeline
                        .handle_document(from, Some(id), &data, &mime)
                        .await
                }
                Err(e) => {
                    tracing::warn!(user_id = %from, error = %e, "Media fetch failed, skipping");
                    return;
                }
            }
        }
    };

    if let Some(body) = reply {
        if let Err(e) = state.sender.send_text(&user, &body).await {
            tracing::error!(user_id = %user, error = %e, "Reply delivery failed");
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Payload parsing
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    #[serde(default)]
    changes: Vec<Change>,
}

#[derive(Debug, Deserialize)]
struct Change {
    #[serde(default)]
    value: ChangeValue,
}

#[derive(Debug, Default, Deserialize)]
struct ChangeValue {
    #[serde(default)]
    messages: Vec<WireMessage>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    from: String,
    id: String,
    #[serde(rename = "type")]
    kind: String,
    text: Option<WireText>,
    interactive: Option<WireInteractive>,
    image: Option<WireMedia>,
    document: Option<WireMedia>,
}

#[derive(Debug, Deserialize)]
struct WireText {
    body: String,
}

#[derive(Debug, Deserialize)]
struct WireInteractive {
    button_reply: Option<WireReply>,
    list_reply: Option<WireReply>,
}

#[derive(Debug, Deserialize)]
struct WireReply {
    id: String,
}

#[derive(Debug, Deserialize)]
struct WireMedia {
    id: String,
    #[serde(default)]
    mime_type: Option<String>,
}

/// Flatten the nested entry/changes/value envelope into normalized
/// messages. Statuses, reactions and unknown types fall out here.
pub fn parse_inbound(payload: WebhookPayload) -> Vec<InboundMessage> {
    let mut out = Vec::new();
    for entry in payload.entry {
        for change in entry.changes {
            for msg in change.value.messages {
                if let Some(parsed) = normalize(msg) {
                    out.push(parsed);
                } else {
                    tracing::debug!("Dropping unsupported inbound message type");
                }
            }
        }
    }
    out
}

fn normalize(msg: WireMessage) -> Option<InboundMessage> {
    match msg.kind.as_str() {
        "text" => Some(InboundMessage::Text {
            from: msg.from,
            id: msg.id,
            body: msg.text?.body,
        }),
        "interactive" => {
            let interactive = msg.interactive?;
            let reply = interactive.button_reply.or(interactive.list_reply)?;
            Some(InboundMessage::Interactive {
                from: msg.from,
                id: msg.id,
                option_id: reply.id,
            })
        }
        "image" | "document" => {
            let media = msg.image.or(msg.document)?;
            Some(InboundMessage::Media {
                from: msg.from,
                id: msg.id,
                media_id: media.id,
                mime_type: media.mime_type.unwrap_or_default(),
            })
        }
        _ => None,
    }
}
