// Qualibot Engine — Webhook Ingest (C7)
// HTTP endpoint for provider callbacks: verifies, de-duplicates, resolves
// party -> conversation, and hands the fragment to C6. Always responds 200
// once the payload is durably persisted, to avoid provider retry storms.

use crate::atoms::types::{Message, MessageRole, MessageType, Platform};
use crate::config::Config;
use crate::engine::messaging::verify_signature;
use crate::engine::state::AppState;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use log::{info, warn};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

pub fn router() -> Router<(AppState, Arc<Config>)> {
    Router::new().route("/webhook", get(verify_handshake).post(receive))
}

#[derive(Debug, Deserialize)]
struct HandshakeQuery {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

async fn verify_handshake(State((_state, config)): State<(AppState, Arc<Config>)>, Query(q): Query<HandshakeQuery>) -> impl IntoResponse {
    if q.mode.as_deref() == Some("subscribe") && q.verify_token.as_deref() == Some(config.webhook_verify_token.as_str()) {
        (StatusCode::OK, q.challenge.unwrap_or_default())
    } else {
        (StatusCode::FORBIDDEN, String::new())
    }
}

async fn receive(State((state, config)): State<(AppState, Arc<Config>)>, headers: HeaderMap, body: axum::body::Bytes) -> impl IntoResponse {
    let signature = headers.get("x-hub-signature-256").and_then(|v| v.to_str().ok()).unwrap_or("");
    if !verify_signature(&config.messaging_app_secret, &body, signature) {
        warn!("[webhook] signature mismatch, rejecting");
        return StatusCode::FORBIDDEN;
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(err) => {
            // The provider treats non-2xx as retriable; a malformed payload
            // will never parse successfully, so we log and ack instead.
            warn!("[webhook] failed to parse payload: {err}");
            return StatusCode::OK;
        }
    };

    for fragment in extract_fragments(&payload) {
        if let Err(err) = ingest_fragment(&state, fragment).await {
            warn!("[webhook] failed to ingest fragment: {err}");
        }
    }

    StatusCode::OK
}

struct InboundFragment {
    external_id: String,
    phone: String,
    text: String,
    message_external_id: Option<String>,
}

/// Extract per-message fragments from a WhatsApp Cloud API-shaped payload:
/// `entry[].changes[].value.messages[]`.
fn extract_fragments(payload: &Value) -> Vec<InboundFragment> {
    let mut fragments = Vec::new();
    let Some(entries) = payload.get("entry").and_then(Value::as_array) else { return fragments };

    for entry in entries {
        let Some(changes) = entry.get("changes").and_then(Value::as_array) else { continue };
        for change in changes {
            let value = &change["value"];
            let Some(messages) = value.get("messages").and_then(Value::as_array) else { continue };
            for msg in messages {
                let Some(from) = msg.get("from").and_then(Value::as_str) else { continue };
                let Some(text) = msg["text"]["body"].as_str() else { continue };
                fragments.push(InboundFragment {
                    external_id: from.to_string(),
                    phone: from.to_string(),
                    text: text.to_string(),
                    message_external_id: msg.get("id").and_then(Value::as_str).map(|s| s.to_string()),
                });
            }
        }
    }

    fragments
}

async fn ingest_fragment(state: &AppState, fragment: InboundFragment) -> crate::atoms::error::EngineResult<()> {
    let (_, conversation, _) = state.store.upsert_user_and_open_conversation(Platform::Whatsapp, &fragment.external_id, Some(&fragment.phone), None)?;

    let message = Message {
        id: Uuid::new_v4(),
        conversation_id: conversation.id,
        role: MessageRole::User,
        content: fragment.text,
        message_type: MessageType::Text,
        media_url: None,
        external_id: fragment.message_external_id,
        read: false,
        delivery_failed: false,
        deleted: false,
        created_at: Utc::now(),
    };

    let is_new = state.orchestrator.submit(conversation.id, message).await?;
    if !is_new {
        info!("[webhook] duplicate message dropped for conversation {}", conversation.id);
    }
    Ok(())
}
