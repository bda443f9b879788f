// Qualibot Engine — Messaging Client (C3)
// Outbound text/media send via the provider's HTTP API; inbound signature
// verification via HMAC over the raw body.

use crate::atoms::constants::{MESSAGING_BASE_DELAY_MS, MESSAGING_MAX_DELAY_MS, MESSAGING_MAX_RETRIES};
use crate::atoms::error::{EngineError, EngineResult};
use crate::engine::http::{is_retryable_status, retry_delay, CircuitBreaker};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use log::warn;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Audio,
    Video,
}

/// Verify a provider's HMAC-SHA256 signature over the raw webhook body.
/// `signature_header` is expected in `sha256=<hex>` form.
pub fn verify_signature(app_secret: &str, raw_body: &[u8], signature_header: &str) -> bool {
    let Some(hex_sig) = signature_header.strip_prefix("sha256=") else { return false };
    let Ok(expected) = hex::decode(hex_sig) else { return false };

    let Ok(mut mac) = HmacSha256::new_from_slice(app_secret.as_bytes()) else { return false };
    mac.update(raw_body);
    mac.verify_slice(&expected).is_ok()
}

/// Outbound send operations. Inbound verification (`verify_signature`) is a
/// free function since it needs no client state.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    async fn send_text(&self, to: &str, body: &str) -> EngineResult<String>;
    async fn send_media(&self, to: &str, kind: MediaKind, url: &str, caption: Option<&str>) -> EngineResult<String>;
}

pub struct HttpMessagingClient {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
    phone_number_id: String,
    breaker: CircuitBreaker,
}

impl HttpMessagingClient {
    pub fn new(base_url: impl Into<String>, access_token: impl Into<String>, phone_number_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            access_token: access_token.into(),
            phone_number_id: phone_number_id.into(),
            breaker: CircuitBreaker::new(5, 60),
        }
    }

    async fn send(&self, payload: serde_json::Value) -> EngineResult<String> {
        self.breaker.check().map_err(|e| EngineError::transient("messaging", e))?;

        let url = format!("{}/{}/messages", self.base_url, self.phone_number_id);
        let mut attempt = 0;

        loop {
            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.access_token)
                .json(&payload)
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    self.breaker.record_success();
                    #[derive(serde::Deserialize)]
                    struct SendWire {
                        messages: Vec<SendWireId>,
                    }
                    #[derive(serde::Deserialize)]
                    struct SendWireId {
                        id: String,
                    }
                    let wire: SendWire = resp.json().await.map_err(|e| EngineError::from_reqwest("messaging", e))?;
                    return wire
                        .messages
                        .into_iter()
                        .next()
                        .map(|m| m.id)
                        .ok_or_else(|| EngineError::permanent("messaging", "empty send response"));
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let retry_after = resp
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(crate::engine::http::parse_retry_after);

                    if is_retryable_status(status) && attempt < MESSAGING_MAX_RETRIES {
                        self.breaker.record_failure();
                        warn!("[messaging] transient status {status}, attempt {attempt}");
                        retry_delay(attempt, MESSAGING_BASE_DELAY_MS, MESSAGING_MAX_DELAY_MS, retry_after).await;
                        attempt += 1;
                        continue;
                    }

                    self.breaker.record_failure();
                    if is_retryable_status(status) {
                        return Err(EngineError::transient("messaging", format!("delivery failure after retries, status {status}")));
                    }
                    return Err(EngineError::permanent("messaging", format!("status {status}")));
                }
                Err(err) if attempt < MESSAGING_MAX_RETRIES => {
                    self.breaker.record_failure();
                    warn!("[messaging] network error, attempt {attempt}: {err}");
                    retry_delay(attempt, MESSAGING_BASE_DELAY_MS, MESSAGING_MAX_DELAY_MS, None).await;
                    attempt += 1;
                }
                Err(err) => {
                    self.breaker.record_failure();
                    return Err(EngineError::from_reqwest("messaging", err));
                }
            }
        }
    }
}

/// Type-erased messaging client so the orchestrator can hold one without
/// knowing the concrete provider.
pub struct AnyMessagingClient(Box<dyn MessagingClient>);

impl AnyMessagingClient {
    pub fn new(inner: Box<dyn MessagingClient>) -> Self {
        Self(inner)
    }
}

#[async_trait]
impl MessagingClient for AnyMessagingClient {
    async fn send_text(&self, to: &str, body: &str) -> EngineResult<String> {
        self.0.send_text(to, body).await
    }

    async fn send_media(&self, to: &str, kind: MediaKind, url: &str, caption: Option<&str>) -> EngineResult<String> {
        self.0.send_media(to, kind, url, caption).await
    }
}

#[async_trait]
impl MessagingClient for HttpMessagingClient {
    async fn send_text(&self, to: &str, body: &str) -> EngineResult<String> {
        self.send(serde_json::json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "text",
            "text": { "body": body },
        }))
        .await
    }

    async fn send_media(&self, to: &str, kind: MediaKind, url: &str, caption: Option<&str>) -> EngineResult<String> {
        let type_name = match kind {
            MediaKind::Image => "image",
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        };
        self.send(serde_json::json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": type_name,
            type_name: { "link": url, "caption": caption },
        }))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_matches_known_vector() {
        let secret = "shh";
        let body = b"{\"hello\":\"world\"}";
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let sig = hex::encode(mac.finalize().into_bytes());
        assert!(verify_signature(secret, body, &format!("sha256={sig}")));
    }

    #[test]
    fn signature_rejects_mismatch() {
        assert!(!verify_signature("shh", b"payload", "sha256=deadbeef"));
    }

    #[test]
    fn signature_rejects_missing_prefix() {
        assert!(!verify_signature("shh", b"payload", "deadbeef"));
    }
}
