// ── Qualibot Config ──────────────────────────────────────────────────────
// Loaded once in main() and handed by reference to every component that
// needs it — no module-level singletons.

use crate::atoms::constants::DEFAULT_HISTORY_WINDOW;
use crate::atoms::error::{EngineError, EngineResult};

#[derive(Debug, Clone)]
pub struct Config {
    // ── Messaging ──
    pub webhook_verify_token: String,
    pub messaging_access_token: String,
    pub messaging_app_secret: String,
    pub messaging_phone_number_id: String,

    // ── Calendar ──
    pub calendar_tenant_id: String,
    pub calendar_client_id: String,
    pub calendar_client_secret: String,
    pub calendar_user_email: String,
    pub timezone: String,

    // ── Store ──
    pub store_url: String,
    pub store_service_key: Option<String>,

    // ── LLM ──
    pub llm_api_key: String,
    pub llm_model: String,
    pub llm_history_size: usize,

    // ── Server ──
    pub port: u16,
    pub jwt_secret: String,
}

impl Config {
    pub fn from_env() -> EngineResult<Self> {
        Ok(Config {
            webhook_verify_token: required("WEBHOOK_VERIFY_TOKEN")?,
            messaging_access_token: required("MESSAGING_ACCESS_TOKEN")?,
            messaging_app_secret: required("MESSAGING_APP_SECRET")?,
            messaging_phone_number_id: required("MESSAGING_PHONE_NUMBER_ID")?,

            calendar_tenant_id: required("CALENDAR_TENANT_ID")?,
            calendar_client_id: required("CALENDAR_CLIENT_ID")?,
            calendar_client_secret: required("CALENDAR_CLIENT_SECRET")?,
            calendar_user_email: required("CALENDAR_USER_EMAIL")?,
            timezone: optional("TIMEZONE", "UTC"),

            store_url: optional("STORE_URL", "qualibot.db"),
            store_service_key: std::env::var("STORE_SERVICE_KEY").ok(),

            llm_api_key: required("LLM_API_KEY")?,
            llm_model: optional("LLM_MODEL", "gpt-4o-mini"),
            llm_history_size: optional("LLM_HISTORY_SIZE", &DEFAULT_HISTORY_WINDOW.to_string())
                .parse()
                .unwrap_or(DEFAULT_HISTORY_WINDOW),

            port: optional("PORT", "8080")
                .parse()
                .map_err(|_| EngineError::validation("PORT must be a valid u16"))?,
            jwt_secret: required("JWT_SECRET")?,
        })
    }
}

fn required(key: &str) -> EngineResult<String> {
    std::env::var(key).map_err(|_| EngineError::validation(format!("missing required env var {key}")))
}

fn optional(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
