// Qualibot — service entry point.

use qualibot::config::Config;
use qualibot::engine::agent::{AnyAgentRuntime, HttpAgentRuntime};
use qualibot::engine::calendar::{AnyCalendarClient, HttpCalendarClient};
use qualibot::engine::messaging::{AnyMessagingClient, HttpMessagingClient};
use qualibot::engine::orchestrator::timeout_sweep;
use qualibot::engine::server;
use qualibot::engine::state::AppState;
use qualibot::engine::store::Store;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = Config::from_env().expect("invalid configuration");
    let config = Arc::new(config);

    let store = Store::open(&config.store_url).expect("failed to open store");

    let calendar_token = fetch_calendar_token(&config).await.expect("failed to acquire calendar access token");
    let calendar = AnyCalendarClient::new(Box::new(HttpCalendarClient::new("https://graph.microsoft.com/v1.0", calendar_token)));
    let messaging = AnyMessagingClient::new(Box::new(HttpMessagingClient::new(
        "https://graph.facebook.com/v19.0",
        config.messaging_access_token.clone(),
        config.messaging_phone_number_id.clone(),
    )));
    let agent = AnyAgentRuntime::new(Box::new(HttpAgentRuntime::new(
        "https://api.openai.com/v1",
        config.llm_api_key.clone(),
        config.llm_model.clone(),
    )));

    let state = AppState::new(&config, store, calendar, messaging, agent).expect("failed to assemble app state");

    timeout_sweep::spawn(state.orchestrator.clone());

    let app = server::build(state, config.clone());
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await.expect("failed to bind listener");

    log::info!("[qualibot] listening on port {}", config.port);
    axum::serve(listener, app).await.expect("server error");
}

/// Client-credentials grant against the tenant's OAuth2 token endpoint.
/// Acquired once at startup; the calendar client does not refresh it, so a
/// long-lived deployment needs to be restarted before the token expires.
async fn fetch_calendar_token(config: &Config) -> Result<String, reqwest::Error> {
    #[derive(serde::Deserialize)]
    struct TokenResponse {
        access_token: String,
    }

    let url = format!("https://login.microsoftonline.com/{}/oauth2/v2.0/token", config.calendar_tenant_id);
    let params = [
        ("client_id", config.calendar_client_id.as_str()),
        ("client_secret", config.calendar_client_secret.as_str()),
        ("scope", "https://graph.microsoft.com/.default"),
        ("grant_type", "client_credentials"),
    ];

    let response = reqwest::Client::new().post(&url).form(&params).send().await?.error_for_status()?;
    Ok(response.json::<TokenResponse>().await?.access_token)
}
