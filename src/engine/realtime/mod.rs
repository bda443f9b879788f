// Qualibot Engine — Session Fan-Out (C8)
// Bidirectional JSON-over-WebSocket protocol for operator dashboards:
// request/response RPC multiplexed with server-pushed events on one
// connection. Auth happens at handshake via `?token=<jwt>`; an
// unauthenticated connection is accepted but only receives public events.

pub mod envelope;
pub mod hub;

use crate::atoms::constants::{WS_BACKPRESSURE_GRACE, WS_HEARTBEAT_INTERVAL, WS_HEARTBEAT_SILENCE_LIMIT};
use crate::config::Config;
use crate::engine::calendar::CalendarClient;
use crate::engine::state::AppState;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use envelope::{ClientFrame, ErrorPayload, EventName, ServerFrame};
use hub::{Subscription, Topic};
use jsonwebtoken::{decode, DecodingKey, Validation};
use log::{debug, warn};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use uuid::Uuid;

pub fn router() -> Router<(AppState, Arc<Config>)> {
    Router::new().route("/ws", get(upgrade))
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: Uuid,
}

async fn upgrade(ws: WebSocketUpgrade, State((state, config)): State<(AppState, Arc<Config>)>, Query(q): Query<WsQuery>) -> Response {
    let user_id = q.token.as_deref().and_then(|t| authenticate(t, &config));
    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

fn authenticate(token: &str, config: &Config) -> Option<Uuid> {
    let key = DecodingKey::from_secret(config.jwt_secret.as_bytes());
    decode::<Claims>(token, &key, &Validation::default()).ok().map(|data| data.claims.sub)
}

async fn handle_socket(mut socket: WebSocket, state: AppState, user_id: Option<Uuid>) {
    let client_id = Uuid::new_v4();
    let subscription = Arc::new(Subscription::new(user_id));
    let mut events = state.hub.subscribe();

    let connected = ServerFrame::Connected { id: Uuid::new_v4().to_string(), client_id };
    if send_frame(&mut socket, &connected).await.is_err() {
        return;
    }

    let mut last_activity = Instant::now();
    let mut lag_since: Option<Instant> = None;
    let mut heartbeat = tokio::time::interval(WS_HEARTBEAT_INTERVAL);

    loop {
        tokio::select! {
            msg = socket.recv() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        last_activity = Instant::now();
                        handle_client_frame(&mut socket, &state, &subscription, &text).await;
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        last_activity = Instant::now();
                        if socket.send(WsMessage::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Pong(_))) => { last_activity = Instant::now(); }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!("[realtime] recv error for {client_id}: {err}");
                        break;
                    }
                }
            }

            result = events.recv() => {
                match result {
                    Ok(published) if subscription.matches(&published.topic) => {
                        lag_since = None;
                        if send_frame(&mut socket, &published.frame).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        let since = *lag_since.get_or_insert_with(Instant::now);
                        warn!("[realtime] {client_id} lagged by {n} events");
                        let frame = ServerFrame::Lag { id: Uuid::new_v4().to_string(), dropped: n };
                        if send_frame(&mut socket, &frame).await.is_err() {
                            break;
                        }
                        if since.elapsed() >= WS_BACKPRESSURE_GRACE {
                            warn!("[realtime] {client_id} closed after sustained backpressure");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            _ = heartbeat.tick() => {
                if last_activity.elapsed() >= WS_HEARTBEAT_SILENCE_LIMIT {
                    warn!("[realtime] {client_id} closed for silence");
                    break;
                }
                if send_frame(&mut socket, &ServerFrame::Heartbeat).await.is_err() {
                    break;
                }
            }
        }
    }

    debug!("[realtime] connection {client_id} closed");
}

async fn handle_client_frame(socket: &mut WebSocket, state: &AppState, subscription: &Subscription, text: &str) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(err) => {
            let error = ServerFrame::Error {
                id: Uuid::new_v4().to_string(),
                payload: ErrorPayload { code: "bad_request".into(), message: format!("invalid frame: {err}"), details: None },
            };
            let _ = send_frame(socket, &error).await;
            return;
        }
    };

    match frame {
        ClientFrame::Heartbeat => {
            let _ = send_frame(socket, &ServerFrame::Heartbeat).await;
        }
        ClientFrame::Request { id, resource, payload } => {
            let response = dispatch(state, subscription, &resource, &payload).await;
            let frame = match response {
                Ok(value) => ServerFrame::Response { id, payload: value },
                Err((code, message)) => ServerFrame::Error { id, payload: ErrorPayload { code: code.into(), message, details: None } },
            };
            let _ = send_frame(socket, &frame).await;
        }
    }
}

type DispatchResult = Result<Value, (&'static str, String)>;

/// Routes a request to C1 (reads), C6 (conversation mutations), or C2
/// (meeting mutations) depending on resource and action.
async fn dispatch(state: &AppState, subscription: &Subscription, resource: &str, payload: &Value) -> DispatchResult {
    let action = payload.get("action").and_then(Value::as_str).unwrap_or("get_all");
    let id_field = || payload.get("id").and_then(Value::as_str).and_then(|s| s.parse::<Uuid>().ok());

    match (resource, action) {
        ("users", "get_all") => to_value(state.store.list_users()),
        ("users", "get_by_id") => {
            let id = id_field().ok_or(missing_id())?;
            to_value(state.store.get_user(&id))
        }

        ("conversations", "get_all") => to_value(state.store.list_conversations()),
        ("conversations", "get_by_id") => {
            let id = id_field().ok_or(missing_id())?;
            let conversation = state.store.get_conversation(&id).map_err(store_err)?;
            subscription.watch_conversation(conversation.id);
            to_value(Ok(conversation))
        }
        ("conversations", "set_agent_enabled") => {
            let id = id_field().ok_or(missing_id())?;
            let enabled = payload.get("enabled").and_then(Value::as_bool).ok_or(("bad_request", "missing boolean `enabled`".to_string()))?;
            let conversation = state.store.set_agent_enabled(&id, enabled).map_err(store_err)?;
            state.hub.publish(
                Topic { user_id: None, conversation_id: Some(conversation.id) },
                EventName::ConversationUpdated,
                serde_json::to_value(&conversation).unwrap_or_default(),
            );
            to_value(Ok(conversation))
        }

        ("messages", "get_all") => {
            let conversation_id = payload.get("conversation_id").and_then(Value::as_str).and_then(|s| s.parse::<Uuid>().ok()).ok_or(missing_id())?;
            to_value(state.store.list_messages(&conversation_id))
        }
        ("messages", "create") => {
            let conversation_id = payload.get("conversation_id").and_then(Value::as_str).and_then(|s| s.parse::<Uuid>().ok()).ok_or(missing_id())?;
            let content = payload.get("content").and_then(Value::as_str).unwrap_or_default().to_string();
            let message = crate::atoms::types::Message {
                id: Uuid::new_v4(),
                conversation_id,
                role: crate::atoms::types::MessageRole::Assistant,
                content,
                message_type: crate::atoms::types::MessageType::Text,
                media_url: None,
                external_id: None,
                read: true,
                delivery_failed: false,
                deleted: false,
                created_at: chrono::Utc::now(),
            };
            state.orchestrator.submit(conversation_id, message.clone()).await.map_err(store_err)?;
            to_value(Ok(message))
        }

        ("leads", "get_all") | ("lead_qualification", "get_all") => to_value(state.store.list_leads()),
        ("leads", "get_by_id") | ("lead_qualification", "get_by_id") => {
            let id = id_field().ok_or(missing_id())?;
            to_value(state.store.get_lead(&id))
        }
        ("leads", "set_stage") | ("lead_qualification", "set_stage") => {
            let id = id_field().ok_or(missing_id())?;
            let stage = payload
                .get("stage")
                .and_then(Value::as_str)
                .and_then(crate::atoms::types::Stage::parse)
                .ok_or(("bad_request", "missing or invalid `stage`".to_string()))?;
            let lead = state.store.set_stage(&id, stage).map_err(store_err)?;
            state.hub.publish(
                Topic { user_id: None, conversation_id: Some(lead.conversation_id) },
                EventName::LeadStageChanged,
                serde_json::json!({ "lead_qualification_id": lead.id, "stage": stage.as_str() }),
            );
            to_value(Ok(lead))
        }

        ("meetings", "get_all") => {
            let now = chrono::Utc::now();
            to_value(state.store.list_meetings_between(now - chrono::Duration::days(30), now + chrono::Duration::days(90)))
        }
        ("meetings", "get_by_id") => {
            let id = id_field().ok_or(missing_id())?;
            to_value(state.store.get_meeting(&id))
        }
        ("meetings", "delete") => {
            let id = id_field().ok_or(missing_id())?;
            let meeting = state.store.get_meeting(&id).map_err(store_err)?;
            if let Some(external_id) = &meeting.external_meeting_id {
                let _ = state.orchestrator.calendar.cancel_event(external_id).await;
            }
            to_value(state.store.cancel_meeting(&id))
        }

        ("requirements", "get_by_id") => {
            let id = id_field().ok_or(missing_id())?;
            to_value(state.store.get_requirements(&id))
        }

        ("dashboard", "get_dashboard_stats") => to_value(state.store.get_dashboard_stats()),
        ("dashboard", "get_conversion_funnel") => to_value(state.store.get_conversion_funnel()),
        ("dashboard", "get_abandoned_leads") => to_value(state.store.get_abandoned_leads()),
        ("dashboard", "get_activity_timeline") => {
            let hours = payload.get("window_hours").and_then(Value::as_i64).unwrap_or(24);
            to_value(state.store.get_activity_timeline(chrono::Duration::hours(hours)))
        }
        ("dashboard", "get_lead_pipeline") => to_value(state.store.get_lead_pipeline()),
        ("dashboard", "get_conversion_stats") => to_value(state.store.get_conversion_stats()),
        ("dashboard", "get_agent_performance") => {
            let hours = payload.get("window_hours").and_then(Value::as_i64).unwrap_or(24);
            to_value(state.store.get_agent_performance(chrono::Duration::hours(hours)))
        }
        ("dashboard", "get_real_time_metrics") => {
            let hours = payload.get("window_hours").and_then(Value::as_i64).unwrap_or(1);
            let metrics = state.store.get_real_time_metrics(chrono::Duration::hours(hours)).map_err(store_err)?;
            Ok(serde_json::json!({
                "in_flight_conversations": metrics.in_flight_conversations,
                "recent_error_rate": metrics.recent_error_rate,
                "open_sessions": state.hub.connection_count(),
            }))
        }

        (other_resource, other_action) => Err(("unknown_resource", format!("no such resource/action: {other_resource}/{other_action}"))),
    }
}

fn missing_id() -> (&'static str, String) {
    ("bad_request", "missing or invalid `id`".to_string())
}

fn store_err(err: crate::atoms::error::EngineError) -> (&'static str, String) {
    ("store_error", err.to_string())
}

fn to_value<T: serde::Serialize>(result: crate::atoms::error::EngineResult<T>) -> DispatchResult {
    result.map(|v| serde_json::to_value(v).unwrap_or(Value::Null)).map_err(store_err)
}

async fn send_frame(socket: &mut WebSocket, frame: &ServerFrame) -> Result<(), axum::Error> {
    match serde_json::to_string(frame) {
        Ok(json) => socket.send(WsMessage::Text(json)).await,
        Err(_) => Ok(()),
    }
}
