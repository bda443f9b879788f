// Legacy REST facade, retained for UI compatibility. Every route accepts
// both with and without a trailing slash; responses are JSON, errors are
// `{detail: string}` with the status code EngineError::status_code() maps to.

use crate::atoms::error::EngineError;
use crate::atoms::types::{Conversation, Message, MessageRole, MessageType, Platform};
use crate::config::Config;
use crate::engine::state::AppState;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

type AppRouter = Router<(AppState, Arc<Config>)>;

pub fn router() -> AppRouter {
    Router::new()
        .route("/api/users", get(list_users))
        .route("/api/users/", get(list_users))
        .route("/api/conversations", get(list_conversations).post(create_conversation))
        .route("/api/conversations/", get(list_conversations).post(create_conversation))
        .route("/api/messages", get(list_messages).post(post_message))
        .route("/api/messages/", get(list_messages).post(post_message))
}

struct ApiError(EngineError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(json!({ "detail": self.0.to_string() }))).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError(err)
    }
}

async fn list_users(State((state, _)): State<(AppState, Arc<Config>)>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.store.list_users()?))
}

#[derive(Debug, Deserialize)]
struct ConversationsQuery {
    user_id: Option<Uuid>,
}

async fn list_conversations(State((state, _)): State<(AppState, Arc<Config>)>, Query(q): Query<ConversationsQuery>) -> Result<impl IntoResponse, ApiError> {
    let conversations = match q.user_id {
        Some(user_id) => state.store.list_conversations_for_user(&user_id)?,
        None => state.store.list_conversations()?,
    };
    Ok(Json(conversations))
}

#[derive(Debug, Deserialize)]
struct CreateConversationRequest {
    user_id: Uuid,
    platform: String,
    external_id: String,
}

async fn create_conversation(State((state, _)): State<(AppState, Arc<Config>)>, Json(req): Json<CreateConversationRequest>) -> Result<impl IntoResponse, ApiError> {
    let platform = Platform::parse(&req.platform).ok_or_else(|| EngineError::validation(format!("unknown platform `{}`", req.platform)))?;
    let now = Utc::now();
    let conversation = Conversation {
        id: Uuid::new_v4(),
        user_id: req.user_id,
        platform,
        external_id: req.external_id,
        status: crate::atoms::types::ConversationStatus::Active,
        agent_enabled: true,
        created_at: now,
        updated_at: now,
    };
    Ok(Json(state.store.create_conversation(&conversation)?))
}

#[derive(Debug, Deserialize)]
struct MessagesQuery {
    conversation_id: Uuid,
}

async fn list_messages(State((state, _)): State<(AppState, Arc<Config>)>, Query(q): Query<MessagesQuery>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.store.list_messages(&q.conversation_id)?))
}

#[derive(Debug, Deserialize)]
struct PostMessageRequest {
    conversation_id: Uuid,
    content: String,
}

async fn post_message(State((state, _)): State<(AppState, Arc<Config>)>, Json(req): Json<PostMessageRequest>) -> Result<impl IntoResponse, ApiError> {
    let message = Message {
        id: Uuid::new_v4(),
        conversation_id: req.conversation_id,
        role: MessageRole::User,
        content: req.content,
        message_type: MessageType::Text,
        media_url: None,
        external_id: None,
        read: false,
        delivery_failed: false,
        deleted: false,
        created_at: Utc::now(),
    };
    let _ = state.orchestrator.submit(req.conversation_id, message.clone()).await?;
    Ok(Json(message))
}
