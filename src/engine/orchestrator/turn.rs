// The turn protocol (steps 2-8; step 1, appending the inbound message, has
// already happened in `Orchestrator::submit` by the time this runs).

use super::Orchestrator;
use crate::atoms::constants::DEFAULT_HISTORY_WINDOW;
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{Conversation, Message, MessageRole, MessageType};
use crate::engine::agent::tools::available_for_stage;
use crate::engine::agent::{AgentRuntime, Turn, ToolInvocation};
use crate::engine::calendar::CalendarClient;
use crate::engine::messaging::MessagingClient;
use crate::engine::qualification::{next_stage, AppliedEffects};
use crate::engine::realtime::envelope::EventName;
use crate::engine::realtime::hub::Topic;
use chrono::Utc;
use log::{error, info};
use serde_json::Value;
use uuid::Uuid;

pub async fn continue_turn(orch: &Orchestrator, conversation_id: Uuid, _inbound_message_id: Uuid) -> EngineResult<()> {
    let conversation = orch.store.get_conversation(&conversation_id)?;

    // Step 3: operator takeover suppresses automated replies entirely.
    if !conversation.agent_enabled {
        info!("[orchestrator] conversation {conversation_id} has agent disabled, skipping advance");
        return Ok(());
    }

    let lead = orch.store.get_lead_for_conversation(&conversation_id)?;
    let history = orch.store.history_window(&conversation_id, DEFAULT_HISTORY_WINDOW)?;

    // Step 4.
    let tool_catalogue = available_for_stage(lead.current_step);
    let turn = orch.agent.advance(&history, lead.current_step, &tool_catalogue).await?;

    // Step 5.
    let effects = apply_tools(orch, &conversation, lead.id, &turn).await?;

    // Step 6.
    let recomputed = next_stage(&lead, &effects);
    if recomputed != lead.current_step {
        orch.store.set_stage(&lead.id, recomputed)?;
        orch.hub.publish(
            Topic { user_id: None, conversation_id: Some(conversation_id) },
            EventName::LeadStageChanged,
            serde_json::json!({ "lead_qualification_id": lead.id, "stage": recomputed.as_str() }),
        );
    }

    // Step 7.
    if !turn.assistant_text.trim().is_empty() {
        dispatch_reply(orch, &conversation, &turn.assistant_text).await?;
    }

    // Step 8: conversation_updated, covering both the agent_enabled check and
    // any side effects applied above.
    orch.hub.publish(
        Topic { user_id: None, conversation_id: Some(conversation_id) },
        EventName::ConversationUpdated,
        serde_json::to_value(&conversation).unwrap_or_default(),
    );

    Ok(())
}

/// Persist an assistant Message and dispatch it via the messaging client.
/// On delivery failure the Message is kept but flagged, never rolled back.
async fn dispatch_reply(orch: &Orchestrator, conversation: &Conversation, text: &str) -> EngineResult<()> {
    let message = Message {
        id: Uuid::new_v4(),
        conversation_id: conversation.id,
        role: MessageRole::Assistant,
        content: text.to_string(),
        message_type: MessageType::Text,
        media_url: None,
        external_id: None,
        read: true,
        delivery_failed: false,
        deleted: false,
        created_at: Utc::now(),
    };
    let (persisted, _) = orch.store.append_message(&message)?;

    match orch.messaging.send_text(&conversation.external_id, text).await {
        Ok(_) => {}
        Err(err) => {
            error!("[orchestrator] delivery failed for conversation {}: {err}", conversation.id);
            orch.store.mark_delivery_failed(&persisted.id)?;
        }
    }

    orch.hub.publish(
        Topic { user_id: None, conversation_id: Some(conversation.id) },
        EventName::NewMessage,
        serde_json::to_value(&persisted).unwrap_or_default(),
    );
    Ok(())
}

/// Apply each tool invocation in order via the store/calendar clients,
/// gathering the effects the qualification state machine needs. A tool-call
/// failure of any kind never aborts the turn: it becomes a rewritten
/// assistant Message and stops the batch, but the turn (and the stage)
/// otherwise proceeds unchanged.
async fn apply_tools(orch: &Orchestrator, conversation: &Conversation, lead_id: Uuid, turn: &Turn) -> EngineResult<AppliedEffects> {
    let mut effects = AppliedEffects { last_user_message_at: Some(Utc::now()), ..Default::default() };

    for invocation in &turn.tool_invocations {
        let result = apply_one_tool(orch, conversation, lead_id, invocation, &mut effects).await;
        if let Err(err) = result {
            let message = Message {
                id: Uuid::new_v4(),
                conversation_id: conversation.id,
                role: MessageRole::Assistant,
                content: format!("I couldn't complete that: {err}"),
                message_type: MessageType::Text,
                media_url: None,
                external_id: None,
                read: true,
                delivery_failed: false,
                deleted: false,
                created_at: Utc::now(),
            };
            orch.store.append_message(&message)?;
            break;
        }
    }

    Ok(effects)
}

async fn apply_one_tool(orch: &Orchestrator, conversation: &Conversation, lead_id: Uuid, invocation: &ToolInvocation, effects: &mut AppliedEffects) -> EngineResult<()> {
    let args = &invocation.arguments;

    match invocation.name.as_str() {
        "record_consent" => {
            let consent = bool_field(args, "consent")?;
            orch.store.record_consent(&lead_id, consent)?;
            effects.consent_given = Some(consent);
        }

        "record_personal_data" => {
            let mut user = orch.store.get_user(&conversation.user_id)?;
            if let Some(v) = str_field(args, "full_name") {
                user.full_name = Some(v);
            }
            if let Some(v) = str_field(args, "email") {
                user.email = Some(v);
            }
            if let Some(v) = str_field(args, "phone") {
                user.phone = Some(v);
            }
            if let Some(v) = str_field(args, "company") {
                user.company = Some(v);
            }
            let updated = orch.store.update_user(&user)?;
            effects.has_full_name = updated.full_name.as_deref().is_some_and(|s| !s.trim().is_empty());
            effects.has_contact = updated.phone.is_some() || updated.email.is_some();
        }

        "record_bant" => {
            let update = crate::engine::store::BantUpdate {
                budget: str_field(args, "budget"),
                authority: str_field(args, "authority"),
                need: str_field(args, "need"),
                timeline: str_field(args, "timeline"),
            };
            let bant = orch.store.update_bant(&lead_id, update)?;
            effects.bant = Some(bant);
        }

        "record_requirements" => {
            let features = array_field(args, "features");
            let integrations = array_field(args, "integrations");
            effects.feature_count = features.len();
            let package = orch.store.create_requirement_package(
                &lead_id,
                str_field(args, "app_type"),
                str_field(args, "deadline"),
                features,
                integrations,
            )?;
            effects.requirements = Some(package.requirements);
        }

        "get_available_slots" => {
            // Pure lookup — no persistent effect, so nothing to record here.
            // The actual slot list is already in `assistant_text`/handled by
            // C4's next turn; C6 doesn't need to round-trip it.
        }

        "schedule_meeting" => {
            let start = datetime_field(args, "start")?;
            let end = datetime_field(args, "end")?;
            let subject = str_field(args, "subject").unwrap_or_else(|| "Intro call".to_string());
            let attendee = str_field(args, "attendee_email").unwrap_or_default();

            let created = orch.calendar.create_event(&subject, start, end, &[attendee], true).await?;
            let meeting = crate::atoms::types::Meeting {
                id: Uuid::new_v4(),
                user_id: conversation.user_id,
                lead_qualification_id: lead_id,
                external_meeting_id: Some(created.external_id),
                subject,
                start_time: start,
                end_time: end,
                status: crate::atoms::types::MeetingStatus::Scheduled,
                online_meeting_url: created.join_url,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            };
            orch.store.create_meeting(&meeting)?;
            effects.meeting_scheduled = true;
            orch.hub.publish(
                Topic { user_id: None, conversation_id: Some(conversation.id) },
                EventName::MeetingCreated,
                serde_json::to_value(&meeting).unwrap_or_default(),
            );
        }

        "cancel_meeting" => {
            let meeting_id: Uuid = str_field(args, "meeting_id")
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| EngineError::validation("cancel_meeting requires a valid meeting_id"))?;
            let meeting = orch.store.get_meeting(&meeting_id)?;
            if let Some(external_id) = &meeting.external_meeting_id {
                orch.calendar.cancel_event(external_id).await?;
            }
            let cancelled = orch.store.cancel_meeting(&meeting_id)?;
            orch.hub.publish(
                Topic { user_id: None, conversation_id: Some(conversation.id) },
                EventName::MeetingCancelled,
                serde_json::to_value(&cancelled).unwrap_or_default(),
            );
        }

        "end_conversation" => {
            effects.explicit_end_reason = Some(str_field(args, "reason").unwrap_or_else(|| "unspecified".to_string()));
        }

        other => {
            return Err(EngineError::validation(format!("unknown tool invocation: {other}")));
        }
    }

    Ok(())
}

fn bool_field(args: &Value, key: &str) -> EngineResult<bool> {
    args.get(key)
        .and_then(Value::as_bool)
        .ok_or_else(|| EngineError::validation(format!("missing boolean field `{key}`")))
}

fn str_field(args: &Value, key: &str) -> Option<String> {
    args.get(key).and_then(Value::as_str).map(|s| s.to_string())
}

fn array_field(args: &Value, key: &str) -> Vec<(String, Option<String>)> {
    args.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let name = item.get("name").and_then(Value::as_str)?.to_string();
                    let description = item.get("description").and_then(Value::as_str).map(|s| s.to_string());
                    Some((name, description))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn datetime_field(args: &Value, key: &str) -> EngineResult<chrono::DateTime<Utc>> {
    args.get(key)
        .and_then(Value::as_str)
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| EngineError::validation(format!("missing or invalid datetime field `{key}`")))
}
