// Qualibot Engine — Conversation Orchestrator (C6)
// The heart of the system. Serializes processing per conversation: for a
// given conversation_id there is at most one in-flight advance at a time,
// concurrent arrivals queue in arrival order.
//
// Module layout:
//   mailbox.rs       — per-conversation actor registry, spawned on demand
//   turn.rs          — the turn protocol itself
//   timeout_sweep.rs — periodic abandon sweep

mod mailbox;
pub mod timeout_sweep;
mod turn;

use crate::atoms::error::EngineResult;
use crate::atoms::types::Message;
use crate::engine::agent::AnyAgentRuntime;
use crate::engine::calendar::AnyCalendarClient;
use crate::engine::messaging::AnyMessagingClient;
use crate::engine::realtime::hub::Hub;
use crate::engine::store::Store;
use mailbox::MailboxRegistry;
use std::sync::Arc;
use uuid::Uuid;

pub struct Orchestrator {
    pub(crate) store: Arc<Store>,
    pub(crate) calendar: Arc<AnyCalendarClient>,
    pub(crate) messaging: Arc<AnyMessagingClient>,
    pub(crate) agent: Arc<AnyAgentRuntime>,
    pub(crate) hub: Arc<Hub>,
    mailboxes: MailboxRegistry,
}

impl Orchestrator {
    pub fn new(store: Arc<Store>, calendar: Arc<AnyCalendarClient>, messaging: Arc<AnyMessagingClient>, agent: Arc<AnyAgentRuntime>, hub: Arc<Hub>) -> Self {
        Self { store, calendar, messaging, agent, hub, mailboxes: MailboxRegistry::new() }
    }

    /// Persist the inbound message (step 1 of the turn protocol) and hand
    /// the rest of the turn off to the conversation's mailbox. Returns
    /// `false` if the message was an idempotent duplicate — the caller
    /// (webhook ingest) still responds 200 either way.
    pub async fn submit(self: &Arc<Self>, conversation_id: Uuid, message: Message) -> EngineResult<bool> {
        let (persisted, is_new) = self.store.append_message(&message)?;
        if !is_new {
            return Ok(false);
        }

        self.hub.publish(
            crate::engine::realtime::hub::Topic { user_id: None, conversation_id: Some(conversation_id) },
            crate::engine::realtime::envelope::EventName::NewMessage,
            serde_json::to_value(&persisted).unwrap_or_default(),
        );

        let sender = self.mailboxes.get_or_spawn(self.clone(), conversation_id);
        sender
            .send(persisted.id)
            .await
            .map_err(|_| crate::atoms::error::EngineError::Internal("mailbox closed unexpectedly".into()))?;
        Ok(true)
    }
}
