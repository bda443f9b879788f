// Connection registry and event fan-out for the Session Fan-Out protocol
// (C8). `tokio::sync::broadcast` already gives us the bounded-buffer +
// drop-oldest + lag-notification semantics the wire protocol wants; this
// module adds per-connection topic filtering on top of it.

use super::envelope::{event_frame, EventName, ServerFrame};
use crate::atoms::constants::WS_OUTBOUND_BUFFER;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// What a published event is "about" — a connection receives it if its
/// subscription matches either field (or the event has neither, i.e. is
/// public).
#[derive(Debug, Clone, Default)]
pub struct Topic {
    pub user_id: Option<Uuid>,
    pub conversation_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub topic: Topic,
    pub frame: ServerFrame,
}

/// A connection's subscriptions: implicitly the identifying `user_id` (if
/// any) plus every conversation it has referenced so far.
#[derive(Debug, Default)]
pub struct Subscription {
    pub user_id: Option<Uuid>,
    pub conversation_ids: parking_lot::Mutex<std::collections::HashSet<Uuid>>,
}

impl Subscription {
    pub fn new(user_id: Option<Uuid>) -> Self {
        Self { user_id, conversation_ids: parking_lot::Mutex::new(std::collections::HashSet::new()) }
    }

    pub fn watch_conversation(&self, conversation_id: Uuid) {
        self.conversation_ids.lock().insert(conversation_id);
    }

    pub fn matches(&self, topic: &Topic) -> bool {
        if topic.user_id.is_none() && topic.conversation_id.is_none() {
            return true;
        }
        if let (Some(mine), Some(theirs)) = (self.user_id, topic.user_id) {
            if mine == theirs {
                return true;
            }
        }
        if let Some(cid) = topic.conversation_id {
            if self.conversation_ids.lock().contains(&cid) {
                return true;
            }
        }
        false
    }
}

pub struct Hub {
    tx: broadcast::Sender<Arc<PublishedEvent>>,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(WS_OUTBOUND_BUFFER);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<PublishedEvent>> {
        self.tx.subscribe()
    }

    pub fn publish(&self, topic: Topic, name: EventName, data: Value) {
        let event = Arc::new(PublishedEvent { topic, frame: event_frame(name, data) });
        // No receivers is not an error — the event is simply dropped.
        let _ = self.tx.send(event);
    }

    /// Live WebSocket connections, for the C9 real-time-metrics snapshot.
    pub fn connection_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_topic_matches_every_subscription() {
        let sub = Subscription::new(Some(Uuid::new_v4()));
        assert!(sub.matches(&Topic::default()));
    }

    #[test]
    fn subscription_matches_own_user_id() {
        let user_id = Uuid::new_v4();
        let sub = Subscription::new(Some(user_id));
        let topic = Topic { user_id: Some(user_id), conversation_id: None };
        assert!(sub.matches(&topic));
    }

    #[test]
    fn subscription_matches_watched_conversation() {
        let sub = Subscription::new(None);
        let conv = Uuid::new_v4();
        let topic = Topic { user_id: None, conversation_id: Some(conv) };
        assert!(!sub.matches(&topic));
        sub.watch_conversation(conv);
        assert!(sub.matches(&topic));
    }

    #[tokio::test]
    async fn publish_delivers_to_subscriber() {
        let hub = Hub::new();
        let mut rx = hub.subscribe();
        hub.publish(Topic::default(), EventName::NewMessage, serde_json::json!({}));
        let event = rx.recv().await.unwrap();
        assert!(matches!(event.frame, ServerFrame::Event { .. }));
    }
}
