// Per-conversation actor registry. Each conversation gets its own mpsc
// channel and task, spawned the first time a message arrives and torn
// down after a period of inactivity. Messages for the same conversation
// are drained strictly in arrival order by a single task, which is what
// gives us "at most one in-flight advance per conversation" for free.

use super::turn;
use super::Orchestrator;
use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

const MAILBOX_CAPACITY: usize = 64;
const IDLE_TEARDOWN: Duration = Duration::from_secs(5 * 60);

pub struct MailboxRegistry {
    senders: Mutex<HashMap<Uuid, mpsc::Sender<Uuid>>>,
}

impl MailboxRegistry {
    pub fn new() -> Self {
        Self { senders: Mutex::new(HashMap::new()) }
    }

    /// Get the sender for `conversation_id`, spawning its actor task if it
    /// doesn't exist (or has torn itself down since the last message).
    pub fn get_or_spawn(&self, orchestrator: Arc<Orchestrator>, conversation_id: Uuid) -> mpsc::Sender<Uuid> {
        let mut senders = self.senders.lock();
        if let Some(tx) = senders.get(&conversation_id) {
            if !tx.is_closed() {
                return tx.clone();
            }
        }

        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        senders.insert(conversation_id, tx.clone());
        tokio::spawn(run_mailbox(orchestrator, conversation_id, rx));
        tx
    }
}

async fn run_mailbox(orchestrator: Arc<Orchestrator>, conversation_id: Uuid, mut rx: mpsc::Receiver<Uuid>) {
    debug!("[orchestrator] mailbox for {conversation_id} started");
    loop {
        match tokio::time::timeout(IDLE_TEARDOWN, rx.recv()).await {
            Ok(Some(message_id)) => {
                if let Err(err) = turn::continue_turn(&orchestrator, conversation_id, message_id).await {
                    warn!("[orchestrator] turn failed for conversation {conversation_id}: {err}");
                }
            }
            Ok(None) => break,
            Err(_timeout) => break,
        }
    }
    orchestrator.mailboxes.senders.lock().remove(&conversation_id);
    debug!("[orchestrator] mailbox for {conversation_id} torn down");
}
