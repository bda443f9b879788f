// Periodic abandon sweep: any LeadQualification whose conversation's latest
// user Message is older than ABANDON_AFTER and isn't already terminal gets
// moved to `abandoned`. Runs at most once every TIMEOUT_SWEEP_INTERVAL.

use super::Orchestrator;
use crate::atoms::constants::{ABANDON_AFTER, TIMEOUT_SWEEP_INTERVAL};
use crate::atoms::types::Stage;
use crate::engine::realtime::envelope::EventName;
use crate::engine::realtime::hub::Topic;
use chrono::Utc;
use log::{info, warn};
use std::sync::Arc;

/// Spawn the sweep as a background task. Returns the `JoinHandle` so the
/// caller (main.rs) can hold it and let it run for the process lifetime.
pub fn spawn(orchestrator: Arc<Orchestrator>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TIMEOUT_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(err) = run_once(&orchestrator) {
                warn!("[orchestrator] timeout sweep failed: {err}");
            }
        }
    })
}

fn run_once(orchestrator: &Orchestrator) -> crate::atoms::error::EngineResult<()> {
    let cutoff = Utc::now() - chrono::Duration::from_std(ABANDON_AFTER).unwrap_or(chrono::Duration::days(7));
    let candidates = orchestrator.store.list_abandoned_candidates(cutoff)?;

    for lead in candidates {
        if lead.current_step.is_terminal() {
            continue;
        }
        orchestrator.store.set_stage(&lead.id, Stage::Abandoned)?;
        info!("[orchestrator] lead {} abandoned by timeout sweep", lead.id);
        orchestrator.hub.publish(
            Topic { user_id: None, conversation_id: Some(lead.conversation_id) },
            EventName::LeadStageChanged,
            serde_json::json!({ "lead_qualification_id": lead.id, "stage": "abandoned" }),
        );
    }

    Ok(())
}
