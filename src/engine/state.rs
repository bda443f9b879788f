// engine/state.rs — process-wide dependency container (axum shared state).

use crate::atoms::error::EngineResult;
use crate::config::Config;
use crate::engine::agent::AnyAgentRuntime;
use crate::engine::calendar::AnyCalendarClient;
use crate::engine::messaging::AnyMessagingClient;
use crate::engine::orchestrator::Orchestrator;
use crate::engine::realtime::hub::Hub;
use crate::engine::store::Store;
use std::sync::Arc;

/// Everything an axum handler needs. Cheap to clone — every field is an
/// `Arc` (or the handle types are already cheap to clone internally).
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub orchestrator: Arc<Orchestrator>,
    pub hub: Arc<Hub>,
    pub jwt_secret: Arc<String>,
}

impl AppState {
    pub fn new(config: &Config, store: Store, calendar: AnyCalendarClient, messaging: AnyMessagingClient, agent: AnyAgentRuntime) -> EngineResult<Self> {
        let store = Arc::new(store);
        let hub = Arc::new(Hub::new());
        let orchestrator = Arc::new(Orchestrator::new(store.clone(), Arc::new(calendar), Arc::new(messaging), Arc::new(agent), hub.clone()));

        Ok(Self { store, orchestrator, hub, jwt_secret: Arc::new(config.jwt_secret.clone()) })
    }
}
