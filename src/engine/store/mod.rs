// Qualibot Engine — Store Adapter (C1)
// Typed CRUD over the relational store. Sole mutator of persistent state;
// every other component goes through this module.
//
// Module layout:
//   schema        — migrations
//   users         — user CRUD + upsert-by-phone/email
//   conversations — conversation CRUD + active-conversation lookup
//   messages      — message CRUD + history windowing
//   leads         — LeadQualification + BantData CRUD
//   requirements  — Requirements/Feature/Integration CRUD
//   meetings      — meeting CRUD
//   dashboard     — aggregation queries backing C9

use crate::atoms::error::EngineResult;
use crate::atoms::types::{Conversation, LeadQualification, Platform, User};
use log::info;
use parking_lot::Mutex;
use rusqlite::Connection;

mod conversations;
pub mod dashboard;
mod leads;
mod meetings;
mod messages;
mod requirements;
mod schema;
mod users;

pub use leads::BantUpdate;
pub use requirements::RequirementPackage;

/// Thread-safe database wrapper. A single connection is sufficient: the
/// system's concurrency model (§5) has at most one writer, and rusqlite's
/// WAL mode lets readers proceed without blocking on it.
pub struct Store {
    pub(crate) conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the store database and run migrations.
    pub fn open(path: &str) -> EngineResult<Self> {
        info!("[store] opening database at {path}");
        let conn = Connection::open(path)?;

        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        conn.execute_batch("PRAGMA foreign_keys=ON;").ok();

        schema::run_migrations(&conn)?;

        Ok(Store { conn: Mutex::new(conn) })
    }

    /// Open an in-memory database with the full schema applied. Used by tests.
    pub fn open_in_memory() -> EngineResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;").ok();
        schema::run_migrations(&conn)?;
        Ok(Store { conn: Mutex::new(conn) })
    }

    /// Atomically resolve (or create) the User for this party, the active
    /// Conversation for `(platform, external_id)`, and the LeadQualification
    /// for `(user, conversation)`.
    pub fn upsert_user_and_open_conversation(
        &self,
        platform: Platform,
        external_id: &str,
        phone: Option<&str>,
        email: Option<&str>,
    ) -> EngineResult<(User, Conversation, LeadQualification)> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let user = users::upsert_tx(&tx, phone, email)?;
        let conversation = conversations::resolve_or_create_tx(&tx, &user.id, platform, external_id)?;
        let lead = leads::resolve_or_create_tx(&tx, &user.id, &conversation.id)?;

        tx.commit()?;
        Ok((user, conversation, lead))
    }

    // ── Users ──
    pub fn get_user(&self, id: &uuid::Uuid) -> EngineResult<User> {
        users::get(&self.conn.lock(), id)
    }

    pub fn get_user_by_phone(&self, phone: &str) -> EngineResult<Option<User>> {
        users::get_by_phone(&self.conn.lock(), phone)
    }

    pub fn list_users(&self) -> EngineResult<Vec<User>> {
        users::list(&self.conn.lock())
    }

    pub fn update_user(&self, user: &User) -> EngineResult<User> {
        users::update(&self.conn.lock(), user)
    }

    // ── Conversations ──
    pub fn get_conversation(&self, id: &uuid::Uuid) -> EngineResult<Conversation> {
        conversations::get(&self.conn.lock(), id)
    }

    pub fn list_conversations_for_user(&self, user_id: &uuid::Uuid) -> EngineResult<Vec<Conversation>> {
        conversations::list_for_user(&self.conn.lock(), user_id)
    }

    pub fn list_conversations(&self) -> EngineResult<Vec<Conversation>> {
        conversations::list(&self.conn.lock())
    }

    pub fn set_agent_enabled(&self, id: &uuid::Uuid, enabled: bool) -> EngineResult<Conversation> {
        conversations::set_agent_enabled(&self.conn.lock(), id, enabled)
    }

    pub fn close_conversation(&self, id: &uuid::Uuid) -> EngineResult<Conversation> {
        conversations::close(&self.conn.lock(), id)
    }

    pub fn create_conversation(&self, conversation: &Conversation) -> EngineResult<Conversation> {
        conversations::create(&self.conn.lock(), conversation)
    }

    // ── Messages ──
    pub fn append_message(
        &self,
        msg: &crate::atoms::types::Message,
    ) -> EngineResult<(crate::atoms::types::Message, bool)> {
        messages::append(&self.conn.lock(), msg)
    }

    pub fn list_messages(&self, conversation_id: &uuid::Uuid) -> EngineResult<Vec<crate::atoms::types::Message>> {
        messages::list(&self.conn.lock(), conversation_id)
    }

    pub fn history_window(
        &self,
        conversation_id: &uuid::Uuid,
        n: usize,
    ) -> EngineResult<Vec<crate::atoms::types::Message>> {
        messages::history_window(&self.conn.lock(), conversation_id, n)
    }

    pub fn mark_read(&self, id: &uuid::Uuid) -> EngineResult<()> {
        messages::mark_read(&self.conn.lock(), id)
    }

    pub fn mark_delivery_failed(&self, id: &uuid::Uuid) -> EngineResult<()> {
        messages::mark_delivery_failed(&self.conn.lock(), id)
    }

    pub fn soft_delete_message(&self, id: &uuid::Uuid) -> EngineResult<()> {
        messages::soft_delete(&self.conn.lock(), id)
    }

    // ── Leads ──
    pub fn get_lead(&self, id: &uuid::Uuid) -> EngineResult<LeadQualification> {
        leads::get(&self.conn.lock(), id)
    }

    pub fn get_lead_for_conversation(&self, conversation_id: &uuid::Uuid) -> EngineResult<LeadQualification> {
        leads::get_for_conversation(&self.conn.lock(), conversation_id)
    }

    pub fn set_stage(&self, id: &uuid::Uuid, stage: crate::atoms::types::Stage) -> EngineResult<LeadQualification> {
        leads::set_stage(&self.conn.lock(), id, stage)
    }

    pub fn record_consent(&self, id: &uuid::Uuid, consent: bool) -> EngineResult<LeadQualification> {
        leads::record_consent(&self.conn.lock(), id, consent)
    }

    pub fn get_bant(&self, lead_id: &uuid::Uuid) -> EngineResult<crate::atoms::types::BantData> {
        leads::get_bant(&self.conn.lock(), lead_id)
    }

    pub fn update_bant(&self, lead_id: &uuid::Uuid, update: BantUpdate) -> EngineResult<crate::atoms::types::BantData> {
        leads::update_bant(&self.conn.lock(), lead_id, update)
    }

    pub fn list_abandoned_candidates(
        &self,
        older_than: chrono::DateTime<chrono::Utc>,
    ) -> EngineResult<Vec<LeadQualification>> {
        leads::list_abandoned_candidates(&self.conn.lock(), older_than)
    }

    pub fn list_leads(&self) -> EngineResult<Vec<LeadQualification>> {
        leads::list(&self.conn.lock())
    }

    // ── Requirements ──
    pub fn get_requirements(&self, lead_id: &uuid::Uuid) -> EngineResult<Option<RequirementPackage>> {
        requirements::get(&self.conn.lock(), lead_id)
    }

    pub fn create_requirement_package(
        &self,
        lead_id: &uuid::Uuid,
        app_type: Option<String>,
        deadline: Option<String>,
        features: Vec<(String, Option<String>)>,
        integrations: Vec<(String, Option<String>)>,
    ) -> EngineResult<RequirementPackage> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let package = requirements::create_package_tx(&tx, lead_id, app_type, deadline, features, integrations)?;
        tx.commit()?;
        Ok(package)
    }

    // ── Meetings ──
    pub fn create_meeting(&self, meeting: &crate::atoms::types::Meeting) -> EngineResult<crate::atoms::types::Meeting> {
        meetings::create(&self.conn.lock(), meeting)
    }

    pub fn get_meeting(&self, id: &uuid::Uuid) -> EngineResult<crate::atoms::types::Meeting> {
        meetings::get(&self.conn.lock(), id)
    }

    pub fn active_meeting_for_lead(
        &self,
        lead_id: &uuid::Uuid,
    ) -> EngineResult<Option<crate::atoms::types::Meeting>> {
        meetings::active_for_lead(&self.conn.lock(), lead_id)
    }

    pub fn cancel_meeting(&self, id: &uuid::Uuid) -> EngineResult<crate::atoms::types::Meeting> {
        meetings::set_status(&self.conn.lock(), id, crate::atoms::types::MeetingStatus::Cancelled)
    }

    pub fn list_meetings_between(
        &self,
        start: chrono::DateTime<chrono::Utc>,
        end: chrono::DateTime<chrono::Utc>,
    ) -> EngineResult<Vec<crate::atoms::types::Meeting>> {
        meetings::list_between(&self.conn.lock(), start, end)
    }
}
