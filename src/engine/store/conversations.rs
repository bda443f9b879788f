use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{Conversation, ConversationStatus, Platform};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

fn row_to_conversation(row: &Row) -> rusqlite::Result<Conversation> {
    let platform: String = row.get(2)?;
    let status: String = row.get(4)?;
    Ok(Conversation {
        id: row.get::<_, String>(0)?.parse().unwrap_or_default(),
        user_id: row.get::<_, String>(1)?.parse().unwrap_or_default(),
        platform: Platform::parse(&platform).unwrap_or(Platform::Web),
        external_id: row.get(3)?,
        status: ConversationStatus::parse(&status).unwrap_or(ConversationStatus::Active),
        agent_enabled: row.get::<_, i64>(5)? != 0,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

const SELECT: &str = "SELECT id, user_id, platform, external_id, status, agent_enabled, created_at, updated_at FROM conversations";

pub(super) fn get(conn: &Connection, id: &Uuid) -> EngineResult<Conversation> {
    conn.query_row(&format!("{SELECT} WHERE id = ?1"), params![id.to_string()], row_to_conversation)
        .optional()?
        .ok_or_else(|| EngineError::not_found(format!("conversation {id}")))
}

pub(super) fn list(conn: &Connection) -> EngineResult<Vec<Conversation>> {
    let mut stmt = conn.prepare(&format!("{SELECT} ORDER BY created_at ASC, id ASC"))?;
    let rows = stmt.query_map([], row_to_conversation)?.filter_map(|r| r.ok()).collect();
    Ok(rows)
}

pub(super) fn list_for_user(conn: &Connection, user_id: &Uuid) -> EngineResult<Vec<Conversation>> {
    let mut stmt = conn.prepare(&format!("{SELECT} WHERE user_id = ?1 ORDER BY created_at ASC, id ASC"))?;
    let rows = stmt
        .query_map(params![user_id.to_string()], row_to_conversation)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

pub(super) fn create(conn: &Connection, conversation: &Conversation) -> EngineResult<Conversation> {
    conn.execute(
        "INSERT INTO conversations (id, user_id, platform, external_id, status, agent_enabled, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![
            conversation.id.to_string(),
            conversation.user_id.to_string(),
            conversation.platform.as_str(),
            conversation.external_id,
            conversation.status.as_str(),
            conversation.agent_enabled as i64,
            conversation.created_at,
        ],
    )?;
    get(conn, &conversation.id)
}

pub(super) fn set_agent_enabled(conn: &Connection, id: &Uuid, enabled: bool) -> EngineResult<Conversation> {
    conn.execute(
        "UPDATE conversations SET agent_enabled = ?2, updated_at = ?3 WHERE id = ?1",
        params![id.to_string(), enabled as i64, Utc::now()],
    )?;
    get(conn, id)
}

pub(super) fn close(conn: &Connection, id: &Uuid) -> EngineResult<Conversation> {
    conn.execute(
        "UPDATE conversations SET status = 'closed', updated_at = ?2 WHERE id = ?1",
        params![id.to_string(), Utc::now()],
    )?;
    get(conn, id)
}

/// Resolve the active conversation for `(platform, external_id)`, creating
/// one if none is active. Enforces the at-most-one-active invariant.
pub(super) fn resolve_or_create_tx(
    conn: &Connection,
    user_id: &Uuid,
    platform: Platform,
    external_id: &str,
) -> EngineResult<Conversation> {
    let existing = conn
        .query_row(
            &format!("{SELECT} WHERE platform = ?1 AND external_id = ?2 AND status = 'active'"),
            params![platform.as_str(), external_id],
            row_to_conversation,
        )
        .optional()?;

    if let Some(conversation) = existing {
        return Ok(conversation);
    }

    let id = Uuid::new_v4();
    let now = Utc::now();
    conn.execute(
        "INSERT INTO conversations (id, user_id, platform, external_id, status, agent_enabled, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 'active', 1, ?5, ?5)",
        params![id.to_string(), user_id.to_string(), platform.as_str(), external_id, now],
    )?;

    Ok(Conversation {
        id,
        user_id: *user_id,
        platform,
        external_id: external_id.to_string(),
        status: ConversationStatus::Active,
        agent_enabled: true,
        created_at: now,
        updated_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::store::Store;

    #[test]
    fn at_most_one_active_conversation_per_party() {
        let store = Store::open_in_memory().unwrap();
        let mut conn = store.conn.lock();
        let tx = conn.transaction().unwrap();
        let user_id = Uuid::new_v4();
        tx.execute(
            "INSERT INTO users (id, phone) VALUES (?1, '+1555')",
            params![user_id.to_string()],
        )
        .unwrap();
        let a = resolve_or_create_tx(&tx, &user_id, Platform::Whatsapp, "party-1").unwrap();
        let b = resolve_or_create_tx(&tx, &user_id, Platform::Whatsapp, "party-1").unwrap();
        tx.commit().unwrap();
        assert_eq!(a.id, b.id);
    }
}
