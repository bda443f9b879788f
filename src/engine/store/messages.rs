use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{Message, MessageRole, MessageType};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

fn row_to_message(row: &Row) -> rusqlite::Result<Message> {
    let role: String = row.get(2)?;
    let message_type: String = row.get(4)?;
    Ok(Message {
        id: row.get::<_, String>(0)?.parse().unwrap_or_default(),
        conversation_id: row.get::<_, String>(1)?.parse().unwrap_or_default(),
        role: MessageRole::parse(&role).unwrap_or(MessageRole::User),
        content: row.get(3)?,
        message_type: MessageType::parse(&message_type).unwrap_or(MessageType::Text),
        media_url: row.get(5)?,
        external_id: row.get(6)?,
        read: row.get::<_, i64>(7)? != 0,
        delivery_failed: row.get::<_, i64>(8)? != 0,
        deleted: row.get::<_, i64>(9)? != 0,
        created_at: row.get(10)?,
    })
}

const SELECT: &str = "SELECT id, conversation_id, role, content, message_type, media_url, external_id, read, delivery_failed, deleted, created_at FROM messages";

/// Append a message. Idempotent on `(conversation_id, external_id)`: if a
/// message with that external_id already exists, returns it unchanged and
/// `false` to signal the caller this was a duplicate drop.
pub(super) fn append(conn: &Connection, msg: &Message) -> EngineResult<(Message, bool)> {
    if let Some(external_id) = &msg.external_id {
        let existing = conn
            .query_row(
                &format!("{SELECT} WHERE conversation_id = ?1 AND external_id = ?2"),
                params![msg.conversation_id.to_string(), external_id],
                row_to_message,
            )
            .optional()?;
        if let Some(existing) = existing {
            return Ok((existing, false));
        }
    }

    conn.execute(
        "INSERT INTO messages (id, conversation_id, role, content, message_type, media_url, external_id, read, delivery_failed, deleted, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, ?10)",
        params![
            msg.id.to_string(),
            msg.conversation_id.to_string(),
            msg.role.as_str(),
            msg.content,
            msg.message_type.as_str(),
            msg.media_url,
            msg.external_id,
            msg.read as i64,
            msg.delivery_failed as i64,
            msg.created_at,
        ],
    )?;

    Ok((msg.clone(), true))
}

pub(super) fn list(conn: &Connection, conversation_id: &Uuid) -> EngineResult<Vec<Message>> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT} WHERE conversation_id = ?1 AND deleted = 0 ORDER BY created_at ASC, id ASC"
    ))?;
    let rows = stmt
        .query_map(params![conversation_id.to_string()], row_to_message)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// The trailing window handed to the agent runtime: the last `n` non-system
/// messages, with a single system message (if any) prepended, capped at
/// `n + 1` total entries.
pub(super) fn history_window(conn: &Connection, conversation_id: &Uuid, n: usize) -> EngineResult<Vec<Message>> {
    let all = list(conn, conversation_id)?;

    let system = all.iter().find(|m| m.role == MessageRole::System).cloned();
    let non_system: Vec<Message> = all.into_iter().filter(|m| m.role != MessageRole::System).collect();

    let tail_start = non_system.len().saturating_sub(n);
    let mut window: Vec<Message> = non_system[tail_start..].to_vec();

    if let Some(sys) = system {
        window.insert(0, sys);
    }

    Ok(window)
}

pub(super) fn mark_read(conn: &Connection, id: &Uuid) -> EngineResult<()> {
    conn.execute("UPDATE messages SET read = 1 WHERE id = ?1", params![id.to_string()])?;
    Ok(())
}

pub(super) fn mark_delivery_failed(conn: &Connection, id: &Uuid) -> EngineResult<()> {
    conn.execute(
        "UPDATE messages SET delivery_failed = 1 WHERE id = ?1",
        params![id.to_string()],
    )?;
    Ok(())
}

pub(super) fn soft_delete(conn: &Connection, id: &Uuid) -> EngineResult<()> {
    let updated = conn.execute("UPDATE messages SET deleted = 1 WHERE id = ?1", params![id.to_string()])?;
    if updated == 0 {
        return Err(EngineError::not_found(format!("message {id}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::Platform;
    use crate::engine::store::Store;
    use chrono::Utc;

    fn seed_conversation(store: &Store) -> Uuid {
        let (_, conversation, _) = store
            .upsert_user_and_open_conversation(Platform::Whatsapp, "party-1", Some("+1555"), None)
            .unwrap();
        conversation.id
    }

    #[test]
    fn duplicate_external_id_is_idempotent_drop() {
        let store = Store::open_in_memory().unwrap();
        let conversation_id = seed_conversation(&store);
        let msg = Message {
            id: Uuid::new_v4(),
            conversation_id,
            role: MessageRole::User,
            content: "hi".into(),
            message_type: MessageType::Text,
            media_url: None,
            external_id: Some("msg_42".into()),
            read: false,
            delivery_failed: false,
            deleted: false,
            created_at: Utc::now(),
        };
        let (_, first_inserted) = store.append_message(&msg).unwrap();
        let (_, second_inserted) = store.append_message(&msg).unwrap();
        assert!(first_inserted);
        assert!(!second_inserted);
        assert_eq!(store.list_messages(&conversation_id).unwrap().len(), 1);
    }

    #[test]
    fn history_window_caps_at_n_plus_one() {
        let store = Store::open_in_memory().unwrap();
        let conversation_id = seed_conversation(&store);

        for i in 0..20 {
            store
                .append_message(&Message {
                    id: Uuid::new_v4(),
                    conversation_id,
                    role: MessageRole::User,
                    content: format!("msg {i}"),
                    message_type: MessageType::Text,
                    media_url: None,
                    external_id: None,
                    read: false,
                    delivery_failed: false,
                    deleted: false,
                    created_at: Utc::now(),
                })
                .unwrap();
        }

        let window = store.history_window(&conversation_id, 5).unwrap();
        assert_eq!(window.len(), 5);
        assert_eq!(window.last().unwrap().content, "msg 19");
    }
}
