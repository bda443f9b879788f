use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{BantData, LeadQualification, Stage};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

fn row_to_lead(row: &Row) -> rusqlite::Result<LeadQualification> {
    let step: String = row.get(4)?;
    Ok(LeadQualification {
        id: row.get::<_, String>(0)?.parse().unwrap_or_default(),
        user_id: row.get::<_, String>(1)?.parse().unwrap_or_default(),
        conversation_id: row.get::<_, String>(2)?.parse().unwrap_or_default(),
        consent: row.get::<_, i64>(3)? != 0,
        current_step: Stage::parse(&step).unwrap_or(Stage::Start),
        consent_refusals: row.get::<_, i64>(5)? as u32,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

const SELECT: &str =
    "SELECT id, user_id, conversation_id, consent, current_step, consent_refusals, created_at, updated_at FROM lead_qualification";

pub(super) fn get(conn: &Connection, id: &Uuid) -> EngineResult<LeadQualification> {
    conn.query_row(&format!("{SELECT} WHERE id = ?1"), params![id.to_string()], row_to_lead)
        .optional()?
        .ok_or_else(|| EngineError::not_found(format!("lead {id}")))
}

pub(super) fn get_for_conversation(conn: &Connection, conversation_id: &Uuid) -> EngineResult<LeadQualification> {
    conn.query_row(
        &format!("{SELECT} WHERE conversation_id = ?1"),
        params![conversation_id.to_string()],
        row_to_lead,
    )
    .optional()?
    .ok_or_else(|| EngineError::not_found(format!("lead for conversation {conversation_id}")))
}

pub(super) fn list(conn: &Connection) -> EngineResult<Vec<LeadQualification>> {
    let mut stmt = conn.prepare(&format!("{SELECT} ORDER BY created_at ASC, id ASC"))?;
    let rows = stmt.query_map([], row_to_lead)?.filter_map(|r| r.ok()).collect();
    Ok(rows)
}

pub(super) fn set_stage(conn: &Connection, id: &Uuid, stage: Stage) -> EngineResult<LeadQualification> {
    conn.execute(
        "UPDATE lead_qualification SET current_step = ?2, updated_at = ?3 WHERE id = ?1",
        params![id.to_string(), stage.as_str(), Utc::now()],
    )?;
    get(conn, id)
}

pub(super) fn record_consent(conn: &Connection, id: &Uuid, consent: bool) -> EngineResult<LeadQualification> {
    if consent {
        conn.execute(
            "UPDATE lead_qualification SET consent = 1, updated_at = ?2 WHERE id = ?1",
            params![id.to_string(), Utc::now()],
        )?;
    } else {
        conn.execute(
            "UPDATE lead_qualification SET consent_refusals = consent_refusals + 1, updated_at = ?2 WHERE id = ?1",
            params![id.to_string(), Utc::now()],
        )?;
    }
    get(conn, id)
}

pub(super) fn list_abandoned_candidates(
    conn: &Connection,
    older_than: DateTime<Utc>,
) -> EngineResult<Vec<LeadQualification>> {
    let mut stmt = conn.prepare(
        "SELECT lq.id, lq.user_id, lq.conversation_id, lq.consent, lq.current_step, lq.consent_refusals,
                lq.created_at, lq.updated_at
         FROM lead_qualification lq
         WHERE lq.current_step NOT IN ('completed', 'abandoned')
           AND NOT EXISTS (
               SELECT 1 FROM messages m
               WHERE m.conversation_id = lq.conversation_id
                 AND m.role = 'user'
                 AND m.created_at > ?1
           )",
    )?;
    let rows = stmt.query_map(params![older_than], row_to_lead)?.filter_map(|r| r.ok()).collect();
    Ok(rows)
}

/// Resolve (or create) the LeadQualification for `(user, conversation)`.
pub(super) fn resolve_or_create_tx(conn: &Connection, user_id: &Uuid, conversation_id: &Uuid) -> EngineResult<LeadQualification> {
    if let Some(existing) = conn
        .query_row(
            &format!("{SELECT} WHERE conversation_id = ?1"),
            params![conversation_id.to_string()],
            row_to_lead,
        )
        .optional()?
    {
        return Ok(existing);
    }

    let id = Uuid::new_v4();
    let now = Utc::now();
    conn.execute(
        "INSERT INTO lead_qualification (id, user_id, conversation_id, consent, current_step, consent_refusals, created_at, updated_at)
         VALUES (?1, ?2, ?3, 0, 'start', 0, ?4, ?4)",
        params![id.to_string(), user_id.to_string(), conversation_id.to_string(), now],
    )?;
    conn.execute(
        "INSERT INTO bant_data (id, lead_qualification_id, updated_at) VALUES (?1, ?2, ?3)",
        params![Uuid::new_v4().to_string(), id.to_string(), now],
    )?;

    Ok(LeadQualification {
        id,
        user_id: *user_id,
        conversation_id: *conversation_id,
        consent: false,
        current_step: Stage::Start,
        consent_refusals: 0,
        created_at: now,
        updated_at: now,
    })
}

fn row_to_bant(row: &Row) -> rusqlite::Result<BantData> {
    Ok(BantData {
        id: row.get::<_, String>(0)?.parse().unwrap_or_default(),
        lead_qualification_id: row.get::<_, String>(1)?.parse().unwrap_or_default(),
        budget: row.get(2)?,
        authority: row.get(3)?,
        need: row.get(4)?,
        timeline: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

pub(super) fn get_bant(conn: &Connection, lead_id: &Uuid) -> EngineResult<BantData> {
    conn.query_row(
        "SELECT id, lead_qualification_id, budget, authority, need, timeline, updated_at
         FROM bant_data WHERE lead_qualification_id = ?1",
        params![lead_id.to_string()],
        row_to_bant,
    )
    .optional()?
    .ok_or_else(|| EngineError::not_found(format!("bant data for lead {lead_id}")))
}

/// Fields to update; `None` leaves the existing value unchanged (a subset
/// update is a no-op for fields it doesn't name).
#[derive(Debug, Default, Clone)]
pub struct BantUpdate {
    pub budget: Option<String>,
    pub authority: Option<String>,
    pub need: Option<String>,
    pub timeline: Option<String>,
}

pub(super) fn update_bant(conn: &Connection, lead_id: &Uuid, update: BantUpdate) -> EngineResult<BantData> {
    let current = get_bant(conn, lead_id)?;
    conn.execute(
        "UPDATE bant_data SET budget = ?2, authority = ?3, need = ?4, timeline = ?5, updated_at = ?6
         WHERE lead_qualification_id = ?1",
        params![
            lead_id.to_string(),
            update.budget.or(current.budget),
            update.authority.or(current.authority),
            update.need.or(current.need),
            update.timeline.or(current.timeline),
            Utc::now(),
        ],
    )?;
    get_bant(conn, lead_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::Platform;
    use crate::engine::store::Store;

    #[test]
    fn bant_update_is_a_noop_for_unset_fields() {
        let store = Store::open_in_memory().unwrap();
        let (_, _, lead) = store
            .upsert_user_and_open_conversation(Platform::Whatsapp, "party-1", Some("+1555"), None)
            .unwrap();

        store
            .update_bant(&lead.id, BantUpdate { budget: Some("20k".into()), ..Default::default() })
            .unwrap();
        let after = store.update_bant(&lead.id, BantUpdate::default()).unwrap();
        assert_eq!(after.budget.as_deref(), Some("20k"));
    }

    #[test]
    fn stage_never_regresses_implicitly() {
        let store = Store::open_in_memory().unwrap();
        let (_, _, lead) = store
            .upsert_user_and_open_conversation(Platform::Whatsapp, "party-1", Some("+1555"), None)
            .unwrap();
        store.set_stage(&lead.id, Stage::Bant).unwrap();
        let updated = store.set_stage(&lead.id, Stage::Bant).unwrap();
        assert_eq!(updated.current_step, Stage::Bant);
    }
}
