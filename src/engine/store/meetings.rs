use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{Meeting, MeetingStatus};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

fn row_to_meeting(row: &Row) -> rusqlite::Result<Meeting> {
    let status: String = row.get(7)?;
    Ok(Meeting {
        id: row.get::<_, String>(0)?.parse().unwrap_or_default(),
        user_id: row.get::<_, String>(1)?.parse().unwrap_or_default(),
        lead_qualification_id: row.get::<_, String>(2)?.parse().unwrap_or_default(),
        external_meeting_id: row.get(3)?,
        subject: row.get(4)?,
        start_time: row.get(5)?,
        end_time: row.get(6)?,
        status: MeetingStatus::parse(&status).unwrap_or(MeetingStatus::Scheduled),
        online_meeting_url: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

const SELECT: &str = "SELECT id, user_id, lead_qualification_id, external_meeting_id, subject, start_time, end_time, status, online_meeting_url, created_at, updated_at FROM meetings";

pub(super) fn create(conn: &Connection, meeting: &Meeting) -> EngineResult<Meeting> {
    if meeting.start_time >= meeting.end_time {
        return Err(EngineError::constraint("meeting start_time must precede end_time"));
    }

    let has_active = active_for_lead(conn, &meeting.lead_qualification_id)?.is_some();
    if has_active {
        return Err(EngineError::constraint(format!(
            "lead {} already has a non-cancelled meeting",
            meeting.lead_qualification_id
        )));
    }

    conn.execute(
        "INSERT INTO meetings (id, user_id, lead_qualification_id, external_meeting_id, subject, start_time, end_time, status, online_meeting_url, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
        params![
            meeting.id.to_string(),
            meeting.user_id.to_string(),
            meeting.lead_qualification_id.to_string(),
            meeting.external_meeting_id,
            meeting.subject,
            meeting.start_time,
            meeting.end_time,
            meeting.status.as_str(),
            meeting.online_meeting_url,
            meeting.created_at,
        ],
    )?;
    get(conn, &meeting.id)
}

pub(super) fn get(conn: &Connection, id: &Uuid) -> EngineResult<Meeting> {
    conn.query_row(&format!("{SELECT} WHERE id = ?1"), params![id.to_string()], row_to_meeting)
        .optional()?
        .ok_or_else(|| EngineError::not_found(format!("meeting {id}")))
}

pub(super) fn active_for_lead(conn: &Connection, lead_id: &Uuid) -> EngineResult<Option<Meeting>> {
    Ok(conn
        .query_row(
            &format!("{SELECT} WHERE lead_qualification_id = ?1 AND status != 'cancelled'"),
            params![lead_id.to_string()],
            row_to_meeting,
        )
        .optional()?)
}

pub(super) fn set_status(conn: &Connection, id: &Uuid, status: MeetingStatus) -> EngineResult<Meeting> {
    conn.execute(
        "UPDATE meetings SET status = ?2, updated_at = ?3 WHERE id = ?1",
        params![id.to_string(), status.as_str(), Utc::now()],
    )?;
    get(conn, id)
}

pub(super) fn list_between(conn: &Connection, start: DateTime<Utc>, end: DateTime<Utc>) -> EngineResult<Vec<Meeting>> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT} WHERE start_time >= ?1 AND start_time < ?2 AND status != 'cancelled' ORDER BY start_time ASC"
    ))?;
    let rows = stmt.query_map(params![start, end], row_to_meeting)?.filter_map(|r| r.ok()).collect();
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::Platform;
    use crate::engine::store::Store;
    use chrono::Duration;

    #[test]
    fn rejects_end_before_start() {
        let store = Store::open_in_memory().unwrap();
        let (user, _, lead) = store
            .upsert_user_and_open_conversation(Platform::Whatsapp, "party-1", Some("+1555"), None)
            .unwrap();
        let now = Utc::now();
        let meeting = Meeting {
            id: Uuid::new_v4(),
            user_id: user.id,
            lead_qualification_id: lead.id,
            external_meeting_id: None,
            subject: "Intro call".into(),
            start_time: now,
            end_time: now - Duration::minutes(30),
            status: MeetingStatus::Scheduled,
            online_meeting_url: None,
            created_at: now,
            updated_at: now,
        };
        assert!(store.create_meeting(&meeting).is_err());
    }

    #[test]
    fn at_most_one_noncancelled_meeting_per_lead() {
        let store = Store::open_in_memory().unwrap();
        let (user, _, lead) = store
            .upsert_user_and_open_conversation(Platform::Whatsapp, "party-1", Some("+1555"), None)
            .unwrap();
        let now = Utc::now();
        let base = Meeting {
            id: Uuid::new_v4(),
            user_id: user.id,
            lead_qualification_id: lead.id,
            external_meeting_id: None,
            subject: "Intro call".into(),
            start_time: now,
            end_time: now + Duration::minutes(30),
            status: MeetingStatus::Scheduled,
            online_meeting_url: None,
            created_at: now,
            updated_at: now,
        };
        store.create_meeting(&base).unwrap();

        let mut second = base.clone();
        second.id = Uuid::new_v4();
        second.start_time = now + Duration::hours(1);
        second.end_time = now + Duration::hours(2);
        assert!(store.create_meeting(&second).is_err());
    }
}
