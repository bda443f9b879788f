use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::User;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

fn row_to_user(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get::<_, String>(0)?.parse().unwrap_or_default(),
        phone: row.get(1)?,
        email: row.get(2)?,
        full_name: row.get(3)?,
        company: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

const SELECT: &str = "SELECT id, phone, email, full_name, company, created_at, updated_at FROM users";

pub(super) fn get(conn: &Connection, id: &Uuid) -> EngineResult<User> {
    conn.query_row(&format!("{SELECT} WHERE id = ?1"), params![id.to_string()], row_to_user)
        .optional()?
        .ok_or_else(|| EngineError::not_found(format!("user {id}")))
}

pub(super) fn get_by_phone(conn: &Connection, phone: &str) -> EngineResult<Option<User>> {
    Ok(conn
        .query_row(&format!("{SELECT} WHERE phone = ?1"), params![phone], row_to_user)
        .optional()?)
}

pub(super) fn list(conn: &Connection) -> EngineResult<Vec<User>> {
    let mut stmt = conn.prepare(&format!("{SELECT} ORDER BY created_at ASC, id ASC"))?;
    let rows = stmt.query_map([], row_to_user)?.filter_map(|r| r.ok()).collect();
    Ok(rows)
}

pub(super) fn update(conn: &Connection, user: &User) -> EngineResult<User> {
    conn.execute(
        "UPDATE users SET phone = ?2, email = ?3, full_name = ?4, company = ?5, updated_at = ?6 WHERE id = ?1",
        params![
            user.id.to_string(),
            user.phone,
            user.email,
            user.full_name,
            user.company,
            Utc::now(),
        ],
    )?;
    get(conn, &user.id)
}

/// Upsert by phone, falling back to email, inside an already-open transaction.
pub(super) fn upsert_tx(
    conn: &Connection,
    phone: Option<&str>,
    email: Option<&str>,
) -> EngineResult<User> {
    if phone.is_none() && email.is_none() {
        return Err(EngineError::validation("a party must have at least one of phone/email"));
    }

    let existing = if let Some(p) = phone {
        conn.query_row(&format!("{SELECT} WHERE phone = ?1"), params![p], row_to_user).optional()?
    } else {
        None
    };
    let existing = match existing {
        Some(u) => Some(u),
        None => {
            if let Some(e) = email {
                conn.query_row(&format!("{SELECT} WHERE email = ?1"), params![e], row_to_user).optional()?
            } else {
                None
            }
        }
    };

    if let Some(user) = existing {
        return Ok(user);
    }

    let id = Uuid::new_v4();
    let now = Utc::now();
    conn.execute(
        "INSERT INTO users (id, phone, email, full_name, company, created_at, updated_at)
         VALUES (?1, ?2, ?3, NULL, NULL, ?4, ?4)",
        params![id.to_string(), phone, email, now],
    )?;

    Ok(User {
        id,
        phone: phone.map(String::from),
        email: email.map(String::from),
        full_name: None,
        company: None,
        created_at: now,
        updated_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::store::Store;

    #[test]
    fn upsert_is_idempotent_by_phone() {
        let store = Store::open_in_memory().unwrap();
        let mut conn = store.conn.lock();
        let tx = conn.transaction().unwrap();
        let a = upsert_tx(&tx, Some("+15551234"), None).unwrap();
        let b = upsert_tx(&tx, Some("+15551234"), None).unwrap();
        tx.commit().unwrap();
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn rejects_party_without_phone_or_email() {
        let store = Store::open_in_memory().unwrap();
        let mut conn = store.conn.lock();
        let tx = conn.transaction().unwrap();
        assert!(upsert_tx(&tx, None, None).is_err());
    }
}
