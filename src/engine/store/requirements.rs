use crate::atoms::error::EngineResult;
use crate::atoms::types::{Feature, Integration, Requirements};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RequirementPackage {
    pub requirements: Requirements,
    pub features: Vec<Feature>,
    pub integrations: Vec<Integration>,
}

fn row_to_requirements(row: &Row) -> rusqlite::Result<Requirements> {
    Ok(Requirements {
        id: row.get::<_, String>(0)?.parse().unwrap_or_default(),
        lead_qualification_id: row.get::<_, String>(1)?.parse().unwrap_or_default(),
        app_type: row.get(2)?,
        deadline: row.get(3)?,
    })
}

pub(super) fn get(conn: &Connection, lead_id: &Uuid) -> EngineResult<Option<RequirementPackage>> {
    let requirements = conn
        .query_row(
            "SELECT id, lead_qualification_id, app_type, deadline FROM requirements WHERE lead_qualification_id = ?1",
            params![lead_id.to_string()],
            row_to_requirements,
        )
        .optional()?;

    let Some(requirements) = requirements else { return Ok(None) };

    let mut feature_stmt = conn.prepare("SELECT id, requirement_id, name, description FROM features WHERE requirement_id = ?1")?;
    let features = feature_stmt
        .query_map(params![requirements.id.to_string()], |row| {
            Ok(Feature {
                id: row.get::<_, String>(0)?.parse().unwrap_or_default(),
                requirement_id: row.get::<_, String>(1)?.parse().unwrap_or_default(),
                name: row.get(2)?,
                description: row.get(3)?,
            })
        })?
        .filter_map(|r| r.ok())
        .collect();

    let mut integration_stmt =
        conn.prepare("SELECT id, requirement_id, name, description FROM integrations WHERE requirement_id = ?1")?;
    let integrations = integration_stmt
        .query_map(params![requirements.id.to_string()], |row| {
            Ok(Integration {
                id: row.get::<_, String>(0)?.parse().unwrap_or_default(),
                requirement_id: row.get::<_, String>(1)?.parse().unwrap_or_default(),
                name: row.get(2)?,
                description: row.get(3)?,
            })
        })?
        .filter_map(|r| r.ok())
        .collect();

    Ok(Some(RequirementPackage { requirements, features, integrations }))
}

/// Idempotent upsert: applying the same `(lead_id, features, integrations)`
/// twice leaves state equivalent to applying it once — existing features and
/// integrations by name are replaced rather than duplicated.
pub(super) fn create_package_tx(
    conn: &Connection,
    lead_id: &Uuid,
    app_type: Option<String>,
    deadline: Option<String>,
    features: Vec<(String, Option<String>)>,
    integrations: Vec<(String, Option<String>)>,
) -> EngineResult<RequirementPackage> {
    let requirement_id: String = conn
        .query_row(
            "SELECT id FROM requirements WHERE lead_qualification_id = ?1",
            params![lead_id.to_string()],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    conn.execute(
        "INSERT INTO requirements (id, lead_qualification_id, app_type, deadline) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(lead_qualification_id) DO UPDATE SET app_type = excluded.app_type, deadline = excluded.deadline",
        params![requirement_id, lead_id.to_string(), app_type, deadline],
    )?;

    conn.execute("DELETE FROM features WHERE requirement_id = ?1", params![requirement_id])?;
    conn.execute("DELETE FROM integrations WHERE requirement_id = ?1", params![requirement_id])?;

    for (name, description) in &features {
        conn.execute(
            "INSERT INTO features (id, requirement_id, name, description) VALUES (?1, ?2, ?3, ?4)",
            params![Uuid::new_v4().to_string(), requirement_id, name, description],
        )?;
    }
    for (name, description) in &integrations {
        conn.execute(
            "INSERT INTO integrations (id, requirement_id, name, description) VALUES (?1, ?2, ?3, ?4)",
            params![Uuid::new_v4().to_string(), requirement_id, name, description],
        )?;
    }

    get(conn, lead_id)?.ok_or_else(|| {
        crate::atoms::error::EngineError::Internal("requirement package vanished after insert".into())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::Platform;
    use crate::engine::store::Store;

    #[test]
    fn create_package_twice_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let (_, _, lead) = store
            .upsert_user_and_open_conversation(Platform::Whatsapp, "party-1", Some("+1555"), None)
            .unwrap();

        let features = vec![("automation".to_string(), None)];
        let integrations = vec![("slack".to_string(), None)];

        store
            .create_requirement_package(&lead.id, Some("web".into()), Some("Q3".into()), features.clone(), integrations.clone())
            .unwrap();
        let second = store
            .create_requirement_package(&lead.id, Some("web".into()), Some("Q3".into()), features, integrations)
            .unwrap();

        assert_eq!(second.features.len(), 1);
        assert_eq!(second.integrations.len(), 1);
    }
}
