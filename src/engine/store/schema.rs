// Database schema and migrations for the Qualibot store.
// Called once at startup by Store::open() after WAL is enabled.
// Adding a column: append an idempotent ALTER TABLE … ADD COLUMN (errors
// silently swallowed) — never modify existing SQL to keep upgrade paths clean.

use crate::atoms::error::EngineResult;
use rusqlite::Connection;

pub(crate) fn run_migrations(conn: &Connection) -> EngineResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            phone TEXT,
            email TEXT,
            full_name TEXT,
            company TEXT,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_users_phone ON users(phone) WHERE phone IS NOT NULL;
        CREATE UNIQUE INDEX IF NOT EXISTS idx_users_email ON users(email) WHERE email IS NOT NULL;

        CREATE TABLE IF NOT EXISTS conversations (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            platform TEXT NOT NULL,
            external_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            agent_enabled INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
        );
        CREATE INDEX IF NOT EXISTS idx_conversations_party
            ON conversations(external_id, platform, status);
        CREATE INDEX IF NOT EXISTS idx_conversations_agent_enabled
            ON conversations(agent_enabled);

        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL DEFAULT '',
            message_type TEXT NOT NULL DEFAULT 'text',
            media_url TEXT,
            external_id TEXT,
            read INTEGER NOT NULL DEFAULT 0,
            delivery_failed INTEGER NOT NULL DEFAULT 0,
            deleted INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
        );
        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_messages_read ON messages(read);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_external_id
            ON messages(conversation_id, external_id) WHERE external_id IS NOT NULL;

        CREATE TABLE IF NOT EXISTS lead_qualification (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            conversation_id TEXT NOT NULL,
            consent INTEGER NOT NULL DEFAULT 0,
            current_step TEXT NOT NULL DEFAULT 'start',
            consent_refusals INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
            FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_lead_conversation
            ON lead_qualification(conversation_id);
        CREATE INDEX IF NOT EXISTS idx_lead_current_step ON lead_qualification(current_step);

        CREATE TABLE IF NOT EXISTS bant_data (
            id TEXT PRIMARY KEY,
            lead_qualification_id TEXT NOT NULL,
            budget TEXT,
            authority TEXT,
            need TEXT,
            timeline TEXT,
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            FOREIGN KEY (lead_qualification_id) REFERENCES lead_qualification(id) ON DELETE CASCADE
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_bant_lead ON bant_data(lead_qualification_id);

        CREATE TABLE IF NOT EXISTS requirements (
            id TEXT PRIMARY KEY,
            lead_qualification_id TEXT NOT NULL,
            app_type TEXT,
            deadline TEXT,
            FOREIGN KEY (lead_qualification_id) REFERENCES lead_qualification(id) ON DELETE CASCADE
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_requirements_lead ON requirements(lead_qualification_id);

        CREATE TABLE IF NOT EXISTS features (
            id TEXT PRIMARY KEY,
            requirement_id TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            FOREIGN KEY (requirement_id) REFERENCES requirements(id) ON DELETE CASCADE
        );
        CREATE INDEX IF NOT EXISTS idx_features_requirement ON features(requirement_id);

        CREATE TABLE IF NOT EXISTS integrations (
            id TEXT PRIMARY KEY,
            requirement_id TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            FOREIGN KEY (requirement_id) REFERENCES requirements(id) ON DELETE CASCADE
        );
        CREATE INDEX IF NOT EXISTS idx_integrations_requirement ON integrations(requirement_id);

        CREATE TABLE IF NOT EXISTS meetings (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            lead_qualification_id TEXT NOT NULL,
            external_meeting_id TEXT,
            subject TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'scheduled',
            online_meeting_url TEXT,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
            FOREIGN KEY (lead_qualification_id) REFERENCES lead_qualification(id) ON DELETE CASCADE
        );
        CREATE INDEX IF NOT EXISTS idx_meetings_start_time ON meetings(start_time);
        ",
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn in_memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA journal_mode = WAL;").unwrap();
        conn
    }

    #[test]
    fn migrations_run_cleanly() {
        let conn = in_memory_db();
        let result = run_migrations(&conn);
        assert!(result.is_ok(), "first migration run failed: {:?}", result);
    }

    #[test]
    fn migrations_idempotent() {
        let conn = in_memory_db();
        run_migrations(&conn).unwrap();
        let result = run_migrations(&conn);
        assert!(result.is_ok(), "second migration run failed: {:?}", result);
    }

    #[test]
    fn core_tables_created() {
        let conn = in_memory_db();
        run_migrations(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        for expected in [
            "users",
            "conversations",
            "messages",
            "lead_qualification",
            "bant_data",
            "requirements",
            "features",
            "integrations",
            "meetings",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing table {expected}");
        }
    }
}
