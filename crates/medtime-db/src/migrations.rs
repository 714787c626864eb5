use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);"
    )?;

    let version: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id                      TEXT PRIMARY KEY,
                username                TEXT NOT NULL UNIQUE,
                timezone                TEXT,
                push_token              TEXT,
                socket_enabled          INTEGER NOT NULL DEFAULT 1,
                whatsapp_enabled        INTEGER NOT NULL DEFAULT 0,
                whatsapp_number         TEXT,
                telegram_enabled        INTEGER NOT NULL DEFAULT 0,
                telegram_chat_id        TEXT,
                created_at              TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
                updated_at              TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
            );

            CREATE TABLE medications (
                id                  TEXT PRIMARY KEY,
                user_id             TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                name                TEXT NOT NULL,
                description         TEXT,
                start_at            TEXT NOT NULL,
                interval_hours      INTEGER NOT NULL CHECK (interval_hours > 0),
                is_recurring        INTEGER NOT NULL DEFAULT 0,
                duration_days       INTEGER,
                total_quantity      REAL NOT NULL,
                remaining_quantity  REAL NOT NULL,
                unit                TEXT NOT NULL,
                dosage_quantity     REAL NOT NULL,
                created_at          TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
                CHECK (is_recurring = 1 OR duration_days IS NOT NULL)
            );

            CREATE INDEX idx_medications_user ON medications(user_id);

            CREATE TABLE reminders (
                id              TEXT PRIMARY KEY,
                medication_id   TEXT NOT NULL REFERENCES medications(id) ON DELETE CASCADE,
                scheduled_for   TEXT NOT NULL,
                taken           INTEGER NOT NULL DEFAULT 0,
                taken_at        TEXT,
                skipped         INTEGER NOT NULL DEFAULT 0,
                skipped_reason  TEXT,
                notified        INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
                updated_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
                UNIQUE(medication_id, scheduled_for)
            );

            CREATE INDEX idx_reminders_pending
                ON reminders(taken, skipped, notified, scheduled_for);

            CREATE TABLE medication_logs (
                id              TEXT PRIMARY KEY,
                medication_id   TEXT NOT NULL REFERENCES medications(id) ON DELETE CASCADE,
                reminder_id     TEXT UNIQUE,
                scheduled_for   TEXT,
                taken_at        TEXT,
                skipped         INTEGER NOT NULL DEFAULT 0,
                skipped_reason  TEXT,
                notes           TEXT NOT NULL DEFAULT '',
                created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
            );

            CREATE INDEX idx_medication_logs_created
                ON medication_logs(created_at);

            INSERT INTO schema_version (version) VALUES (1);
            "
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (desktop sync watermark)");
        conn.execute_batch(
            "
            ALTER TABLE users ADD COLUMN desktop_sync_enabled INTEGER NOT NULL DEFAULT 0;
            ALTER TABLE users ADD COLUMN desktop_sync_enabled_at TEXT;

            INSERT INTO schema_version (version) VALUES (2);
            "
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
