//! Schema creation. Every statement is `IF NOT EXISTS`, matching spec.md
//! §4.1/§6.2: the core does not implement migrations, only idempotent
//! creation, the way `skynet-sessions::db::init_db` does for its table.

use rusqlite::Connection;

use crate::error::Result;

pub fn init(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS inbox_messages (
            id                  TEXT PRIMARY KEY,
            source              TEXT NOT NULL,
            external_message_id TEXT NOT NULL,
            topic_key           TEXT NOT NULL,
            user_id             TEXT NOT NULL,
            text                TEXT NOT NULL,
            occurred_at         INTEGER NOT NULL,
            idempotency_key     TEXT NOT NULL,
            metadata            TEXT,
            status              TEXT NOT NULL,
            attempts            INTEGER NOT NULL DEFAULT 0,
            error               TEXT,
            created_at          INTEGER NOT NULL,
            updated_at          INTEGER NOT NULL,
            UNIQUE(source, external_message_id)
        );
        CREATE INDEX IF NOT EXISTS idx_inbox_status_created
            ON inbox_messages(status, created_at);
        CREATE INDEX IF NOT EXISTS idx_inbox_topic_status
            ON inbox_messages(topic_key, status);

        CREATE TABLE IF NOT EXISTS outbox_messages (
            id                TEXT PRIMARY KEY,
            source            TEXT NOT NULL,
            topic_key         TEXT NOT NULL,
            text              TEXT NOT NULL,
            payload           TEXT,
            status            TEXT NOT NULL,
            attempts          INTEGER NOT NULL DEFAULT 0,
            next_attempt_at   INTEGER NOT NULL,
            lease_token       TEXT,
            lease_expires_at  INTEGER,
            last_error        TEXT,
            created_at        INTEGER NOT NULL,
            updated_at        INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_outbox_source_status_next
            ON outbox_messages(source, status, next_attempt_at);

        CREATE TABLE IF NOT EXISTS turns (
            id           TEXT PRIMARY KEY,
            topic_key    TEXT NOT NULL,
            role         TEXT NOT NULL,
            content      TEXT NOT NULL,
            tool_calls   TEXT,
            tool_call_id TEXT,
            name         TEXT,
            created_at   INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_turns_topic_rowid
            ON turns(topic_key);

        CREATE TABLE IF NOT EXISTS extraction_cursors (
            topic_key             TEXT PRIMARY KEY,
            last_extracted_rowid  INTEGER NOT NULL DEFAULT 0,
            turns_since_extraction INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS topic_summaries (
            topic_key  TEXT PRIMARY KEY,
            summary    TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        );
        ",
    )?;
    Ok(())
}
