use rusqlite::Connection;
use tracing::info;

use crate::error::StoreError;

pub fn run(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        -- Direct conversations store their participant pair in canonical
        -- order: user_a < user_b. The unique constraint is what makes
        -- get_or_create race-safe across writers.
        CREATE TABLE IF NOT EXISTS conversations (
            id          TEXT PRIMARY KEY,
            user_a      TEXT NOT NULL REFERENCES users(id),
            user_b      TEXT NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL,
            UNIQUE(user_a, user_b),
            CHECK(user_a < user_b)
        );

        CREATE INDEX IF NOT EXISTS idx_conversations_user_a
            ON conversations(user_a);
        CREATE INDEX IF NOT EXISTS idx_conversations_user_b
            ON conversations(user_b);

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL REFERENCES conversations(id),
            sender_id       TEXT NOT NULL REFERENCES users(id),
            content         TEXT NOT NULL,
            sent_at         TEXT NOT NULL,
            delivered_at    TEXT,
            read_at         TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, sent_at);
        CREATE INDEX IF NOT EXISTS idx_messages_undelivered
            ON messages(delivered_at) WHERE delivered_at IS NULL;
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
