use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::Database;
use crate::error::StoreError;
use crate::models::{ConversationRow, MessageRow, UserRow};

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: Uuid,
        username: &str,
        password_hash: &str,
    ) -> Result<(), StoreError> {
        let (_, created_at) = now_stamp();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![id.to_string(), username, password_hash, created_at],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>, StoreError> {
        self.with_conn(|conn| {
            query_user(conn, "SELECT id, username, password, created_at FROM users WHERE username = ?1", username)
        })
    }

    pub fn get_user_by_id(&self, id: Uuid) -> Result<Option<UserRow>, StoreError> {
        self.with_conn(|conn| {
            query_user(conn, "SELECT id, username, password, created_at FROM users WHERE id = ?1", &id.to_string())
        })
    }

    // -- Conversations --

    /// Resolve the single conversation for an unordered pair, creating it on
    /// first contact. The pair is normalized before touching the store, so
    /// (A,B) and (B,A) always land on the same row; the unique constraint on
    /// the ordered pair absorbs a create race from another writer.
    pub fn get_or_create_conversation(
        &self,
        user_a: Uuid,
        user_b: Uuid,
    ) -> Result<ConversationRow, StoreError> {
        if user_a == user_b {
            return Err(StoreError::InvalidPair);
        }
        let (lo, hi) = if user_a < user_b {
            (user_a.to_string(), user_b.to_string())
        } else {
            (user_b.to_string(), user_a.to_string())
        };

        self.with_conn(|conn| {
            if let Some(row) = query_conversation_by_pair(conn, &lo, &hi)? {
                return Ok(row);
            }

            let id = Uuid::new_v4().to_string();
            let (_, now) = now_stamp();
            let inserted = conn.execute(
                "INSERT INTO conversations (id, user_a, user_b, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, lo, hi, now, now],
            );

            match inserted {
                Ok(_) => Ok(ConversationRow {
                    id,
                    user_a: lo.clone(),
                    user_b: hi.clone(),
                    created_at: now.clone(),
                    updated_at: now,
                }),
                // Lost the create race to another writer: the row exists now.
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    query_conversation_by_pair(conn, &lo, &hi)?
                        .ok_or(StoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows))
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn get_conversation(&self, id: Uuid) -> Result<Option<ConversationRow>, StoreError> {
        self.with_conn(|conn| {
            let row = conn
                .prepare(
                    "SELECT id, user_a, user_b, created_at, updated_at
                     FROM conversations WHERE id = ?1",
                )?
                .query_row([id.to_string()], row_to_conversation)
                .optional()?;
            Ok(row)
        })
    }

    /// All conversations the user participates in, most recently active first.
    pub fn list_conversations_for(&self, user_id: Uuid) -> Result<Vec<ConversationRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_a, user_b, created_at, updated_at
                 FROM conversations
                 WHERE user_a = ?1 OR user_b = ?1
                 ORDER BY updated_at DESC",
            )?;
            let rows = stmt
                .query_map([user_id.to_string()], row_to_conversation)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Messages --

    /// Persist a message and bump the conversation's last-activity stamp in
    /// one transaction; a failure rolls both back.
    pub fn append_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        content: &str,
    ) -> Result<MessageRow, StoreError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(StoreError::EmptyContent);
        }

        let id = Uuid::new_v4().to_string();
        let (_, sent_at) = now_stamp();
        let cid = conversation_id.to_string();

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, content, sent_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, cid, sender_id.to_string(), content, sent_at],
            )?;
            tx.execute(
                "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
                params![sent_at, cid],
            )?;
            tx.commit()?;

            Ok(MessageRow {
                id: id.clone(),
                conversation_id: cid.clone(),
                sender_id: sender_id.to_string(),
                content: content.to_string(),
                sent_at: sent_at.clone(),
                delivered_at: None,
                read_at: None,
            })
        })
    }

    pub fn get_message(&self, id: Uuid) -> Result<Option<MessageRow>, StoreError> {
        self.with_conn(|conn| {
            let row = conn
                .prepare(&format!("{MESSAGE_COLUMNS} WHERE id = ?1"))?
                .query_row([id.to_string()], row_to_message)
                .optional()?;
            Ok(row)
        })
    }

    /// Stamp a message delivered, once. Returns the stamp on the first call
    /// and `None` on every later call; an already-set stamp is never
    /// overwritten.
    pub fn mark_delivered(&self, message_id: Uuid) -> Result<Option<DateTime<Utc>>, StoreError> {
        let (delivered, stamp) = now_stamp();
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE messages SET delivered_at = ?1 WHERE id = ?2 AND delivered_at IS NULL",
                params![stamp, message_id.to_string()],
            )?;
            Ok((updated == 1).then_some(delivered))
        })
    }

    /// Stamp read on every message in the conversation that the reader did
    /// not send and that has no read stamp yet. Returns how many were
    /// updated, so a second invocation yields 0. Deliberately ignores
    /// `delivered_at`: a message read out of band goes straight from sent to
    /// read.
    pub fn mark_conversation_read(
        &self,
        conversation_id: Uuid,
        reader_id: Uuid,
    ) -> Result<usize, StoreError> {
        let (_, stamp) = now_stamp();
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE messages SET read_at = ?1
                 WHERE conversation_id = ?2 AND sender_id != ?3 AND read_at IS NULL",
                params![stamp, conversation_id.to_string(), reader_id.to_string()],
            )?;
            Ok(updated)
        })
    }

    /// The user's backlog: every message addressed to them (any conversation
    /// they participate in, not sent by them) that was never delivered,
    /// oldest first so replay preserves conversational order.
    pub fn list_undelivered_for(&self, user_id: Uuid) -> Result<Vec<MessageRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.conversation_id, m.sender_id, m.content,
                        m.sent_at, m.delivered_at, m.read_at
                 FROM messages m
                 JOIN conversations c ON m.conversation_id = c.id
                 WHERE (c.user_a = ?1 OR c.user_b = ?1)
                   AND m.sender_id != ?1
                   AND m.delivered_at IS NULL
                 ORDER BY m.sent_at ASC, m.id ASC",
            )?;
            let rows = stmt
                .query_map([user_id.to_string()], row_to_message)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// One page of a conversation's history, newest first, plus the total
    /// message count for pagination.
    pub fn list_page(
        &self,
        conversation_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<MessageRow>, u64), StoreError> {
        let cid = conversation_id.to_string();
        self.with_conn(|conn| {
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                [&cid],
                |row| row.get(0),
            )?;

            let mut stmt = conn.prepare(&format!(
                "{MESSAGE_COLUMNS} WHERE conversation_id = ?1
                 ORDER BY sent_at DESC, id DESC
                 LIMIT ?2 OFFSET ?3",
            ))?;
            let rows = stmt
                .query_map(params![cid, i64::from(limit), i64::from(offset)], row_to_message)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok((rows, total as u64))
        })
    }
}

const MESSAGE_COLUMNS: &str = "SELECT id, conversation_id, sender_id, content, \
     sent_at, delivered_at, read_at FROM messages";

/// Timestamps are stamped here, not by SQLite, with fixed micro precision so
/// the stored text sorts chronologically and round-trips exactly.
fn now_stamp() -> (DateTime<Utc>, String) {
    let now = Utc::now().trunc_subsecs(6);
    let stamp = now.to_rfc3339_opts(SecondsFormat::Micros, true);
    (now, stamp)
}

fn query_user(conn: &Connection, sql: &str, key: &str) -> Result<Option<UserRow>, StoreError> {
    let row = conn
        .prepare(sql)?
        .query_row([key], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                created_at: row.get(3)?,
            })
        })
        .optional()?;
    Ok(row)
}

fn query_conversation_by_pair(
    conn: &Connection,
    user_a: &str,
    user_b: &str,
) -> Result<Option<ConversationRow>, StoreError> {
    let row = conn
        .prepare(
            "SELECT id, user_a, user_b, created_at, updated_at
             FROM conversations WHERE user_a = ?1 AND user_b = ?2",
        )?
        .query_row([user_a, user_b], row_to_conversation)
        .optional()?;
    Ok(row)
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> Result<ConversationRow, rusqlite::Error> {
    Ok(ConversationRow {
        id: row.get(0)?,
        user_a: row.get(1)?,
        user_b: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<MessageRow, rusqlite::Error> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        content: row.get(3)?,
        sent_at: row.get(4)?,
        delivered_at: row.get(5)?,
        read_at: row.get(6)?,
    })
}
