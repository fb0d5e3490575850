//! Database row types — these map directly to SQLite rows.
//! Distinct from the courier-types API models to keep the store layer
//! independent; `into_model` converts at the boundary.

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use courier_types::models::{Conversation, Message, User};

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub created_at: String,
}

pub struct ConversationRow {
    pub id: String,
    pub user_a: String,
    pub user_b: String,
    pub created_at: String,
    pub updated_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub sent_at: String,
    pub delivered_at: Option<String>,
    pub read_at: Option<String>,
}

impl UserRow {
    pub fn into_model(self) -> User {
        User {
            id: parse_id(&self.id, "user id"),
            username: self.username,
            created_at: parse_timestamp(&self.created_at, "created_at"),
        }
    }
}

impl ConversationRow {
    pub fn into_model(self) -> Conversation {
        Conversation {
            id: parse_id(&self.id, "conversation id"),
            user_a: parse_id(&self.user_a, "user_a"),
            user_b: parse_id(&self.user_b, "user_b"),
            created_at: parse_timestamp(&self.created_at, "created_at"),
            updated_at: parse_timestamp(&self.updated_at, "updated_at"),
        }
    }
}

impl MessageRow {
    pub fn into_model(self) -> Message {
        Message {
            id: parse_id(&self.id, "message id"),
            conversation_id: parse_id(&self.conversation_id, "conversation_id"),
            sender_id: parse_id(&self.sender_id, "sender_id"),
            content: self.content,
            sent_at: parse_timestamp(&self.sent_at, "sent_at"),
            delivered_at: self
                .delivered_at
                .map(|raw| parse_timestamp(&raw, "delivered_at")),
            read_at: self.read_at.map(|raw| parse_timestamp(&raw, "read_at")),
        }
    }
}

fn parse_id(raw: &str, context: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", context, raw, e);
        Uuid::default()
    })
}

fn parse_timestamp(raw: &str, context: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite stores timestamps as "YYYY-MM-DD HH:MM:SS" without
            // timezone. Parse as naive UTC and convert.
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt {} '{}': {}", context, raw, e);
            DateTime::default()
        })
}
