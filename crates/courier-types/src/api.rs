use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Conversation, Message};

// -- JWT Claims --

/// JWT claims shared across courier-api (REST middleware) and
/// courier-gateway (WebSocket identify). Canonical definition lives here in
/// courier-types to eliminate duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
}

// -- Conversations --

#[derive(Debug, Serialize)]
pub struct ConversationSummary {
    pub id: Uuid,
    pub peer_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationSummary {
    pub fn for_viewer(conversation: &Conversation, viewer: Uuid) -> Self {
        Self {
            id: conversation.id,
            peer_id: conversation.peer_of(viewer),
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
        }
    }
}

// -- Messages --

/// One page of conversation history, newest first.
#[derive(Debug, Serialize)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub total: u64,
    pub has_more: bool,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub conversation_id: Uuid,
    pub updated: usize,
}
