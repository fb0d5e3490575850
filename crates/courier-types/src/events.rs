use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::DeliveryState;

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, message: String },

    /// Synchronous acknowledgement that a sent message was persisted
    MessageAck {
        message_id: Uuid,
        conversation_id: Uuid,
        status: DeliveryState,
        sent_at: DateTime<Utc>,
    },

    /// A message pushed to its recipient (live delivery or backlog replay)
    MessageReceive {
        message_id: Uuid,
        conversation_id: Uuid,
        from_user_id: Uuid,
        content: String,
        sent_at: DateTime<Utc>,
    },

    /// The recipient's session accepted the message; sent to the sender
    MessageDelivered {
        message_id: Uuid,
        delivered_at: DateTime<Utc>,
    },

    /// Reply to MarkRead: how many messages were newly marked
    ConversationRead {
        conversation_id: Uuid,
        updated: usize,
    },

    /// A command failed; the connection stays open
    Error { message: String },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Send a direct message to another user
    MessageSend { recipient_id: Uuid, content: String },

    /// Mark every unread message from the peer in a conversation as read
    MarkRead { conversation_id: Uuid },
}
