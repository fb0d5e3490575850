use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

/// A direct channel between exactly two users. The participant pair is
/// canonical: `user_a < user_b`, so (A,B) and (B,A) resolve to one record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub user_a: Uuid,
    pub user_b: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn involves(&self, user_id: Uuid) -> bool {
        self.user_a == user_id || self.user_b == user_id
    }

    /// The participant that is not `user_id`. Callers check `involves` first.
    pub fn peer_of(&self, user_id: Uuid) -> Uuid {
        if self.user_a == user_id { self.user_b } else { self.user_a }
    }
}

/// Delivery lifecycle of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    Sent,
    Delivered,
    Read,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub sent_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Read wins over delivered; a read stamp is valid even when the
    /// delivery stamp was never set (history fetched over REST while the
    /// recipient was offline).
    pub fn state(&self) -> DeliveryState {
        if self.read_at.is_some() {
            DeliveryState::Read
        } else if self.delivered_at.is_some() {
            DeliveryState::Delivered
        } else {
            DeliveryState::Sent
        }
    }
}
