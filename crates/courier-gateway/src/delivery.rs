use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use courier_db::{Database, StoreError};
use courier_types::events::GatewayEvent;
use courier_types::models::{DeliveryState, Message};

use crate::presence::{ConnectionHandle, PresenceRegistry};

/// Per-operation failures of the delivery engine. None of these is fatal to
/// the process or to the connection that triggered them.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("not authenticated")]
    Unauthenticated,

    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),

    #[error("cannot start a conversation with yourself")]
    InvalidPair,

    #[error("access denied")]
    AccessDenied,

    #[error("storage failure")]
    Storage(#[source] StoreError),

    #[error("internal task failure")]
    Internal,
}

impl From<StoreError> for DeliveryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidPair => Self::InvalidPair,
            StoreError::EmptyContent => Self::InvalidRequest("content must not be empty"),
            other => Self::Storage(other),
        }
    }
}

/// Orchestrates send -> persist -> route -> acknowledge, and replays queued
/// messages when a recipient (re)connects. Owns no transport: sessions are
/// reached through the injected presence registry.
#[derive(Clone)]
pub struct DeliveryEngine {
    db: Arc<Database>,
    presence: PresenceRegistry,
}

impl DeliveryEngine {
    pub fn new(db: Arc<Database>, presence: PresenceRegistry) -> Self {
        Self { db, presence }
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    /// Accept a message from a live sender, persist it, and route it.
    ///
    /// The sender is acked as soon as the message is durable. If the
    /// recipient has a live session the message is pushed and stamped
    /// delivered right away; otherwise it stays queued for the next connect.
    pub async fn send_message(
        &self,
        sender_id: Uuid,
        recipient_id: Uuid,
        content: String,
    ) -> Result<Message, DeliveryError> {
        let sender = self
            .presence
            .lookup(sender_id)
            .await
            .ok_or(DeliveryError::Unauthenticated)?;

        if content.trim().is_empty() {
            return Err(DeliveryError::InvalidRequest("content must not be empty"));
        }
        if recipient_id == sender_id {
            return Err(DeliveryError::InvalidPair);
        }
        if self
            .with_store(move |db| db.get_user_by_id(recipient_id))
            .await?
            .is_none()
        {
            return Err(DeliveryError::InvalidRequest("unknown recipient"));
        }

        let conversation = self
            .with_store(move |db| {
                db.get_or_create_conversation(sender_id, recipient_id)
                    .map(|row| row.into_model())
            })
            .await?;

        let conversation_id = conversation.id;
        let message = self
            .with_store(move |db| {
                db.append_message(conversation_id, sender_id, &content)
                    .map(|row| row.into_model())
            })
            .await?;

        sender.push(GatewayEvent::MessageAck {
            message_id: message.id,
            conversation_id: message.conversation_id,
            status: DeliveryState::Sent,
            sent_at: message.sent_at,
        });

        if let Some(recipient) = self.presence.lookup(recipient_id).await {
            self.deliver(&message, &recipient, Some(&sender)).await?;
        }

        Ok(message)
    }

    /// Register the session, replay its queued backlog oldest-first, then
    /// greet. Each replayed message is an independent unit: a dead queue or a
    /// store error on one message leaves the rest queued for the next
    /// connect.
    pub async fn on_connect(&self, user_id: Uuid, handle: ConnectionHandle) {
        self.presence.register(user_id, handle.clone()).await;

        match self.with_store(move |db| db.list_undelivered_for(user_id)).await {
            Ok(backlog) => {
                let queued = backlog.len();
                for row in backlog {
                    let message = row.into_model();
                    let sender = self.presence.lookup(message.sender_id).await;
                    match self.deliver(&message, &handle, sender.as_ref()).await {
                        Ok(true) => {}
                        Ok(false) => {
                            warn!("session queue for {} closed during backlog replay", user_id);
                        }
                        Err(err) => {
                            warn!("backlog replay for {} skipped message {}: {}", user_id, message.id, err);
                        }
                    }
                }
                if queued > 0 {
                    info!("replayed {} queued messages to {}", queued, user_id);
                }
            }
            Err(err) => warn!("could not load backlog for {}: {}", user_id, err),
        }

        handle.push(GatewayEvent::Ready {
            user_id,
            message: "Authentication successful".to_string(),
        });
    }

    pub async fn on_disconnect(&self, conn_id: Uuid) {
        if let Some(user_id) = self.presence.unregister_by_handle(conn_id).await {
            info!("{} went offline", user_id);
        }
    }

    /// Mark the peer's messages in a conversation read. The reader must be a
    /// participant; unknown conversations are indistinguishable from foreign
    /// ones.
    pub async fn mark_read(
        &self,
        conversation_id: Uuid,
        reader_id: Uuid,
    ) -> Result<usize, DeliveryError> {
        let conversation = self
            .with_store(move |db| {
                Ok(db.get_conversation(conversation_id)?.map(|row| row.into_model()))
            })
            .await?
            .ok_or(DeliveryError::AccessDenied)?;
        if !conversation.involves(reader_id) {
            return Err(DeliveryError::AccessDenied);
        }

        let updated = self
            .with_store(move |db| db.mark_conversation_read(conversation_id, reader_id))
            .await?;
        Ok(updated)
    }

    /// Push one message to a recipient session and stamp it delivered.
    /// Returns `Ok(false)` when the session queue is already closed — the
    /// message then stays queued. The delivered ack goes to `notify` only on
    /// the first delivery transition, so replays and races stay silent.
    async fn deliver(
        &self,
        message: &Message,
        recipient: &ConnectionHandle,
        notify: Option<&ConnectionHandle>,
    ) -> Result<bool, DeliveryError> {
        let pushed = recipient.push(GatewayEvent::MessageReceive {
            message_id: message.id,
            conversation_id: message.conversation_id,
            from_user_id: message.sender_id,
            content: message.content.clone(),
            sent_at: message.sent_at,
        });
        if !pushed {
            return Ok(false);
        }

        let message_id = message.id;
        let delivered_at = self.with_store(move |db| db.mark_delivered(message_id)).await?;

        if let Some(delivered_at) = delivered_at {
            if let Some(handle) = notify {
                handle.push(GatewayEvent::MessageDelivered {
                    message_id,
                    delivered_at,
                });
            }
        }
        Ok(true)
    }

    /// Run a store call on the blocking pool.
    async fn with_store<T, F>(&self, f: F) -> Result<T, DeliveryError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, StoreError> + Send + 'static,
    {
        let db = self.db.clone();
        match tokio::task::spawn_blocking(move || f(&db)).await {
            Ok(result) => result.map_err(DeliveryError::from),
            Err(err) => {
                error!("store task join error: {}", err);
                Err(DeliveryError::Internal)
            }
        }
    }
}
