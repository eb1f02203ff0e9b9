//! Conversation backends.
//!
//! Rooms and chats both end up as [`ConversationMessage`]s on the gateway,
//! but they travel differently: rooms are fire-and-forget broadcasts, chats
//! are written to the database first and then delivered to the two
//! participants.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use unitrade_db::Database;
use unitrade_types::events::{ConversationKey, ConversationMessage, GatewayEvent, MessageSender};
use unitrade_types::models::{Chat, ChatMessage};

use crate::dispatcher::Dispatcher;

/// Who is sending.
#[derive(Debug, Clone)]
pub struct Author {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("message is empty")]
    EmptyContent,
    #[error("chat not found")]
    ChatNotFound,
    #[error("not a participant of this chat")]
    NotParticipant,
    #[error("account is banned")]
    Banned,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// A message-delivery backend keyed by its own kind of topic.
pub trait ConversationBus {
    type Topic;

    fn publish(
        &self,
        author: &Author,
        topic: &Self::Topic,
        content: &str,
        created_at: Option<DateTime<Utc>>,
    ) -> impl Future<Output = Result<ConversationMessage, BusError>> + Send;
}

/// Named ephemeral rooms. Nothing is stored; whoever has joined the room
/// at publish time gets the message, the sender included.
#[derive(Clone)]
pub struct EphemeralRooms {
    dispatcher: Dispatcher,
}

impl EphemeralRooms {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }
}

impl ConversationBus for EphemeralRooms {
    type Topic = String;

    fn publish(
        &self,
        author: &Author,
        room: &String,
        content: &str,
        created_at: Option<DateTime<Utc>>,
    ) -> impl Future<Output = Result<ConversationMessage, BusError>> + Send {
        let result = if content.trim().is_empty() {
            Err(BusError::EmptyContent)
        } else {
            let message = ConversationMessage {
                id: Uuid::new_v4(),
                conversation: ConversationKey::room(room.clone()),
                user: MessageSender { id: Some(author.id), name: author.name.clone() },
                content: content.to_string(),
                created_at: created_at.unwrap_or_else(Utc::now),
            };
            let reached = self.dispatcher.broadcast(GatewayEvent::Message(message.clone()));
            debug!("Room '{}' message from {} reached {} connections", room, author.name, reached);
            Ok(message)
        };
        std::future::ready(result)
    }
}

/// A chat message stored and fanned out, plus any trailing warning from the
/// store.
#[derive(Debug)]
pub struct Delivered {
    pub stored: ChatMessage,
    pub event: ConversationMessage,
    pub warning: Option<String>,
}

/// Buyer/seller chats backed by SQLite.
#[derive(Clone)]
pub struct PersistedChats {
    db: Arc<Database>,
    dispatcher: Dispatcher,
}

impl PersistedChats {
    pub fn new(db: Arc<Database>, dispatcher: Dispatcher) -> Self {
        Self { db, dispatcher }
    }

    /// Looks up a chat the author takes part in.
    pub async fn participant_chat(&self, author_id: Uuid, chat_id: Uuid) -> Result<Chat, BusError> {
        let db = self.db.clone();
        let chat = tokio::task::spawn_blocking(move || db.get_chat_by_id(chat_id))
            .await
            .map_err(anyhow::Error::from)??
            .ok_or(BusError::ChatNotFound)?;
        if !chat.has_participant(author_id) {
            return Err(BusError::NotParticipant);
        }
        Ok(chat)
    }

    /// Stores the message and pushes it to both participants.
    pub async fn deliver(
        &self,
        author: &Author,
        chat_id: Uuid,
        content: &str,
        purchase_request_id: Option<String>,
    ) -> Result<Delivered, BusError> {
        if content.trim().is_empty() {
            return Err(BusError::EmptyContent);
        }
        let chat = self.participant_chat(author.id, chat_id).await?;

        let db = self.db.clone();
        let author_id = author.id;
        let content = content.to_string();
        let sent = tokio::task::spawn_blocking(move || -> anyhow::Result<Option<_>> {
            let banned = db.get_user_profile(author_id)?.is_some_and(|p| p.is_banned());
            if banned {
                return Ok(None);
            }
            db.send_message(chat_id, author_id, &content, purchase_request_id.as_deref())
                .map(Some)
        })
        .await
        .map_err(anyhow::Error::from)??
        .ok_or(BusError::Banned)?;

        let warning = sent.touch_error.map(|e| {
            warn!("Chat {} message stored but chat not touched: {:#}", chat_id, e);
            format!("{e:#}")
        });

        let event = ConversationMessage {
            id: sent.message.id,
            conversation: ConversationKey::chat(chat_id),
            user: MessageSender {
                id: Some(author.id),
                name: sent.message.sender_email.clone().unwrap_or_else(|| author.name.clone()),
            },
            content: sent.message.content.clone(),
            created_at: sent.message.created_at,
        };

        for participant in [chat.buyer_id, chat.seller_id] {
            self.dispatcher
                .send_to_user(participant, GatewayEvent::Message(event.clone()))
                .await;
        }

        Ok(Delivered { stored: sent.message, event, warning })
    }
}

impl ConversationBus for PersistedChats {
    type Topic = Uuid;

    /// The store stamps its own time; `created_at` from the client is
    /// ignored.
    fn publish(
        &self,
        author: &Author,
        chat_id: &Uuid,
        content: &str,
        _created_at: Option<DateTime<Utc>>,
    ) -> impl Future<Output = Result<ConversationMessage, BusError>> + Send {
        let this = self.clone();
        let author = author.clone();
        let chat_id = *chat_id;
        let content = content.to_string();
        async move {
            let delivered = this.deliver(&author, chat_id, &content, None).await?;
            Ok(delivered.event)
        }
    }
}
