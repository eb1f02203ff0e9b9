use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies a conversation, and doubles as the dispatcher routing topic.
///
/// Rooms are ephemeral broadcast channels keyed by name; chats are persisted
/// buyer/seller conversations keyed by id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ConversationKey {
    Room { name: String },
    Chat { id: Uuid },
}

impl ConversationKey {
    pub fn room(name: impl Into<String>) -> Self {
        Self::Room { name: name.into() }
    }

    pub fn chat(id: Uuid) -> Self {
        Self::Chat { id }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSender {
    pub id: Option<Uuid>,
    pub name: String,
}

/// A message as delivered to subscribers, whichever backend carried it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: Uuid,
    pub conversation: ConversationKey,
    pub user: MessageSender,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, email: String },

    /// The connection now receives messages for this room
    Joined { room: String },

    /// The connection no longer receives messages for this room
    Left { room: String },

    /// A message was published in a room or a chat
    Message(ConversationMessage),

    /// A command from this connection was rejected
    Error { message: String },
}

impl GatewayEvent {
    /// Returns the conversation this event is scoped to. Events that return
    /// `None` are addressed to a single connection.
    pub fn topic(&self) -> Option<&ConversationKey> {
        match self {
            Self::Message(m) => Some(&m.conversation),
            _ => None,
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Start receiving an ephemeral room. `username` is the name shown on
    /// this connection's messages in the room; the account email is used
    /// when it is absent or blank.
    JoinRoom {
        room: String,
        #[serde(default)]
        username: Option<String>,
    },

    /// Stop receiving an ephemeral room
    LeaveRoom { room: String },

    /// Receive live messages for persisted chats the user takes part in
    SubscribeChats { chat_ids: Vec<Uuid> },

    /// Send a message to a room or a chat. `created_at` is the client clock;
    /// the server stamps its own time when absent.
    Publish {
        conversation: ConversationKey,
        content: String,
        #[serde(default)]
        created_at: Option<DateTime<Utc>>,
    },
}
