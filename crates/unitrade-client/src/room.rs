//! Ephemeral room chat. The view only keeps what arrived while it was open;
//! the caller owns the gateway socket and sends the commands built here.

use chrono::{DateTime, Utc};

use unitrade_types::conversation::{MessageGroup, group_messages, merge_messages};
use unitrade_types::events::{ConversationKey, ConversationMessage, GatewayCommand, GatewayEvent};

#[derive(Debug, Clone)]
pub struct RoomChat {
    room: String,
    username: String,
    messages: Vec<ConversationMessage>,
    draft: Option<String>,
}

impl RoomChat {
    pub fn new(room: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            username: username.into(),
            messages: Vec::new(),
            draft: None,
        }
    }

    /// Opens the room named by a `/chats?room=..&message=..` query, with the
    /// message as the pre-filled draft.
    pub fn from_query(query: &str, username: impl Into<String>) -> Option<Self> {
        let query = query.trim_start_matches('?');
        let mut room = None;
        let mut draft = None;
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "room" => room = Some(value.into_owned()),
                "message" => draft = Some(value.into_owned()),
                _ => {}
            }
        }
        let room = room.filter(|r| !r.trim().is_empty())?;
        let chat = Self::new(room, username);
        Some(match draft {
            Some(draft) => chat.with_draft(draft),
            None => chat,
        })
    }

    pub fn with_draft(mut self, draft: impl Into<String>) -> Self {
        let draft = draft.into();
        self.draft = (!draft.trim().is_empty()).then_some(draft);
        self
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn key(&self) -> ConversationKey {
        ConversationKey::room(self.room.clone())
    }

    /// Joins under this view's username, which the gateway stamps on every
    /// message sent from here.
    pub fn join(&self) -> GatewayCommand {
        GatewayCommand::JoinRoom { room: self.room.clone(), username: Some(self.username.clone()) }
    }

    pub fn leave(&self) -> GatewayCommand {
        GatewayCommand::LeaveRoom { room: self.room.clone() }
    }

    /// The pre-filled draft. Offered once; later calls return `None`.
    pub fn take_draft(&mut self) -> Option<String> {
        self.draft.take()
    }

    /// Builds the publish command for `content` stamped with the client
    /// clock. Blank input sends nothing. The sender sees the message when the
    /// broadcast comes back, like everyone else.
    pub fn send(&self, content: &str, now: DateTime<Utc>) -> Option<GatewayCommand> {
        let content = content.trim();
        if content.is_empty() {
            return None;
        }
        Some(GatewayCommand::Publish {
            conversation: self.key(),
            content: content.to_string(),
            created_at: Some(now),
        })
    }

    /// Feeds a gateway event in. Returns whether the timeline changed.
    pub fn receive(&mut self, event: &GatewayEvent) -> bool {
        let GatewayEvent::Message(message) = event else {
            return false;
        };
        let in_room = matches!(&message.conversation, ConversationKey::Room { name } if *name == self.room);
        if !in_room || self.messages.iter().any(|m| m.id == message.id) {
            return false;
        }
        let at = self.messages.partition_point(|m| m.created_at <= message.created_at);
        self.messages.insert(at, message.clone());
        true
    }

    /// Merges messages handed to the view at mount with what already
    /// arrived live.
    pub fn seed(&mut self, initial: &[ConversationMessage]) {
        self.messages = merge_messages(initial, &self.messages);
    }

    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    pub fn groups(&self) -> Vec<MessageGroup<'_>> {
        group_messages(&self.messages)
    }

    pub fn is_own(&self, message: &ConversationMessage) -> bool {
        message.user.name == self.username
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use uuid::Uuid;

    use super::*;
    use unitrade_types::events::MessageSender;
    use unitrade_types::purchase::chat_redirect;

    fn message(room: &str, name: &str, at: DateTime<Utc>) -> ConversationMessage {
        ConversationMessage {
            id: Uuid::new_v4(),
            conversation: ConversationKey::room(room),
            user: MessageSender { id: None, name: name.into() },
            content: format!("hello from {name}"),
            created_at: at,
        }
    }

    #[test]
    fn opens_from_the_purchase_redirect() {
        let redirect = chat_redirect("listing-42", "📦 PURCHASE REQUEST: \"Lamp\" ($5)\nhi & bye");
        let (_, query) = redirect.split_once('?').unwrap();

        let mut chat = RoomChat::from_query(query, "buyer").unwrap();
        assert_eq!(chat.room(), "listing-42");
        assert_eq!(chat.take_draft().as_deref(), Some("📦 PURCHASE REQUEST: \"Lamp\" ($5)\nhi & bye"));
        assert_eq!(chat.take_draft(), None);

        assert!(RoomChat::from_query("message=hi", "buyer").is_none());
    }

    #[test]
    fn receive_keeps_only_this_room_once() {
        let mut chat = RoomChat::new("lobby", "alice");
        let now = Utc::now();
        let msg = message("lobby", "bob", now);

        assert!(chat.receive(&GatewayEvent::Message(msg.clone())));
        assert!(!chat.receive(&GatewayEvent::Message(msg)));
        assert!(!chat.receive(&GatewayEvent::Message(message("other", "bob", now))));
        assert!(!chat.receive(&GatewayEvent::Joined { room: "lobby".into() }));

        let earlier = message("lobby", "carol", now - Duration::seconds(30));
        assert!(chat.receive(&GatewayEvent::Message(earlier.clone())));
        assert_eq!(chat.messages()[0].id, earlier.id);
    }

    #[test]
    fn send_builds_a_publish_command() {
        let chat = RoomChat::new("lobby", "alice");
        let now = Utc::now();
        assert!(chat.send("   ", now).is_none());

        match chat.send(" hi ", now) {
            Some(GatewayCommand::Publish { conversation, content, created_at }) => {
                assert_eq!(conversation, ConversationKey::room("lobby"));
                assert_eq!(content, "hi");
                assert_eq!(created_at, Some(now));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn own_messages_come_back_under_the_joined_username() {
        let mut chat = RoomChat::new("lobby", "Ana");
        let wire = serde_json::to_string(&chat.join()).unwrap();
        let username = match serde_json::from_str::<GatewayCommand>(&wire).unwrap() {
            GatewayCommand::JoinRoom { room, username } => {
                assert_eq!(room, "lobby");
                username.unwrap()
            }
            other => panic!("unexpected {other:?}"),
        };

        let now = Utc::now();
        let Some(GatewayCommand::Publish { content, created_at, .. }) = chat.send("hi", now) else {
            panic!("expected a publish command");
        };
        let echoed = ConversationMessage {
            id: Uuid::new_v4(),
            conversation: ConversationKey::room("lobby"),
            user: MessageSender { id: Some(Uuid::new_v4()), name: username },
            content,
            created_at: created_at.unwrap_or(now),
        };
        let event: GatewayEvent =
            serde_json::from_str(&serde_json::to_string(&GatewayEvent::Message(echoed)).unwrap()).unwrap();

        assert!(chat.receive(&event));
        assert!(chat.is_own(&chat.messages()[0]));
        assert!(!chat.is_own(&message("lobby", "ana@campus.edu", now)));
    }

    #[test]
    fn seed_merges_and_groups() {
        let mut chat = RoomChat::new("lobby", "alice");
        let start = Utc::now() - Duration::minutes(30);
        let first = message("lobby", "bob", start);
        let second = message("lobby", "bob", start + Duration::minutes(1));
        let later = message("lobby", "bob", start + Duration::minutes(20));

        chat.receive(&GatewayEvent::Message(second.clone()));
        chat.seed(&[first.clone(), second, later]);

        assert_eq!(chat.messages().len(), 3);
        let groups = chat.groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].messages.len(), 2);
        assert_eq!(groups[0].messages[0].id, first.id);
        assert!(!chat.is_own(&first));
    }
}
