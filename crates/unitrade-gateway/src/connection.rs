use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use unitrade_types::api::Claims;
use unitrade_types::events::{ConversationKey, GatewayCommand, GatewayEvent};

use crate::bus::{Author, ConversationBus, EphemeralRooms, PersistedChats};
use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a fresh socket may take to send `Identify`.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

type Subscriptions = Arc<RwLock<Topics>>;

/// What one connection receives, and the name it goes by in each room.
#[derive(Debug, Default)]
struct Topics {
    keys: HashSet<ConversationKey>,
    room_names: HashMap<String, String>,
}

impl Topics {
    fn contains(&self, key: &ConversationKey) -> bool {
        self.keys.contains(key)
    }

    fn join_room(&mut self, room: &str, username: Option<String>) {
        self.keys.insert(ConversationKey::room(room));
        match username.map(|u| u.trim().to_string()).filter(|u| !u.is_empty()) {
            Some(name) => self.room_names.insert(room.to_string(), name),
            None => self.room_names.remove(room),
        };
    }

    fn leave_room(&mut self, room: &str) {
        self.keys.remove(&ConversationKey::room(room));
        self.room_names.remove(room);
    }

    /// The author as shown in `room`.
    fn room_author(&self, author: &Author, room: &str) -> Author {
        match self.room_names.get(room) {
            Some(name) => Author { id: author.id, name: name.clone() },
            None => author.clone(),
        }
    }
}

/// Everything a gateway connection needs from the server.
#[derive(Clone)]
pub struct GatewayContext {
    pub dispatcher: Dispatcher,
    pub rooms: EphemeralRooms,
    pub chats: PersistedChats,
    pub jwt_secret: Arc<str>,
}

/// Handle a single WebSocket connection: `Identify` handshake, `Ready`,
/// then the event loop until the client leaves or `shutdown` fires.
pub async fn handle_connection(socket: WebSocket, ctx: GatewayContext, shutdown: CancellationToken) {
    let (mut sender, mut receiver) = socket.split();

    // Step 1: Wait for Identify command with JWT
    let claims = match wait_for_identify(&mut receiver, &ctx.jwt_secret).await {
        Some(claims) => claims,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    info!("{} ({}) connected to gateway", claims.email, claims.sub);

    // Step 2: Send Ready event
    let ready = GatewayEvent::Ready { user_id: claims.sub, email: claims.email.clone() };
    if !send_event(&mut sender, &ready).await {
        return;
    }

    run_connection_loop(sender, receiver, ctx, claims, shutdown.child_token()).await;
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    ctx: GatewayContext,
    claims: Claims,
    token: CancellationToken,
) {
    let user_id = claims.sub;
    let author = Author { id: user_id, name: claims.email.clone() };

    let (conn_id, mut user_rx) = ctx.dispatcher.register_user_channel(user_id).await;

    let mut broadcast_rx = ctx.dispatcher.subscribe();

    // Replies to this connection's own commands
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<GatewayEvent>();

    // Per-connection topic subscriptions (shared between send and recv tasks).
    let subscriptions: Subscriptions = Arc::new(RwLock::new(Topics::default()));
    let send_subscriptions = subscriptions.clone();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    let send_token = token.clone();
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            let event = tokio::select! {
                _ = send_token.cancelled() => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
                result = broadcast_rx.recv() => match result {
                    Ok(event) => event,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Broadcast receiver lagged by {} messages", n);
                        continue;
                    }
                    Err(_) => break,
                },
                result = user_rx.recv() => match result {
                    Some(event) => event,
                    None => break,
                },
                result = reply_rx.recv() => match result {
                    Some(event) => event,
                    None => break,
                },
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    continue;
                }
            };

            if let Some(topic) = event.topic() {
                if !send_subscriptions.read().await.contains(topic) {
                    continue;
                }
            }

            if !send_event(&mut sender, &event).await {
                break;
            }
        }
    });

    let email = claims.email.clone();
    let recv_ctx = ctx.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        if let Some(reply) = handle_command(&recv_ctx, &author, cmd, &subscriptions).await {
                            if reply_tx.send(reply).is_err() {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            email,
                            user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish. Shutdown ends the send task.
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    token.cancel();

    ctx.dispatcher.unregister_user_channel(user_id, conn_id).await;
    info!("{} ({}) disconnected from gateway", claims.email, user_id);
}

async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &GatewayEvent) -> bool {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to encode gateway event: {}", e);
            return true;
        }
    };
    sender.send(Message::Text(text.into())).await.is_ok()
}

async fn wait_for_identify(receiver: &mut SplitStream<WebSocket>, jwt_secret: &str) -> Option<Claims> {
    use jsonwebtoken::{DecodingKey, Validation, decode};

    let timeout = tokio::time::timeout(IDENTIFY_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) = serde_json::from_str::<GatewayCommand>(&text) {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;

                    return Some(token_data.claims);
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}

/// Applies one command. Returns the event to send back to this connection,
/// if any.
async fn handle_command(
    ctx: &GatewayContext,
    author: &Author,
    cmd: GatewayCommand,
    subscriptions: &Subscriptions,
) -> Option<GatewayEvent> {
    match cmd {
        GatewayCommand::Identify { .. } => None, // Already handled

        GatewayCommand::JoinRoom { room, username } => {
            let room = room.trim().to_string();
            if room.is_empty() {
                return Some(error_event("room name is required"));
            }
            debug!("{} joining room '{}'", author.name, room);
            subscriptions.write().await.join_room(&room, username);
            Some(GatewayEvent::Joined { room })
        }

        GatewayCommand::LeaveRoom { room } => {
            let room = room.trim().to_string();
            subscriptions.write().await.leave_room(&room);
            Some(GatewayEvent::Left { room })
        }

        GatewayCommand::SubscribeChats { chat_ids } => {
            let mut allowed = Vec::with_capacity(chat_ids.len());
            let mut rejected = 0usize;
            for chat_id in chat_ids {
                match ctx.chats.participant_chat(author.id, chat_id).await {
                    Ok(_) => allowed.push(ConversationKey::chat(chat_id)),
                    Err(e) => {
                        debug!("{} cannot subscribe to chat {}: {}", author.name, chat_id, e);
                        rejected += 1;
                    }
                }
            }

            info!("{} ({}) subscribing to {} chats", author.name, author.id, allowed.len());
            {
                let mut subs = subscriptions.write().await;
                subs.keys.retain(|key| matches!(key, ConversationKey::Room { .. }));
                subs.keys.extend(allowed);
            }

            (rejected > 0).then(|| error_event(&format!("{rejected} chat(s) not available")))
        }

        GatewayCommand::Publish { conversation, content, created_at } => {
            let result = match &conversation {
                ConversationKey::Room { name } => {
                    let shown_as = {
                        let subs = subscriptions.read().await;
                        if !subs.contains(&conversation) {
                            return Some(error_event("join the room before sending"));
                        }
                        subs.room_author(author, name)
                    };
                    ctx.rooms.publish(&shown_as, name, &content, created_at).await
                }
                ConversationKey::Chat { id } => ctx.chats.publish(author, id, &content, created_at).await,
            };

            match result {
                Ok(_) => None,
                Err(e) => {
                    debug!("{} publish to {:?} rejected: {}", author.name, conversation, e);
                    Some(error_event(&e.to_string()))
                }
            }
        }
    }
}

fn error_event(message: &str) -> GatewayEvent {
    GatewayEvent::Error { message: message.to_string() }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use unitrade_db::Database;
    use unitrade_db::models::{NewListing, ProfileUpsert};
    use unitrade_types::models::Condition;

    use super::*;

    fn context(db: Arc<Database>) -> GatewayContext {
        let dispatcher = Dispatcher::new();
        GatewayContext {
            rooms: EphemeralRooms::new(dispatcher.clone()),
            chats: PersistedChats::new(db, dispatcher.clone()),
            dispatcher,
            jwt_secret: Arc::from("test-secret"),
        }
    }

    fn subs() -> Subscriptions {
        Arc::new(RwLock::new(Topics::default()))
    }

    #[tokio::test]
    async fn join_publish_leave_room() {
        let ctx = context(Arc::new(Database::open_in_memory().unwrap()));
        let author = Author { id: Uuid::new_v4(), name: "ana@campus.edu".into() };
        let subscriptions = subs();
        let mut rx = ctx.dispatcher.subscribe();

        let publish = || GatewayCommand::Publish {
            conversation: ConversationKey::room("lobby"),
            content: "hello".into(),
            created_at: None,
        };

        let reply = handle_command(&ctx, &author, publish(), &subscriptions).await;
        assert!(matches!(reply, Some(GatewayEvent::Error { .. })));

        let reply = handle_command(&ctx, &author, GatewayCommand::JoinRoom { room: " lobby ".into(), username: None }, &subscriptions).await;
        assert!(matches!(reply, Some(GatewayEvent::Joined { room }) if room == "lobby"));

        assert!(handle_command(&ctx, &author, publish(), &subscriptions).await.is_none());
        match rx.recv().await.unwrap() {
            GatewayEvent::Message(m) => {
                assert_eq!(m.content, "hello");
                assert_eq!(m.user.name, "ana@campus.edu");
            }
            other => panic!("unexpected {other:?}"),
        }

        handle_command(&ctx, &author, GatewayCommand::LeaveRoom { room: "lobby".into() }, &subscriptions).await;
        assert!(subscriptions.read().await.keys.is_empty());
    }

    #[tokio::test]
    async fn room_messages_carry_the_joined_username() {
        let ctx = context(Arc::new(Database::open_in_memory().unwrap()));
        let author = Author { id: Uuid::new_v4(), name: "ana@campus.edu".into() };
        let subscriptions = subs();
        let mut rx = ctx.dispatcher.subscribe();

        let join = |room: &str, username: &str| GatewayCommand::JoinRoom {
            room: room.into(),
            username: Some(username.into()),
        };
        let publish = |room: &str| GatewayCommand::Publish {
            conversation: ConversationKey::room(room),
            content: "hi".into(),
            created_at: None,
        };

        handle_command(&ctx, &author, join("lobby", " Ana "), &subscriptions).await;
        handle_command(&ctx, &author, join("books", "   "), &subscriptions).await;

        for (room, expected) in [("lobby", "Ana"), ("books", "ana@campus.edu")] {
            assert!(handle_command(&ctx, &author, publish(room), &subscriptions).await.is_none());
            match rx.recv().await.unwrap() {
                GatewayEvent::Message(m) => {
                    assert_eq!(m.user.name, expected);
                    assert_eq!(m.user.id, Some(author.id));
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn subscribe_chats_keeps_only_own_chats_and_rooms() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let buyer = Uuid::new_v4();
        let seller = Uuid::new_v4();
        db.upsert_user_profile(&ProfileUpsert { id: buyer, email: "b@campus.edu", created_at: Utc::now() })
            .unwrap();
        let listing = db
            .create_listing(
                &NewListing {
                    id: Uuid::new_v4(),
                    title: "Fan".into(),
                    description: String::new(),
                    price: 15.0,
                    category: "Dorm".into(),
                    condition: Condition::New,
                    seller_id: seller,
                    contact_email: "s@campus.edu".into(),
                    image_url: None,
                },
                &ProfileUpsert { id: seller, email: "s@campus.edu", created_at: Utc::now() },
            )
            .unwrap();
        let (chat, _) = db.create_chat(listing.id, buyer, seller).unwrap();

        let ctx = context(db);
        let author = Author { id: buyer, name: "b@campus.edu".into() };
        let subscriptions = subs();
        subscriptions.write().await.join_room("lobby", None);

        let reply = handle_command(
            &ctx,
            &author,
            GatewayCommand::SubscribeChats { chat_ids: vec![chat.id, Uuid::new_v4()] },
            &subscriptions,
        )
        .await;
        assert!(matches!(reply, Some(GatewayEvent::Error { .. })));

        let subs = subscriptions.read().await;
        assert!(subs.contains(&ConversationKey::room("lobby")));
        assert!(subs.contains(&ConversationKey::chat(chat.id)));
        assert_eq!(subs.keys.len(), 2);
    }
}
