use anyhow::{Context, Result, ensure};
use rusqlite::{Connection, Row};
use uuid::Uuid;

use unitrade_types::models::{Chat, ChatMessage, ListingSummary, UserSummary};

use super::{OptionalExt, placeholders};
use crate::models::{enum_col, opt_ts_col, opt_uuid_col, ts_col, uuid_col};
use crate::{Database, now_ts};

const CHAT_SELECT: &str = "
    SELECT c.id, c.listing_id, c.buyer_id, c.seller_id, c.created_at, c.updated_at,
           l.id, l.title, l.price, l.image_url, l.status,
           b.id, b.email,
           s.id, s.email
    FROM chats c
    LEFT JOIN listings l ON l.id = c.listing_id
    LEFT JOIN users b ON b.id = c.buyer_id
    LEFT JOIN users s ON s.id = c.seller_id";

const MESSAGE_SELECT: &str = "
    SELECT m.id, m.chat_id, m.sender_id, u.email, m.content, m.purchase_request_id,
           m.created_at, m.read_at
    FROM messages m
    LEFT JOIN users u ON u.id = m.sender_id";

/// Result of [`Database::send_message`]. The message row is committed even
/// when bumping the chat's `updated_at` afterwards fails.
#[derive(Debug)]
pub struct SentMessage {
    pub message: ChatMessage,
    pub touch_error: Option<anyhow::Error>,
}

impl Database {
    /// Returns the live chat for `(listing, buyer, seller)`, creating it if
    /// needed. The bool is `true` when this call inserted the row.
    ///
    /// The partial unique index on live triples makes this safe under
    /// concurrent callers: the losing insert is ignored and both read back
    /// the same row.
    pub fn create_chat(&self, listing_id: Uuid, buyer_id: Uuid, seller_id: Uuid) -> Result<(Chat, bool)> {
        ensure!(
            !listing_id.is_nil() && !buyer_id.is_nil() && !seller_id.is_nil(),
            "Listing, buyer and seller IDs are required"
        );

        self.with_conn_mut(|conn| {
            let now = now_ts();
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO chats (id, listing_id, buyer_id, seller_id, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                    (
                        Uuid::new_v4().to_string(),
                        listing_id.to_string(),
                        buyer_id.to_string(),
                        seller_id.to_string(),
                        &now,
                    ),
                )
                .context("creating chat")?;

            let chat = conn
                .query_row(
                    &format!(
                        "{CHAT_SELECT}
                         WHERE c.listing_id = ?1 AND c.buyer_id = ?2 AND c.seller_id = ?3
                           AND c.deleted_at IS NULL"
                    ),
                    (listing_id.to_string(), buyer_id.to_string(), seller_id.to_string()),
                    chat_from_row,
                )
                .context("reading back chat")?;
            Ok((chat, inserted == 1))
        })
    }

    pub fn send_message(
        &self,
        chat_id: Uuid,
        sender_id: Uuid,
        content: &str,
        purchase_request_id: Option<&str>,
    ) -> Result<SentMessage> {
        ensure!(!chat_id.is_nil(), "Chat ID is required");

        self.with_conn_mut(|conn| {
            let id = Uuid::new_v4();
            let now = now_ts();
            conn.execute(
                "INSERT INTO messages (id, chat_id, sender_id, content, purchase_request_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                (
                    id.to_string(),
                    chat_id.to_string(),
                    sender_id.to_string(),
                    content,
                    purchase_request_id,
                    &now,
                ),
            )
            .context("inserting message")?;

            let message = conn.query_row(
                &format!("{MESSAGE_SELECT} WHERE m.id = ?1"),
                [id.to_string()],
                message_from_row,
            )?;

            let touch_error = conn
                .execute(
                    "UPDATE chats SET updated_at = ?2 WHERE id = ?1",
                    (chat_id.to_string(), &now),
                )
                .context("updating chat timestamp")
                .err();

            Ok(SentMessage { message, touch_error })
        })
    }

    /// Chats the user takes part in, most recently active first.
    pub fn get_user_chats(&self, user_id: Uuid) -> Result<Vec<Chat>> {
        ensure!(!user_id.is_nil(), "User ID is required");

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{CHAT_SELECT}
                 WHERE (c.buyer_id = ?1 OR c.seller_id = ?1) AND c.deleted_at IS NULL
                 ORDER BY c.updated_at DESC"
            ))?;
            let rows = stmt
                .query_map([user_id.to_string()], chat_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_chat_by_id(&self, chat_id: Uuid) -> Result<Option<Chat>> {
        ensure!(!chat_id.is_nil(), "Chat ID is required");

        self.with_conn(|conn| query_chat(conn, chat_id))
    }

    /// Messages of a chat in send order.
    pub fn get_chat_messages(&self, chat_id: Uuid) -> Result<Vec<ChatMessage>> {
        ensure!(!chat_id.is_nil(), "Chat ID is required");

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{MESSAGE_SELECT}
                 WHERE m.chat_id = ?1 AND m.deleted_at IS NULL
                 ORDER BY m.created_at ASC, m.rowid ASC"
            ))?;
            let rows = stmt
                .query_map([chat_id.to_string()], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Marks the counterparty's unread messages as read. Returns how many
    /// rows changed, so a repeat call returns 0.
    pub fn mark_chat_as_read(&self, chat_id: Uuid, user_id: Uuid) -> Result<usize> {
        ensure!(!chat_id.is_nil(), "Chat ID is required");

        self.with_conn_mut(|conn| {
            let updated = conn.execute(
                "UPDATE messages SET read_at = ?3
                 WHERE chat_id = ?1 AND sender_id != ?2 AND read_at IS NULL AND deleted_at IS NULL",
                (chat_id.to_string(), user_id.to_string(), now_ts()),
            )?;
            Ok(updated)
        })
    }

    /// Unread messages across all of the user's chats.
    pub fn get_unread_message_count(&self, user_id: Uuid) -> Result<u64> {
        let chats = self.get_user_chats(user_id)?;
        if chats.is_empty() {
            return Ok(0);
        }

        let mut params: Vec<String> = chats.iter().map(|c| c.id.to_string()).collect();
        params.push(user_id.to_string());
        let sql = format!(
            "SELECT COUNT(*) FROM messages
             WHERE chat_id IN ({}) AND sender_id != ?{} AND read_at IS NULL AND deleted_at IS NULL",
            placeholders(chats.len()),
            chats.len() + 1
        );

        self.with_conn(|conn| {
            let count: i64 = conn.query_row(&sql, rusqlite::params_from_iter(params.iter()), |r| r.get(0))?;
            Ok(count as u64)
        })
    }
}

fn query_chat(conn: &Connection, chat_id: Uuid) -> Result<Option<Chat>> {
    conn.query_row(
        &format!("{CHAT_SELECT} WHERE c.id = ?1 AND c.deleted_at IS NULL"),
        [chat_id.to_string()],
        chat_from_row,
    )
    .optional()
}

fn chat_from_row(row: &Row<'_>) -> rusqlite::Result<Chat> {
    let listing = match opt_uuid_col(row, 6)? {
        Some(id) => Some(ListingSummary {
            id,
            title: row.get(7)?,
            price: row.get(8)?,
            image_url: row.get(9)?,
            status: enum_col(row, 10)?,
        }),
        None => None,
    };
    let buyer = match opt_uuid_col(row, 11)? {
        Some(id) => Some(UserSummary { id, email: row.get(12)? }),
        None => None,
    };
    let seller = match opt_uuid_col(row, 13)? {
        Some(id) => Some(UserSummary { id, email: row.get(14)? }),
        None => None,
    };

    Ok(Chat {
        id: uuid_col(row, 0)?,
        listing_id: uuid_col(row, 1)?,
        buyer_id: uuid_col(row, 2)?,
        seller_id: uuid_col(row, 3)?,
        created_at: ts_col(row, 4)?,
        updated_at: ts_col(row, 5)?,
        listing,
        buyer,
        seller,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<ChatMessage> {
    Ok(ChatMessage {
        id: uuid_col(row, 0)?,
        chat_id: uuid_col(row, 1)?,
        sender_id: uuid_col(row, 2)?,
        sender_email: row.get(3)?,
        content: row.get(4)?,
        purchase_request_id: row.get(5)?,
        created_at: ts_col(row, 6)?,
        read_at: opt_ts_col(row, 7)?,
    })
}
