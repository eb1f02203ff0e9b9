use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Returned when a stored or submitted enum value is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

// -- Accounts --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "admin" => Ok(Self::Admin),
            other => Err(UnknownVariant { kind: "role", value: other.to_string() }),
        }
    }
}

/// Public profile row. Created lazily the first time a user lists an item,
/// opens a chat or sends a purchase request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub banned_at: Option<DateTime<Utc>>,
}

impl UserProfile {
    pub fn is_banned(&self) -> bool {
        self.banned_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub email: String,
}

// -- Listings --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    New,
    Used,
}

impl Condition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Used => "used",
        }
    }
}

impl FromStr for Condition {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "new" => Ok(Self::New),
            "used" => Ok(Self::Used),
            _ => Err(UnknownVariant { kind: "condition", value: s.to_string() }),
        }
    }
}

/// `active ⇄ banned` is moderator controlled, `active → sold` is seller
/// controlled. Soft deletion is tracked separately through `deleted_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    Active,
    Sold,
    Banned,
}

impl ListingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Sold => "sold",
            Self::Banned => "banned",
        }
    }
}

impl fmt::Display for ListingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListingStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "sold" => Ok(Self::Sold),
            "banned" => Ok(Self::Banned),
            other => Err(UnknownVariant { kind: "listing status", value: other.to_string() }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub price: f64,
    pub category: String,
    pub condition: Condition,
    pub status: ListingStatus,
    pub seller_id: Uuid,
    pub contact_email: String,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub banned_at: Option<DateTime<Utc>>,
}

impl Listing {
    /// Whether buyers may see this listing at all.
    pub fn is_visible(&self) -> bool {
        self.deleted_at.is_none() && self.status != ListingStatus::Banned
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingSummary {
    pub id: Uuid,
    pub title: String,
    pub price: f64,
    pub image_url: Option<String>,
    pub status: ListingStatus,
}

// -- Chats --

/// A persisted buyer/seller conversation about one listing, with the
/// joined summaries used by the inbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub listing: Option<ListingSummary>,
    pub buyer: Option<UserSummary>,
    pub seller: Option<UserSummary>,
}

impl Chat {
    pub fn has_participant(&self, user_id: Uuid) -> bool {
        self.buyer_id == user_id || self.seller_id == user_id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub sender_id: Uuid,
    pub sender_email: Option<String>,
    pub content: String,
    pub purchase_request_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

// -- Moderation --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagEntry {
    pub id: Uuid,
    pub flagged_by: Uuid,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// Read-only projection of a listing together with the flags raised on it.
/// `reason` and `date` come from the most recent flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlaggedListing {
    pub id: Uuid,
    pub title: String,
    pub category: String,
    pub seller_email: String,
    pub price: f64,
    pub description: String,
    pub image: Option<String>,
    pub date: DateTime<Utc>,
    pub flag_count: u32,
    pub reason: String,
    pub flags: Vec<FlagEntry>,
    pub status: ListingStatus,
}
