//! Moderation console state.
//!
//! Ban and unban change the local list only after the backend acknowledged
//! them, so a failure never needs rolling back.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use unitrade_types::api::ModerationAck;
use unitrade_types::models::FlaggedListing;
use unitrade_types::moderation::filter_flagged;

use crate::error::{ClientError, Result};
use crate::http::UnitradeClient;

/// How long a success banner stays up.
pub const BANNER_TTL: Duration = Duration::from_secs(3);

pub trait ModerationBackend {
    fn flagged_listings(&self) -> impl Future<Output = Result<Vec<FlaggedListing>>> + Send;
    fn ban_listing(&self, id: Uuid) -> impl Future<Output = Result<ModerationAck>> + Send;
    fn unban_listing(&self, id: Uuid) -> impl Future<Output = Result<ModerationAck>> + Send;
}

impl ModerationBackend for UnitradeClient {
    fn flagged_listings(&self) -> impl Future<Output = Result<Vec<FlaggedListing>>> + Send {
        UnitradeClient::flagged_listings(self)
    }

    fn ban_listing(&self, id: Uuid) -> impl Future<Output = Result<ModerationAck>> + Send {
        UnitradeClient::ban_listing(self, id)
    }

    fn unban_listing(&self, id: Uuid) -> impl Future<Output = Result<ModerationAck>> + Send {
        UnitradeClient::unban_listing(self, id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModerationAction {
    Ban,
    Unban,
}

impl ModerationAction {
    fn past_tense(self) -> &'static str {
        match self {
            Self::Ban => "banned",
            Self::Unban => "unbanned",
        }
    }
}

#[derive(Debug, Clone)]
struct Banner {
    message: String,
    shown_at: Instant,
}

pub struct ModerationConsole<B> {
    backend: B,
    cancel: CancellationToken,
    listings: Vec<FlaggedListing>,
    query: String,
    loading: bool,
    alert: Option<String>,
    banner: Option<Banner>,
}

impl<B: ModerationBackend> ModerationConsole<B> {
    pub fn new(backend: B, cancel: CancellationToken) -> Self {
        Self {
            backend,
            cancel,
            listings: Vec::new(),
            query: String::new(),
            loading: false,
            alert: None,
            banner: None,
        }
    }

    pub async fn load(&mut self) {
        self.loading = true;
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ClientError::Cancelled),
            res = self.backend.flagged_listings() => res,
        };
        self.loading = false;

        match result {
            Ok(listings) => self.listings = listings,
            Err(ClientError::Cancelled) => {}
            Err(e) => {
                warn!("Loading flagged listings failed: {}", e);
                self.alert = Some(format!("Failed to load flagged listings: {}", e));
            }
        }
    }

    pub async fn ban(&mut self, id: Uuid) {
        self.moderate(id, ModerationAction::Ban).await
    }

    pub async fn unban(&mut self, id: Uuid) {
        self.moderate(id, ModerationAction::Unban).await
    }

    async fn moderate(&mut self, id: Uuid, action: ModerationAction) {
        let call = async {
            match action {
                ModerationAction::Ban => self.backend.ban_listing(id).await,
                ModerationAction::Unban => self.backend.unban_listing(id).await,
            }
        };
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ClientError::Cancelled),
            res = call => res,
        };

        match result {
            Ok(ack) => {
                let title = match self.listings.iter_mut().find(|l| l.id == ack.id) {
                    Some(listing) => {
                        listing.status = ack.status;
                        listing.title.clone()
                    }
                    None => ack.id.to_string(),
                };
                info!("Listing {} {}", ack.id, action.past_tense());
                self.banner = Some(Banner {
                    message: format!("\"{}\" {}", title, action.past_tense()),
                    shown_at: Instant::now(),
                });
            }
            Err(ClientError::Cancelled) => {}
            Err(e) => {
                warn!("Moderation of {} failed: {}", id, e);
                let verb = match action {
                    ModerationAction::Ban => "ban",
                    ModerationAction::Unban => "unban",
                };
                self.alert = Some(format!("Failed to {} listing: {}", verb, e));
            }
        }
    }

    pub fn set_query(&mut self, query: impl Into<String>) {
        self.query = query.into();
    }

    /// The listings matching the search box.
    pub fn visible(&self) -> Vec<&FlaggedListing> {
        filter_flagged(&self.listings, &self.query)
    }

    pub fn listings(&self) -> &[FlaggedListing] {
        &self.listings
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn alert(&self) -> Option<&str> {
        self.alert.as_deref()
    }

    pub fn dismiss_alert(&mut self) {
        self.alert = None;
    }

    /// The success banner, if it is still within [`BANNER_TTL`] at `now`.
    pub fn banner_at(&self, now: Instant) -> Option<&str> {
        self.banner
            .as_ref()
            .filter(|b| now.saturating_duration_since(b.shown_at) < BANNER_TTL)
            .map(|b| b.message.as_str())
    }

    pub fn banner(&self) -> Option<&str> {
        self.banner_at(Instant::now())
    }
}
