//! REST surface of the marketplace: auth, listings, purchase requests,
//! buyer/seller chats and the moderation console.

pub mod admin;
pub mod auth;
pub mod chats;
pub mod error;
pub mod listings;
pub mod middleware;
pub mod purchase;
pub mod storage;

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post},
};
use tower_http::services::ServeDir;

use unitrade_db::Database;
use unitrade_gateway::{Dispatcher, PersistedChats};
use unitrade_types::models::Role;

use crate::storage::ImageStorage;

/// Base64 images of up to 5 MB plus the rest of the listing JSON.
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    /// Lowercased emails that sign up as admins.
    pub admin_emails: Vec<String>,
    pub storage: ImageStorage,
    pub dispatcher: Dispatcher,
    pub chats: PersistedChats,
}

impl AppStateInner {
    pub fn new(
        db: Arc<Database>,
        jwt_secret: String,
        admin_emails: Vec<String>,
        storage: ImageStorage,
        dispatcher: Dispatcher,
    ) -> Self {
        let chats = PersistedChats::new(db.clone(), dispatcher.clone());
        let admin_emails = admin_emails.into_iter().map(|e| e.trim().to_lowercase()).collect();
        Self { db, jwt_secret, admin_emails, storage, dispatcher, chats }
    }

    pub fn role_for(&self, email: &str) -> Role {
        let email = email.trim().to_lowercase();
        if self.admin_emails.contains(&email) { Role::Admin } else { Role::User }
    }
}

/// All HTTP routes except the WebSocket gateway.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/sign-up", post(auth::sign_up))
        .route("/auth/login", post(auth::login))
        .route("/auth/gate", get(auth::gate))
        .nest_service("/images", ServeDir::new(state.storage.dir()))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/auth/session", get(auth::session))
        .route("/listings", get(listings::search_listings).post(listings::create_listing))
        .route("/listings/{listing_id}", get(listings::get_listing))
        .route("/listings/{listing_id}/purchase-request", post(purchase::purchase_request))
        .route("/listings/{listing_id}/report", post(listings::report_listing))
        .route("/dashboard/listings", get(listings::my_listings))
        .route("/dashboard/listings/{listing_id}", delete(listings::delete_own_listing))
        .route("/dashboard/listings/{listing_id}/sold", post(listings::mark_sold))
        .route("/chats", get(chats::list_chats).post(chats::create_chat))
        .route("/chats/unread-count", get(chats::unread_count))
        .route("/chats/{chat_id}", get(chats::get_chat))
        .route("/chats/{chat_id}/messages", get(chats::get_messages).post(chats::send_message))
        .route("/chats/{chat_id}/read", post(chats::mark_read))
        .layer(from_fn_with_state(state.clone(), middleware::require_auth))
        .with_state(state.clone());

    let admin_routes = Router::new()
        .route("/admin/flagged-listings", get(admin::flagged_listings))
        .route("/admin/listings/{listing_id}", delete(admin::remove_listing))
        .route("/admin/listings/{listing_id}/ban", post(admin::ban_listing))
        .route("/admin/listings/{listing_id}/unban", post(admin::unban_listing))
        .route("/admin/users", get(admin::list_users))
        .route("/admin/users/{user_id}/ban", post(admin::ban_user))
        .route("/admin/users/{user_id}/unban", post(admin::unban_user))
        .route("/admin/migration", get(admin::migration_status))
        .layer(from_fn(middleware::require_admin))
        .layer(from_fn_with_state(state.clone(), middleware::require_auth))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(admin_routes)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
}
