use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use unitrade_db::models::ProfileUpsert;
use unitrade_gateway::Author;
use unitrade_types::api::{
    Claims, CreateChatRequest, MarkReadResponse, SendMessageRequest, SendMessageResponse,
    UnreadCountResponse,
};

use crate::AppState;
use crate::error::{ApiError, blocking};

/// POST /chats: open (or reopen) the buyer's chat about a listing.
pub async fn create_chat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let listing = blocking(move || db.get_listing(req.listing_id))
        .await?
        .filter(|l| l.is_visible())
        .ok_or(ApiError::NotFound)?;

    if listing.seller_id == claims.sub {
        return Err(ApiError::Conflict("You cannot start a chat on your own listing".into()));
    }

    let db = state.db.clone();
    let (buyer_id, email) = (claims.sub, claims.email.clone());
    let (chat, created) = blocking(move || {
        db.upsert_user_profile(&ProfileUpsert { id: buyer_id, email: &email, created_at: Utc::now() })?;
        db.create_chat(listing.id, buyer_id, listing.seller_id)
    })
    .await?;

    let status = if created {
        info!("Chat {} opened by {} on listing {}", chat.id, claims.email, chat.listing_id);
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(chat)))
}

/// GET /chats
pub async fn list_chats(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let chats = blocking(move || db.get_user_chats(claims.sub)).await?;
    Ok(Json(chats))
}

pub async fn unread_count(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let count = blocking(move || db.get_unread_message_count(claims.sub)).await?;
    Ok(Json(UnreadCountResponse { count }))
}

/// GET /chats/{id}. Non-participants get 404.
pub async fn get_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let chat = state.chats.participant_chat(claims.sub, chat_id).await?;
    Ok(Json(chat))
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    state.chats.participant_chat(claims.sub, chat_id).await?;

    let db = state.db.clone();
    let messages = blocking(move || db.get_chat_messages(chat_id)).await?;
    Ok(Json(messages))
}

/// POST /chats/{id}/messages: store the message and push it to both
/// participants' live connections.
pub async fn send_message(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let author = Author { id: claims.sub, name: claims.email };
    let delivered = state
        .chats
        .deliver(&author, chat_id, &req.content, req.purchase_request_id)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SendMessageResponse { message: delivered.stored, warning: delivered.warning }),
    ))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    state.chats.participant_chat(claims.sub, chat_id).await?;

    let db = state.db.clone();
    let updated = blocking(move || db.mark_chat_as_read(chat_id, claims.sub)).await?;
    Ok(Json(MarkReadResponse { updated }))
}
