//! Moderation console endpoints. Every route here sits behind
//! `require_auth` + `require_admin`.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use unitrade_types::api::{Claims, MigrationStatus, ModerationAck, UserModerationAck};

use crate::AppState;
use crate::error::{ApiError, blocking};

/// GET /admin/flagged-listings
pub async fn flagged_listings(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let flagged = blocking(move || db.flagged_listings()).await?;
    Ok(Json(flagged))
}

pub async fn ban_listing(
    State(state): State<AppState>,
    Path(listing_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let listing = blocking(move || db.ban_listing(listing_id))
        .await?
        .ok_or(ApiError::NotFound)?;

    info!("Listing {} banned by {}", listing_id, claims.email);
    Ok(Json(ModerationAck { id: listing.id, status: listing.status }))
}

pub async fn unban_listing(
    State(state): State<AppState>,
    Path(listing_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let listing = blocking(move || db.unban_listing(listing_id))
        .await?
        .ok_or(ApiError::NotFound)?;

    info!("Listing {} unbanned by {}", listing_id, claims.email);
    Ok(Json(ModerationAck { id: listing.id, status: listing.status }))
}

/// DELETE /admin/listings/{id}: soft delete, whoever the seller is.
pub async fn remove_listing(
    State(state): State<AppState>,
    Path(listing_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    if !blocking(move || db.soft_delete_listing(listing_id)).await? {
        return Err(ApiError::NotFound);
    }
    info!("Listing {} removed by {}", listing_id, claims.email);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_users(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let users = blocking(move || db.list_user_profiles()).await?;
    Ok(Json(users))
}

pub async fn ban_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    set_user_banned(state, user_id, true, &claims).await
}

pub async fn unban_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    set_user_banned(state, user_id, false, &claims).await
}

async fn set_user_banned(
    state: AppState,
    user_id: Uuid,
    banned: bool,
    admin: &Claims,
) -> Result<Json<UserModerationAck>, ApiError> {
    if user_id == admin.sub {
        return Err(ApiError::Conflict("You cannot change your own ban status".into()));
    }

    let db = state.db.clone();
    if !blocking(move || db.set_user_banned(user_id, banned)).await? {
        return Err(ApiError::NotFound);
    }
    info!("User {} {} by {}", user_id, if banned { "banned" } else { "unbanned" }, admin.email);
    Ok(Json(UserModerationAck { id: user_id, banned }))
}

/// GET /admin/migration
pub async fn migration_status(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let (version, tables) = blocking(move || db.schema_status()).await?;
    Ok(Json(MigrationStatus { version, tables }))
}
