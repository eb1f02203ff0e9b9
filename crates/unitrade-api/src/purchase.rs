use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use unitrade_db::models::ProfileUpsert;
use unitrade_types::api::{Claims, PurchaseRequestResponse};
use unitrade_types::models::ListingStatus;
use unitrade_types::purchase::{
    PurchaseForm, PurchaseProduct, chat_redirect, format_purchase_message, validate_purchase_form,
};

use crate::AppState;
use crate::error::{ApiError, blocking};

/// POST /listings/{id}/purchase-request
///
/// Validates the form and renders the draft message the buyer will send in
/// the listing's chat. Nothing is stored apart from the buyer's profile.
pub async fn purchase_request(
    State(state): State<AppState>,
    Path(listing_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(form): Json<PurchaseForm>,
) -> Result<impl IntoResponse, ApiError> {
    let errors = validate_purchase_form(&form);
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }

    let db = state.db.clone();
    let listing = blocking(move || db.get_listing(listing_id))
        .await?
        .filter(|l| l.is_visible())
        .ok_or(ApiError::NotFound)?;

    if listing.seller_id == claims.sub {
        return Err(ApiError::Conflict("You cannot buy your own listing".into()));
    }
    if listing.status != ListingStatus::Active {
        return Err(ApiError::Conflict("This listing is no longer available".into()));
    }

    let db = state.db.clone();
    let (buyer_id, email) = (claims.sub, claims.email.clone());
    blocking(move || db.upsert_user_profile(&ProfileUpsert { id: buyer_id, email: &email, created_at: Utc::now() }))
        .await?;

    let draft = format_purchase_message(
        PurchaseProduct { title: &listing.title, price: listing.price },
        &claims.email,
        &form,
    );
    let room = listing.id.to_string();
    let redirect = chat_redirect(&room, &draft);

    info!("{} drafted a purchase request for listing {}", claims.email, listing.id);
    Ok(Json(PurchaseRequestResponse { draft, room, redirect }))
}
