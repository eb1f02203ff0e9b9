use axum::{
    Extension, Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use unitrade_db::models::{NewListing, ProfileUpsert};
use unitrade_types::FieldErrors;
use unitrade_types::api::{
    Claims, CreateListingRequest, ListingsResponse, ModerationAck, ProductDetails, ReportRequest,
};
use unitrade_types::filters::{ListingFilterParams, ListingFilters};
use unitrade_types::models::{Condition, Listing, ListingStatus};

use crate::AppState;
use crate::error::{ApiError, blocking};
use crate::storage::{ImageData, decode_image};

const MIN_TITLE_LEN: usize = 3;

/// GET /listings: the catalog search.
pub async fn search_listings(
    State(state): State<AppState>,
    Query(params): Query<ListingFilterParams>,
) -> Result<impl IntoResponse, ApiError> {
    let filters = ListingFilters::try_from(params).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let db = state.db.clone();
    let listings = blocking(move || db.search_listings(&filters, Utc::now())).await?;

    Ok(Json(ListingsResponse { total_results: listings.len(), listings }))
}

/// GET /listings/{id}. Hidden listings are only visible to their seller and
/// to admins.
pub async fn get_listing(
    State(state): State<AppState>,
    Path(listing_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let (product, seller) = blocking(move || {
        let Some(product) = db.get_listing(listing_id)? else {
            return Ok(None);
        };
        let seller = db.get_user_profile(product.seller_id)?;
        Ok(Some((product, seller)))
    })
    .await?
    .ok_or(ApiError::NotFound)?;

    let may_see_hidden = product.seller_id == claims.sub || claims.is_admin();
    if product.deleted_at.is_some() || (!product.is_visible() && !may_see_hidden) {
        return Err(ApiError::NotFound);
    }

    Ok(Json(ProductDetails { product, seller }))
}

/// GET /dashboard/listings: the caller's own listings.
pub async fn my_listings(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let listings = blocking(move || db.seller_listings(claims.sub)).await?;
    Ok(Json(listings))
}

pub async fn mark_sold(
    State(state): State<AppState>,
    Path(listing_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    if !blocking(move || db.mark_listing_sold(listing_id, claims.sub)).await? {
        return Err(ApiError::NotFound);
    }
    info!("Listing {} marked sold by {}", listing_id, claims.email);
    Ok(Json(ModerationAck { id: listing_id, status: ListingStatus::Sold }))
}

pub async fn delete_own_listing(
    State(state): State<AppState>,
    Path(listing_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let deleted = blocking(move || match db.get_listing(listing_id)? {
        Some(listing) if listing.seller_id == claims.sub => db.soft_delete_listing(listing_id),
        _ => Ok(false),
    })
    .await?;

    if !deleted {
        return Err(ApiError::NotFound);
    }
    Ok(StatusCode::NO_CONTENT)
}

/// A listing form that passed validation.
#[derive(Debug)]
pub struct ValidListing {
    pub title: String,
    pub description: String,
    pub price: f64,
    pub category: String,
    pub condition: Condition,
    pub image: ImageData,
}

/// Checks every field before anything is stored.
pub fn validate_listing(req: &CreateListingRequest) -> Result<ValidListing, FieldErrors> {
    let mut errors = FieldErrors::new();

    let title = req.title.trim();
    if title.chars().count() < MIN_TITLE_LEN {
        errors.insert("title".into(), "Title must be at least 3 characters".into());
    }
    if !(req.price.is_finite() && req.price > 0.0) {
        errors.insert("price".into(), "Price must be greater than 0".into());
    }
    let condition = req.condition.parse::<Condition>();
    if condition.is_err() {
        errors.insert("condition".into(), "Condition must be new or used".into());
    }
    let image = match &req.image {
        None => Err("Image is required"),
        Some(upload) => decode_image(upload),
    };
    if let Err(message) = &image {
        errors.insert("image".into(), message.to_string());
    }

    match (condition, image) {
        (Ok(condition), Ok(image)) if errors.is_empty() => Ok(ValidListing {
            title: title.to_string(),
            description: req.description.trim().to_string(),
            price: req.price,
            category: req.category.trim().to_string(),
            condition,
            image,
        }),
        _ => Err(errors),
    }
}

/// POST /listings: store the image, then write profile and listing in one
/// transaction. A failed write removes the image again.
pub async fn create_listing(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<CreateListingRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let valid = validate_listing(&req).map_err(ApiError::Validation)?;

    let db = state.db.clone();
    let seller_id = claims.sub;
    let banned = blocking(move || Ok(db.get_user_profile(seller_id)?.is_some_and(|p| p.is_banned()))).await?;
    if banned {
        return Err(ApiError::Forbidden);
    }

    let stored = state.storage.save(&valid.image).await?;

    let new = NewListing {
        id: Uuid::new_v4(),
        title: valid.title,
        description: valid.description,
        price: valid.price,
        category: valid.category,
        condition: valid.condition,
        seller_id,
        contact_email: claims.email.clone(),
        image_url: Some(stored.url.clone()),
    };
    let db = state.db.clone();
    let email = claims.email.clone();
    let result = blocking(move || {
        db.create_listing(&new, &ProfileUpsert { id: new.seller_id, email: &email, created_at: Utc::now() })
    })
    .await;

    match result {
        Ok(listing) => {
            info!("{} listed '{}' ({})", claims.email, listing.title, listing.id);
            Ok((StatusCode::CREATED, Json(listing)))
        }
        Err(e) => {
            if stored.created {
                if let Err(cleanup) = state.storage.delete(&stored.name).await {
                    error!("Failed to remove image {} after listing write failed: {}", stored.name, cleanup);
                }
            } else {
                warn!("Listing write failed; image {} was already shared, keeping it", stored.name);
            }
            Err(e)
        }
    }
}

/// POST /listings/{id}/report
pub async fn report_listing(
    State(state): State<AppState>,
    Path(listing_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ReportRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let reason = req.reason.trim().to_string();
    if reason.is_empty() {
        return Err(ApiError::field("reason", "Please describe the problem"));
    }

    let db = state.db.clone();
    let listing: Listing = blocking(move || db.get_listing(listing_id))
        .await?
        .filter(|l| l.deleted_at.is_none())
        .ok_or(ApiError::NotFound)?;
    if listing.seller_id == claims.sub {
        return Err(ApiError::Forbidden);
    }

    let db = state.db.clone();
    let flag = blocking(move || db.insert_flag(listing_id, claims.sub, &reason)).await?;
    info!("Listing {} flagged by {}", listing_id, claims.email);

    Ok((StatusCode::CREATED, Json(flag)))
}
