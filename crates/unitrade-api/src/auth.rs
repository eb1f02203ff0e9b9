use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Bearer};
use chrono::Utc;
use jsonwebtoken::{EncodingKey, Header, encode};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use unitrade_db::models::ProfileUpsert;
use unitrade_types::FieldErrors;
use unitrade_types::api::{
    Claims, GateResponse, LoginRequest, LoginResponse, SessionUser, SignUpRequest, SignUpResponse,
};
use unitrade_types::gate::route_gate;
use unitrade_types::models::Role;

use crate::AppState;
use crate::error::{ApiError, blocking};
use crate::middleware::decode_claims;

const TOKEN_TTL_DAYS: i64 = 30;
const MIN_PASSWORD_LEN: usize = 8;

pub async fn sign_up(
    State(state): State<AppState>,
    Json(req): Json<SignUpRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim().to_string();

    let mut errors = FieldErrors::new();
    if !looks_like_email(&email) {
        errors.insert("email".into(), "Enter a valid email address".into());
    }
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        errors.insert("password".into(), "Password must be at least 8 characters".into());
    }
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
        .to_string();

    let role = state.role_for(&email);
    let user_id = Uuid::new_v4();

    let db = state.db.clone();
    let account_email = email.clone();
    let created = blocking(move || {
        let created = db.create_account(&user_id.to_string(), &account_email, &password_hash, role)?;
        if created {
            db.upsert_user_profile(&ProfileUpsert { id: user_id, email: &account_email, created_at: Utc::now() })?;
        }
        Ok(created)
    })
    .await?;

    if !created {
        return Err(ApiError::Conflict("An account with this email already exists".into()));
    }

    info!("New {} account {} ({})", role.as_str(), email, user_id);
    let token = create_token(&state.jwt_secret, user_id, &email, role)?;

    Ok((StatusCode::CREATED, Json(SignUpResponse { user_id, token })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let email = req.email.trim().to_string();
    let account = blocking(move || db.get_account_by_email(&email))
        .await?
        .ok_or(ApiError::Unauthorized)?;

    // Verify password
    let parsed_hash =
        PasswordHash::new(&account.password).map_err(|e| anyhow::anyhow!("stored hash unreadable: {}", e))?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Unauthorized)?;

    let user_id: Uuid = account.id.parse().map_err(anyhow::Error::from)?;
    let token = create_token(&state.jwt_secret, user_id, &account.email, account.role)?;

    Ok(Json(LoginResponse {
        user_id,
        email: account.email,
        role: account.role,
        token,
    }))
}

pub async fn session(Extension(claims): Extension<Claims>) -> Json<SessionUser> {
    Json(SessionUser { id: claims.sub, email: claims.email, role: claims.role })
}

#[derive(Debug, Deserialize)]
pub struct GateQuery {
    pub path: String,
}

/// Where the client should go for `path`, given the caller's session.
/// An invalid or expired token counts as no session.
pub async fn gate(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    Query(query): Query<GateQuery>,
) -> Json<GateResponse> {
    let has_session = bearer
        .and_then(|TypedHeader(Authorization(b))| decode_claims(&state.jwt_secret, b.token()))
        .is_some();
    let decision = route_gate(&query.path, has_session);
    Json(GateResponse { path: query.path, decision })
}

pub fn create_token(secret: &str, user_id: Uuid, email: &str, role: Role) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        email: email.to_string(),
        role,
        exp: (Utc::now() + chrono::Duration::days(TOKEN_TTL_DAYS)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.split('.').filter(|part| !part.is_empty()).count() >= 2
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    }
}
