use axum::{
    Extension,
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Bearer};
use jsonwebtoken::{DecodingKey, Validation, decode};

use unitrade_types::api::Claims;

use crate::AppState;
use crate::error::ApiError;

pub fn decode_claims(secret: &str, token: &str) -> Option<Claims> {
    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &Validation::default())
        .ok()
        .map(|data| data.claims)
}

/// Extract and validate the JWT from the Authorization header, then make
/// the claims available to handlers as `Extension<Claims>`.
pub async fn require_auth(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let TypedHeader(Authorization(bearer)) = bearer.ok_or(ApiError::Unauthorized)?;
    let claims = decode_claims(&state.jwt_secret, bearer.token()).ok_or(ApiError::Unauthorized)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Must run inside `require_auth`.
pub async fn require_admin(Extension(claims): Extension<Claims>, req: Request, next: Next) -> Result<Response, ApiError> {
    if !claims.is_admin() {
        return Err(ApiError::Forbidden);
    }
    Ok(next.run(req).await)
}
