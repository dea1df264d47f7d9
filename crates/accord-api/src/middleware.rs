use axum::{
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};

use accord_engine::LifecycleError;
use accord_types::api::Claims;

use crate::AppState;
use crate::error::ApiError;

/// Extract and validate the JWT from the Authorization header. Tokens are
/// minted by the identity layer in front of us; we only verify them.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| StatusCode::UNAUTHORIZED)?;

    req.extensions_mut().insert(token_data.claims);
    Ok(next.run(req).await)
}

pub(crate) fn require_operator(claims: &Claims) -> Result<(), ApiError> {
    if !claims.operator {
        return Err(LifecycleError::Forbidden("operator only").into());
    }
    Ok(())
}
