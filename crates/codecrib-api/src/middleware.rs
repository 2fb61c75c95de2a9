use axum::{
    extract::{Query, Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::Deserialize;

use codecrib_types::api::Claims;

use crate::AppState;

/// Decode and validate a bearer token signed with `secret`.
pub fn verify_token(secret: &str, token: &str) -> Result<Claims, StatusCode> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| StatusCode::UNAUTHORIZED)
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Extract and validate JWT from Authorization header.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = bearer(req.headers()).ok_or(StatusCode::UNAUTHORIZED)?;
    let claims = verify_token(&state.jwt_secret, token)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

#[derive(Deserialize)]
pub struct GatewayAuth {
    token: Option<String>,
}

/// Like [`require_auth`], but browsers cannot set headers on a WebSocket
/// upgrade, so `?token=` is accepted as well.
pub async fn require_gateway_auth(
    State(state): State<AppState>,
    Query(query): Query<GatewayAuth>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = match bearer(req.headers()) {
        Some(token) => token.to_string(),
        None => query.token.ok_or(StatusCode::UNAUTHORIZED)?,
    };
    let claims = verify_token(&state.jwt_secret, &token)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
