use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use tracing::warn;
use uuid::Uuid;

use super::{
    claims::TokenKind,
    cookies::{read_cookie, ACCESS_COOKIE},
};
use crate::{error::AppError, state::AppState};

/// Caller identity taken from a valid access token, read from the
/// `accessToken` cookie or an `Authorization: Bearer` header.
///
/// When both are present the cookie is used and the header is ignored.
pub struct AuthUser(pub Uuid);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let bearer = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer ").or_else(|| h.strip_prefix("bearer ")));

        let token = read_cookie(&parts.headers, ACCESS_COOKIE)
            .or(bearer)
            .ok_or_else(|| AppError::unauthenticated("Unauthorized request"))?;

        let user_id = state.tokens.verify(token, TokenKind::Access).await.map_err(|_| {
            warn!("invalid or expired access token");
            AppError::unauthenticated("Invalid or expired access token")
        })?;

        Ok(AuthUser(user_id))
    }
}
