use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{claims::TokenKind, jwt::JwtKeys};
use crate::{
    error::{AppError, AppResult},
    users::{
        model::{User, UserPatch},
        repo::UserStore,
    },
};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Timing-safe comparison for stored secrets.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Issues, verifies, rotates and revokes session tokens.
///
/// The refresh token last persisted on the user record is the only one that
/// is accepted; anything older fails with [`AppError::ExpiredOrRevoked`] even
/// while its signature is still valid.
#[derive(Clone)]
pub struct TokenService {
    keys: JwtKeys,
    users: Arc<dyn UserStore>,
}

impl TokenService {
    pub fn new(keys: JwtKeys, users: Arc<dyn UserStore>) -> Self {
        Self { keys, users }
    }

    pub fn keys(&self) -> &JwtKeys {
        &self.keys
    }

    pub fn issue_access_token(&self, user_id: Uuid) -> AppResult<String> {
        self.keys.sign_access(user_id).map_err(AppError::Internal)
    }

    /// Signs a refresh token and stores it as the user's only valid one.
    pub async fn issue_refresh_token(&self, user_id: Uuid) -> AppResult<String> {
        let token = self.keys.sign_refresh(user_id).map_err(AppError::Internal)?;
        let patch = UserPatch {
            refresh_token: Some(Some(token.clone())),
            ..UserPatch::default()
        };
        self.users
            .update_fields(user_id, patch)
            .await?
            .ok_or_else(|| {
                AppError::Persistence(anyhow::anyhow!("user {user_id} vanished while issuing tokens"))
            })?;
        Ok(token)
    }

    pub async fn issue_pair(&self, user_id: Uuid) -> AppResult<TokenPair> {
        let access_token = self.issue_access_token(user_id)?;
        let refresh_token = self.issue_refresh_token(user_id).await?;
        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    pub fn verify_access(&self, token: &str) -> AppResult<Uuid> {
        self.keys
            .verify(token, TokenKind::Access)
            .map(|claims| claims.sub)
            .map_err(|e| {
                warn!(error = %e, "access token rejected");
                AppError::InvalidToken
            })
    }

    /// Verifies a refresh token and returns its owner.
    pub async fn verify_refresh(&self, token: &str) -> AppResult<User> {
        let claims = self.keys.verify(token, TokenKind::Refresh).map_err(|e| {
            warn!(error = %e, "refresh token rejected");
            AppError::InvalidToken
        })?;
        let user = self
            .users
            .find_by_id(claims.sub)
            .await?
            .ok_or(AppError::InvalidToken)?;
        match user.refresh_token.as_deref() {
            Some(stored) if constant_time_eq(stored.as_bytes(), token.as_bytes()) => Ok(user),
            _ => {
                warn!(user_id = %user.id, "refresh token superseded or revoked");
                Err(AppError::ExpiredOrRevoked)
            }
        }
    }

    /// Resolves a token of either kind to its owner's id.
    pub async fn verify(&self, token: &str, kind: TokenKind) -> AppResult<Uuid> {
        match kind {
            TokenKind::Access => self.verify_access(token),
            TokenKind::Refresh => self.verify_refresh(token).await.map(|u| u.id),
        }
    }

    /// Exchanges a valid refresh token for a new pair. The old token stops
    /// working as soon as the new one is stored.
    #[instrument(skip_all)]
    pub async fn rotate(&self, old_refresh: &str) -> AppResult<(User, TokenPair)> {
        let user = self.verify_refresh(old_refresh).await?;
        let access_token = self.issue_access_token(user.id)?;
        let refresh_token = self.keys.sign_refresh(user.id).map_err(AppError::Internal)?;

        let swapped = self
            .users
            .swap_refresh_token(user.id, Some(old_refresh), Some(&refresh_token))
            .await?;
        if !swapped {
            warn!(user_id = %user.id, "refresh token rotated concurrently");
            return Err(AppError::ExpiredOrRevoked);
        }

        info!(user_id = %user.id, "refresh token rotated");
        Ok((
            user,
            TokenPair {
                access_token,
                refresh_token,
            },
        ))
    }

    pub async fn revoke(&self, user_id: Uuid) -> AppResult<()> {
        let patch = UserPatch {
            refresh_token: Some(None),
            ..UserPatch::default()
        };
        self.users.update_fields(user_id, patch).await?;
        info!(user_id = %user_id, "refresh token revoked");
        Ok(())
    }
}
