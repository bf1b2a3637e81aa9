use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use super::model::{NewUser, User, UserPatch};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("username or email already taken")]
    UniqueViolation,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            if db.is_unique_violation() {
                return StoreError::UniqueViolation;
            }
        }
        StoreError::Other(e.into())
    }
}

/// Persistent user records. Username and email uniqueness is enforced here.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_username_or_email(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<User>, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    /// A user other than `excluding` that holds `username` or `email`.
    async fn find_taken_by_other(
        &self,
        username: &str,
        email: &str,
        excluding: Uuid,
    ) -> Result<Option<User>, StoreError>;

    async fn create(&self, user: NewUser) -> Result<User, StoreError>;

    /// Returns `None` when no user has `id`.
    async fn update_fields(&self, id: Uuid, patch: UserPatch) -> Result<Option<User>, StoreError>;

    /// Sets the refresh token to `new` only if it currently equals `expected`.
    async fn swap_refresh_token(
        &self,
        id: Uuid,
        expected: Option<&str>,
        new: Option<&str>,
    ) -> Result<bool, StoreError>;

    async fn delete_by_id(&self, id: Uuid) -> Result<bool, StoreError>;
}

const USER_COLUMNS: &str = "id, username, email, full_name, avatar, cover_image, \
                            password_hash, refresh_token, created_at, updated_at";

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_username_or_email(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<User>, StoreError> {
        if username.is_none() && email.is_none() {
            return Ok(None);
        }
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE ($1::text IS NOT NULL AND username = $1)
               OR ($2::text IS NOT NULL AND email = $2)
            LIMIT 1
            "#
        ))
        .bind(username)
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_taken_by_other(
        &self,
        username: &str,
        email: &str,
        excluding: Uuid,
    ) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE id <> $3 AND (username = $1 OR email = $2)
            LIMIT 1
            "#
        ))
        .bind(username)
        .bind(email)
        .bind(excluding)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn create(&self, user: NewUser) -> Result<User, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (username, email, full_name, avatar, cover_image, password_hash)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.full_name)
        .bind(&user.avatar)
        .bind(&user.cover_image)
        .bind(&user.password_hash)
        .fetch_one(&self.db)
        .await?;
        Ok(user)
    }

    async fn update_fields(&self, id: Uuid, patch: UserPatch) -> Result<Option<User>, StoreError> {
        let (set_refresh, refresh_token) = match patch.refresh_token {
            Some(value) => (true, value),
            None => (false, None),
        };
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users SET
                username      = COALESCE($2, username),
                email         = COALESCE($3, email),
                full_name     = COALESCE($4, full_name),
                password_hash = COALESCE($5, password_hash),
                avatar        = COALESCE($6, avatar),
                cover_image   = COALESCE($7, cover_image),
                refresh_token = CASE WHEN $8 THEN $9 ELSE refresh_token END,
                updated_at    = now()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(patch.username)
        .bind(patch.email)
        .bind(patch.full_name)
        .bind(patch.password_hash)
        .bind(patch.avatar)
        .bind(patch.cover_image)
        .bind(set_refresh)
        .bind(refresh_token)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn swap_refresh_token(
        &self,
        id: Uuid,
        expected: Option<&str>,
        new: Option<&str>,
    ) -> Result<bool, StoreError> {
        let res = sqlx::query(
            r#"
            UPDATE users
               SET refresh_token = $3, updated_at = now()
             WHERE id = $1 AND refresh_token IS NOT DISTINCT FROM $2
            "#,
        )
        .bind(id)
        .bind(expected)
        .bind(new)
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<bool, StoreError> {
        let res = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() > 0)
    }
}
