use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    model::{NewUser, User, UserPatch},
    repo::{StoreError, UserStore},
};

/// Process-local store used when no database is configured, and by tests.
#[derive(Default)]
pub struct InMemoryUserStore {
    users: Mutex<HashMap<Uuid, User>>,
}

impl InMemoryUserStore {
    fn lock(&self) -> Result<MutexGuard<'_, HashMap<Uuid, User>>, StoreError> {
        self.users
            .lock()
            .map_err(|_| StoreError::Other(anyhow::anyhow!("user map poisoned")))
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.users.lock().map(|m| m.len()).unwrap_or(0)
    }
}

fn taken(users: &HashMap<Uuid, User>, username: &str, email: &str, excluding: Option<Uuid>) -> bool {
    users
        .values()
        .any(|u| Some(u.id) != excluding && (u.username == username || u.email == email))
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_username_or_email(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<User>, StoreError> {
        let users = self.lock()?;
        Ok(users
            .values()
            .find(|u| {
                username.is_some_and(|n| u.username == n) || email.is_some_and(|e| u.email == e)
            })
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.lock()?.get(&id).cloned())
    }

    async fn find_taken_by_other(
        &self,
        username: &str,
        email: &str,
        excluding: Uuid,
    ) -> Result<Option<User>, StoreError> {
        Ok(self
            .lock()?
            .values()
            .find(|u| u.id != excluding && (u.username == username || u.email == email))
            .cloned())
    }

    async fn create(&self, user: NewUser) -> Result<User, StoreError> {
        let mut users = self.lock()?;
        if taken(&users, &user.username, &user.email, None) {
            return Err(StoreError::UniqueViolation);
        }
        let now = OffsetDateTime::now_utc();
        let record = User {
            id: Uuid::new_v4(),
            username: user.username,
            email: user.email,
            full_name: user.full_name,
            avatar: user.avatar,
            cover_image: user.cover_image,
            password_hash: user.password_hash,
            refresh_token: None,
            created_at: now,
            updated_at: now,
        };
        users.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_fields(&self, id: Uuid, patch: UserPatch) -> Result<Option<User>, StoreError> {
        let mut users = self.lock()?;
        let Some(current) = users.get(&id) else {
            return Ok(None);
        };
        let username = patch.username.unwrap_or_else(|| current.username.clone());
        let email = patch.email.unwrap_or_else(|| current.email.clone());
        if taken(&users, &username, &email, Some(id)) {
            return Err(StoreError::UniqueViolation);
        }

        let Some(user) = users.get_mut(&id) else {
            return Ok(None);
        };
        user.username = username;
        user.email = email;
        if let Some(v) = patch.full_name {
            user.full_name = v;
        }
        if let Some(v) = patch.password_hash {
            user.password_hash = v;
        }
        if let Some(v) = patch.avatar {
            user.avatar = v;
        }
        if let Some(v) = patch.cover_image {
            user.cover_image = Some(v);
        }
        if let Some(v) = patch.refresh_token {
            user.refresh_token = v;
        }
        user.updated_at = OffsetDateTime::now_utc();
        Ok(Some(user.clone()))
    }

    async fn swap_refresh_token(
        &self,
        id: Uuid,
        expected: Option<&str>,
        new: Option<&str>,
    ) -> Result<bool, StoreError> {
        let mut users = self.lock()?;
        match users.get_mut(&id) {
            Some(user) if user.refresh_token.as_deref() == expected => {
                user.refresh_token = new.map(str::to_string);
                user.updated_at = OffsetDateTime::now_utc();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.lock()?.remove(&id).is_some())
    }
}
