//! Fakes and fixtures shared by the unit tests.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use crate::{
    config::{AppConfig, JwtConfig, StorageConfig},
    state::AppState,
    storage::{join_url, strip_base, StorageClient},
    uploads::StagedFile,
    users::{
        memory::InMemoryUserStore,
        model::{NewUser, User, UserPatch},
        repo::{StoreError, UserStore},
    },
};

const MEDIA_BASE: &str = "https://media.test/bucket";

/// Object storage that keeps objects in memory and can be told to misbehave.
pub struct FakeStorage {
    objects: Mutex<HashMap<String, Bytes>>,
    deleted: Mutex<Vec<String>>,
    puts_allowed: AtomicUsize,
    put_delay: Mutex<Option<Duration>>,
}

impl Default for FakeStorage {
    fn default() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            deleted: Mutex::new(Vec::new()),
            puts_allowed: AtomicUsize::new(usize::MAX),
            put_delay: Mutex::new(None),
        }
    }
}

impl FakeStorage {
    /// Lets `n` more puts succeed, then fails every later one.
    pub fn fail_puts_after(&self, n: usize) {
        self.puts_allowed.store(n, Ordering::SeqCst);
    }

    pub fn delay_puts(&self, delay: Duration) {
        *self.put_delay.lock().unwrap() = Some(delay);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn deleted_keys(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl StorageClient for FakeStorage {
    async fn put_object(&self, key: &str, body: Bytes, _ct: &str) -> anyhow::Result<()> {
        let delay = *self.put_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let allowed = self.puts_allowed.load(Ordering::SeqCst);
        if allowed == 0 {
            anyhow::bail!("injected put failure for {}", key);
        }
        if allowed != usize::MAX {
            self.puts_allowed.fetch_sub(1, Ordering::SeqCst);
        }
        self.objects.lock().unwrap().insert(key.to_string(), body);
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
        self.objects.lock().unwrap().remove(key);
        self.deleted.lock().unwrap().push(key.to_string());
        Ok(())
    }

    fn object_url(&self, key: &str) -> String {
        join_url(MEDIA_BASE, key)
    }

    fn key_from_url(&self, url: &str) -> Option<String> {
        strip_base(MEDIA_BASE, url)
    }
}

/// In-memory store with switches for the failure paths of account operations.
#[derive(Default)]
pub struct FlakyUserStore {
    inner: InMemoryUserStore,
    pub fail_create: AtomicBool,
    pub hide_created: AtomicBool,
    /// Makes username/email lookups miss, so only the store's own
    /// uniqueness check can catch a duplicate.
    pub skip_lookups: AtomicBool,
    pub fail_update: AtomicBool,
    pub update_calls: AtomicUsize,
}

impl FlakyUserStore {
    pub fn user_count(&self) -> usize {
        self.inner.len()
    }
}

#[async_trait]
impl UserStore for FlakyUserStore {
    async fn find_by_username_or_email(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<User>, StoreError> {
        if self.skip_lookups.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner.find_by_username_or_email(username, email).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        if self.hide_created.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner.find_by_id(id).await
    }

    async fn find_taken_by_other(
        &self,
        username: &str,
        email: &str,
        excluding: Uuid,
    ) -> Result<Option<User>, StoreError> {
        self.inner.find_taken_by_other(username, email, excluding).await
    }

    async fn create(&self, user: NewUser) -> Result<User, StoreError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(StoreError::Other(anyhow::anyhow!("injected create failure")));
        }
        self.inner.create(user).await
    }

    async fn update_fields(&self, id: Uuid, patch: UserPatch) -> Result<Option<User>, StoreError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(StoreError::Other(anyhow::anyhow!("injected update failure")));
        }
        self.inner.update_fields(id, patch).await
    }

    async fn swap_refresh_token(
        &self,
        id: Uuid,
        expected: Option<&str>,
        new: Option<&str>,
    ) -> Result<bool, StoreError> {
        self.inner.swap_refresh_token(id, expected, new).await
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<bool, StoreError> {
        self.inner.delete_by_id(id).await
    }
}

/// Unique scratch directory removed on drop.
pub struct TestDir {
    pub path: PathBuf,
}

impl TestDir {
    pub fn new() -> Self {
        let path = std::env::temp_dir()
            .join("account-service-tests")
            .join(Uuid::new_v4().to_string());
        std::fs::create_dir_all(&path).unwrap();
        Self { path }
    }

    pub fn stage(&self, field: &str, name: &str, body: &[u8]) -> StagedFile {
        let path = self.path.join(format!("{}-{}", Uuid::new_v4(), name));
        std::fs::write(&path, body).unwrap();
        let content_type = match Path::new(name).extension().and_then(|e| e.to_str()) {
            Some("png") => "image/png",
            Some("jpg") | Some("jpeg") => "image/jpeg",
            _ => "application/octet-stream",
        };
        StagedFile {
            field: field.to_string(),
            path,
            content_type: content_type.to_string(),
        }
    }

    pub fn file_count(&self) -> usize {
        std::fs::read_dir(&self.path)
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

impl Drop for TestDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

pub fn test_config(upload_dir: &Path) -> AppConfig {
    AppConfig {
        database_url: None,
        jwt: JwtConfig {
            access_secret: "test-access-secret".into(),
            refresh_secret: "test-refresh-secret".into(),
            issuer: "test-issuer".into(),
            audience: "test-aud".into(),
            access_ttl_minutes: 15,
            refresh_ttl_days: 10,
        },
        storage: StorageConfig {
            endpoint: "fake".into(),
            bucket: "bucket".into(),
            access_key: "fake".into(),
            secret_key: "fake".into(),
            region: "us-east-1".into(),
            public_url: MEDIA_BASE.into(),
        },
        upload_dir: upload_dir.to_path_buf(),
        upload_timeout_secs: 2,
        cookie_secure: true,
    }
}

/// Application state wired to in-memory fakes.
pub struct Harness {
    pub state: AppState,
    pub storage: Arc<FakeStorage>,
    pub users: Arc<FlakyUserStore>,
    pub dir: TestDir,
}

impl Harness {
    pub fn new() -> Self {
        let dir = TestDir::new();
        let storage = Arc::new(FakeStorage::default());
        let users = Arc::new(FlakyUserStore::default());
        let state = AppState::from_parts(
            Arc::new(test_config(&dir.path)),
            users.clone(),
            storage.clone(),
        );
        Self {
            state,
            storage,
            users,
            dir,
        }
    }
}
