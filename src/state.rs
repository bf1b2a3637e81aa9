use crate::auth::{JwtKeys, TokenService};
use crate::config::AppConfig;
use crate::storage::{Storage, StorageClient};
use crate::uploads::UploadPipeline;
use crate::users::{
    memory::InMemoryUserStore,
    repo::{PgUserStore, UserStore},
};
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserStore>,
    pub uploads: UploadPipeline,
    pub tokens: TokenService,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let users: Arc<dyn UserStore> = match &config.database_url {
            Some(url) => {
                let db = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(10)
                    .connect(url)
                    .await
                    .context("connect to postgres")?;
                sqlx::migrate!("./migrations")
                    .run(&db)
                    .await
                    .context("run migrations")?;
                info!("using postgres user store");
                Arc::new(PgUserStore::new(db))
            }
            None => {
                warn!("DATABASE_URL not set; users are kept in memory and lost on restart");
                Arc::new(InMemoryUserStore::default())
            }
        };

        let storage = Arc::new(Storage::new(&config.storage).await?) as Arc<dyn StorageClient>;

        Ok(Self::from_parts(config, users, storage))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        users: Arc<dyn UserStore>,
        storage: Arc<dyn StorageClient>,
    ) -> Self {
        let uploads = UploadPipeline::new(
            storage,
            Duration::from_secs(config.upload_timeout_secs),
        );
        let tokens = TokenService::new(JwtKeys::new(&config.jwt), users.clone());
        Self {
            config,
            users,
            uploads,
            tokens,
        }
    }
}
