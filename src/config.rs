use std::path::PathBuf;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub issuer: String,
    pub audience: String,
    pub access_ttl_minutes: i64,
    pub refresh_ttl_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    /// Base URL that stored object keys are appended to when building public links.
    pub public_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub jwt: JwtConfig,
    pub storage: StorageConfig,
    pub upload_dir: PathBuf,
    pub upload_timeout_secs: u64,
    pub cookie_secure: bool,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty());

        let jwt = JwtConfig {
            access_secret: std::env::var("ACCESS_TOKEN_SECRET")
                .context("ACCESS_TOKEN_SECRET must be set")?,
            refresh_secret: std::env::var("REFRESH_TOKEN_SECRET")
                .context("REFRESH_TOKEN_SECRET must be set")?,
            issuer: env_or("JWT_ISSUER", "account-service"),
            audience: env_or("JWT_AUDIENCE", "account-service-users"),
            access_ttl_minutes: env_parse("ACCESS_TOKEN_TTL_MINUTES", 15),
            refresh_ttl_days: env_parse("REFRESH_TOKEN_TTL_DAYS", 10),
        };
        anyhow::ensure!(
            jwt.access_secret != jwt.refresh_secret,
            "access and refresh tokens must be signed with different secrets"
        );

        let endpoint = env_or("S3_ENDPOINT", "http://localhost:9000");
        let bucket = env_or("S3_BUCKET", "avatars");
        let public_url = std::env::var("S3_PUBLIC_URL")
            .unwrap_or_else(|_| format!("{}/{}", endpoint.trim_end_matches('/'), bucket));
        let storage = StorageConfig {
            endpoint,
            bucket,
            access_key: std::env::var("S3_ACCESS_KEY").context("S3_ACCESS_KEY must be set")?,
            secret_key: std::env::var("S3_SECRET_KEY").context("S3_SECRET_KEY must be set")?,
            region: env_or("S3_REGION", "us-east-1"),
            public_url,
        };

        Ok(Self {
            database_url,
            jwt,
            storage,
            upload_dir: PathBuf::from(env_or("UPLOAD_DIR", "./public/temp")),
            upload_timeout_secs: env_parse("UPLOAD_TIMEOUT_SECS", 30),
            cookie_secure: env_parse("COOKIE_SECURE", true),
        })
    }
}
