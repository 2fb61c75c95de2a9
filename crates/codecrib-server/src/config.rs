use std::path::PathBuf;

use anyhow::Context;

/// Placeholder JWT secret, accepted for local development only.
pub const DEV_JWT_SECRET: &str = "dev-secret-change-me";

const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub blob_dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
}

impl Config {
    /// Read `CODECRIB_*` variables. Call after `dotenvy::dotenv()`.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let port = var("CODECRIB_PORT", "5000")
            .parse()
            .context("CODECRIB_PORT must be a port number")?;
        let max_upload_bytes = match get("CODECRIB_MAX_UPLOAD_BYTES") {
            Some(v) => v
                .parse()
                .context("CODECRIB_MAX_UPLOAD_BYTES must be a byte count")?,
            None => DEFAULT_MAX_UPLOAD_BYTES,
        };

        Ok(Self {
            jwt_secret: var("CODECRIB_JWT_SECRET", DEV_JWT_SECRET),
            db_path: var("CODECRIB_DB_PATH", "codecrib.db").into(),
            blob_dir: var("CODECRIB_BLOB_DIR", "./uploads").into(),
            host: var("CODECRIB_HOST", "0.0.0.0"),
            port,
            max_upload_bytes,
        })
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret.is_empty() || self.jwt_secret == DEV_JWT_SECRET
    }
}
