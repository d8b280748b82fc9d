use anyhow::{Context, Result};
use clap::Parser;
use std::env;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// Redis URL for the cache layer; the server runs without a cache when
    /// this is unset.
    pub redis_url: Option<String>,
    /// Public base URL used in presigned download links.
    pub public_url: String,
    /// Secret for signing presigned download links.
    pub presign_secret: String,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Cloud-drive storage backend")]
pub struct Args {
    /// Host to bind to (overrides CLOUD_DRIVE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides CLOUD_DRIVE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where blob payloads are stored (overrides CLOUD_DRIVE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides CLOUD_DRIVE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Redis URL for the cache layer (overrides CLOUD_DRIVE_REDIS_URL)
    #[arg(long)]
    pub redis_url: Option<String>,

    /// Public base URL for presigned links (overrides CLOUD_DRIVE_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("CLOUD_DRIVE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match env::var("CLOUD_DRIVE_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing CLOUD_DRIVE_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 3000,
            Err(err) => return Err(err).context("reading CLOUD_DRIVE_PORT"),
        };
        let env_storage =
            env::var("CLOUD_DRIVE_STORAGE_DIR").unwrap_or_else(|_| "./data/blobs".into());
        let env_db = env::var("CLOUD_DRIVE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/cloud_drive.db".into());
        let env_redis = env::var("CLOUD_DRIVE_REDIS_URL").ok();
        let env_public =
            env::var("CLOUD_DRIVE_PUBLIC_URL").unwrap_or_else(|_| "http://localhost:3000".into());
        let env_secret = env::var("CLOUD_DRIVE_PRESIGN_SECRET")
            .unwrap_or_else(|_| "insecure-dev-presign-secret".into());

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            redis_url: args.redis_url.or(env_redis),
            public_url: args.public_url.unwrap_or(env_public),
            presign_secret: env_secret,
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
