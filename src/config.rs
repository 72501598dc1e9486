use crate::services::{
    janitor::SweepSchedule,
    upload_service::{DEFAULT_MAX_FILE_SIZE, DEFAULT_SIZE_TOLERANCE, MIB, UploadLimits},
};
use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

const ENV_PREFIX: &str = "PHOTO_INTAKE_";

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Root directory for in-flight upload sessions.
    pub chunk_dir: String,
    /// Directory where committed objects are stored.
    pub storage_dir: String,
    pub database_url: String,
    /// Prefix of public object URLs; derived from host and port when unset.
    pub public_base_url: Option<String>,
    pub max_file_size: u64,
    /// Body limit of a single `/upload-chunk` request.
    pub max_chunk_size: u64,
    pub session_ttl: Duration,
    pub sweep_interval: Duration,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Event photo intake service")]
pub struct Args {
    /// Host to bind to (overrides PHOTO_INTAKE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides PHOTO_INTAKE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory for temporary upload chunks (overrides PHOTO_INTAKE_CHUNK_DIR)
    #[arg(long)]
    pub chunk_dir: Option<String>,

    /// Directory where photos are stored (overrides PHOTO_INTAKE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides PHOTO_INTAKE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Public base URL for photo links (overrides PHOTO_INTAKE_PUBLIC_BASE_URL)
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,

    /// Create an active event with this name, print its id and exit
    #[arg(long, value_name = "NAME")]
    pub create_event: Option<String>,
}

/// What the binary was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Serve,
    Migrate,
    CreateEvent(String),
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the command.
    pub fn from_env_and_args() -> Result<(Self, Command)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env_string("HOST", "0.0.0.0");
        let env_port = env_parse("PORT", 3000u16)?;
        let env_chunks = env_string("CHUNK_DIR", "./data/chunks");
        let env_storage = env_string("STORAGE_DIR", "./data/objects");
        let env_db = env_string("DATABASE_URL", "sqlite://./data/meta/photo_intake.db");
        let env_public = env::var(format!("{ENV_PREFIX}PUBLIC_BASE_URL")).ok();

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            chunk_dir: args.chunk_dir.unwrap_or(env_chunks),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            public_base_url: args.public_base_url.or(env_public),
            max_file_size: env_parse("MAX_FILE_SIZE", DEFAULT_MAX_FILE_SIZE)?,
            max_chunk_size: env_parse("MAX_CHUNK_SIZE", 10 * MIB)?,
            session_ttl: Duration::from_secs(env_parse("SESSION_TTL_SECS", 24 * 60 * 60)?),
            sweep_interval: Duration::from_secs(env_parse("SWEEP_INTERVAL_SECS", 60 * 60)?),
        };

        let command = if args.migrate {
            Command::Migrate
        } else if let Some(name) = args.create_event {
            Command::CreateEvent(name)
        } else {
            Command::Serve
        };

        Ok((cfg, command))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Base of public photo URLs. Wildcard binds are advertised as localhost.
    pub fn public_base_url(&self) -> String {
        match &self.public_base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => {
                let host = match self.host.as_str() {
                    "0.0.0.0" | "::" => "localhost",
                    other => other,
                };
                format!("http://{}:{}", host, self.port)
            }
        }
    }

    pub fn upload_limits(&self) -> UploadLimits {
        UploadLimits {
            max_file_size: self.max_file_size,
            size_tolerance: DEFAULT_SIZE_TOLERANCE,
        }
    }

    pub fn sweep_schedule(&self) -> SweepSchedule {
        SweepSchedule {
            interval: self.sweep_interval,
            session_ttl: self.session_ttl,
        }
    }
}

fn env_string(name: &str, default: &str) -> String {
    env::var(format!("{ENV_PREFIX}{name}")).unwrap_or_else(|_| default.into())
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let key = format!("{ENV_PREFIX}{name}");
    match env::var(&key) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}
