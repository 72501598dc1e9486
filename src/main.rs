use anyhow::{Context, Result};
use photo_intake::{
    BodyLimits, app,
    config::{AppConfig, Command},
    db,
    services::{event_store::SqliteEventStore, janitor},
    state::AppState,
};
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + command ---
    let (cfg, command) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting photo-intake with config: {:?}", cfg);

    // --- Ensure storage directories exist ---
    for dir in [&cfg.storage_dir, &cfg.chunk_dir] {
        if !Path::new(dir).exists() {
            fs::create_dir_all(dir).with_context(|| format!("creating directory {}", dir))?;
            tracing::info!("Created directory at {}", dir);
        }
    }

    // --- Initialize SQLite connection ---
    let db = Arc::new(db::connect(&cfg.database_url).await?);
    db::run_migrations(&db).await?;

    match command {
        Command::Migrate => {
            tracing::info!("Database migration complete.");
            return Ok(()); // exit after migration
        }
        Command::CreateEvent(name) => {
            let event = SqliteEventStore::new(db.clone())
                .create_event(&name, "ativo")
                .await
                .context("creating event")?;
            tracing::info!(event_id = %event.id, "Created event {}", event.name);
            println!("{}", event.id);
            return Ok(());
        }
        Command::Serve => {}
    }

    // --- Initialize core services ---
    let state = AppState::local(
        db.clone(),
        &cfg.chunk_dir,
        &cfg.storage_dir,
        cfg.public_base_url(),
        cfg.upload_limits(),
    );
    let _sweeper = janitor::spawn(state.uploads.chunk_store().clone(), cfg.sweep_schedule());

    // --- Build router ---
    let router = app(
        state,
        BodyLimits {
            chunk: cfg.max_chunk_size,
            direct: cfg.max_file_size,
        },
    );

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    tracing::info!("Public photo URLs start with {}", cfg.public_base_url());
    axum::serve(listener, router).await?;

    Ok(())
}
