mod api;
mod associations;
mod config;
mod error;
mod file_store;
mod models;
mod navigation;
mod seed;
mod storage;
mod tag_store;
mod uploads;
mod user_models;

use anyhow::Context;
use api::{router, AppState};
use config::Config;
use storage::ArchiveStorage;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cgrid_archive=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let storage = match &config.data_file {
        Some(path) => ArchiveStorage::open(path)?,
        None => {
            tracing::warn!("ARCHIVE_DATA_FILE is :memory:, nothing will be persisted");
            ArchiveStorage::in_memory()
        }
    };

    if config.seed_sample_data && storage.read(|t| t.is_empty()).await {
        storage
            .transact(seed::seed_sample)
            .await
            .context("Failed to seed sample archive")?;
    }

    tokio::fs::create_dir_all(&config.upload_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.upload_dir.display()))?;

    let address = config.bind_address();
    tracing::info!(
        data_file = ?config.data_file,
        upload_dir = %config.upload_dir.display(),
        "Starting C-Grid archive"
    );
    let app = router(AppState::new(storage, config));

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind to {}", address))?;
    tracing::info!("Archive API listening on http://{}", address);

    axum::serve(listener, app)
        .await
        .context("Server stopped unexpectedly")?;
    Ok(())
}
