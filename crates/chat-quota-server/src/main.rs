use chat_quota_server::{create_app, AppState, ServerConfig};
use chat_quota_tracker::{SqliteStorage, TierCatalog, UsageTracker};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,chat_quota_server=debug")),
        )
        .init();

    let config = ServerConfig::from_env()?;
    info!("Starting chat quota service...");

    let storage = Arc::new(SqliteStorage::connect(&config.database_url).await?);
    let catalog = Arc::new(TierCatalog::standard());
    let tracker = UsageTracker::new(storage, catalog);

    let app = create_app(AppState::new(tracker));

    let listener = TcpListener::bind(config.bind_addr()).await?;
    info!("Chat quota API listening on http://{}", config.bind_addr());

    axum::serve(listener, app).await?;

    Ok(())
}
