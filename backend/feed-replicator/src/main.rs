use db_pool::{ConnectSpec, Db};
use feed_replicator::{Config, Replicator};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let spec = ConnectSpec::from_env()?;

    tracing::info!(feed_url = %config.feed_url, "feed-replicator starting");

    let db = Db::connect(&spec, config.max_connect_retries).await?;
    db_pool::migrate(db.pool()).await?;

    let replicator = Replicator::new(reqwest::Client::new(), db.pool().clone());
    let summary = replicator.run(&config.feed_url).await?;
    db.close().await;

    tracing::info!(
        pages = summary.pages,
        stored = summary.stored,
        duplicates = summary.duplicates,
        "feed-replicator finished"
    );

    Ok(())
}
