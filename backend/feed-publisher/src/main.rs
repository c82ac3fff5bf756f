use std::sync::Arc;

use db_pool::{ConnectSpec, Db};
use feed_publisher::{
    Clock, Config, CurrentFeed, FeedDataWriter, FeedRollover, SystemClock, FEED_WRITER_NAME,
};
use outbox_publisher::{
    OutboxPublisher, ProcessorRegistry, PublisherConfig, PublisherMetrics,
};
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

    tracing::info!("feed-publisher starting");

    let config = Config::from_env();
    let spec = ConnectSpec::from_env()?;

    let settings = db_pool::PoolSettings::from_env();
    settings.log_config();
    let db = Db::connect_with(&spec, settings, config.max_connect_retries).await?;
    db_pool::migrate(db.pool()).await?;

    // The rollover hook publishes the open page id; the writer consumes it.
    let current = CurrentFeed::default();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let hook = Arc::new(FeedRollover::new(clock, current.clone()));

    let registry = Arc::new(ProcessorRegistry::new());
    registry.register(FEED_WRITER_NAME, Arc::new(FeedDataWriter::new(current)));

    let publisher = OutboxPublisher::new(db, registry)
        .with_config(PublisherConfig {
            batch_size: config.batch_size,
            poll_interval: config.poll_interval,
            max_consecutive_errors: config.max_consecutive_errors,
        })
        .with_poll_hook(hook)
        .with_metrics(PublisherMetrics::new("feed-publisher"));

    publisher.initialize_processors().await?;

    let (stop, shutdown) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received, finishing current batch");
            let _ = stop.send(true);
        }
    });

    publisher.process_events(true, shutdown).await?;

    publisher.db().close().await;
    tracing::info!("feed-publisher stopped cleanly");
    Ok(())
}
