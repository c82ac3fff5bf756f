use actix_web::{web, App, HttpServer};
use db_pool::{ConnectSpec, Db};
use feed_server::{configure, AppState, Config, LinkBuilder};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?
        .apply_args(std::env::args());
    let spec = ConnectSpec::from_env()?;

    tracing::info!(
        port = config.port,
        link_host_port = %config.link_host_port,
        "feed-server starting"
    );

    let db = Db::connect(&spec, config.max_connect_retries).await?;
    let pool = db.pool().clone();
    let links = LinkBuilder::new(&config.link_host_port);

    let port = config.port;
    HttpServer::new(move || {
        App::new()
            .wrap(tracing_actix_web::TracingLogger::default())
            .app_data(web::Data::new(AppState {
                pool: pool.clone(),
                links: links.clone(),
            }))
            .configure(configure)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await?;

    Ok(())
}
