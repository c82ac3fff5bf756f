//! Sample-data generator: seeds aggregates into the `events` table the way
//! the upstream store writes them, mirroring rows into the `publish` outbox
//! only when `ES_PUBLISH_EVENTS` is non-empty.

use std::env;

use chrono::Utc;
use db_pool::ConnectSpec;
use sqlx::PgPool;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage:");
        eprintln!("  gen-events <aggregates> <versions_per_aggregate> [connect-string]");
        eprintln!();
        eprintln!("Connect string defaults to the FEED_DB_* environment variables;");
        eprintln!("set ES_PUBLISH_EVENTS to mirror rows into the publish outbox.");
        std::process::exit(1);
    }

    let aggregates: u32 = args[1].parse()?;
    let versions: i32 = args[2].parse()?;

    let spec = match args.get(3) {
        Some(raw) => ConnectSpec::parse(raw)?,
        None => ConnectSpec::from_env()?,
    };

    let publish_events = env::var("ES_PUBLISH_EVENTS")
        .map(|v| !v.is_empty())
        .unwrap_or(false);

    let pool = PgPool::connect(&spec.database_url()).await?;
    db_pool::migrate(&pool).await?;

    for i in 0..aggregates {
        let aggregate_id = format!("testagg-{}-{}", i, uuid::Uuid::new_v4());

        // One transaction per aggregate, events and outbox rows together,
        // matching the upstream store's write contract.
        let mut tx = pool.begin().await?;
        for version in 1..=versions {
            let payload = format!(r#"{{"foo":"foo{}-{}"}}"#, i, version);
            sqlx::query(
                "INSERT INTO events (aggregate_id, version, typecode, payload, event_time)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(&aggregate_id)
            .bind(version)
            .bind("testagg")
            .bind(payload.as_bytes())
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

            if publish_events {
                sqlx::query("INSERT INTO publish (aggregate_id, version) VALUES ($1, $2)")
                    .bind(&aggregate_id)
                    .bind(version)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        tx.commit().await?;
    }

    println!(
        "Seeded {} aggregates x {} versions (outbox writes {})",
        aggregates,
        versions,
        if publish_events { "enabled" } else { "disabled" }
    );

    Ok(())
}
