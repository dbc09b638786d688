//! Tidewater worker entry point.

use std::sync::Arc;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tidewater_cdc::{LogReader, PgLogicalStream};
use tidewater_example_service::config::Args;
use tidewater_example_service::engine::Engine;
use tidewater_example_service::error::AppError;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let args = Args::parse();

    // Initialize tracing subscriber.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting Tidewater worker");

    let pool = PgPoolOptions::new()
        .max_connections(args.max_connections)
        .connect(&args.database_url)
        .await?;

    if args.run_migrations {
        sqlx::migrate!("../../migrations").run(&pool).await?;
        tracing::info!("Migrations applied");
    }

    let engine = Engine::postgres(&pool)?;
    let stream = PgLogicalStream::new(args.stream_config());
    let mut reader =
        LogReader::new(stream, Arc::new(engine.router()), args.reader_config()).spawn();

    let finished = tokio::select! {
        result = reader.join() => Some(result),
        signal = tokio::signal::ctrl_c() => {
            signal?;
            None
        }
    };

    match finished {
        Some(result) => {
            tracing::error!("Log reader stopped unexpectedly");
            result?;
        }
        None => {
            tracing::info!("Shutdown signal received, stopping log reader");
            reader.stop().await?;
        }
    }

    pool.close().await;
    tracing::info!("Tidewater worker stopped");
    Ok(())
}
