//! FlipBot - market analytics engine for New Eden
//!
//! Loads the static universe once, opens the caches, and serves the
//! scanning API until shut down.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use flipbot_backend::api;
use flipbot_backend::context::AppContext;
use flipbot_backend::models::Config;

#[derive(Debug, Parser)]
#[command(name = "flipbot", about = "Market analytics engine")]
struct Args {
    /// Port to listen on.
    #[arg(long, default_value_t = 13370)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    let mut config = Config::from_env()?;
    config.port = args.port;

    info!(
        port = config.port,
        dataset = %config.static_data_path,
        database = %config.database_path,
        "starting flipbot backend"
    );

    // Catalog, graph, client, and caches. Failure here is fatal: there is
    // nothing useful to serve without a universe.
    let ctx = Arc::new(AppContext::initialize(config.clone())?);

    let app = api::router(ctx);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(addr = %addr, "listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
