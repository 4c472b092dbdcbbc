//! Binary entry point. Mirrors the reference's `bin/linear.rs` startup shape:
//! env-filtered tracing, `Config::from_env()`, build state, serve.

use anyhow::Result;
use config::Config;
use server::{build_router, AppState};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("server=info".parse()?))
        .init();

    let config = Config::from_env();
    let state = AppState::new(config.clone())?;

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "remediation server listening");

    axum::serve(listener, build_router(state)).await?;
    Ok(())
}
