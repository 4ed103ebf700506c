//! Demo services binary.

#![deny(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use demo_services::Settings;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // `.env` first so it can supply both flags and OTEL_* settings
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    demo_services::run(Settings::parse()).await
}
