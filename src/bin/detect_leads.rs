//! Runs lead detection for an ICP file and prints the merged leads as JSON.
//!
//! Usage: `detect_leads <icp.json>`

use anyhow::Context;
use leadgen_pipeline::config::Config;
use leadgen_pipeline::detection::Detector;
use leadgen_pipeline::services::Capabilities;
use std::env;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "leadgen_pipeline=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let icp_path = env::args()
        .nth(1)
        .context("usage: detect_leads <icp.json>")?;
    let icp: serde_json::Value = serde_json::from_str(
        &tokio::fs::read_to_string(&icp_path)
            .await
            .with_context(|| format!("reading {}", icp_path))?,
    )
    .with_context(|| format!("parsing {}", icp_path))?;

    let config = Config::from_env()?;
    let capabilities = Capabilities::from_config(&config)?;
    let detector = Detector::from_capabilities(&capabilities, &config.pipeline);

    let leads = detector.detect(&icp).await;
    tracing::info!("Detected {} leads", leads.len());
    println!("{}", serde_json::to_string_pretty(&leads)?);

    Ok(())
}
