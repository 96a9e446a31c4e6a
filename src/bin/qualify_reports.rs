//! Scores every `*.txt` report in a directory against an ICP and prints the
//! run (scored leads plus per-lead errors) as JSON. The file stem is the
//! company name.
//!
//! Usage: `qualify_reports <reports_dir> <icp.json>`

use anyhow::Context;
use leadgen_pipeline::config::Config;
use leadgen_pipeline::models::LeadReport;
use leadgen_pipeline::qualification::QualificationPipeline;
use leadgen_pipeline::services::Capabilities;
use std::env;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

async fn load_reports(dir: &Path) -> anyhow::Result<Vec<LeadReport>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("reading {}", dir.display()))?;

    let mut reports = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("txt") {
            continue;
        }
        let Some(company_name) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let text = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        reports.push(LeadReport {
            company_name: company_name.to_string(),
            text,
        });
    }
    reports.sort_by(|a, b| a.company_name.cmp(&b.company_name));
    Ok(reports)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "leadgen_pipeline=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut args = env::args().skip(1);
    let (Some(reports_dir), Some(icp_path)) = (args.next(), args.next()) else {
        anyhow::bail!("usage: qualify_reports <reports_dir> <icp.json>");
    };

    let icp: serde_json::Value = serde_json::from_str(
        &tokio::fs::read_to_string(&icp_path)
            .await
            .with_context(|| format!("reading {}", icp_path))?,
    )
    .with_context(|| format!("parsing {}", icp_path))?;

    let reports = load_reports(Path::new(&reports_dir)).await?;
    tracing::info!("Loaded {} reports from {}", reports.len(), reports_dir);

    let config = Config::from_env()?;
    let capabilities = Capabilities::from_config(&config)?;
    let pipeline = Arc::new(QualificationPipeline::new(
        capabilities.oracle,
        capabilities.embedder,
        config.pipeline.worker_concurrency,
    ));

    let run = pipeline.qualify_all(Arc::new(icp), reports).await;
    println!("{}", serde_json::to_string_pretty(&run)?);

    Ok(())
}
