//! Enrichment: turns each detected lead into a report text and stores it
//! per company.
//!
//! A report is:
//! 1. the lead itself as JSON
//! 2. the crawled text of every relevant URL, or a note when nothing came back
//! 3. video search results for the company
use crate::db_storage::LeadStore;
use crate::errors::AppError;
use crate::models::{Lead, LeadReport};
use crate::services::{Crawler, SearchProvider};
use futures::{stream, StreamExt, TryStreamExt};
use std::sync::Arc;

const VIDEO_RESULTS: usize = 5;

pub struct Enricher {
    crawler: Arc<dyn Crawler>,
    search: Arc<dyn SearchProvider>,
    store: LeadStore,
    max_workers: usize,
}

impl Enricher {
    pub fn new(
        crawler: Arc<dyn Crawler>,
        search: Arc<dyn SearchProvider>,
        store: LeadStore,
        max_workers: usize,
    ) -> Self {
        Self {
            crawler,
            search,
            store,
            max_workers: max_workers.max(1),
        }
    }

    async fn video_section(&self, company_name: &str) -> String {
        let query = format!("site:youtube.com {}", company_name);
        match self.search.search(&query, VIDEO_RESULTS).await {
            Ok(hits) if hits.is_empty() => "Video search results: none found".to_string(),
            Ok(hits) => {
                let lines: Vec<String> = hits
                    .iter()
                    .map(|hit| format!("- {} ({})\n  {}", hit.title, hit.url, hit.content.trim()))
                    .collect();
                format!("Video search results:\n{}", lines.join("\n"))
            }
            Err(e) => {
                tracing::warn!("Video search failed for {}: {}", company_name, e);
                "Video search results unavailable".to_string()
            }
        }
    }

    /// Never fails: crawl and search problems become notes in the text.
    pub async fn build_report(&self, lead: &Lead) -> LeadReport {
        let mut sections = Vec::with_capacity(lead.relevant_urls.len() + 2);
        let lead_json = serde_json::to_string_pretty(lead).unwrap_or_default();
        sections.push(format!("Lead:\n{}", lead_json));

        for url in &lead.relevant_urls {
            let text = self.crawler.crawl(url).await;
            if text.trim().is_empty() {
                sections.push(format!("Source: {}\nCould not retrieve content.", url));
            } else {
                sections.push(format!("Source: {}\n{}", url, text));
            }
        }

        sections.push(self.video_section(&lead.company_name).await);

        LeadReport {
            company_name: lead.company_name.clone(),
            text: sections.join("\n\n"),
        }
    }

    pub async fn enrich_lead(&self, lead: &Lead) -> Result<LeadReport, AppError> {
        tracing::info!("Enriching {}", lead.company_name);
        let report = self.build_report(lead).await;
        let key = self.store.put_report(&report).await?;
        tracing::debug!("Stored report {} ({} chars)", key, report.text.len());
        Ok(report)
    }

    /// Enriches every lead on a bounded pool. A store failure aborts the batch.
    pub async fn enrich_all(self: &Arc<Self>, leads: &[Lead]) -> Result<Vec<LeadReport>, AppError> {
        // Each future owns its lead and a handle on the enricher.
        let pending: Vec<_> = leads
            .iter()
            .cloned()
            .map(|lead| {
                let enricher = Arc::clone(self);
                async move { enricher.enrich_lead(&lead).await }
            })
            .collect();

        let reports: Vec<LeadReport> = stream::iter(pending)
            .buffer_unordered(self.max_workers)
            .try_collect()
            .await?;

        tracing::info!("Enriched {} leads", reports.len());
        Ok(reports)
    }
}
