//! Lead detection: independent discovery strategies run concurrently, their
//! candidates are concatenated, then merged by the Deduplication Agent.
//!
//! The merge is fail-open. If the Oracle call or its parse fails, the un-merged
//! candidate list is returned as is.

use crate::agents::{Agent, DeduplicationAgent};
use crate::config::PipelineSettings;
use crate::errors::AppError;
use crate::json_extract::{extract_list, parse_typed, string_list};
use crate::models::{icp_body, Icp, KeyPersonnel, Lead};
use crate::oracle::Oracle;
use crate::prompts::{self, stage};
use crate::services::{Capabilities, Crawler, SearchHit, SearchProvider};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// One independent way of finding candidate leads for an ICP.
///
/// Implementations skip failing queries and URLs on their own; an `Err` means
/// the whole strategy could not run.
#[async_trait]
pub trait DiscoveryStrategy: Send + Sync {
    fn name(&self) -> &str;

    async fn discover(&self, icp: &Icp) -> Result<Vec<Lead>, AppError>;
}

// ============ ICP fields ============

/// The only ICP fields read programmatically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IcpTargets {
    pub industries: Vec<String>,
    pub geographies: Vec<String>,
    pub decision_makers: Vec<String>,
}

impl IcpTargets {
    pub fn is_searchable(&self) -> bool {
        !self.industries.is_empty() && !self.geographies.is_empty()
    }
}

fn collect_strings(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) if !s.trim().is_empty() => out.push(s.trim().to_string()),
        Value::Array(items) => items.iter().for_each(|item| collect_strings(item, out)),
        Value::Object(map) => map.values().for_each(|item| collect_strings(item, out)),
        _ => {}
    }
}

fn field_strings(body: &Value, keys: &[&str]) -> Vec<String> {
    let Some(value) = keys.iter().find_map(|key| body.get(*key)) else {
        return Vec::new();
    };

    // Tiered industry documents list the core focus first.
    let value = value.get("tier1_core_focus").unwrap_or(value);

    let mut out = Vec::new();
    collect_strings(value, &mut out);
    out
}

pub fn icp_targets(icp: &Icp) -> IcpTargets {
    let body = icp_body(icp);
    IcpTargets {
        industries: field_strings(body, &["industry", "industries", "target_industries"]),
        geographies: field_strings(
            body,
            &["geography", "geographies", "location", "target_geography"],
        ),
        decision_makers: field_strings(
            body,
            &["key_decision_makers", "decision_makers", "decision_maker_titles"],
        ),
    }
}

// ============ Structured-query strategy ============

/// Oracle-generated queries, web search, crawl, and a per-page summary against
/// the ICP.
pub struct StructuredQueryStrategy {
    oracle: Arc<dyn Oracle>,
    search: Arc<dyn SearchProvider>,
    crawler: Arc<dyn Crawler>,
    queries_per_strategy: usize,
    results_per_query: usize,
}

impl StructuredQueryStrategy {
    pub fn new(
        oracle: Arc<dyn Oracle>,
        search: Arc<dyn SearchProvider>,
        crawler: Arc<dyn Crawler>,
        queries_per_strategy: usize,
        results_per_query: usize,
    ) -> Self {
        Self {
            oracle,
            search,
            crawler,
            queries_per_strategy,
            results_per_query,
        }
    }

    async fn summarize_page(&self, icp: &Icp, url: &str) -> Option<Lead> {
        let text = self.crawler.crawl(url).await;
        if text.trim().is_empty() {
            tracing::debug!("Skipping empty page {}", url);
            return None;
        }

        let raw = match self
            .oracle
            .complete(&prompts::page_summary(icp, url, &text))
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Page summary failed for {}: {}", url, e);
                return None;
            }
        };

        let mut lead: Lead = match parse_typed(&raw, stage::PAGE_SUMMARY) {
            Ok(lead) => lead,
            Err(e) => {
                tracing::warn!("Unusable page summary for {}: {}", url, e);
                return None;
            }
        };

        if lead.company_name.trim().is_empty() || !lead.has_match_signal() {
            return None;
        }
        if !lead.relevant_urls.iter().any(|u| u == url) {
            lead.relevant_urls.push(url.to_string());
        }
        Some(lead)
    }
}

#[async_trait]
impl DiscoveryStrategy for StructuredQueryStrategy {
    fn name(&self) -> &str {
        "structured_query"
    }

    async fn discover(&self, icp: &Icp) -> Result<Vec<Lead>, AppError> {
        let targets = icp_targets(icp);
        if !targets.is_searchable() {
            tracing::warn!("ICP has no industry or geography; structured search skipped");
            return Ok(Vec::new());
        }

        let raw = self
            .oracle
            .complete(&prompts::query_generation(icp, self.queries_per_strategy))
            .await?;
        let queries: Vec<String> = string_list(&raw)
            .into_iter()
            .take(self.queries_per_strategy)
            .collect();
        tracing::info!("Structured strategy generated {} queries", queries.len());

        let mut leads = Vec::new();
        let mut seen_urls = HashSet::new();
        for query in &queries {
            let hits = match self.search.search(query, self.results_per_query).await {
                Ok(hits) => hits,
                Err(e) => {
                    tracing::warn!("Search failed for '{}': {}", query, e);
                    continue;
                }
            };

            for hit in hits.into_iter().take(self.results_per_query) {
                if !seen_urls.insert(hit.url.clone()) {
                    continue;
                }
                if let Some(lead) = self.summarize_page(icp, &hit.url).await {
                    leads.push(lead);
                }
            }
        }

        Ok(leads)
    }
}

// ============ Graph strategy ============

/// Templated queries, search fan-out and one Oracle extraction over the
/// combined research context.
pub struct GraphStrategy {
    oracle: Arc<dyn Oracle>,
    search: Arc<dyn SearchProvider>,
    max_results: usize,
}

const MAX_TEMPLATED_QUERIES: usize = 5;

/// Search queries built from industry and geography, first geography only.
pub fn templated_queries(targets: &IcpTargets) -> Vec<String> {
    let clean = |s: &str| s.replace('\'', "");
    let (Some(industry), Some(geography)) = (targets.industries.first(), targets.geographies.first())
    else {
        return Vec::new();
    };
    let industry = clean(industry);
    let geography = clean(geography);

    let mut queries = vec![
        format!("top {} companies in {}", industry, geography),
        format!("market report for {} industry in {}", industry, geography),
        format!("{} {} industry directory", geography, industry),
        format!("leading {} firms in {}", industry, geography),
    ];
    if let Some(second) = targets.industries.get(1) {
        queries.push(format!("list of {} companies in {}", clean(second), geography));
    }
    queries.truncate(MAX_TEMPLATED_QUERIES);
    queries
}

#[derive(Deserialize)]
struct ExtractedCompany {
    #[serde(alias = "company_name")]
    name: String,
    #[serde(default)]
    url_website: Option<String>,
    #[serde(default)]
    linkedin_company: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    reason_for_match: Option<String>,
}

impl From<ExtractedCompany> for Lead {
    fn from(company: ExtractedCompany) -> Self {
        let relevant_urls = [company.url_website, company.linkedin_company]
            .into_iter()
            .flatten()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .collect();
        Lead {
            company_name: company.name.trim().to_string(),
            summary: company.summary,
            description: company.description,
            reason_for_match: company.reason_for_match,
            key_personnel: Vec::new(),
            relevant_urls,
        }
    }
}

fn research_context(hits: &[SearchHit]) -> String {
    hits.iter()
        .map(|hit| format!("Source: {}\nTitle: {}\n{}", hit.url, hit.title, hit.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

impl GraphStrategy {
    pub fn new(oracle: Arc<dyn Oracle>, search: Arc<dyn SearchProvider>) -> Self {
        Self {
            oracle,
            search,
            max_results: 5,
        }
    }

    async fn find_personnel(&self, company: &str, titles: &[String]) -> Vec<KeyPersonnel> {
        let query = format!("site:linkedin.com/in \"{}\" {}", company, titles.join(" OR "));
        let hits = match self.search.search(&query, self.max_results).await {
            Ok(hits) if !hits.is_empty() => hits,
            Ok(_) => return Vec::new(),
            Err(e) => {
                tracing::warn!("Personnel search failed for {}: {}", company, e);
                return Vec::new();
            }
        };

        let request = prompts::personnel_extraction(company, titles, &research_context(&hits));
        let raw = match self.oracle.complete(&request).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Personnel extraction failed for {}: {}", company, e);
                return Vec::new();
            }
        };

        extract_list(&raw, "key_personnel")
            .unwrap_or_default()
            .into_iter()
            .filter_map(|item| serde_json::from_value::<KeyPersonnel>(item).ok())
            .filter(|person| !person.name.trim().is_empty())
            .collect()
    }
}

#[async_trait]
impl DiscoveryStrategy for GraphStrategy {
    fn name(&self) -> &str {
        "graph"
    }

    async fn discover(&self, icp: &Icp) -> Result<Vec<Lead>, AppError> {
        let targets = icp_targets(icp);
        let queries = templated_queries(&targets);
        if queries.is_empty() {
            tracing::warn!("ICP has no industry or geography; graph search skipped");
            return Ok(Vec::new());
        }

        let mut hits = Vec::new();
        for query in &queries {
            match self.search.search(query, self.max_results).await {
                Ok(found) => hits.extend(found),
                Err(e) => tracing::warn!("Search failed for '{}': {}", query, e),
            }
        }
        if hits.is_empty() {
            tracing::info!("Graph strategy found no search results");
            return Ok(Vec::new());
        }

        let raw = self
            .oracle
            .complete(&prompts::company_extraction(icp, &research_context(&hits)))
            .await?;
        let items = extract_list(&raw, "companies").ok_or_else(|| {
            AppError::oracle_format(stage::COMPANY_EXTRACTION, "no JSON list of companies", &raw)
        })?;

        let mut leads: Vec<Lead> = items
            .into_iter()
            .filter_map(|item| serde_json::from_value::<ExtractedCompany>(item).ok())
            .map(Lead::from)
            .filter(|lead| !lead.company_name.is_empty())
            .collect();

        if !targets.decision_makers.is_empty() {
            for lead in &mut leads {
                lead.key_personnel = self
                    .find_personnel(&lead.company_name, &targets.decision_makers)
                    .await;
            }
        }

        tracing::info!("Graph strategy extracted {} companies", leads.len());
        Ok(leads)
    }
}

// ============ Duplicate collapse ============

const LEGAL_SUFFIXES: &[&str] = &[
    "inc", "incorporated", "llc", "ltd", "limited", "sa", "sas", "gmbh", "plc", "corp",
    "corporation", "co", "ag", "bv", "nv", "srl",
];

/// Case, punctuation and trailing legal suffixes removed:
/// `"ACME Bank, Inc."` and `"Acme Bank"` both normalise to `"acme bank"`.
pub fn normalize_company_name(name: &str) -> String {
    let lowered: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let mut tokens: Vec<&str> = lowered.split_whitespace().collect();
    while tokens.len() > 1 && tokens.last().is_some_and(|t| LEGAL_SUFFIXES.contains(t)) {
        tokens.pop();
    }
    tokens.join(" ")
}

fn first_non_empty(slot: &mut Option<String>, other: Option<String>) {
    let empty = slot.as_deref().map(|s| s.trim().is_empty()).unwrap_or(true);
    if empty {
        if let Some(value) = other.filter(|v| !v.trim().is_empty()) {
            *slot = Some(value);
        }
    }
}

fn absorb(target: &mut Lead, other: Lead) {
    first_non_empty(&mut target.summary, other.summary);
    first_non_empty(&mut target.description, other.description);
    first_non_empty(&mut target.reason_for_match, other.reason_for_match);

    for person in other.key_personnel {
        let key = normalize_company_name(&person.name);
        match target
            .key_personnel
            .iter_mut()
            .find(|p| normalize_company_name(&p.name) == key)
        {
            Some(existing) => {
                first_non_empty(&mut existing.role, person.role);
                first_non_empty(&mut existing.linkedin_profile, person.linkedin_profile);
            }
            None => target.key_personnel.push(person),
        }
    }

    for url in other.relevant_urls {
        if !target.relevant_urls.contains(&url) {
            target.relevant_urls.push(url);
        }
    }
}

/// Collapses leads whose normalised names are identical, keeping the first
/// occurrence's position and name.
pub fn collapse_duplicates(leads: Vec<Lead>) -> Vec<Lead> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<Lead> = Vec::with_capacity(leads.len());

    for lead in leads {
        let key = normalize_company_name(&lead.company_name);
        match index.get(&key) {
            Some(&pos) => absorb(&mut out[pos], lead),
            None => {
                index.insert(key, out.len());
                out.push(lead);
            }
        }
    }
    out
}

// ============ Detector ============

/// Runs every strategy on a bounded pool, then merges.
pub struct Detector {
    strategies: Vec<Arc<dyn DiscoveryStrategy>>,
    dedup: DeduplicationAgent,
    max_workers: usize,
}

impl Detector {
    pub fn new(
        strategies: Vec<Arc<dyn DiscoveryStrategy>>,
        dedup: DeduplicationAgent,
        max_workers: usize,
    ) -> Self {
        Self {
            strategies,
            dedup,
            max_workers: max_workers.max(1),
        }
    }

    pub fn from_capabilities(capabilities: &Capabilities, settings: &PipelineSettings) -> Self {
        let structured = StructuredQueryStrategy::new(
            capabilities.oracle.clone(),
            capabilities.search.clone(),
            capabilities.crawler.clone(),
            settings.queries_per_strategy,
            settings.results_per_query,
        );
        let graph = GraphStrategy::new(capabilities.oracle.clone(), capabilities.search.clone());

        Self::new(
            vec![Arc::new(structured), Arc::new(graph)],
            DeduplicationAgent::new(capabilities.oracle.clone()),
            settings.worker_concurrency,
        )
    }

    /// Candidates from every strategy, concatenated in strategy order.
    async fn gather(&self, icp: &Arc<Icp>) -> Vec<Lead> {
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut tasks = JoinSet::new();

        for (position, strategy) in self.strategies.iter().enumerate() {
            let strategy = strategy.clone();
            let icp = icp.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let name = strategy.name().to_string();
                (position, name, strategy.discover(&icp).await)
            });
        }

        let mut per_strategy: Vec<Vec<Lead>> = vec![Vec::new(); self.strategies.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((position, name, Ok(leads))) => {
                    tracing::info!("Strategy {} found {} candidates", name, leads.len());
                    per_strategy[position] = leads;
                }
                Ok((_, name, Err(e))) => {
                    tracing::error!("Strategy {} failed: {}", name, e);
                }
                Err(e) => {
                    tracing::error!("Strategy task aborted: {}", e);
                }
            }
        }

        per_strategy.into_iter().flatten().collect()
    }

    pub async fn detect(&self, icp: &Icp) -> Vec<Lead> {
        let icp = Arc::new(icp.clone());
        let candidates = self.gather(&icp).await;
        if candidates.is_empty() {
            tracing::warn!("Detection produced no candidates");
            return candidates;
        }

        match self.dedup.merge(&candidates).await {
            Ok(merged) => {
                let merged = collapse_duplicates(merged);
                tracing::info!(
                    "Deduplication merged {} candidates into {} leads",
                    candidates.len(),
                    merged.len()
                );
                merged
            }
            Err(e) => {
                tracing::warn!(
                    stage = self.dedup.stage(),
                    "Deduplication failed, keeping {} un-merged candidates: {}",
                    candidates.len(),
                    e
                );
                candidates
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn icp_targets_reads_lists_strings_and_tiers() {
        let icp = json!({
            "service": "Core banking migration",
            "ideal_customer_profile": {
                "industry": {"tier1_core_focus": ["Banking", "Insurance"], "tier2": ["Retail"]},
                "geography": "France",
                "key_decision_makers": ["CTO", "CIO"]
            }
        });
        let targets = icp_targets(&icp);
        assert_eq!(targets.industries, vec!["Banking", "Insurance"]);
        assert_eq!(targets.geographies, vec!["France"]);
        assert_eq!(targets.decision_makers, vec!["CTO", "CIO"]);
    }

    #[test]
    fn missing_geography_yields_no_queries() {
        let targets = icp_targets(&json!({"industry": ["Banking"]}));
        assert!(!targets.is_searchable());
        assert!(templated_queries(&targets).is_empty());
    }

    #[test]
    fn templated_queries_use_second_industry_and_strip_apostrophes() {
        let targets = IcpTargets {
            industries: vec!["Banking".into(), "Children's Retail".into()],
            geographies: vec!["Côte d'Ivoire".into(), "France".into()],
            decision_makers: vec![],
        };
        let queries = templated_queries(&targets);
        assert_eq!(queries.len(), 5);
        assert_eq!(queries[0], "top Banking companies in Côte dIvoire");
        assert_eq!(queries[4], "list of Childrens Retail companies in Côte dIvoire");
    }

    #[test]
    fn normalization_strips_case_punctuation_and_legal_suffixes() {
        assert_eq!(normalize_company_name("ACME Bank, Inc."), "acme bank");
        assert_eq!(normalize_company_name("Acme Bank"), "acme bank");
        assert_eq!(normalize_company_name("Société Générale SA"), "société générale");
        assert_eq!(normalize_company_name("Ltd"), "ltd");
    }

    #[test]
    fn collapse_unions_personnel_and_urls() {
        let mut first = Lead::named("Acme Bank");
        first.relevant_urls = vec!["https://acme.example".into()];
        first.key_personnel = vec![KeyPersonnel::named("Jane Roe")];

        let mut second = Lead::named("ACME Bank Inc.");
        second.summary = Some("Retail bank".into());
        second.relevant_urls = vec![
            "https://acme.example".into(),
            "https://linkedin.com/company/acme".into(),
        ];
        second.key_personnel = vec![KeyPersonnel {
            name: "jane roe".into(),
            role: Some("CTO".into()),
            linkedin_profile: None,
        }];

        let merged = collapse_duplicates(vec![first, second, Lead::named("Other Co")]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].company_name, "Acme Bank");
        assert_eq!(merged[0].summary.as_deref(), Some("Retail bank"));
        assert_eq!(merged[0].relevant_urls.len(), 2);
        assert_eq!(merged[0].key_personnel.len(), 1);
        assert_eq!(merged[0].key_personnel[0].role.as_deref(), Some("CTO"));
        assert_eq!(merged[1].company_name, "Other Co");
    }

    #[test]
    fn extracted_company_becomes_lead_with_urls() {
        let company: ExtractedCompany = serde_json::from_value(json!({
            "name": " Acme Bank ",
            "url_website": "https://acme.example",
            "linkedin_company": "",
            "reason_for_match": "Retail bank in France"
        }))
        .unwrap();
        let lead = Lead::from(company);
        assert_eq!(lead.company_name, "Acme Bank");
        assert_eq!(lead.relevant_urls, vec!["https://acme.example"]);
        assert!(lead.has_match_signal());
    }
}
