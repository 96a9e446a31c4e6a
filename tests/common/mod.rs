//! In-process fakes for the capability traits.
#![allow(dead_code)]

use async_trait::async_trait;
use leadgen_pipeline::detection::DiscoveryStrategy;
use leadgen_pipeline::errors::AppError;
use leadgen_pipeline::models::{Icp, Lead};
use leadgen_pipeline::oracle::{CompletionRequest, Oracle};
use leadgen_pipeline::prompts::stage;
use leadgen_pipeline::services::{Crawler, SearchHit, SearchProvider};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

type Reply = Box<dyn Fn(&CompletionRequest) -> Result<String, AppError> + Send + Sync>;

/// Oracle whose answers are computed from the request.
pub struct ScriptedOracle {
    reply: Reply,
    calls: Mutex<Vec<&'static str>>,
}

impl ScriptedOracle {
    pub fn new<F>(reply: F) -> Self
    where
        F: Fn(&CompletionRequest) -> Result<String, AppError> + Send + Sync + 'static,
    {
        Self {
            reply: Box::new(reply),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Stages called so far, in call order.
    pub fn stages(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, AppError> {
        self.calls.lock().unwrap().push(request.stage);
        (self.reply)(request)
    }
}

pub fn gpct_json(goals: &str, plans: &str, gaps: &[&str], urgency: &str) -> String {
    json!({
        "goals_assessment": {"strategic_alignment": goals, "goals": ["Grow retail deposits"]},
        "plans_evidence": {"decision_maker_engagement": plans},
        "challenges_analysis": {"technology_gaps": gaps},
        "timeline_indicators": {"urgency": urgency},
        "justification": "Clear strategic fit; budget cycle not yet open."
    })
    .to_string()
}

/// Happy-path replies for every qualification stage: match 82, GPCT 72.
pub fn qualification_reply(request: &CompletionRequest) -> Result<String, AppError> {
    let reply = match request.stage {
        stage::PARSING => json!({
            "company_name": null,
            "activity_summary": "Modernising digital channels",
            "description": "Retail bank headquartered in Paris"
        })
        .to_string(),
        stage::MATCHING => {
            "Here is my verdict:\n```json\n{\"score\": 82, \"justification\": \"French retail bank.\"}\n```"
                .to_string()
        }
        stage::QUALIFICATION_PARSING | stage::JUDGING => {
            gpct_json("High", "Medium", &["legacy core banking", "no open APIs"], "Low")
        }
        stage::SCORING => "Strong ICP fit with clear goals; engage the CTO now.".to_string(),
        other => {
            return Err(AppError::oracle_format(other, "unexpected stage in test", ""));
        }
    };
    Ok(reply)
}

/// Search returning one hit per query, `https://{slug}.example/` where the slug
/// is derived from the query. Queries containing `fail` error out.
pub struct FakeSearch {
    pub calls: AtomicUsize,
}

impl FakeSearch {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SearchProvider for FakeSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if query.contains("fail") {
            return Err(AppError::TransientFetch("search unavailable".into()));
        }
        let slug: String = query
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .take(24)
            .collect::<String>()
            .to_lowercase();
        Ok(vec![SearchHit {
            url: format!("https://{}.example/", slug),
            title: format!("Result for {}", query),
            content: format!("Snippet about {}", query),
        }]
        .into_iter()
        .take(max_results)
        .collect())
    }
}

/// Returns a page body for any URL except those containing `empty`.
pub struct FakeCrawler;

#[async_trait]
impl Crawler for FakeCrawler {
    async fn crawl(&self, url: &str) -> String {
        if url.contains("empty") {
            String::new()
        } else {
            format!("Page content of {}", url)
        }
    }
}

pub struct FixedStrategy {
    pub name: &'static str,
    pub leads: Vec<Lead>,
}

#[async_trait]
impl DiscoveryStrategy for FixedStrategy {
    fn name(&self) -> &str {
        self.name
    }

    async fn discover(&self, _icp: &Icp) -> Result<Vec<Lead>, AppError> {
        Ok(self.leads.clone())
    }
}

pub struct FailingStrategy;

#[async_trait]
impl DiscoveryStrategy for FailingStrategy {
    fn name(&self) -> &str {
        "failing"
    }

    async fn discover(&self, _icp: &Icp) -> Result<Vec<Lead>, AppError> {
        Err(AppError::TransientFetch("strategy backend down".into()))
    }
}

pub fn lead_with_urls(name: &str, urls: &[&str]) -> Lead {
    let mut lead = Lead::named(name);
    lead.reason_for_match = Some("Retail bank in France".into());
    lead.relevant_urls = urls.iter().map(|u| u.to_string()).collect();
    lead
}

pub fn banking_icp() -> Icp {
    json!({"industry": ["Banking"], "geography": ["France"]})
}
