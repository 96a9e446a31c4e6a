/// Discovery strategy tests with fake search, crawl and Oracle
mod common;

use common::*;
use leadgen_pipeline::config::PipelineSettings;
use leadgen_pipeline::detection::{Detector, DiscoveryStrategy, GraphStrategy, StructuredQueryStrategy};
use leadgen_pipeline::errors::AppError;
use leadgen_pipeline::prompts::stage;
use leadgen_pipeline::services::Capabilities;
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;

fn page_summary_reply(prompt: &str) -> String {
    if prompt.contains("banksinfrance") {
        json!({
            "company_name": "Acme Bank",
            "summary": "French retail bank",
            "reason_for_match": "Retail bank headquartered in France",
            "key_personnel": ["Jane Roe"],
            "relevant_urls": "https://acme.example/"
        })
        .to_string()
    } else {
        json!({"company_name": "Banking Directory", "reason_for_match": null}).to_string()
    }
}

fn structured_oracle() -> Arc<ScriptedOracle> {
    Arc::new(ScriptedOracle::new(|request| match request.stage {
        stage::QUERY_GENERATION => Ok(
            r#"["banks in France", "fail query", "empty banks", "directory of banks"]"#.to_string(),
        ),
        stage::PAGE_SUMMARY => Ok(page_summary_reply(&request.prompt)),
        other => Err(AppError::oracle_format(other, "unexpected stage", "")),
    }))
}

#[tokio::test]
async fn structured_strategy_skips_failures_and_unmatched_pages() {
    let search = Arc::new(FakeSearch::new());
    let strategy = StructuredQueryStrategy::new(
        structured_oracle(),
        search.clone(),
        Arc::new(FakeCrawler),
        7,
        2,
    );

    let leads = strategy.discover(&banking_icp()).await.unwrap();

    assert_eq!(search.calls.load(Ordering::SeqCst), 4);
    assert_eq!(leads.len(), 1);
    assert_eq!(leads[0].company_name, "Acme Bank");
    assert_eq!(leads[0].key_personnel[0].name, "Jane Roe");
    assert_eq!(
        leads[0].relevant_urls,
        vec!["https://acme.example/", "https://banksinfrance.example/"]
    );
}

#[tokio::test]
async fn structured_strategy_caps_generated_queries() {
    let search = Arc::new(FakeSearch::new());
    let strategy = StructuredQueryStrategy::new(
        structured_oracle(),
        search.clone(),
        Arc::new(FakeCrawler),
        1,
        2,
    );

    let leads = strategy.discover(&banking_icp()).await.unwrap();
    assert_eq!(search.calls.load(Ordering::SeqCst), 1);
    assert_eq!(leads.len(), 1);
}

#[tokio::test]
async fn strategies_contribute_nothing_without_geography() {
    let oracle = structured_oracle();
    let search = Arc::new(FakeSearch::new());
    let icp = json!({"industry": ["Banking"]});

    let structured = StructuredQueryStrategy::new(
        oracle.clone(),
        search.clone(),
        Arc::new(FakeCrawler),
        7,
        2,
    );
    let graph = GraphStrategy::new(oracle.clone(), search.clone());

    assert!(structured.discover(&icp).await.unwrap().is_empty());
    assert!(graph.discover(&icp).await.unwrap().is_empty());
    assert!(oracle.stages().is_empty());
    assert_eq!(search.calls.load(Ordering::SeqCst), 0);
}

fn graph_oracle(personnel_fails: bool) -> Arc<ScriptedOracle> {
    Arc::new(ScriptedOracle::new(move |request| match request.stage {
        stage::COMPANY_EXTRACTION => {
            assert!(request.prompt.contains("Source: https://"));
            Ok(json!({"companies": [
                {
                    "name": "Acme Bank",
                    "url_website": "https://acme.example",
                    "linkedin_company": "https://linkedin.com/company/acme",
                    "summary": "Retail bank",
                    "reason_for_match": "French retail bank"
                },
                {"name": "Beta Bank", "url_website": null}
            ]})
            .to_string())
        }
        stage::PERSONNEL_EXTRACTION if personnel_fails => {
            Err(AppError::TransientFetch("oracle down".into()))
        }
        stage::PERSONNEL_EXTRACTION => Ok(json!([
            {"name": "Jane Roe", "title": "CTO", "linkedin_url": "https://linkedin.com/in/janeroe"}
        ])
        .to_string()),
        other => Err(AppError::oracle_format(other, "unexpected stage", "")),
    }))
}

fn graph_icp() -> serde_json::Value {
    json!({
        "service": "Core banking migration",
        "ideal_customer_profile": {
            "industry": ["Banking"],
            "geography": ["France"],
            "key_decision_makers": ["CTO"]
        }
    })
}

#[tokio::test]
async fn graph_strategy_extracts_companies_and_personnel() {
    let search = Arc::new(FakeSearch::new());
    let strategy = GraphStrategy::new(graph_oracle(false), search.clone());

    let leads = strategy.discover(&graph_icp()).await.unwrap();

    // Four templated queries, then one personnel search per company
    assert_eq!(search.calls.load(Ordering::SeqCst), 6);
    assert_eq!(leads.len(), 2);
    assert_eq!(
        leads[0].relevant_urls,
        vec!["https://acme.example", "https://linkedin.com/company/acme"]
    );
    assert_eq!(leads[0].key_personnel[0].role.as_deref(), Some("CTO"));
    assert_eq!(
        leads[0].key_personnel[0].linkedin_profile.as_deref(),
        Some("https://linkedin.com/in/janeroe")
    );
    assert!(leads[1].relevant_urls.is_empty());
}

#[tokio::test]
async fn graph_strategy_keeps_companies_when_personnel_lookup_fails() {
    let strategy = GraphStrategy::new(graph_oracle(true), Arc::new(FakeSearch::new()));

    let leads = strategy.discover(&graph_icp()).await.unwrap();

    assert_eq!(leads.len(), 2);
    assert!(leads.iter().all(|l| l.key_personnel.is_empty()));
}

#[tokio::test]
async fn detector_from_capabilities_runs_both_strategies() {
    let oracle = Arc::new(ScriptedOracle::new(|request| match request.stage {
        stage::QUERY_GENERATION => Ok(r#"["banks in France"]"#.to_string()),
        stage::PAGE_SUMMARY => Ok(page_summary_reply(&request.prompt)),
        stage::COMPANY_EXTRACTION => Ok(json!([
            {"name": "ACME Bank Inc.", "url_website": "https://acme.example/", "reason_for_match": "Bank"}
        ])
        .to_string()),
        // Echo the candidates back unchanged; the deterministic collapse merges them.
        stage::DEDUPLICATION => {
            let start = request.prompt.find('[').unwrap();
            let end = request.prompt.rfind(']').unwrap();
            Ok(request.prompt[start..=end].to_string())
        }
        other => Err(AppError::oracle_format(other, "unexpected stage", "")),
    }));

    let capabilities = Capabilities {
        oracle: oracle.clone(),
        search: Arc::new(FakeSearch::new()),
        crawler: Arc::new(FakeCrawler),
        embedder: None,
    };
    let detector = Detector::from_capabilities(&capabilities, &PipelineSettings::default());

    let leads = detector.detect(&banking_icp()).await;

    assert_eq!(leads.len(), 1);
    assert_eq!(leads[0].company_name, "Acme Bank");
    assert!(leads[0]
        .relevant_urls
        .contains(&"https://banksinfrance.example/".to_string()));
    assert!(oracle.stages().contains(&stage::DEDUPLICATION));
}
