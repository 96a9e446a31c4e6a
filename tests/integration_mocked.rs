/// Integration tests with mocked external APIs
/// Exercises the HTTP clients (Oracle providers, search, crawl, embeddings) without real services
use leadgen_pipeline::cache_validator::CrawlCache;
use leadgen_pipeline::config::{EmbeddingSettings, OracleProvider, OracleSettings};
use leadgen_pipeline::errors::AppError;
use leadgen_pipeline::oracle::{ChatCompletionOracle, CompletionRequest, GeminiOracle, Oracle};
use leadgen_pipeline::retry::RetryPolicy;
use leadgen_pipeline::services::{
    Crawler, Embedder, HttpCrawler, HttpEmbedder, SearchProvider, TavilySearch,
};
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Helper function to create a fast retry policy for tests
fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        initial_backoff: Duration::from_millis(10),
        timeout: Duration::from_secs(5),
    }
}

fn oracle_settings(provider: OracleProvider, base_url: String, model: &str) -> OracleSettings {
    OracleSettings {
        provider,
        base_url,
        api_key: "test_key".to_string(),
        model: model.to_string(),
    }
}

fn chat_body(content: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "cmpl-1",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]
    })
}

#[tokio::test]
async fn test_chat_oracle_sends_system_and_user_messages() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test_key"))
        .and(body_partial_json(serde_json::json!({
            "model": "mistral-small",
            "messages": [
                {"role": "system", "content": "Answer in JSON."},
                {"role": "user", "content": "Rate Acme Bank"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("{\"score\": 82}")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let oracle = ChatCompletionOracle::new(
        &oracle_settings(OracleProvider::OpenAi, mock_server.uri(), "mistral-small"),
        fast_retry(),
    )
    .unwrap();

    let request = CompletionRequest::new("matching", "Rate Acme Bank").with_system("Answer in JSON.");
    let text = oracle.complete(&request).await.unwrap();
    assert_eq!(text, "{\"score\": 82}");
}

#[tokio::test]
async fn test_chat_oracle_retries_server_errors() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("recovered")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let oracle = ChatCompletionOracle::new(
        &oracle_settings(OracleProvider::OpenAi, mock_server.uri(), "mistral-small"),
        fast_retry(),
    )
    .unwrap();

    let text = oracle
        .complete(&CompletionRequest::new("scoring", "Summarize"))
        .await
        .unwrap();
    assert_eq!(text, "recovered");
}

#[tokio::test]
async fn test_chat_oracle_does_not_retry_client_errors() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let oracle = ChatCompletionOracle::new(
        &oracle_settings(OracleProvider::OpenAi, mock_server.uri(), "mistral-small"),
        fast_retry(),
    )
    .unwrap();

    let err = oracle
        .complete(&CompletionRequest::new("parsing", "Parse"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ExternalApiError(_)));
}

#[tokio::test]
async fn test_chat_oracle_without_choices_is_format_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})))
        .mount(&mock_server)
        .await;

    let oracle = ChatCompletionOracle::new(
        &oracle_settings(OracleProvider::OpenAi, mock_server.uri(), "mistral-small"),
        fast_retry(),
    )
    .unwrap();

    let err = oracle
        .complete(&CompletionRequest::new("parsing", "Parse"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::OracleFormat { .. }));
}

#[tokio::test]
async fn test_gemini_oracle_joins_parts() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/models/gemini-2.0-flash:generateContent"))
        .and(header("x-goog-api-key", "test_key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "{\"score\": "}, {"text": "64}"}]}
            }]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let oracle = GeminiOracle::new(
        &oracle_settings(OracleProvider::Gemini, mock_server.uri(), "gemini-2.0-flash"),
        fast_retry(),
    )
    .unwrap();

    let text = oracle
        .complete(&CompletionRequest::new("matching", "Rate").with_system("JSON only"))
        .await
        .unwrap();
    assert_eq!(text, "{\"score\": 64}");
}

#[tokio::test]
async fn test_tavily_search_returns_hits() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/search"))
        .and(body_partial_json(serde_json::json!({
            "query": "top Banking companies in France",
            "max_results": 2
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "query": "top Banking companies in France",
            "results": [
                {"url": "https://acme.example", "title": "Acme Bank", "content": "Retail bank", "score": 0.9},
                {"url": "https://beta.example", "title": "Beta Bank", "content": "Private bank", "score": 0.8},
                {"url": "https://gamma.example", "title": "Gamma", "content": "Extra", "score": 0.1}
            ]
        })))
        .mount(&mock_server)
        .await;

    let search = TavilySearch::new(&mock_server.uri(), "tvly-test", fast_retry()).unwrap();
    let hits = search
        .search("top Banking companies in France", 2)
        .await
        .unwrap();

    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].url, "https://acme.example");
    assert_eq!(hits[1].title, "Beta Bank");
}

#[tokio::test]
async fn test_tavily_empty_results_are_not_an_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"results": []})))
        .mount(&mock_server)
        .await;

    let search = TavilySearch::new(&mock_server.uri(), "tvly-test", fast_retry()).unwrap();
    let hits = search.search("nothing matches", 5).await.unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn test_crawler_follows_same_host_links() {
    let mock_server = MockServer::start().await;

    let root = r#"<html><body><nav>Menu</nav><h1>Acme Bank</h1>
<p>Retail banking across France.</p>
<a href="/about">About us</a>
<a href="https://elsewhere.example/">Partner</a>
</body></html>"#;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(root))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/about"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html><body><p>Founded in 1901 in Lyon.</p></body></html>"),
        )
        .mount(&mock_server)
        .await;

    let crawler = HttpCrawler::new(5, 20_000, CrawlCache::default(), fast_retry()).unwrap();
    let text = crawler.crawl(&format!("{}/", mock_server.uri())).await;

    assert!(text.starts_with("Acme Bank\nRetail banking across France."));
    assert!(!text.contains("Menu"));
    assert!(text.contains(&format!("Source: {}/about\nFounded in 1901 in Lyon.", mock_server.uri())));
}

#[tokio::test]
async fn test_crawler_returns_empty_string_on_failure() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    let crawler = HttpCrawler::new(5, 20_000, CrawlCache::default(), fast_retry()).unwrap();
    let text = crawler.crawl(&format!("{}/missing", mock_server.uri())).await;
    assert_eq!(text, "");
}

#[tokio::test]
async fn test_crawler_serves_repeat_urls_from_cache() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/cached"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<p>Cached page</p>"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let crawler = HttpCrawler::new(1, 20_000, CrawlCache::default(), fast_retry()).unwrap();
    let url = format!("{}/cached", mock_server.uri());

    assert_eq!(crawler.crawl(&url).await, "Cached page");
    assert_eq!(crawler.crawl(&url).await, "Cached page");
}

#[tokio::test]
async fn test_embedder_reads_first_vector() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .and(body_partial_json(serde_json::json!({"model": "mistral-embed"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [{"index": 0, "embedding": [0.1, 0.2, 0.3]}]
        })))
        .mount(&mock_server)
        .await;

    let embedder = HttpEmbedder::new(
        &EmbeddingSettings {
            base_url: mock_server.uri(),
            api_key: "test_key".to_string(),
            model: "mistral-embed".to_string(),
        },
        fast_retry(),
    )
    .unwrap();

    let vector = embedder.embed("Retail bank in Paris").await.unwrap();
    assert_eq!(vector, vec![0.1, 0.2, 0.3]);
}
