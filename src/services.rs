use crate::cache_validator::CrawlCache;
use crate::config::{Config, EmbeddingSettings};
use crate::errors::{status_error, AppError};
use crate::oracle::{build_oracle, Oracle};
use crate::retry::{with_retry, RetryPolicy};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use url::Url;

// ============ Search ============

/// One web search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
}

/// Web search capability. Zero results is `Ok(vec![])`, never an error.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, AppError>;
}

/// Tavily search API.
pub struct TavilySearch {
    client: Client,
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

impl TavilySearch {
    pub fn new(base_url: &str, api_key: &str, retry: RetryPolicy) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(retry.timeout)
            .build()
            .map_err(|e| AppError::InternalError(format!("Failed to create Tavily client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            retry,
        })
    }

    async fn search_once(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, AppError> {
        let url = format!("{}/search", self.base_url);
        let body = json!({
            "api_key": self.api_key,
            "query": query,
            "search_depth": "basic",
            "max_results": max_results,
        });

        let response = self.client.post(&url).json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::error!("Tavily returned error {}: {}", status, error_text);
            return Err(status_error("Tavily", status, &error_text));
        }

        let result: TavilyResponse = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse Tavily response: {}", e))
        })?;

        Ok(result.results)
    }
}

#[async_trait]
impl SearchProvider for TavilySearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, AppError> {
        // Redact the key; only the query is logged
        tracing::debug!("Tavily search: {} (max {})", query, max_results);
        let mut hits = with_retry(&self.retry, "tavily", || self.search_once(query, max_results)).await?;
        hits.truncate(max_results);
        tracing::info!("Tavily returned {} result(s) for '{}'", hits.len(), query);
        Ok(hits)
    }
}

// ============ Crawl ============

/// Fetches a page and returns cleaned text. Failures yield an empty string.
#[async_trait]
pub trait Crawler: Send + Sync {
    async fn crawl(&self, url: &str) -> String;
}

const SKIPPED_TAGS: &[&str] = &[
    "script", "style", "noscript", "nav", "footer", "header", "svg", "template", "iframe",
];

fn bracket_noise() -> &'static Regex {
    static NOISE: OnceLock<Regex> = OnceLock::new();
    NOISE.get_or_init(|| Regex::new(r"\[.*?\]").expect("valid regex"))
}

/// Visible text of an HTML document, one block per line.
///
/// Scripts, styles and page chrome are dropped, as are lines carrying
/// bracketed link noise such as `[Skip to content]`.
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut lines = Vec::new();

    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .map(|el| SKIPPED_TAGS.contains(&el.name()))
                .unwrap_or(false)
        });
        if hidden {
            continue;
        }

        let line = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() || bracket_noise().is_match(&line) {
            continue;
        }
        lines.push(line);
    }

    lines.join("\n")
}

/// Same-host links of a document, resolved against `base` and stripped of fragments.
pub fn same_host_links(html: &str, base: &Url) -> Vec<Url> {
    let document = Html::parse_document(html);
    let Ok(link_sel) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for el in document.select(&link_sel) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        if href.starts_with('#') || href.starts_with("javascript:") || href.starts_with("mailto:") {
            continue;
        }
        let Ok(mut resolved) = base.join(href) else {
            continue;
        };
        resolved.set_fragment(None);

        let same_host = resolved.host_str() == base.host_str();
        let http = matches!(resolved.scheme(), "http" | "https");
        if same_host && http && resolved != *base && seen.insert(resolved.to_string()) {
            links.push(resolved);
        }
    }

    links
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Depth-1 same-host crawler with a checksum-validated cache.
pub struct HttpCrawler {
    client: Client,
    max_pages: usize,
    max_chars: usize,
    cache: CrawlCache,
    retry: RetryPolicy,
}

impl HttpCrawler {
    pub fn new(
        max_pages: usize,
        max_chars: usize,
        cache: CrawlCache,
        retry: RetryPolicy,
    ) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(retry.timeout)
            .user_agent("Mozilla/5.0 (compatible; leadgen-pipeline/0.1)")
            .build()
            .map_err(|e| AppError::InternalError(format!("Failed to create crawler client: {}", e)))?;

        Ok(Self {
            client,
            max_pages: max_pages.max(1),
            max_chars,
            cache,
            retry,
        })
    }

    async fn fetch_html(&self, url: &Url) -> Result<String, AppError> {
        let response = self.client.get(url.as_str()).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            return Err(status_error("Crawler", status, url.as_str()));
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl Crawler for HttpCrawler {
    async fn crawl(&self, url: &str) -> String {
        if let Some(text) = self.cache.get(url).await {
            return text;
        }

        let base = match Url::parse(url) {
            Ok(base) => base,
            Err(e) => {
                tracing::warn!("Skipping unparseable URL {}: {}", url, e);
                return String::new();
            }
        };

        let root_html = match with_retry(&self.retry, "crawl", || self.fetch_html(&base)).await {
            Ok(html) => html,
            Err(e) => {
                tracing::warn!("Crawl failed for {}: {}", url, e);
                return String::new();
            }
        };

        let links = same_host_links(&root_html, &base);
        let mut sections = vec![html_to_text(&root_html)];
        let mut total_chars = sections[0].chars().count();

        for link in links.into_iter().take(self.max_pages - 1) {
            if total_chars >= self.max_chars {
                break;
            }
            match self.fetch_html(&link).await {
                Ok(html) => {
                    let text = html_to_text(&html);
                    if !text.is_empty() {
                        total_chars += text.chars().count();
                        sections.push(format!("Source: {}\n{}", link, text));
                    }
                }
                Err(e) => tracing::debug!("Skipping sub-page {}: {}", link, e),
            }
        }

        let text = truncate_chars(&sections.join("\n\n"), self.max_chars);
        tracing::info!("Crawled {} ({} chars)", url, text.chars().count());
        if !text.is_empty() {
            self.cache.insert(url, text.clone()).await;
        }
        text
    }
}

// ============ Embeddings ============

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError>;
}

/// OpenAI-compatible `/embeddings` endpoint.
pub struct HttpEmbedder {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    retry: RetryPolicy,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn new(settings: &EmbeddingSettings, retry: RetryPolicy) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(retry.timeout)
            .build()
            .map_err(|e| AppError::InternalError(format!("Failed to create embedding client: {}", e)))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            retry,
        })
    }

    async fn embed_once(&self, text: &str) -> Result<Vec<f32>, AppError> {
        let url = format!("{}/embeddings", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&json!({"model": self.model, "input": [text]}))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(status_error("Embeddings", status, &error_text));
        }

        let result: EmbeddingResponse = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse embedding response: {}", e))
        })?;

        result
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| AppError::ExternalApiError("Embedding response had no data".to_string()))
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        with_retry(&self.retry, "embeddings", || self.embed_once(text)).await
    }
}

/// `None` for mismatched dimensions or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0f64, 0f64, 0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

/// Cosine similarity scaled onto 0-100; negative similarity counts as 0.
pub fn similarity_to_score(similarity: f64) -> f64 {
    crate::scoring::round_to(similarity.clamp(0.0, 1.0) * 100.0, 1)
}

// ============ Wiring ============

/// Every external capability the pipeline needs, constructed once at startup.
#[derive(Clone)]
pub struct Capabilities {
    pub oracle: Arc<dyn Oracle>,
    pub search: Arc<dyn SearchProvider>,
    pub crawler: Arc<dyn Crawler>,
    pub embedder: Option<Arc<dyn Embedder>>,
}

impl Capabilities {
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let retry = RetryPolicy::from_settings(&config.pipeline);

        let search = TavilySearch::new(&config.tavily_base_url, &config.tavily_api_key, retry)?;
        let crawler = HttpCrawler::new(
            config.pipeline.crawl_max_pages,
            config.pipeline.crawl_max_chars,
            CrawlCache::default(),
            retry,
        )?;
        let embedder: Option<Arc<dyn Embedder>> = match &config.embedding {
            Some(settings) => Some(Arc::new(HttpEmbedder::new(settings, retry)?)),
            None => None,
        };

        Ok(Self {
            oracle: build_oracle(config)?,
            search: Arc::new(search),
            crawler: Arc::new(crawler),
            embedder,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_to_text_drops_chrome_and_noise() {
        let html = r#"<html><head><style>body{}</style><script>var x=1;</script></head>
<body><nav>Home | About</nav>
<h1>Acme   Bank</h1>
<p>Retail banking in Lyon.</p>
<p>[Skip to content](#main)</p>
<footer>Copyright</footer></body></html>"#;

        assert_eq!(html_to_text(html), "Acme Bank\nRetail banking in Lyon.");
    }

    #[test]
    fn same_host_links_resolve_and_filter() {
        let base = Url::parse("https://acme.example/").unwrap();
        let html = r##"<a href="/about#team">About</a>
<a href="https://acme.example/about">About again</a>
<a href="https://other.example/">Other</a>
<a href="mailto:info@acme.example">Mail</a>
<a href="#top">Top</a>
<a href="/">Home</a>"##;

        let links: Vec<String> = same_host_links(html, &base)
            .into_iter()
            .map(|u| u.to_string())
            .collect();
        assert_eq!(links, vec!["https://acme.example/about"]);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }

    #[test]
    fn cosine_similarity_basics() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]), Some(1.0));
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), Some(0.0));
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), None);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), None);
        assert_eq!(similarity_to_score(-0.3), 0.0);
        assert_eq!(similarity_to_score(0.8234), 82.3);
    }
}
