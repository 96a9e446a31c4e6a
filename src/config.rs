use serde::Deserialize;
use std::time::Duration;

/// Which wire format the Oracle speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OracleProvider {
    /// Any `/chat/completions` API (OpenAI, Mistral, Together).
    OpenAi,
    /// Google Gemini `generateContent`.
    Gemini,
}

impl OracleProvider {
    fn parse(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "openai" | "mistral" | "together" => Ok(OracleProvider::OpenAi),
            "gemini" => Ok(OracleProvider::Gemini),
            other => anyhow::bail!("ORACLE_PROVIDER must be openai or gemini, got '{}'", other),
        }
    }

    fn default_base_url(self) -> &'static str {
        match self {
            OracleProvider::OpenAi => "https://api.mistral.ai/v1",
            OracleProvider::Gemini => "https://generativelanguage.googleapis.com/v1beta",
        }
    }

    fn default_model(self) -> &'static str {
        match self {
            OracleProvider::OpenAi => "mistral-small",
            OracleProvider::Gemini => "gemini-2.0-flash",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OracleSettings {
    pub provider: OracleProvider,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingSettings {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

/// Knobs for the detect -> enrich -> qualify run.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSettings {
    pub call_timeout_secs: u64,
    pub max_retries: u32,
    pub worker_concurrency: usize,
    pub queries_per_strategy: usize,
    pub results_per_query: usize,
    pub crawl_max_pages: usize,
    pub crawl_max_chars: usize,
}

impl PipelineSettings {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            call_timeout_secs: 60,
            max_retries: 2,
            worker_concurrency: 4,
            queries_per_strategy: 7,
            results_per_query: 2,
            crawl_max_pages: 5,
            crawl_max_chars: 20_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: Option<String>,
    pub port: u16,
    pub api_key: Option<String>,
    pub oracle: OracleSettings,
    pub embedding: Option<EmbeddingSettings>,
    pub tavily_api_key: String,
    pub tavily_base_url: String,
    pub pipeline: PipelineSettings,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup: &lookup };

        let database_url = match env.first_of(&["DATABASE_URL", "DB_URL"]) {
            Some(url) if url.trim().is_empty() => anyhow::bail!("DATABASE_URL cannot be empty"),
            Some(url) if !url.starts_with("postgresql://") && !url.starts_with("postgres://") => {
                anyhow::bail!("DATABASE_URL must start with postgresql:// or postgres://")
            }
            other => other,
        };

        let provider = match env.optional("ORACLE_PROVIDER") {
            Some(raw) => OracleProvider::parse(&raw)?,
            None => OracleProvider::OpenAi,
        };
        let oracle = OracleSettings {
            provider,
            base_url: env
                .optional_url("ORACLE_BASE_URL")?
                .unwrap_or_else(|| provider.default_base_url().to_string()),
            api_key: env.required("ORACLE_API_KEY")?,
            model: env
                .optional("ORACLE_MODEL")
                .unwrap_or_else(|| provider.default_model().to_string()),
        };

        let embedding = match env.optional("EMBEDDING_API_KEY") {
            Some(api_key) => Some(EmbeddingSettings {
                base_url: env
                    .optional_url("EMBEDDING_BASE_URL")?
                    .unwrap_or_else(|| "https://api.mistral.ai/v1".to_string()),
                api_key,
                model: env
                    .optional("EMBEDDING_MODEL")
                    .unwrap_or_else(|| "mistral-embed".to_string()),
            }),
            None => None,
        };

        let defaults = PipelineSettings::default();
        let pipeline = PipelineSettings {
            call_timeout_secs: env.number("CALL_TIMEOUT_SECS", defaults.call_timeout_secs)?,
            max_retries: env.number("MAX_RETRIES", defaults.max_retries)?,
            worker_concurrency: env
                .number("WORKER_CONCURRENCY", defaults.worker_concurrency)?
                .max(1),
            queries_per_strategy: env
                .number("QUERIES_PER_STRATEGY", defaults.queries_per_strategy)?,
            results_per_query: env.number("RESULTS_PER_QUERY", defaults.results_per_query)?,
            crawl_max_pages: env.number("CRAWL_MAX_PAGES", defaults.crawl_max_pages)?.max(1),
            crawl_max_chars: env.number("CRAWL_MAX_CHARS", defaults.crawl_max_chars)?,
        };

        let config = Self {
            database_url,
            port: env
                .optional("PORT")
                .unwrap_or_else(|| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            api_key: env.optional("API_KEY"),
            oracle,
            embedding,
            tavily_api_key: env.required("TAVILY_API_KEY")?,
            tavily_base_url: env
                .optional_url("TAVILY_BASE_URL")?
                .unwrap_or_else(|| "https://api.tavily.com".to_string()),
            pipeline,
        };

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        if let Some(url) = &config.database_url {
            tracing::debug!("Database URL: {}...", &url[..20.min(url.len())]);
        }
        tracing::debug!(
            "Oracle: {:?} {} ({})",
            config.oracle.provider,
            config.oracle.model,
            config.oracle.base_url
        );
        if config.embedding.is_none() {
            tracing::info!("EMBEDDING_API_KEY not set, semantic pre-score disabled");
        }
        if config.api_key.is_none() {
            tracing::warn!("API_KEY not set, mutating endpoints are unauthenticated");
        }
        tracing::debug!("Pipeline settings: {:?}", config.pipeline);
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }

    /// The server cannot start without a database; batch tools can.
    pub fn require_database_url(&self) -> anyhow::Result<&str> {
        self.database_url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL or DB_URL environment variable required"))
    }
}

struct Env<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn first_of(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|key| (self.lookup)(key))
    }

    fn required(&self, key: &str) -> anyhow::Result<String> {
        let value = (self.lookup)(key)
            .ok_or_else(|| anyhow::anyhow!("{} environment variable required", key))?;
        if value.trim().is_empty() {
            anyhow::bail!("{} cannot be empty", key);
        }
        Ok(value)
    }

    fn optional_url(&self, key: &str) -> anyhow::Result<Option<String>> {
        match self.optional(key) {
            Some(url) if !url.starts_with("http://") && !url.starts_with("https://") => {
                anyhow::bail!("{} must start with http:// or https://", key)
            }
            Some(url) => Ok(Some(url.trim_end_matches('/').to_string())),
            None => Ok(None),
        }
    }

    fn number<T: std::str::FromStr>(&self, key: &str, default: T) -> anyhow::Result<T> {
        match self.optional(key) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("{} must be a valid number", key)),
            None => Ok(default),
        }
    }
}
