//! LLM text-completion capability.
//!
//! Every agent talks to an [`Oracle`], which returns raw text. Providers differ
//! only in wire format; which one is used is a configuration choice.

use crate::circuit_breaker::{create_oracle_circuit_breaker, guarded, Breaker};
use crate::config::{Config, OracleProvider, OracleSettings};
use crate::errors::{status_error, AppError};
use crate::retry::{with_retry, RetryPolicy};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

/// One completion call.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Agent stage issuing the call, used for logs and error attribution.
    pub stage: &'static str,
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl CompletionRequest {
    pub fn new(stage: &'static str, prompt: impl Into<String>) -> Self {
        Self {
            stage,
            prompt: prompt.into(),
            system_prompt: None,
            temperature: 0.2,
            max_tokens: 2048,
        }
    }

    pub fn with_system(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Free-form text completion. Output may or may not embed JSON.
#[async_trait]
pub trait Oracle: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<String, AppError>;
}

fn http_client(retry: &RetryPolicy) -> Result<Client, AppError> {
    Client::builder()
        .timeout(retry.timeout)
        .build()
        .map_err(|e| AppError::InternalError(format!("Failed to create HTTP client: {}", e)))
}

// ============ OpenAI-compatible chat ============

/// Any `/chat/completions` API: OpenAI, Mistral, Together.
pub struct ChatCompletionOracle {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    retry: RetryPolicy,
    breaker: Breaker,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatCompletionOracle {
    pub fn new(settings: &OracleSettings, retry: RetryPolicy) -> Result<Self, AppError> {
        Ok(Self {
            client: http_client(&retry)?,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            retry,
            breaker: create_oracle_circuit_breaker(),
        })
    }

    async fn send_once(&self, request: &CompletionRequest) -> Result<String, AppError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system_prompt {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": request.prompt}));

        let body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::error!("Oracle returned error {}: {}", status, error_text);
            return Err(status_error("Oracle", status, &error_text));
        }

        let payload: ChatResponse = response.json().await.map_err(|e| {
            AppError::oracle_format(request.stage, format!("unreadable completion envelope: {}", e), "")
        })?;

        payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| AppError::oracle_format(request.stage, "completion has no content", ""))
    }
}

#[async_trait]
impl Oracle for ChatCompletionOracle {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, AppError> {
        tracing::debug!(stage = request.stage, model = %self.model, "Oracle chat completion");
        with_retry(&self.retry, request.stage, || {
            guarded(&self.breaker, "oracle", self.send_once(request))
        })
        .await
    }
}

// ============ Gemini ============

/// Google Gemini `generateContent`. The system prompt is prepended to the user
/// prompt.
pub struct GeminiOracle {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    retry: RetryPolicy,
    breaker: Breaker,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
}

impl GeminiOracle {
    pub fn new(settings: &OracleSettings, retry: RetryPolicy) -> Result<Self, AppError> {
        Ok(Self {
            client: http_client(&retry)?,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            retry,
            breaker: create_oracle_circuit_breaker(),
        })
    }

    async fn send_once(&self, request: &CompletionRequest) -> Result<String, AppError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);

        let text = match &request.system_prompt {
            Some(system) => format!("{}\n\n{}", system, request.prompt),
            None => request.prompt.clone(),
        };

        let body = json!({
            "contents": [{"role": "user", "parts": [{"text": text}]}],
            "generationConfig": {
                "temperature": request.temperature,
                "maxOutputTokens": request.max_tokens,
            }
        });

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::error!("Gemini returned error {}: {}", status, error_text);
            return Err(status_error("Gemini", status, &error_text));
        }

        let payload: GeminiResponse = response.json().await.map_err(|e| {
            AppError::oracle_format(request.stage, format!("unreadable Gemini envelope: {}", e), "")
        })?;

        let text: String = payload
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(AppError::oracle_format(
                request.stage,
                "Gemini returned no text",
                "",
            ));
        }
        Ok(text)
    }
}

#[async_trait]
impl Oracle for GeminiOracle {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, AppError> {
        tracing::debug!(stage = request.stage, model = %self.model, "Gemini completion");
        with_retry(&self.retry, request.stage, || {
            guarded(&self.breaker, "gemini", self.send_once(request))
        })
        .await
    }
}

/// Builds the configured provider.
pub fn build_oracle(config: &Config) -> Result<Arc<dyn Oracle>, AppError> {
    let retry = RetryPolicy::from_settings(&config.pipeline);
    let oracle: Arc<dyn Oracle> = match config.oracle.provider {
        OracleProvider::OpenAi => Arc::new(ChatCompletionOracle::new(&config.oracle, retry)?),
        OracleProvider::Gemini => Arc::new(GeminiOracle::new(&config.oracle, retry)?),
    };
    tracing::info!(
        "Oracle initialized: {:?} ({})",
        config.oracle.provider,
        oracle.name()
    );
    Ok(oracle)
}
