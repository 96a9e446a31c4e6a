use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Application-specific error types.
#[derive(Debug)]
pub enum AppError {
    /// Database-related errors.
    DatabaseError(sqlx::Error),
    /// Resource not found error.
    NotFound(String),
    /// Bad request error (invalid input).
    BadRequest(String),
    /// Unauthorized access error.
    Unauthorized(String),
    /// Network failure, timeout, or upstream 5xx/429. Safe to retry.
    TransientFetch(String),
    /// Upstream rejected the request (4xx). Retrying would repeat the rejection.
    ExternalApiError(String),
    /// The Oracle answered, but no usable JSON could be pulled out of the text.
    OracleFormat {
        /// Agent stage that issued the call.
        stage: String,
        /// What went wrong.
        message: String,
        /// Raw Oracle text, kept for postmortem.
        raw: String,
    },
    /// JSON was found but a value is out of range or a required field is missing.
    Validation {
        /// Agent stage that produced the value.
        stage: String,
        /// What went wrong.
        message: String,
        /// Raw Oracle text, kept for postmortem.
        raw: String,
    },
    /// The run as a whole cannot proceed (ICP unreadable, store unavailable).
    Pipeline(String),
    /// Internal server error.
    InternalError(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl AppError {
    /// Builds an `OracleFormat` error.
    pub fn oracle_format(
        stage: impl Into<String>,
        message: impl Into<String>,
        raw: impl Into<String>,
    ) -> Self {
        AppError::OracleFormat {
            stage: stage.into(),
            message: message.into(),
            raw: raw.into(),
        }
    }

    /// Builds a `Validation` error.
    pub fn validation(
        stage: impl Into<String>,
        message: impl Into<String>,
        raw: impl Into<String>,
    ) -> Self {
        AppError::Validation {
            stage: stage.into(),
            message: message.into(),
            raw: raw.into(),
        }
    }

    /// Whether the failure is worth another attempt with the same input.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::TransientFetch(_) => true,
            AppError::WithContext { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// Strips context wrappers and returns the innermost error.
    pub fn root(&self) -> &AppError {
        match self {
            AppError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }
}

impl fmt::Display for AppError {
    /// Formats the error for display.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::DatabaseError(e) => write!(f, "Database error: {}", e),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::TransientFetch(msg) => write!(f, "Transient fetch error: {}", msg),
            AppError::ExternalApiError(msg) => write!(f, "External API error: {}", msg),
            AppError::OracleFormat { stage, message, .. } => {
                write!(f, "Oracle format error in {}: {}", stage, message)
            }
            AppError::Validation { stage, message, .. } => {
                write!(f, "Validation error in {}: {}", stage, message)
            }
            AppError::Pipeline(msg) => write!(f, "Pipeline error: {}", msg),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    /// Converts the error into an HTTP response.
    ///
    /// Maps each error variant to an appropriate HTTP status code and JSON body.
    /// Logs errors appropriately based on their severity.
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::DatabaseError(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error".to_string(),
                )
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Unauthorized(msg) => {
                tracing::warn!("Unauthorized access: {}", msg);
                (StatusCode::UNAUTHORIZED, "Unauthorized".to_string())
            }
            AppError::TransientFetch(msg) | AppError::ExternalApiError(msg) => {
                tracing::error!("External service error: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    "External service error".to_string(),
                )
            }
            AppError::OracleFormat { stage, message, raw } => {
                tracing::warn!(stage = %stage, raw = %raw, "Oracle format error: {}", message);
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    format!("Unusable model output in {}: {}", stage, message),
                )
            }
            AppError::Validation { stage, message, raw } => {
                tracing::warn!(stage = %stage, raw = %raw, "Validation error: {}", message);
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    format!("Invalid value in {}: {}", stage, message),
                )
            }
            AppError::Pipeline(msg) | AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::WithContext { source, context } => {
                // Log full context chain for debugging
                tracing::error!("Error with context: {} -> {}", context, source);
                // Delegate to underlying error's response
                return source.clone().into_response();
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

// Make AppError cloneable for WithContext variant
impl Clone for AppError {
    /// Clones the error.
    ///
    /// Note: `sqlx::Error` is not cloneable, so `DatabaseError` is simplified to `RowNotFound` during cloning.
    fn clone(&self) -> Self {
        match self {
            AppError::DatabaseError(_e) => AppError::DatabaseError(sqlx::Error::RowNotFound), // Simplified clone
            AppError::NotFound(msg) => AppError::NotFound(msg.clone()),
            AppError::BadRequest(msg) => AppError::BadRequest(msg.clone()),
            AppError::Unauthorized(msg) => AppError::Unauthorized(msg.clone()),
            AppError::TransientFetch(msg) => AppError::TransientFetch(msg.clone()),
            AppError::ExternalApiError(msg) => AppError::ExternalApiError(msg.clone()),
            AppError::OracleFormat {
                stage,
                message,
                raw,
            } => AppError::oracle_format(stage.clone(), message.clone(), raw.clone()),
            AppError::Validation {
                stage,
                message,
                raw,
            } => AppError::validation(stage.clone(), message.clone(), raw.clone()),
            AppError::Pipeline(msg) => AppError::Pipeline(msg.clone()),
            AppError::InternalError(msg) => AppError::InternalError(msg.clone()),
            AppError::WithContext { source, context } => AppError::WithContext {
                source: source.clone(),
                context: context.clone(),
            },
        }
    }
}

impl From<sqlx::Error> for AppError {
    /// Converts a `sqlx::Error` into an `AppError`.
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err)
    }
}

impl From<reqwest::Error> for AppError {
    /// Converts a `reqwest::Error` into an `AppError`.
    ///
    /// Connection problems, timeouts and 5xx/429 statuses are transient; other
    /// statuses mean the upstream rejected the request.
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) if status.is_client_error() && status.as_u16() != 429 => {
                AppError::ExternalApiError(err.to_string())
            }
            _ => AppError::TransientFetch(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InternalError(format!("JSON serialization failed: {}", err))
    }
}

/// Classifies a non-success HTTP status from an external API.
pub fn status_error(service: &str, status: reqwest::StatusCode, body: &str) -> AppError {
    let message = format!("{} returned {}: {}", service, status, body);
    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        AppError::TransientFetch(message)
    } else {
        AppError::ExternalApiError(message)
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    ///
    /// # Arguments
    ///
    /// * `context` - The context message to add.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;

    /// Add context lazily (only evaluated on error).
    ///
    /// # Arguments
    ///
    /// * `f` - A closure that produces the context message.
    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: f(),
        })
    }
}

/// Extension for sqlx::Error to add context
impl<T> ResultExt<T> for Result<T, sqlx::Error> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::DatabaseError(e)),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::DatabaseError(e)),
            context: f(),
        })
    }
}
