use crate::db_storage::LeadStore;
use crate::errors::AppError;
use crate::jobs::{request_generation, JobQueue};
use crate::models::{Icp, JobStatus, LeadRecord, QualifiedLead, ServiceRecord};
use crate::qualification::QualificationPipeline;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Services, leads and reports.
    pub store: LeadStore,
    /// Queue feeding the background pipeline worker.
    pub queue: JobQueue,
    /// Agent chain used by the single-report endpoint.
    pub qualifier: Arc<QualificationPipeline>,
    /// When set, mutating endpoints require a matching `X-Api-Key` header.
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateServiceRequest {
    pub name: String,
    #[serde(default)]
    pub icp: Option<Icp>,
}

#[derive(Debug, Deserialize)]
pub struct LeadsQuery {
    pub service_id: String,
}

#[derive(Debug, Serialize)]
pub struct LeadsResponse {
    pub service_id: String,
    pub count: usize,
    pub leads: Vec<LeadRecord>,
}

#[derive(Debug, Deserialize)]
pub struct QualifyRequest {
    pub company_name: String,
    pub report_text: String,
    /// ICP to score against. Falls back to the ICP of `service_id`.
    #[serde(default)]
    pub icp: Option<Icp>,
    #[serde(default)]
    pub service_id: Option<String>,
}

/// Constant-time string comparison
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.as_bytes()
        .iter()
        .zip(b.as_bytes().iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

fn require_api_key(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(expected) = state.api_key.as_deref() else {
        return Ok(());
    };

    let provided = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing X-Api-Key header".to_string()))?;

    if !constant_time_compare(provided, expected) {
        tracing::warn!("Invalid API key received");
        return Err(AppError::Unauthorized("Invalid API key".to_string()));
    }
    Ok(())
}

fn check_icp(icp: &Icp) -> Result<(), AppError> {
    match icp.as_object() {
        Some(map) if !map.is_empty() => Ok(()),
        _ => Err(AppError::BadRequest(
            "ICP must be a non-empty JSON object".to_string(),
        )),
    }
}

/// Health check endpoint.
///
/// # Returns
///
/// * `(StatusCode, Json<serde_json::Value>)` - HTTP 200 OK with health status JSON.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "leadgen-pipeline",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// POST /api/v1/services
///
/// Registers a service offering, optionally with its ICP.
///
/// # Returns
///
/// * `Result<(StatusCode, Json<ServiceRecord>), AppError>` - HTTP 201 with the new record.
pub async fn create_service(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CreateServiceRequest>,
) -> Result<(StatusCode, Json<ServiceRecord>), AppError> {
    require_api_key(&state, &headers)?;

    let name = request.name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("Service name is required".to_string()));
    }
    if let Some(icp) = &request.icp {
        check_icp(icp)?;
    }

    tracing::info!("POST /services - name: {}", name);
    let record = state.store.create_service(name, request.icp).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /api/v1/services/:id
pub async fn get_service(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ServiceRecord>, AppError> {
    Ok(Json(state.store.get_service(&id).await?))
}

/// PUT /api/v1/services/:id/icp
///
/// Replaces the service's ICP. The body is the ICP document itself.
pub async fn replace_icp(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(icp): Json<Icp>,
) -> Result<Json<ServiceRecord>, AppError> {
    require_api_key(&state, &headers)?;
    check_icp(&icp)?;

    tracing::info!("PUT /services/{}/icp", id);
    Ok(Json(state.store.replace_icp(&id, icp).await?))
}

/// POST /api/v1/services/:id/generate
///
/// Queues detect -> enrich -> qualify for the service. A run already pending
/// or in progress is not queued twice.
///
/// # Returns
///
/// * `Result<(StatusCode, Json<serde_json::Value>), AppError>` - HTTP 202 with the job status.
pub async fn generate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    require_api_key(&state, &headers)?;

    let service = state.store.get_service(&id).await?;
    let status = match service.generation_status {
        Some(status @ (JobStatus::Pending | JobStatus::InProgress)) => {
            tracing::info!("Generation for service {} already {}", id, status);
            status
        }
        _ => request_generation(&state.store, &state.queue, &id).await?,
    };

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "service_id": id,
            "status": status,
        })),
    ))
}

/// GET /api/v1/leads?service_id=
///
/// Lists the leads of a service. Refused until its generation status is `done`.
pub async fn list_leads(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LeadsQuery>,
) -> Result<Json<LeadsResponse>, AppError> {
    let service = state.store.get_service(&params.service_id).await?;
    match service.generation_status {
        Some(JobStatus::Done) => {}
        Some(status) => {
            return Err(AppError::BadRequest(format!(
                "Lead generation for service {} is {}",
                service.id, status
            )))
        }
        None => {
            return Err(AppError::BadRequest(format!(
                "Lead generation for service {} has not been requested",
                service.id
            )))
        }
    }

    let leads = state.store.list_leads(&service.id).await?;
    Ok(Json(LeadsResponse {
        service_id: service.id,
        count: leads.len(),
        leads,
    }))
}

/// POST /api/v1/qualify
///
/// Scores one report text synchronously.
///
/// # Returns
///
/// * `Result<Json<QualifiedLead>, AppError>` - Scores, classification, justification,
///   parsed profile and GPCT profile.
pub async fn qualify(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<QualifyRequest>,
) -> Result<Json<QualifiedLead>, AppError> {
    require_api_key(&state, &headers)?;

    if request.company_name.trim().is_empty() || request.report_text.trim().is_empty() {
        return Err(AppError::BadRequest(
            "company_name and report_text are required".to_string(),
        ));
    }

    let icp = match (request.icp, request.service_id.as_deref()) {
        (Some(icp), _) => icp,
        (None, Some(service_id)) => state
            .store
            .get_service(service_id)
            .await?
            .icp
            .ok_or_else(|| AppError::BadRequest(format!("Service {} has no ICP", service_id)))?,
        (None, None) => {
            return Err(AppError::BadRequest(
                "Either icp or service_id is required".to_string(),
            ))
        }
    };
    check_icp(&icp)?;

    tracing::info!("POST /qualify - company: {}", request.company_name);
    let qualified = state
        .qualifier
        .qualify_report(&icp, request.company_name.trim(), &request.report_text)
        .await?;
    Ok(Json(qualified))
}
