use crate::circuit_breaker::{create_db_circuit_breaker, guarded, Breaker};
use crate::errors::AppError;
use crate::models::{Icp, JobStatus, LeadRecord, LeadReport, ServiceRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use sqlx::types::Json;
use sqlx::PgPool;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

pub const SERVICES: &str = "services";
pub const LEADS: &str = "leads";
pub const REPORTS: &str = "reports";

/// Keyed JSON documents grouped in collections. No cross-document transactions.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn upsert(&self, collection: &str, id: &str, body: Value) -> Result<(), AppError>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, AppError>;

    /// Documents whose top-level string `field` equals `value`, ordered by id.
    async fn list_where(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<Value>, AppError>;

    /// Shallow merge of `fields` into an existing document.
    async fn merge_fields(&self, collection: &str, id: &str, fields: Value) -> Result<(), AppError>;
}

// ============ Postgres ============

/// `documents` table backed store, see [`crate::db::Database::migrate`].
pub struct PgDocumentStore {
    pool: PgPool,
    breaker: Breaker,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            breaker: create_db_circuit_breaker(),
        }
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn upsert(&self, collection: &str, id: &str, body: Value) -> Result<(), AppError> {
        let query = sqlx::query(
            r#"
            INSERT INTO documents (collection, id, body, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (collection, id) DO UPDATE
            SET body = EXCLUDED.body, updated_at = NOW()
            "#,
        )
        .bind(collection)
        .bind(id)
        .bind(Json(body))
        .execute(&self.pool);

        guarded(&self.breaker, "database", async {
            query.await.map_err(AppError::from)
        })
        .await?;
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, AppError> {
        let query = sqlx::query_as::<_, (Json<Value>,)>(
            "SELECT body FROM documents WHERE collection = $1 AND id = $2",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool);

        let row = guarded(&self.breaker, "database", async {
            query.await.map_err(AppError::from)
        })
        .await?;
        Ok(row.map(|(Json(body),)| body))
    }

    async fn list_where(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<Value>, AppError> {
        let query = sqlx::query_as::<_, (Json<Value>,)>(
            r#"
            SELECT body FROM documents
            WHERE collection = $1 AND body->>$2 = $3
            ORDER BY id
            "#,
        )
        .bind(collection)
        .bind(field)
        .bind(value)
        .fetch_all(&self.pool);

        let rows = guarded(&self.breaker, "database", async {
            query.await.map_err(AppError::from)
        })
        .await?;
        Ok(rows.into_iter().map(|(Json(body),)| body).collect())
    }

    async fn merge_fields(&self, collection: &str, id: &str, fields: Value) -> Result<(), AppError> {
        let query = sqlx::query(
            r#"
            UPDATE documents
            SET body = body || $3, updated_at = NOW()
            WHERE collection = $1 AND id = $2
            "#,
        )
        .bind(collection)
        .bind(id)
        .bind(Json(fields))
        .execute(&self.pool);

        let result = guarded(&self.breaker, "database", async {
            query.await.map_err(AppError::from)
        })
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("{}/{}", collection, id)));
        }
        Ok(())
    }
}

// ============ In-memory ============

/// Process-local store for tests and the batch binaries.
#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: RwLock<BTreeMap<(String, String), Value>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn upsert(&self, collection: &str, id: &str, body: Value) -> Result<(), AppError> {
        self.documents
            .write()
            .await
            .insert((collection.to_string(), id.to_string()), body);
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, AppError> {
        Ok(self
            .documents
            .read()
            .await
            .get(&(collection.to_string(), id.to_string()))
            .cloned())
    }

    async fn list_where(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<Value>, AppError> {
        Ok(self
            .documents
            .read()
            .await
            .iter()
            .filter(|((c, _), body)| {
                c == collection && body.get(field).and_then(Value::as_str) == Some(value)
            })
            .map(|(_, body)| body.clone())
            .collect())
    }

    async fn merge_fields(&self, collection: &str, id: &str, fields: Value) -> Result<(), AppError> {
        let mut documents = self.documents.write().await;
        let body = documents
            .get_mut(&(collection.to_string(), id.to_string()))
            .ok_or_else(|| AppError::NotFound(format!("{}/{}", collection, id)))?;

        if let (Some(target), Value::Object(fields)) = (body.as_object_mut(), fields) {
            target.extend(fields);
        }
        Ok(())
    }
}

// ============ Typed access ============

fn decode<T: serde::de::DeserializeOwned>(collection: &str, body: Value) -> Result<T, AppError> {
    serde_json::from_value(body).map_err(|e| {
        AppError::InternalError(format!("Corrupted {} document: {}", collection, e))
    })
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Value, AppError> {
    Ok(serde_json::to_value(value)?)
}

/// Services, leads and reports on top of any [`DocumentStore`].
#[derive(Clone)]
pub struct LeadStore {
    inner: Arc<dyn DocumentStore>,
}

impl LeadStore {
    pub fn new(inner: Arc<dyn DocumentStore>) -> Self {
        Self { inner }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryDocumentStore::new()))
    }

    pub async fn create_service(
        &self,
        name: &str,
        icp: Option<Icp>,
    ) -> Result<ServiceRecord, AppError> {
        let record = ServiceRecord {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            icp,
            generation_status: None,
            last_error: None,
            last_run_started_at: None,
            updated_at: Utc::now(),
        };
        self.inner
            .upsert(SERVICES, &record.id, encode(&record)?)
            .await?;
        tracing::info!("Created service {} ({})", record.id, record.name);
        Ok(record)
    }

    pub async fn get_service(&self, id: &str) -> Result<ServiceRecord, AppError> {
        let body = self
            .inner
            .get(SERVICES, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Service {} not found", id)))?;
        decode(SERVICES, body)
    }

    pub async fn replace_icp(&self, id: &str, icp: Icp) -> Result<ServiceRecord, AppError> {
        self.get_service(id).await?;
        self.inner
            .merge_fields(SERVICES, id, json!({"icp": icp, "updated_at": Utc::now()}))
            .await?;
        self.get_service(id).await
    }

    pub async fn set_generation_status(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<(), AppError> {
        self.inner
            .merge_fields(
                SERVICES,
                id,
                json!({
                    "generation_status": status,
                    "last_error": error,
                    "updated_at": Utc::now(),
                }),
            )
            .await?;
        tracing::info!("Service {} generation status -> {}", id, status);
        Ok(())
    }

    /// Moves a service to `in_progress` and stamps the run start.
    pub async fn mark_run_started(&self, id: &str) -> Result<DateTime<Utc>, AppError> {
        let started_at = Utc::now();
        self.inner
            .merge_fields(
                SERVICES,
                id,
                json!({
                    "generation_status": JobStatus::InProgress,
                    "last_error": null,
                    "last_run_started_at": started_at,
                    "updated_at": started_at,
                }),
            )
            .await?;
        tracing::info!("Service {} generation status -> {}", id, JobStatus::InProgress);
        Ok(started_at)
    }

    pub async fn upsert_lead(&self, record: &LeadRecord) -> Result<(), AppError> {
        self.inner.upsert(LEADS, &record.id, encode(record)?).await
    }

    pub async fn list_leads(&self, service_id: &str) -> Result<Vec<LeadRecord>, AppError> {
        self.inner
            .list_where(LEADS, "service_id", service_id)
            .await?
            .into_iter()
            .map(|body| decode(LEADS, body))
            .collect()
    }

    /// Stored under [`LeadReport::document_key`]; re-enriching a company
    /// overwrites its report.
    pub async fn put_report(&self, report: &LeadReport) -> Result<String, AppError> {
        let key = report.document_key();
        self.inner.upsert(REPORTS, &key, encode(report)?).await?;
        Ok(key)
    }

    pub async fn get_report(&self, key: &str) -> Result<Option<LeadReport>, AppError> {
        match self.inner.get(REPORTS, key).await? {
            Some(body) => Ok(Some(decode(REPORTS, body)?)),
            None => Ok(None),
        }
    }
}
