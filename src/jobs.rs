//! Background lead generation.
//!
//! A generation request marks the service `pending` and enqueues a job. The
//! worker marks it `in_progress`, runs detect -> enrich -> qualify, writes
//! one record per lead, and ends in `done` or `error`.
//!
//! Delivery is at-least-once. A job whose request predates the start of the
//! service's latest run is already covered by that run and is dropped.

use crate::db_storage::LeadStore;
use crate::detection::Detector;
use crate::enrichment::Enricher;
use crate::errors::{AppError, ResultExt};
use crate::models::{document_key, Icp, JobStatus, Lead, LeadRecord, QualificationRun};
use crate::qualification::QualificationPipeline;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct PipelineJob {
    pub service_id: String,
    pub icp: Icp,
    pub requested_at: DateTime<Utc>,
}

impl PipelineJob {
    pub fn new(service_id: impl Into<String>, icp: Icp) -> Self {
        Self {
            service_id: service_id.into(),
            icp,
            requested_at: Utc::now(),
        }
    }
}

/// Sending half of the in-process job queue.
#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::Sender<PipelineJob>,
}

impl JobQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<PipelineJob>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    pub async fn enqueue(&self, job: PipelineJob) -> Result<(), AppError> {
        let service_id = job.service_id.clone();
        self.sender
            .send(job)
            .await
            .map_err(|_| AppError::Pipeline("job queue is closed".to_string()))?;
        tracing::info!("Queued lead generation for service {}", service_id);
        Ok(())
    }
}

/// Validates the service and queues a generation run for it.
pub async fn request_generation(
    store: &LeadStore,
    queue: &JobQueue,
    service_id: &str,
) -> Result<JobStatus, AppError> {
    let service = store.get_service(service_id).await?;
    let icp = service.icp.ok_or_else(|| {
        AppError::BadRequest(format!("Service {} has no ICP; set one first", service_id))
    })?;

    store
        .set_generation_status(service_id, JobStatus::Pending, None)
        .await?;
    queue
        .enqueue(PipelineJob::new(service_id, icp))
        .await?;
    Ok(JobStatus::Pending)
}

/// Executes queued jobs.
pub struct PipelineRunner {
    detector: Detector,
    qualifier: Arc<QualificationPipeline>,
    enricher: Arc<Enricher>,
    store: LeadStore,
}

impl PipelineRunner {
    pub fn new(
        detector: Detector,
        enricher: Enricher,
        qualifier: Arc<QualificationPipeline>,
        store: LeadStore,
    ) -> Self {
        Self {
            detector,
            enricher: Arc::new(enricher),
            qualifier,
            store,
        }
    }

    /// Runs one job. `Ok(None)` means a run that started after this job was
    /// requested already covered it.
    pub async fn process(&self, job: PipelineJob) -> Result<Option<JobStatus>, AppError> {
        let service = self.store.get_service(&job.service_id).await?;
        if let Some(started_at) = service
            .last_run_started_at
            .filter(|started_at| *started_at >= job.requested_at)
        {
            tracing::warn!(
                "Dropping duplicate delivery for service {} (requested {}, run started {})",
                job.service_id,
                job.requested_at,
                started_at
            );
            return Ok(None);
        }

        self.run_tracked(&job).await.map(Some)
    }

    async fn run_tracked(&self, job: &PipelineJob) -> Result<JobStatus, AppError> {
        self.store
            .mark_run_started(&job.service_id)
            .await
            .context("marking job in progress")?;

        match self.run(job).await {
            Ok(()) => {
                self.store
                    .set_generation_status(&job.service_id, JobStatus::Done, None)
                    .await?;
                Ok(JobStatus::Done)
            }
            Err(e) => {
                tracing::error!("Lead generation for service {} failed: {}", job.service_id, e);
                self.store
                    .set_generation_status(&job.service_id, JobStatus::Error, Some(e.to_string()))
                    .await?;
                Ok(JobStatus::Error)
            }
        }
    }

    async fn run(&self, job: &PipelineJob) -> Result<(), AppError> {
        if !job.icp.is_object() {
            return Err(AppError::Pipeline("ICP is not a JSON object".to_string()));
        }

        let leads = self.detector.detect(&job.icp).await;
        tracing::info!("Service {}: {} leads detected", job.service_id, leads.len());
        if leads.is_empty() {
            return Ok(());
        }

        let reports = self
            .enricher
            .enrich_all(&leads)
            .await
            .context("enrichment")?;

        let run = self
            .qualifier
            .qualify_all(Arc::new(job.icp.clone()), reports)
            .await;

        self.persist(&job.service_id, leads, run)
            .await
            .context("storing leads")
    }

    async fn persist(
        &self,
        service_id: &str,
        leads: Vec<Lead>,
        mut run: QualificationRun,
    ) -> Result<(), AppError> {
        let mut errors: HashMap<String, String> = run
            .errors
            .drain(..)
            .map(|e| (e.company_name, e.error))
            .collect();

        let mut written = HashSet::new();
        for lead in leads {
            let name = lead.company_name.clone();
            // Un-merged candidates can repeat a company; the first one wins.
            if !written.insert(document_key(&name)) {
                continue;
            }
            let (score, error) = match run.scored.remove(&name) {
                Some(qualified) => (Some(qualified.score), None),
                None => (
                    None,
                    Some(
                        errors
                            .remove(&name)
                            .unwrap_or_else(|| "lead was not qualified".to_string()),
                    ),
                ),
            };

            let record = LeadRecord {
                id: LeadRecord::record_id(service_id, &name),
                service_id: service_id.to_string(),
                company_name: name.clone(),
                report_key: document_key(&name),
                lead,
                score,
                error,
                updated_at: Utc::now(),
            };
            self.store.upsert_lead(&record).await?;
        }
        Ok(())
    }

    /// Drains the queue one job at a time until every sender is dropped.
    pub fn spawn_worker(self: Arc<Self>, mut receiver: mpsc::Receiver<PipelineJob>) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("Pipeline worker started");
            while let Some(job) = receiver.recv().await {
                let service_id = job.service_id.clone();
                match self.process(job).await {
                    Ok(Some(status)) => {
                        tracing::info!("Job for service {} finished: {}", service_id, status)
                    }
                    Ok(None) => {}
                    Err(e) => tracing::error!("Job for service {} could not run: {}", service_id, e),
                }
            }
            tracing::info!("Pipeline worker stopped");
        })
    }
}
