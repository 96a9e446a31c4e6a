//! Per-lead qualification chain.
//!
//! ```text
//! report -> Parse -> Match vs ICP ----------\
//! report -> QualificationParse -> Judge ----+-> Score
//! ```
//!
//! The two branches of one lead run concurrently. Leads run on a bounded pool,
//! and a failing lead becomes an error entry without touching its siblings.

use crate::agents::{
    JudgeAgent, MatchingAgent, ParsingAgent, QualificationParsingAgent, ScoringAgent,
};
use crate::errors::AppError;
use crate::models::{Icp, LeadError, LeadReport, QualificationRun, QualifiedLead};
use crate::oracle::Oracle;
use crate::services::Embedder;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

pub struct QualificationPipeline {
    parser: ParsingAgent,
    matcher: MatchingAgent,
    gpct_parser: QualificationParsingAgent,
    judge: JudgeAgent,
    scorer: ScoringAgent,
    max_workers: usize,
}

impl QualificationPipeline {
    pub fn new(
        oracle: Arc<dyn Oracle>,
        embedder: Option<Arc<dyn Embedder>>,
        max_workers: usize,
    ) -> Self {
        Self {
            parser: ParsingAgent::new(oracle.clone()),
            matcher: MatchingAgent::new(oracle.clone(), embedder),
            gpct_parser: QualificationParsingAgent::new(oracle.clone()),
            judge: JudgeAgent::new(oracle.clone()),
            scorer: ScoringAgent::new(oracle),
            max_workers: max_workers.max(1),
        }
    }

    /// Runs the whole chain for one report.
    pub async fn qualify_report(
        &self,
        icp: &Icp,
        company_name: &str,
        report_text: &str,
    ) -> Result<QualifiedLead, AppError> {
        tracing::info!("Qualifying {}", company_name);

        let matching = async {
            let mut profile = self.parser.parse(report_text).await?;
            if profile
                .company_name
                .as_deref()
                .map(|n| n.trim().is_empty())
                .unwrap_or(true)
            {
                profile.company_name = Some(company_name.to_string());
            }
            let (score, justification) = self.matcher.evaluate(icp, &profile).await?;
            Ok::<_, AppError>((profile, score, justification))
        };

        let qualification = async {
            let gpct = self.gpct_parser.parse(report_text).await?;
            self.judge.judge(&gpct).await
        };

        let ((profile, match_score, match_justification), judgement) =
            tokio::try_join!(matching, qualification)?;

        let score = self
            .scorer
            .score(
                match_score,
                &match_justification,
                judgement.score,
                &judgement.justification,
            )
            .await?;

        tracing::info!(
            "Qualified {}: match {:.1}, qualification {:.1}, final {:.1} ({})",
            company_name,
            score.match_score,
            score.qualification_score,
            score.final_score,
            score.classification
        );

        Ok(QualifiedLead {
            company_name: company_name.to_string(),
            score,
            parsed_profile: profile,
            gpct_profile: judgement.profile,
            match_justification,
            qualification_justification: judgement.justification,
        })
    }

    /// Qualifies every report. Results are keyed by company name; failures are
    /// collected rather than propagated.
    pub async fn qualify_all(
        self: &Arc<Self>,
        icp: Arc<Icp>,
        reports: Vec<LeadReport>,
    ) -> QualificationRun {
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut tasks = JoinSet::new();
        let expected: Vec<String> = reports.iter().map(|r| r.company_name.clone()).collect();

        for report in reports {
            let pipeline = self.clone();
            let icp = icp.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let outcome = pipeline
                    .qualify_report(&icp, &report.company_name, &report.text)
                    .await;
                (report.company_name, outcome)
            });
        }

        let mut run = QualificationRun::default();
        let mut finished = HashSet::new();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((company_name, Ok(lead))) => {
                    finished.insert(company_name.clone());
                    run.scored.insert(company_name, lead);
                }
                Ok((company_name, Err(e))) => {
                    log_lead_failure(&company_name, &e);
                    finished.insert(company_name.clone());
                    run.errors.push(LeadError {
                        company_name,
                        error: e.to_string(),
                    });
                }
                Err(e) => tracing::error!("Qualification task aborted: {}", e),
            }
        }

        for company_name in expected {
            if finished.insert(company_name.clone()) {
                run.errors.push(LeadError {
                    company_name,
                    error: "qualification worker aborted".to_string(),
                });
            }
        }
        // Un-merged duplicates can share a name; a scored entry wins.
        run.errors
            .retain(|e| !run.scored.contains_key(&e.company_name));
        run.errors
            .sort_by(|a, b| a.company_name.cmp(&b.company_name));

        tracing::info!(
            "Qualification finished: {} scored, {} failed",
            run.scored.len(),
            run.errors.len()
        );
        run
    }
}

fn log_lead_failure(company_name: &str, error: &AppError) {
    match error.root() {
        AppError::OracleFormat { stage, raw, .. } | AppError::Validation { stage, raw, .. } => {
            tracing::error!(
                stage = %stage,
                raw = %raw,
                "Qualification failed for {}: {}",
                company_name,
                error
            );
        }
        _ => tracing::error!("Qualification failed for {}: {}", company_name, error),
    }
}
