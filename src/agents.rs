//! Stage agents. Each one sends prompts to the Oracle and turns the reply into a
//! validated value, or fails with `OracleFormat` / `Validation`.

use crate::errors::AppError;
use crate::json_extract::{extract_list, from_value, parse_typed};
use crate::models::{icp_body, GpctProfile, Icp, Lead, ParsedLeadProfile, ScoreResult};
use crate::oracle::{CompletionRequest, Oracle};
use crate::prompts::{self, stage};
use crate::scoring::{combine, gpct_score, validate_score};
use crate::services::{cosine_similarity, similarity_to_score, Embedder};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

/// What every agent shares: one Oracle and a stage label.
#[async_trait]
pub trait Agent: Send + Sync {
    fn stage(&self) -> &'static str;

    fn oracle(&self) -> &dyn Oracle;

    async fn ask(&self, request: CompletionRequest) -> Result<String, AppError> {
        tracing::debug!(stage = self.stage(), "Agent call via {}", self.oracle().name());
        let raw = self.oracle().complete(&request).await?;
        tracing::debug!(stage = self.stage(), chars = raw.len(), "Agent response received");
        Ok(raw)
    }
}

macro_rules! agent_impl {
    ($agent:ty, $stage:expr) => {
        impl Agent for $agent {
            fn stage(&self) -> &'static str {
                $stage
            }

            fn oracle(&self) -> &dyn Oracle {
                self.oracle.as_ref()
            }
        }
    };
}

// ============ Parsing ============

pub struct ParsingAgent {
    oracle: Arc<dyn Oracle>,
}

agent_impl!(ParsingAgent, stage::PARSING);

impl ParsingAgent {
    pub fn new(oracle: Arc<dyn Oracle>) -> Self {
        Self { oracle }
    }

    /// A missing `company_name` is tolerated; malformed JSON is not.
    pub async fn parse(&self, report_text: &str) -> Result<ParsedLeadProfile, AppError> {
        let raw = self.ask(prompts::lead_parsing(report_text)).await?;
        parse_typed(&raw, self.stage())
    }
}

// ============ Matching ============

pub struct MatchingAgent {
    oracle: Arc<dyn Oracle>,
    embedder: Option<Arc<dyn Embedder>>,
}

agent_impl!(MatchingAgent, stage::MATCHING);

#[derive(Deserialize)]
#[serde(untagged)]
enum Number {
    Float(f64),
    Text(String),
}

#[derive(Deserialize)]
struct MatchVerdict {
    #[serde(alias = "match_score")]
    score: Number,
    #[serde(default)]
    justification: Option<String>,
}

/// ICP text to compare against a lead description.
fn target_description(icp: &Icp) -> String {
    let body = icp_body(icp);
    ["target_description", "description", "pain_points", "summary"]
        .iter()
        .find_map(|key| body.get(*key))
        .map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_else(|| body.to_string())
}

impl MatchingAgent {
    pub fn new(oracle: Arc<dyn Oracle>, embedder: Option<Arc<dyn Embedder>>) -> Self {
        Self { oracle, embedder }
    }

    /// Embedding similarity on 0-100, used only as prompt context. `None` when no
    /// embedder is configured or the embedding call fails.
    async fn semantic_pre_score(&self, icp: &Icp, profile: &ParsedLeadProfile) -> Option<f64> {
        let embedder = self.embedder.as_ref()?;
        let description = profile.description()?;
        let target = target_description(icp);

        let (target_vec, lead_vec) = tokio::join!(embedder.embed(&target), embedder.embed(&description));
        match (target_vec, lead_vec) {
            (Ok(a), Ok(b)) => cosine_similarity(&a, &b).map(similarity_to_score),
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!("Semantic pre-score skipped: {}", e);
                None
            }
        }
    }

    /// `(score, justification)`, score validated to lie in `[0, 100]`.
    pub async fn evaluate(
        &self,
        icp: &Icp,
        profile: &ParsedLeadProfile,
    ) -> Result<(f64, String), AppError> {
        let pre_score = self.semantic_pre_score(icp, profile).await;
        if let Some(score) = pre_score {
            tracing::debug!("Semantic pre-score: {:.1}", score);
        }

        let raw = self
            .ask(prompts::lead_matching(icp, profile, pre_score))
            .await?;
        let verdict: MatchVerdict = parse_typed(&raw, self.stage())?;

        let score = match verdict.score {
            Number::Float(value) => value,
            Number::Text(text) => text.trim().trim_end_matches('%').trim().parse().map_err(|_| {
                AppError::validation(self.stage(), format!("score '{}' is not a number", text), &raw)
            })?,
        };
        let score = validate_score(self.stage(), score, &raw)?;
        let justification = verdict
            .justification
            .filter(|j| !j.trim().is_empty())
            .unwrap_or_else(|| "No justification provided.".to_string());

        Ok((score, justification))
    }
}

// ============ Qualification ============

pub struct QualificationParsingAgent {
    oracle: Arc<dyn Oracle>,
}

agent_impl!(QualificationParsingAgent, stage::QUALIFICATION_PARSING);

impl QualificationParsingAgent {
    pub fn new(oracle: Arc<dyn Oracle>) -> Self {
        Self { oracle }
    }

    pub async fn parse(&self, report_text: &str) -> Result<GpctProfile, AppError> {
        let raw = self.ask(prompts::gpct_parsing(report_text)).await?;
        parse_typed(&raw, self.stage())
    }
}

/// Output of the judge: the reviewed profile and its deterministic score.
#[derive(Debug, Clone, PartialEq)]
pub struct Judgement {
    pub profile: GpctProfile,
    pub score: f64,
    pub justification: String,
}

pub struct JudgeAgent {
    oracle: Arc<dyn Oracle>,
}

agent_impl!(JudgeAgent, stage::JUDGING);

fn summarize_gpct(profile: &GpctProfile) -> String {
    format!(
        "Strategic alignment {}, decision-maker engagement {}, {} technology gap(s), urgency {}.",
        profile.goals_assessment.strategic_alignment,
        profile.plans_evidence.decision_maker_engagement,
        profile.challenges_analysis.technology_gaps.len(),
        profile.timeline_indicators.urgency
    )
}

impl JudgeAgent {
    pub fn new(oracle: Arc<dyn Oracle>) -> Self {
        Self { oracle }
    }

    /// Second-opinion pass over `profile`. The Oracle may correct ratings; the
    /// score itself is always computed with [`gpct_score`].
    pub async fn judge(&self, profile: &GpctProfile) -> Result<Judgement, AppError> {
        let raw = self.ask(prompts::gpct_judging(profile)).await?;
        let mut reviewed: GpctProfile = parse_typed(&raw, self.stage())?;

        let score = validate_score(self.stage(), gpct_score(&reviewed), &raw)?;
        let justification = reviewed
            .justification
            .take()
            .filter(|j| !j.trim().is_empty())
            .or_else(|| profile.justification.clone())
            .unwrap_or_else(|| summarize_gpct(&reviewed));
        reviewed.justification = Some(justification.clone());

        Ok(Judgement {
            profile: reviewed,
            score,
            justification,
        })
    }
}

// ============ Scoring ============

pub struct ScoringAgent {
    oracle: Arc<dyn Oracle>,
}

agent_impl!(ScoringAgent, stage::SCORING);

impl ScoringAgent {
    pub fn new(oracle: Arc<dyn Oracle>) -> Self {
        Self { oracle }
    }

    /// Combines the two sub-scores. Only the prose justification comes from the
    /// Oracle; if that call fails, the stage justifications are joined instead.
    pub async fn score(
        &self,
        match_score: f64,
        match_justification: &str,
        qualification_score: f64,
        qualification_justification: &str,
    ) -> Result<ScoreResult, AppError> {
        let match_score = validate_score(self.stage(), match_score, "")?;
        let qualification_score = validate_score(self.stage(), qualification_score, "")?;
        let (final_score, classification) = combine(match_score, qualification_score);

        let request = prompts::score_justification(
            match_score,
            match_justification,
            qualification_score,
            qualification_justification,
        );
        let justification = match self.ask(request).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => fallback_justification(match_justification, qualification_justification),
            Err(e) => {
                tracing::warn!("Scoring justification call failed, using stage justifications: {}", e);
                fallback_justification(match_justification, qualification_justification)
            }
        };

        Ok(ScoreResult {
            match_score,
            qualification_score,
            final_score,
            classification,
            justification,
        })
    }
}

fn fallback_justification(match_justification: &str, qualification_justification: &str) -> String {
    format!(
        "ICP match: {} Qualification: {}",
        match_justification.trim(),
        qualification_justification.trim()
    )
}

// ============ Deduplication ============

pub struct DeduplicationAgent {
    oracle: Arc<dyn Oracle>,
}

agent_impl!(DeduplicationAgent, stage::DEDUPLICATION);

impl DeduplicationAgent {
    pub fn new(oracle: Arc<dyn Oracle>) -> Self {
        Self { oracle }
    }

    /// Asks the Oracle to merge name variants. An empty answer for a non-empty
    /// input is treated as a failed merge.
    pub async fn merge(&self, leads: &[Lead]) -> Result<Vec<Lead>, AppError> {
        let raw = self.ask(prompts::deduplication(leads)).await?;
        let items = extract_list(&raw, "leads")
            .ok_or_else(|| AppError::oracle_format(self.stage(), "no JSON list of leads", &raw))?;
        let merged: Vec<Lead> = from_value(Value::Array(items), &raw, self.stage())?;

        if merged.is_empty() && !leads.is_empty() {
            return Err(AppError::validation(
                self.stage(),
                format!("merge of {} leads returned none", leads.len()),
                &raw,
            ));
        }
        Ok(merged)
    }
}
