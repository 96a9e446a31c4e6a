use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Ideal Customer Profile. Semi-structured targeting document passed verbatim into
/// prompts; only industry and geography are ever read programmatically.
pub type Icp = Value;

/// The targeting body of an ICP. Documents shaped as
/// `{service, ideal_customer_profile}` are unwrapped; anything else is returned as is.
pub fn icp_body(icp: &Icp) -> &Value {
    match icp.get("ideal_customer_profile") {
        Some(inner) if inner.is_object() => inner,
        _ => icp,
    }
}

// ============ Detection Models ============

/// A person attached to a lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyPersonnel {
    /// Full name.
    pub name: String,
    /// Job title.
    #[serde(default, alias = "title", alias = "position")]
    pub role: Option<String>,
    /// LinkedIn profile URL.
    #[serde(default, alias = "linkedin_url", alias = "linkedin")]
    pub linkedin_profile: Option<String>,
}

impl KeyPersonnel {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: None,
            linkedin_profile: None,
        }
    }
}

/// Candidate company produced by a discovery strategy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    /// Natural key for deduplication and the per-company document key downstream.
    #[serde(alias = "name")]
    pub company_name: String,
    /// Short summary.
    #[serde(default)]
    pub summary: Option<String>,
    /// Longer description.
    #[serde(default)]
    pub description: Option<String>,
    /// Why the company fits the ICP. `None` means no match signal.
    #[serde(default)]
    pub reason_for_match: Option<String>,
    /// Ordered decision makers.
    #[serde(default, alias = "key_personal", deserialize_with = "personnel_list")]
    pub key_personnel: Vec<KeyPersonnel>,
    /// Websites, LinkedIn pages, articles.
    #[serde(default, deserialize_with = "string_list")]
    pub relevant_urls: Vec<String>,
}

impl Lead {
    pub fn named(company_name: impl Into<String>) -> Self {
        Self {
            company_name: company_name.into(),
            ..Self::default()
        }
    }

    /// Whether the strategy that produced this lead saw a reason to keep it.
    pub fn has_match_signal(&self) -> bool {
        self.reason_for_match
            .as_deref()
            .map(|r| {
                let r = r.trim();
                !r.is_empty() && !r.eq_ignore_ascii_case("null")
            })
            .unwrap_or(false)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PersonnelEntry {
    Full(KeyPersonnel),
    Name(String),
}

fn personnel_list<'de, D>(deserializer: D) -> Result<Vec<KeyPersonnel>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries: Option<Vec<PersonnelEntry>> = Option::deserialize(deserializer)?;
    Ok(entries
        .unwrap_or_default()
        .into_iter()
        .map(|entry| match entry {
            PersonnelEntry::Full(person) => person,
            PersonnelEntry::Name(name) => KeyPersonnel::named(name),
        })
        .filter(|person| !person.name.trim().is_empty())
        .collect())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<Option<String>>),
}

pub(crate) fn string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<OneOrMany> = Option::deserialize(deserializer)?;
    Ok(match value {
        None => Vec::new(),
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(items)) => items.into_iter().flatten().collect(),
    }
    .into_iter()
    .map(|s| s.trim().to_string())
    .filter(|s| !s.is_empty())
    .collect())
}

/// Enrichment text for one company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadReport {
    pub company_name: String,
    pub text: String,
}

impl LeadReport {
    pub fn document_key(&self) -> String {
        document_key(&self.company_name)
    }
}

/// Turns a company name into a storage-safe document id.
///
/// Replaces `\ / * ? : " < > |` with `_`.
pub fn document_key(company_name: &str) -> String {
    company_name
        .trim()
        .chars()
        .map(|c| match c {
            '\\' | '/' | '*' | '?' | ':' | '"' | '<' | '>' | '|' => '_',
            other => other,
        })
        .collect()
}

// ============ Qualification Models ============

/// Structured extraction from a lead report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedLeadProfile {
    /// Missing names are tolerated; the pipeline fills in the report's company.
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub contact_info: Value,
    #[serde(default)]
    pub activity_summary: Option<String>,
    /// Anything else the Oracle extracted (industry, size, locations).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ParsedLeadProfile {
    /// Best available free-text description of the company.
    pub fn description(&self) -> Option<String> {
        ["description", "summary", "company_description"]
            .iter()
            .find_map(|key| self.extra.get(*key).and_then(Value::as_str))
            .map(str::to_string)
            .or_else(|| self.activity_summary.clone())
    }
}

/// Ordinal rating used throughout the GPCT framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Level {
    Low,
    Medium,
    High,
}

impl Level {
    /// Low=1, Medium=3, High=5.
    pub fn ordinal(self) -> u8 {
        match self {
            Level::Low => 1,
            Level::Medium => 3,
            Level::High => 5,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Level::Low => "Low",
            Level::Medium => "Medium",
            Level::High => "High",
        };
        f.write_str(label)
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Level::Low),
            "medium" => Ok(Level::Medium),
            "high" => Ok(Level::High),
            other => Err(format!(
                "expected Low, Medium or High, got '{}'",
                other
            )),
        }
    }
}

impl<'de> Deserialize<'de> for Level {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalsAssessment {
    pub strategic_alignment: Level,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlansEvidence {
    pub decision_maker_engagement: Level,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengesAnalysis {
    #[serde(default, deserialize_with = "string_list")]
    pub technology_gaps: Vec<String>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineIndicators {
    pub urgency: Level,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// Goals / Plans / Challenges / Timeline extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpctProfile {
    pub goals_assessment: GoalsAssessment,
    pub plans_evidence: PlansEvidence,
    pub challenges_analysis: ChallengesAnalysis,
    pub timeline_indicators: TimelineIndicators,
    #[serde(default)]
    pub justification: Option<String>,
}

impl GpctProfile {
    /// Profile with no extra detail, mostly for tests and fixtures.
    pub fn new(goals: Level, plans: Level, technology_gaps: Vec<String>, urgency: Level) -> Self {
        Self {
            goals_assessment: GoalsAssessment {
                strategic_alignment: goals,
                details: Map::new(),
            },
            plans_evidence: PlansEvidence {
                decision_maker_engagement: plans,
                details: Map::new(),
            },
            challenges_analysis: ChallengesAnalysis {
                technology_gaps,
                details: Map::new(),
            },
            timeline_indicators: TimelineIndicators {
                urgency,
                details: Map::new(),
            },
            justification: None,
        }
    }
}

/// Binary lead temperature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    Hot,
    Cold,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Hot => f.write_str("Hot"),
            Classification::Cold => f.write_str("Cold"),
        }
    }
}

/// Terminal scoring artifact for one lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    /// ICP fit, 0-100.
    pub match_score: f64,
    /// GPCT score, 0-100.
    pub qualification_score: f64,
    /// `round(0.7 * match + 0.3 * qualification, 1)`.
    pub final_score: f64,
    pub classification: Classification,
    pub justification: String,
}

/// Everything the qualification chain produced for one report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualifiedLead {
    pub company_name: String,
    pub score: ScoreResult,
    pub parsed_profile: ParsedLeadProfile,
    pub gpct_profile: GpctProfile,
    pub match_justification: String,
    pub qualification_justification: String,
}

/// A lead whose qualification failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadError {
    pub company_name: String,
    pub error: String,
}

/// Outcome of qualifying a batch of reports. Results are keyed by company name
/// because leads finish in arbitrary order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualificationRun {
    pub scored: BTreeMap<String, QualifiedLead>,
    pub errors: Vec<LeadError>,
}

// ============ Persistence Models ============

/// Lifecycle of a generation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Done,
    Error,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
        };
        f.write_str(label)
    }
}

/// A product/service offering and the ICP its leads are generated for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Document id (UUID v4).
    pub id: String,
    /// Display name.
    pub name: String,
    /// Current ICP, if one has been set.
    #[serde(default)]
    pub icp: Option<Icp>,
    /// `None` until generation is first requested.
    #[serde(default)]
    pub generation_status: Option<JobStatus>,
    /// Why the last run ended in `error`.
    #[serde(default)]
    pub last_error: Option<String>,
    /// When the worker last moved a run to `in_progress`.
    #[serde(default)]
    pub last_run_started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Persisted per-lead outcome of a generation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadRecord {
    /// `{service_id}:{document_key}`.
    pub id: String,
    pub service_id: String,
    pub company_name: String,
    pub lead: Lead,
    /// Key of the enrichment report in the `reports` collection.
    pub report_key: String,
    #[serde(default)]
    pub score: Option<ScoreResult>,
    #[serde(default)]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl LeadRecord {
    pub fn record_id(service_id: &str, company_name: &str) -> String {
        format!("{}:{}", service_id, document_key(company_name))
    }
}
