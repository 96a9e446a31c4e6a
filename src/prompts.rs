//! Prompt builders. Each returns a ready [`CompletionRequest`] tagged with the
//! stage that issues it.

use crate::models::{GpctProfile, Icp, Lead, ParsedLeadProfile};
use crate::oracle::CompletionRequest;

pub mod stage {
    pub const QUERY_GENERATION: &str = "query_generation";
    pub const PAGE_SUMMARY: &str = "page_summary";
    pub const COMPANY_EXTRACTION: &str = "company_extraction";
    pub const PERSONNEL_EXTRACTION: &str = "personnel_extraction";
    pub const DEDUPLICATION: &str = "deduplication";
    pub const PARSING: &str = "parsing";
    pub const MATCHING: &str = "matching";
    pub const QUALIFICATION_PARSING: &str = "qualification_parsing";
    pub const JUDGING: &str = "judging";
    pub const SCORING: &str = "scoring";
}

const JSON_ONLY: &str = "You are a precise B2B sales research assistant. \
Answer with valid JSON only, no commentary, no Markdown.";

/// Characters of report/page text sent in a single prompt.
const MAX_CONTEXT_CHARS: usize = 24_000;

fn truncate(text: &str) -> &str {
    match text.char_indices().nth(MAX_CONTEXT_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub fn query_generation(icp: &Icp, max_queries: usize) -> CompletionRequest {
    let prompt = format!(
        "Given this Ideal Customer Profile:\n{icp:#}\n\n\
Write {max_queries} distinct web search queries that would surface companies matching it. \
Combine the target industries with the target geography. \
Return a JSON array of strings."
    );
    CompletionRequest::new(stage::QUERY_GENERATION, prompt)
        .with_system(JSON_ONLY)
        .with_temperature(0.7)
        .with_max_tokens(512)
}

pub fn page_summary(icp: &Icp, url: &str, page_text: &str) -> CompletionRequest {
    let prompt = format!(
        "Ideal Customer Profile:\n{icp:#}\n\n\
Web page {url}:\n{page}\n\n\
If the page is about a single company, return a JSON object with keys \
\"company_name\", \"summary\", \"description\", \"reason_for_match\", \
\"key_personnel\" (list of {{\"name\", \"role\", \"linkedin_profile\"}}) and \"relevant_urls\". \
Set \"reason_for_match\" to null if the company does not fit the profile.",
        page = truncate(page_text)
    );
    CompletionRequest::new(stage::PAGE_SUMMARY, prompt).with_system(JSON_ONLY)
}

pub fn company_extraction(icp: &Icp, research_context: &str) -> CompletionRequest {
    let prompt = format!(
        "Ideal Customer Profile:\n{icp:#}\n\n\
Research notes:\n{context}\n\n\
List every real company in the notes that fits the profile. Skip directories, \
media outlets and market-research firms. Return a JSON array of objects with keys \
\"name\", \"url_website\", \"linkedin_company\", \"summary\", \"description\", \
\"reason_for_match\".",
        context = truncate(research_context)
    );
    CompletionRequest::new(stage::COMPANY_EXTRACTION, prompt)
        .with_system(JSON_ONLY)
        .with_max_tokens(4096)
}

pub fn personnel_extraction(
    company_name: &str,
    titles: &[String],
    research_context: &str,
) -> CompletionRequest {
    let prompt = format!(
        "Search results about people at {company_name}:\n{context}\n\n\
Identify people currently holding one of these roles: {titles}. \
Return a JSON array of objects with keys \"name\", \"role\", \"linkedin_profile\". \
Return [] if nobody matches.",
        context = truncate(research_context),
        titles = titles.join(", ")
    );
    CompletionRequest::new(stage::PERSONNEL_EXTRACTION, prompt).with_system(JSON_ONLY)
}

pub fn deduplication(leads: &[Lead]) -> CompletionRequest {
    let leads_json = serde_json::to_string_pretty(leads).unwrap_or_else(|_| "[]".to_string());
    let prompt = format!(
        "These candidate leads were found by several independent searches:\n{leads_json}\n\n\
Merge entries that refer to the same real-world company, including name variants \
such as \"Acme Bank\" and \"ACME Bank Inc.\". When merging, union \"key_personnel\" and \
\"relevant_urls\" and keep the most informative text fields. Do not invent companies. \
Return a JSON array of leads with the same keys as the input."
    );
    CompletionRequest::new(stage::DEDUPLICATION, prompt)
        .with_system(JSON_ONLY)
        .with_temperature(0.0)
        .with_max_tokens(8192)
}

pub fn lead_parsing(report_text: &str) -> CompletionRequest {
    let prompt = format!(
        "Lead report:\n{report}\n\n\
Extract a JSON object with keys \"company_name\", \"contact_info\" (object with any \
emails, phones, addresses, websites), \"activity_summary\", \"industry\", \"location\", \
\"company_size\" and \"description\". Use null for anything the report does not say.",
        report = truncate(report_text)
    );
    CompletionRequest::new(stage::PARSING, prompt).with_system(JSON_ONLY)
}

pub fn lead_matching(
    icp: &Icp,
    profile: &ParsedLeadProfile,
    semantic_pre_score: Option<f64>,
) -> CompletionRequest {
    let profile_json = serde_json::to_string_pretty(profile).unwrap_or_default();
    let pre_score = match semantic_pre_score {
        Some(score) => format!(
            "An embedding comparison between the profile's target description and the \
lead's description gave a semantic similarity of {score:.1}/100. Use it as context only.\n\n"
        ),
        None => String::new(),
    };
    let prompt = format!(
        "Ideal Customer Profile:\n{icp:#}\n\n\
Lead profile:\n{profile_json}\n\n\
{pre_score}\
Rate how well the lead matches the profile on a 0-100 scale. \
Return a JSON object {{\"score\": <number>, \"justification\": \"<two or three sentences>\"}}."
    );
    CompletionRequest::new(stage::MATCHING, prompt)
        .with_system(JSON_ONLY)
        .with_temperature(0.0)
}

const GPCT_SHAPE: &str = r#"{
  "goals_assessment": {"strategic_alignment": "Low|Medium|High", "goals": ["..."]},
  "plans_evidence": {"decision_maker_engagement": "Low|Medium|High", "plans": ["..."]},
  "challenges_analysis": {"technology_gaps": ["..."], "challenges": ["..."]},
  "timeline_indicators": {"urgency": "Low|Medium|High", "signals": ["..."]},
  "justification": "..."
}"#;

pub fn gpct_parsing(report_text: &str) -> CompletionRequest {
    let prompt = format!(
        "Lead report:\n{report}\n\n\
Assess the company with the GPCT framework (Goals, Plans, Challenges, Timeline). \
Return a JSON object shaped like:\n{GPCT_SHAPE}",
        report = truncate(report_text)
    );
    CompletionRequest::new(stage::QUALIFICATION_PARSING, prompt).with_system(JSON_ONLY)
}

pub fn gpct_judging(profile: &GpctProfile) -> CompletionRequest {
    let profile_json = serde_json::to_string_pretty(profile).unwrap_or_default();
    let prompt = format!(
        "A colleague produced this GPCT assessment:\n{profile_json}\n\n\
Review it as a second opinion. Correct any rating the evidence does not support, \
remove technology gaps that are not real gaps, and explain your verdict in \
\"justification\". Return the corrected assessment as a JSON object with the same shape:\n{GPCT_SHAPE}"
    );
    CompletionRequest::new(stage::JUDGING, prompt)
        .with_system(JSON_ONLY)
        .with_temperature(0.0)
}

pub fn score_justification(
    match_score: f64,
    match_justification: &str,
    qualification_score: f64,
    qualification_justification: &str,
) -> CompletionRequest {
    let prompt = format!(
        "ICP match score {match_score:.1}/100: {match_justification}\n\
GPCT qualification score {qualification_score:.1}/100: {qualification_justification}\n\n\
Write one short paragraph for a sales team that cross-references both assessments \
and says what to do next. Plain text only."
    );
    CompletionRequest::new(stage::SCORING, prompt)
        .with_temperature(0.4)
        .with_max_tokens(400)
}
