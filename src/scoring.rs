//! Deterministic scoring. No I/O, no Oracle.

use crate::errors::AppError;
use crate::models::{Classification, GpctProfile};

pub const MATCH_WEIGHT: f64 = 0.7;
pub const QUALIFICATION_WEIGHT: f64 = 0.3;
/// Final scores at or above this are `Hot`.
pub const HOT_THRESHOLD: f64 = 75.0;

const GOALS_WEIGHT: f64 = 0.4;
const PLANS_WEIGHT: f64 = 0.3;
const CHALLENGES_WEIGHT: f64 = 0.2;
const TIMELINE_WEIGHT: f64 = 0.1;
/// Maps the maximum weighted ordinal sum (5) onto 100.
const GPCT_SCALE: f64 = 20.0;

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// `final = round(0.7 * match + 0.3 * qualification, 1)`, `Hot` iff `final >= 75`.
///
/// The threshold is applied to the rounded score so the label always agrees with
/// the number a reader sees.
pub fn combine(match_score: f64, qualification_score: f64) -> (f64, Classification) {
    let final_score = round_to(
        MATCH_WEIGHT * match_score + QUALIFICATION_WEIGHT * qualification_score,
        1,
    );
    let classification = if final_score >= HOT_THRESHOLD {
        Classification::Hot
    } else {
        Classification::Cold
    };
    (final_score, classification)
}

/// Weighted GPCT score on a 0-100 scale, rounded to two decimals.
///
/// Challenges count down from 5 by one per technology gap, floored at 0.
pub fn gpct_score(profile: &GpctProfile) -> f64 {
    let goals = f64::from(profile.goals_assessment.strategic_alignment.ordinal());
    let plans = f64::from(profile.plans_evidence.decision_maker_engagement.ordinal());
    let timeline = f64::from(profile.timeline_indicators.urgency.ordinal());
    let gaps = profile.challenges_analysis.technology_gaps.len().min(5) as f64;
    let challenges = 5.0 - gaps;

    let weighted = GOALS_WEIGHT * goals
        + PLANS_WEIGHT * plans
        + CHALLENGES_WEIGHT * challenges
        + TIMELINE_WEIGHT * timeline;

    round_to(weighted * GPCT_SCALE, 2)
}

/// Rejects scores outside `[0, 100]` instead of clamping them.
pub fn validate_score(stage: &str, value: f64, raw: &str) -> Result<f64, AppError> {
    if value.is_finite() && (0.0..=100.0).contains(&value) {
        Ok(value)
    } else {
        Err(AppError::validation(
            stage,
            format!("score {} outside [0, 100]", value),
            raw,
        ))
    }
}
