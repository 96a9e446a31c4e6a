/// Scoring arithmetic tests
/// The combiner and the GPCT formula are pure and reproducible without network access
use leadgen_pipeline::errors::AppError;
use leadgen_pipeline::models::{Classification, GpctProfile, Level};
use leadgen_pipeline::scoring::{combine, gpct_score, validate_score};

#[test]
fn weighted_combination_examples() {
    assert_eq!(combine(82.0, 70.0), (78.4, Classification::Hot));
    assert_eq!(combine(80.0, 50.0), (71.0, Classification::Cold));
    assert_eq!(combine(82.0, 72.0), (79.0, Classification::Hot));
}

#[test]
fn exactly_seventy_five_is_hot() {
    assert_eq!(combine(90.0, 40.0), (75.0, Classification::Hot));
    assert_eq!(combine(75.0, 75.0), (75.0, Classification::Hot));
}

#[test]
fn just_below_threshold_is_cold() {
    // 0.7 * 80 + 0.3 * 60 = 74.0
    assert_eq!(combine(80.0, 60.0), (74.0, Classification::Cold));
    assert_eq!(combine(100.0, 16.0).1, Classification::Cold);
}

#[test]
fn gpct_extremes() {
    let best = GpctProfile::new(Level::High, Level::High, vec![], Level::High);
    assert_eq!(gpct_score(&best), 100.0);

    let all_low = GpctProfile::new(Level::Low, Level::Low, vec![], Level::Low);
    assert_eq!(gpct_score(&all_low), 36.0);

    let gaps: Vec<String> = (0..7).map(|i| format!("gap {}", i)).collect();
    let worst = GpctProfile::new(Level::Low, Level::Low, gaps, Level::Low);
    assert_eq!(gpct_score(&worst), 16.0);
}

#[test]
fn gpct_mixed_profile() {
    let profile = GpctProfile::new(
        Level::High,
        Level::Medium,
        vec!["legacy core".into(), "no open APIs".into()],
        Level::Low,
    );
    assert_eq!(gpct_score(&profile), 72.0);
}

#[test]
fn scores_outside_range_are_rejected() {
    assert_eq!(validate_score("matching", 0.0, "").unwrap(), 0.0);
    assert_eq!(validate_score("matching", 100.0, "").unwrap(), 100.0);
    for bad in [-0.1, 100.5, f64::NAN, f64::INFINITY] {
        let err = validate_score("matching", bad, "{\"score\": 9000}").unwrap_err();
        match err {
            AppError::Validation { stage, raw, .. } => {
                assert_eq!(stage, "matching");
                assert_eq!(raw, "{\"score\": 9000}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
