use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use redline_core::analyzer::ClauseAnalysisStage;
use redline_core::config::ReviewConfig;
use redline_core::context::AnalysisContext;
use redline_core::risk::{aggregate, classify, RiskAssessmentStage};
use redline_core::stage::{ProcessingStage, StageOutput};
use redline_core::types::{
    Clause, RiskCategory, RiskClassification, RiskScore,
};

// ── helpers ──────────────────────────────────────────────────────────────

fn config() -> ReviewConfig {
    ReviewConfig::default()
}

fn clause(id: u64, text: &str) -> Clause {
    Clause {
        id,
        label: format!("Section {id}"),
        text: text.into(),
        span: None,
    }
}

fn raw_with(category: RiskCategory, value: f64) -> BTreeMap<RiskCategory, f64> {
    let mut raw: BTreeMap<RiskCategory, f64> =
        RiskCategory::ALL.iter().map(|c| (*c, 0.0)).collect();
    raw.insert(category, value);
    raw
}

fn score(clause_id: u64, classification: Option<RiskClassification>) -> RiskScore {
    RiskScore {
        clause_id,
        raw: RiskCategory::ALL.iter().map(|c| (*c, 0.0)).collect(),
        factors: Vec::new(),
        aggregate: 0.0,
        classification,
    }
}

// ── classification boundaries ────────────────────────────────────────────

#[test]
fn classification_boundaries_are_exact() {
    let cfg = config();
    assert_eq!(classify(0.70, &cfg), Some(RiskClassification::Critical));
    assert_eq!(classify(0.6999, &cfg), Some(RiskClassification::Material));
    assert_eq!(classify(0.35, &cfg), Some(RiskClassification::Material));
    assert_eq!(classify(0.3499, &cfg), Some(RiskClassification::Procedural));
    assert_eq!(classify(f64::EPSILON, &cfg), Some(RiskClassification::Procedural));
    assert_eq!(classify(0.0, &cfg), None);
}

#[test]
fn default_weights_match_the_fixed_table() {
    let cfg = config();
    assert_eq!(cfg.weight(RiskCategory::Financial), 1.2);
    assert_eq!(cfg.weight(RiskCategory::Legal), 1.1);
    assert_eq!(cfg.weight(RiskCategory::Operational), 0.9);
    assert_eq!(cfg.weight(RiskCategory::Compliance), 1.0);
    assert_eq!(cfg.weight(RiskCategory::Reputational), 0.8);
    assert_eq!(cfg.weight(RiskCategory::Strategic), 1.0);
}

// ── aggregation ──────────────────────────────────────────────────────────

#[test]
fn untriggered_categories_stay_in_the_denominator() {
    let cfg = config();
    // Only Financial at 1.0: aggregate is 1.2 over the full weight sum of
    // 6.0, not 1.0 over 1.2.
    let agg = aggregate(&raw_with(RiskCategory::Financial, 1.0), &cfg);
    assert!((agg - 1.2 / 6.0).abs() < 1e-12);
}

#[test]
fn aggregate_is_monotonic_in_every_category() {
    let cfg = config();
    for category in RiskCategory::ALL {
        let base = aggregate(&raw_with(category, 0.3), &cfg);
        let raised = aggregate(&raw_with(category, 0.6), &cfg);
        assert!(
            raised > base,
            "raising {} lowered the aggregate",
            category.as_str()
        );
    }
}

#[test]
fn zero_raw_scores_aggregate_to_zero() {
    let cfg = config();
    let raw: BTreeMap<RiskCategory, f64> =
        RiskCategory::ALL.iter().map(|c| (*c, 0.0)).collect();
    assert_eq!(aggregate(&raw, &cfg), 0.0);
    assert_eq!(classify(aggregate(&raw, &cfg), &cfg), None);
}

// ── document rollup ──────────────────────────────────────────────────────

#[test]
fn document_risk_is_dominance_not_average() {
    let clauses = vec![clause(1, "a"), clause(2, "b"), clause(3, "c"), clause(4, "d")];
    let mut ctx = AnalysisContext::new(clauses, HashMap::new()).expect("context");
    ctx.scores.insert(1, score(1, Some(RiskClassification::Procedural)));
    ctx.scores.insert(2, score(2, Some(RiskClassification::Procedural)));
    ctx.scores.insert(3, score(3, Some(RiskClassification::Critical)));
    ctx.scores.insert(4, score(4, None));

    // One critical clause dominates any number of benign ones.
    assert_eq!(ctx.document_risk(), Some(RiskClassification::Critical));
    let counts = ctx.classification_counts();
    assert_eq!(counts.critical, 1);
    assert_eq!(counts.material, 0);
    assert_eq!(counts.procedural, 2);
}

// ── stage integration ────────────────────────────────────────────────────

#[tokio::test]
async fn uncapped_indemnification_scores_legal_risk() {
    let cfg = Arc::new(config());
    let text = "Provider shall indemnify and hold harmless Client from all \
                claims and shall be solely responsible for damages arising \
                from any breach.";
    let clauses = vec![clause(1, text)];
    let mut ctx = AnalysisContext::new(clauses.clone(), HashMap::new()).expect("context");

    let analyzer = ClauseAnalysisStage::new(Arc::clone(&cfg));
    let output = analyzer.run(&ctx, &clauses[0]).await.expect("analysis");
    match output {
        StageOutput::Analysis(analysis) => {
            ctx.analyses.insert(1, analysis);
        }
        other => panic!("unexpected stage output: {other:?}"),
    }

    let assessor = RiskAssessmentStage::new(Arc::clone(&cfg));
    let output = assessor.run(&ctx, &clauses[0]).await.expect("score");
    let StageOutput::Score(score) = output else {
        panic!("risk stage produced a non-score output");
    };
    assert!(score.raw[&RiskCategory::Legal] > 0.0);
    assert!(score.aggregate > 0.0);
    assert!(score.classification.is_some());
    assert!(score
        .factors
        .iter()
        .any(|f| f.contains("indemnification")));
}

#[tokio::test]
async fn risk_stage_without_analysis_is_a_fatal_error() {
    let cfg = Arc::new(config());
    let clauses = vec![clause(1, "Some clause text.")];
    let ctx = AnalysisContext::new(clauses.clone(), HashMap::new()).expect("context");

    let assessor = RiskAssessmentStage::new(cfg);
    let err = assessor.run(&ctx, &clauses[0]).await.unwrap_err();
    assert!(!err.recoverable);
}
