use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::ReviewConfig;
use crate::context::AnalysisContext;
use crate::error::StageError;
use crate::stage::{ContextField, ProcessingStage, StageOutput};
use crate::types::{Clause, ClauseAnalysis, RiskCategory, RiskClassification, RiskScore};

pub const STAGE_NAME: &str = "risk_assessment";

/// One detection rule for a risk category: fires when `needle` appears and
/// none of the `unless` mitigations appear. Strengths sum and clamp to
/// [0, 1] per category.
struct Trigger {
    needle: &'static str,
    unless: &'static [&'static str],
    strength: f64,
    finding: &'static str,
}

const fn t(
    needle: &'static str,
    unless: &'static [&'static str],
    strength: f64,
    finding: &'static str,
) -> Trigger {
    Trigger {
        needle,
        unless,
        strength,
        finding,
    }
}

const FINANCIAL: &[Trigger] = &[
    t("payment", &["penalty", "interest"], 0.35, "payment terms lack late-payment provisions"),
    t("liable", &["limit", "cap"], 0.60, "liability exposure without caps"),
    t("penalty", &["cap"], 0.40, "uncapped penalty exposure"),
    t("currency", &["hedg", "fixed rate"], 0.30, "currency risk without hedging"),
    t("liquidated damages", &[], 0.35, "liquidated damages obligation"),
];

const LEGAL: &[Trigger] = &[
    t("indemnif", &["mutual", "reciprocal"], 0.55, "one-sided indemnification obligations"),
    t("jurisdiction", &[], 0.25, "jurisdiction exposure in dispute resolution"),
    t("warrant", &["disclaim"], 0.40, "broad warranty obligations without disclaimers"),
    t("terminat", &["cure"], 0.40, "termination rights without a cure period"),
    t("injunctive relief", &[], 0.30, "injunctive relief exposure"),
];

const OPERATIONAL: &[Trigger] = &[
    t("deliverable", &["specific", "criteria"], 0.45, "vague deliverable specifications"),
    t("third party", &[], 0.30, "third-party dependency"),
    t("depend", &[], 0.25, "external dependency risk"),
    t("within 24 hours", &[], 0.35, "tight response timeline"),
];

const COMPLIANCE: &[Trigger] = &[
    t("regulation", &["current"], 0.40, "compliance obligations may lag current regulations"),
    t("data", &["gdpr", "privacy"], 0.50, "data handling without explicit privacy protections"),
    t("payment", &["aml"], 0.25, "financial operations without AML measures"),
    t("license", &[], 0.25, "licensing obligations"),
];

const REPUTATIONAL: &[Trigger] = &[
    t("disclosure", &["confidential"], 0.40, "disclosure without confidentiality protections"),
    t("public", &["confidential"], 0.30, "public exposure without confidentiality terms"),
    t("quality", &["standard"], 0.30, "quality expectations without defined standards"),
];

const STRATEGIC: &[Trigger] = &[
    t("intellectual property", &["retain", "license back"], 0.55, "IP transfer without license-back rights"),
    t("copyright", &["retain"], 0.40, "copyright assignment without retention"),
    t("exclusive", &["term"], 0.45, "indefinite exclusivity arrangement"),
    t("non-compete", &[], 0.35, "non-compete restriction"),
];

fn triggers_for(category: RiskCategory) -> &'static [Trigger] {
    match category {
        RiskCategory::Financial => FINANCIAL,
        RiskCategory::Legal => LEGAL,
        RiskCategory::Operational => OPERATIONAL,
        RiskCategory::Compliance => COMPLIANCE,
        RiskCategory::Reputational => REPUTATIONAL,
        RiskCategory::Strategic => STRATEGIC,
    }
}

/// Classify an aggregate score against the configured thresholds.
/// Boundaries are inclusive: exactly 0.70 is Critical, exactly 0.35 is
/// Material. A zero aggregate emits no classification.
pub fn classify(aggregate: f64, config: &ReviewConfig) -> Option<RiskClassification> {
    if aggregate >= config.critical_threshold {
        Some(RiskClassification::Critical)
    } else if aggregate >= config.material_threshold {
        Some(RiskClassification::Material)
    } else if aggregate > 0.0 {
        Some(RiskClassification::Procedural)
    } else {
        None
    }
}

/// Weighted mean over ALL categories: untriggered categories contribute
/// zero to the numerator but their weights stay in the denominator, so the
/// aggregate is monotonic non-decreasing in every raw score.
pub fn aggregate(raw: &BTreeMap<RiskCategory, f64>, config: &ReviewConfig) -> f64 {
    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for category in RiskCategory::ALL {
        let weight = config.weight(category);
        numerator += raw.get(&category).copied().unwrap_or(0.0) * weight;
        denominator += weight;
    }
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// Second stage: per-category scoring over the clause analysis, weighted
/// aggregation, and threshold classification.
pub struct RiskAssessmentStage {
    config: Arc<ReviewConfig>,
}

impl RiskAssessmentStage {
    pub fn new(config: Arc<ReviewConfig>) -> Self {
        Self { config }
    }

    fn category_raw(
        &self,
        category: RiskCategory,
        text: &str,
        analysis: &ClauseAnalysis,
        factors: &mut Vec<String>,
    ) -> f64 {
        let mut sum = 0.0;
        for trigger in triggers_for(category) {
            if !text.contains(trigger.needle) {
                continue;
            }
            if trigger.unless.iter().any(|m| text.contains(m)) {
                continue;
            }
            sum += trigger.strength;
            factors.push(format!("{}: {}", category.as_str(), trigger.finding));
        }
        if sum == 0.0 {
            return 0.0;
        }
        // Severity hint from the exposure layer acts as a multiplicative
        // prior, never a score of its own.
        (sum.min(1.0) * analysis.severity_hint.prior()).clamp(0.0, 1.0)
    }
}

#[async_trait]
impl ProcessingStage for RiskAssessmentStage {
    fn name(&self) -> &str {
        STAGE_NAME
    }

    fn reads(&self) -> &'static [ContextField] {
        &[ContextField::Analyses]
    }

    fn writes(&self) -> &'static [ContextField] {
        &[ContextField::Scores]
    }

    async fn run(
        &self,
        ctx: &AnalysisContext,
        clause: &Clause,
    ) -> Result<StageOutput, StageError> {
        let analysis = ctx.analyses.get(&clause.id).ok_or_else(|| {
            StageError::fatal(
                STAGE_NAME,
                format!("clause {} reached risk assessment without an analysis", clause.id),
            )
        })?;

        let text = clause.text.to_lowercase();
        let mut factors = Vec::new();
        let mut raw = BTreeMap::new();
        for category in RiskCategory::ALL {
            let score = self.category_raw(category, &text, analysis, &mut factors);
            raw.insert(category, score);
        }

        let aggregate = aggregate(&raw, &self.config);
        let classification = classify(aggregate, &self.config);
        debug!(
            clause = clause.id,
            aggregate, classification = ?classification, "scored clause"
        );

        Ok(StageOutput::Score(RiskScore {
            clause_id: clause.id,
            raw,
            factors,
            aggregate,
            classification,
        }))
    }
}
