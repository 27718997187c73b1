use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::ReviewConfig;
use crate::context::{estimate_tokens, AnalysisContext};
use crate::error::{ReviewError, StageError};
use crate::stage::{ContextField, ProcessingStage, StageOutput};
use crate::types::{Clause, ClauseAnalysis, ClauseTag, ExposureSeverity};

pub const STAGE_NAME: &str = "clause_analysis";

/// Vulnerability indicators checked by the exposure layer, independent of
/// tag. Each hit contributes to the severity hint.
const ASYMMETRIC_TERMS: &[&str] = &[
    "solely responsible",
    "exclusively liable",
    "bears all costs",
    "at own expense",
    "without recourse",
];

const VAGUE_LANGUAGE: &[&str] = &[
    "reasonable efforts",
    "best efforts",
    "commercially reasonable",
    "appropriate measures",
    "satisfactory performance",
];

const MISSING_PROTECTIONS: &[&str] = &[
    "without warranty",
    "as is",
    "no guarantee",
    "disclaim all liability",
];

/// Tag-specific missing-mitigation checks: (tag, present, absent, finding).
const MITIGATION_GAPS: &[(ClauseTag, &str, &str, &str)] = &[
    (ClauseTag::Fin, "penalty", "cap", "uncapped penalty exposure"),
    (ClauseTag::Fin, "payment", "escrow", "no escrow protection for payments"),
    (ClauseTag::Leg, "liability", "limit", "liability exposure without limits"),
    (ClauseTag::Leg, "indemnif", "mutual", "one-sided indemnification"),
    (ClauseTag::Tec, "sla", "remedy", "SLA without enforcement remedies"),
    (ClauseTag::Tec, "deliverable", "acceptance", "no formal acceptance criteria"),
    (ClauseTag::Trm, "terminat", "cure", "termination without a cure period"),
];

/// First stage of the per-clause pipeline: tag classification plus the
/// interpretation / exposure / opportunity layers.
pub struct ClauseAnalysisStage {
    config: Arc<ReviewConfig>,
}

impl ClauseAnalysisStage {
    pub fn new(config: Arc<ReviewConfig>) -> Self {
        Self { config }
    }

    fn classify_tags(&self, text: &str) -> Vec<ClauseTag> {
        let mut tags: Vec<ClauseTag> = Vec::new();
        for pattern in &self.config.tag_patterns {
            if pattern.keywords.iter().any(|k| text.contains(k.as_str())) {
                tags.push(pattern.tag);
            }
        }
        if tags.is_empty() {
            // Fallback heuristics before the DOC catch-all.
            if ["payment", "fee", "cost"].iter().any(|w| text.contains(w)) {
                tags.push(ClauseTag::Fin);
            } else if ["termination", "breach"].iter().any(|w| text.contains(w)) {
                tags.push(ClauseTag::Trm);
            } else if ["legal", "jurisdiction", "law"].iter().any(|w| text.contains(w)) {
                tags.push(ClauseTag::Leg);
            } else {
                tags.push(ClauseTag::Doc);
            }
        }
        tags
    }

    fn interpretation(&self, tags: &[ClauseTag], obligations: &[String]) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if tags.contains(&ClauseTag::Tec) {
            parts.push("establishes technical requirements and deliverable specifications");
        }
        if tags.contains(&ClauseTag::Leg) {
            parts.push("defines legal obligations and protective mechanisms");
        }
        if tags.contains(&ClauseTag::Fin) {
            parts.push("governs financial terms and payment obligations");
        }
        if tags.contains(&ClauseTag::Ipx) {
            parts.push("controls intellectual property rights and ownership");
        }
        if tags.contains(&ClauseTag::Trm) {
            parts.push("sets termination conditions and exit mechanics");
        }
        if tags.contains(&ClauseTag::Com) {
            parts.push("imposes compliance and regulatory duties");
        }
        if parts.is_empty() {
            parts.push("provides contractual terms and conditions");
        }

        let mut text = format!("This clause {}.", parts.join(", "));
        if !obligations.is_empty() {
            let listed: Vec<&str> = obligations.iter().take(3).map(String::as_str).collect();
            text.push_str(&format!(" Obligations identified: {}.", listed.join("; ")));
        }
        text
    }

    fn exposure(&self, text: &str, tags: &[ClauseTag]) -> (String, ExposureSeverity) {
        let mut findings: Vec<String> = Vec::new();

        for (label, indicators) in [
            ("asymmetric terms", ASYMMETRIC_TERMS),
            ("vague language", VAGUE_LANGUAGE),
            ("missing protections", MISSING_PROTECTIONS),
        ] {
            for indicator in indicators {
                if text.contains(indicator) {
                    findings.push(format!("{label}: \"{indicator}\""));
                }
            }
        }

        for (tag, present, absent, finding) in MITIGATION_GAPS {
            if tags.contains(tag) && text.contains(present) && !text.contains(absent) {
                findings.push(format!("{}: {finding}", tag.as_str()));
            }
        }

        let severity = match findings.len() {
            0 => ExposureSeverity::Low,
            1..=2 => ExposureSeverity::Moderate,
            _ => ExposureSeverity::High,
        };

        let text = if findings.is_empty() {
            "No significant vulnerabilities identified in this clause.".to_string()
        } else {
            format!("Potential vulnerabilities: {}.", findings.join("; "))
        };

        (text, severity)
    }

    fn opportunities(&self, text: &str, tags: &[ClauseTag]) -> Vec<String> {
        self.config
            .leverage_points
            .iter()
            .filter(|lp| {
                tags.contains(&lp.tag)
                    && text.contains(lp.requires.as_str())
                    && !text.contains(lp.lacking.as_str())
            })
            .map(|lp| lp.text.clone())
            .collect()
    }

    fn key_terms(&self, text: &str, tags: &[ClauseTag], feature_terms: &[String]) -> Vec<String> {
        let mut terms: Vec<String> = feature_terms
            .iter()
            .filter(|t| text.contains(t.to_lowercase().as_str()))
            .cloned()
            .collect();
        for pattern in &self.config.tag_patterns {
            if !tags.contains(&pattern.tag) {
                continue;
            }
            for keyword in &pattern.keywords {
                if text.contains(keyword.as_str()) && !terms.iter().any(|t| t == keyword) {
                    terms.push(keyword.clone());
                }
            }
        }
        terms
    }
}

#[async_trait]
impl ProcessingStage for ClauseAnalysisStage {
    fn name(&self) -> &str {
        STAGE_NAME
    }

    fn reads(&self) -> &'static [ContextField] {
        &[]
    }

    fn writes(&self) -> &'static [ContextField] {
        &[ContextField::Analyses]
    }

    async fn run(
        &self,
        ctx: &AnalysisContext,
        clause: &Clause,
    ) -> Result<StageOutput, StageError> {
        if clause.text.trim().is_empty() {
            let gap = ReviewError::ParseGap {
                clause_id: clause.id,
                reason: "empty clause text".into(),
            };
            return Err(StageError::recoverable(STAGE_NAME, gap.to_string()));
        }

        let combined = format!("{} {}", clause.label, clause.text).to_lowercase();
        let tags = self.classify_tags(&combined);
        debug!(clause = clause.id, tags = ?tags, "classified clause");

        let features = ctx.features_for(clause.id);
        let obligations: &[String] = features.map(|f| f.obligations.as_slice()).unwrap_or(&[]);
        let feature_terms: &[String] = features.map(|f| f.key_terms.as_slice()).unwrap_or(&[]);

        let (exposure, severity_hint) = self.exposure(&combined, &tags);
        let mut opportunities = self.opportunities(&combined, &tags);
        if opportunities.is_empty() {
            opportunities.push("Standard commercial review recommended".into());
        }

        Ok(StageOutput::Analysis(ClauseAnalysis {
            clause_id: clause.id,
            tags: tags.clone(),
            interpretation: self.interpretation(&tags, obligations),
            exposure,
            severity_hint,
            opportunities,
            key_terms: self.key_terms(&combined, &tags, feature_terms),
            token_count: estimate_tokens(&clause.text),
            defaulted: false,
        }))
    }
}
