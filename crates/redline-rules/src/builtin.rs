use anyhow::{Context, Result};

use redline_core::types::{
    ClauseTag, Condition, NegotiationRule, Priority, RecommendationKind, RecommendationTemplate,
    RiskClassification,
};

/// Load a negotiation rule set from a JSON file.
pub fn load_rules(path: &str) -> Result<Vec<NegotiationRule>> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("read rule file {path}"))?;
    let rules: Vec<NegotiationRule> =
        serde_json::from_str(&contents).with_context(|| format!("parse rule file {path}"))?;
    Ok(rules)
}

fn rule(
    id: &str,
    name: &str,
    priority: Priority,
    conditions: Vec<Condition>,
    kind: RecommendationKind,
    suggested_change: &str,
    rationale: &str,
    strategy: &str,
) -> NegotiationRule {
    NegotiationRule {
        id: id.into(),
        name: name.into(),
        priority,
        conditions,
        template: RecommendationTemplate {
            kind,
            suggested_change: suggested_change.into(),
            rationale: rationale.into(),
            strategy: strategy.into(),
        },
    }
}

fn has(tag: ClauseTag) -> Condition {
    Condition::HasTag { tag }
}

fn contains(needle: &str) -> Condition {
    Condition::Contains {
        needle: needle.into(),
    }
}

fn lacks(needle: &str) -> Condition {
    Condition::Lacks {
        needle: needle.into(),
    }
}

/// The built-in rule set, used when no rule file is configured.
pub fn default_rules() -> Vec<NegotiationRule> {
    vec![
        rule(
            "high-financial-risk",
            "High Financial Risk",
            Priority::Critical,
            vec![
                has(ClauseTag::Fin),
                Condition::MinClassification {
                    classification: RiskClassification::Critical,
                },
            ],
            RecommendationKind::Redline,
            "Add liability caps, penalty limitations, and payment protections",
            "Excessive financial exposure poses significant business risk",
            "Demand material revisions or consider contract rejection",
        ),
        rule(
            "high-penalty-risk",
            "High Penalty Risk",
            Priority::High,
            vec![
                has(ClauseTag::Fin),
                contains("indemnify"),
                lacks("cap"),
                lacks("limit"),
            ],
            RecommendationKind::Redline,
            "Cap indemnification exposure at a defined multiple of contract value",
            "Uncapped indemnification is an open-ended financial commitment",
            "Tie any indemnity to insured, capped amounts",
        ),
        rule(
            "unlimited-liability",
            "Unlimited Liability",
            Priority::High,
            vec![contains("liab"), lacks("limit"), lacks("cap")],
            RecommendationKind::Addition,
            "Add a liability limitations clause capping damages",
            "Unlimited liability creates unacceptable business risk",
            "Negotiate specific dollar caps or limit to contract value",
        ),
        rule(
            "one-sided-indemnification",
            "One-sided Indemnification",
            Priority::High,
            vec![contains("indemnif"), lacks("mutual"), lacks("reciprocal")],
            RecommendationKind::Redline,
            "Revise to mutual indemnification provisions",
            "Asymmetric indemnification creates unfair risk allocation",
            "Push for balanced mutual protections",
        ),
        rule(
            "vague-deliverables",
            "Vague Deliverables",
            Priority::Medium,
            vec![
                has(ClauseTag::Tec),
                contains("deliverable"),
                lacks("specific"),
                lacks("criteria"),
            ],
            RecommendationKind::Clarification,
            "Add detailed acceptance criteria and specifications",
            "Vague deliverables lead to scope disputes and project delays",
            "Define clear, measurable deliverable requirements",
        ),
        rule(
            "missing-cure-period",
            "Missing Cure Period",
            Priority::Medium,
            vec![
                has(ClauseTag::Trm),
                contains("terminat"),
                lacks("cure"),
                lacks("remedy"),
            ],
            RecommendationKind::Addition,
            "Include a reasonable cure period (e.g. 30 days written notice)",
            "Cure periods allow issues to be addressed before severe consequences",
            "Negotiate fair notice and cure provisions",
        ),
        rule(
            "payment-without-escrow",
            "Payment Without Escrow",
            Priority::Low,
            vec![has(ClauseTag::Fin), contains("payment"), lacks("escrow")],
            RecommendationKind::Flag,
            "Consider escrow arrangements for payment security",
            "Unsecured payment obligations carry collection risk",
            "Raise payment security during commercial negotiation",
        ),
        rule(
            "sla-without-remedy",
            "SLA Without Remedy",
            Priority::Medium,
            vec![
                has(ClauseTag::Tec),
                contains("sla"),
                lacks("remedy"),
                lacks("credit"),
            ],
            RecommendationKind::Addition,
            "Attach service credits or remedies to SLA breaches",
            "An SLA without enforcement remedies is unenforceable in practice",
            "Request defined remedies per breach tier",
        ),
    ]
}
