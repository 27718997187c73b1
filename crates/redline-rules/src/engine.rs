use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use redline_core::context::AnalysisContext;
use redline_core::error::{ReviewError, StageError};
use redline_core::stage::{ContextField, ProcessingStage, RuleSkip, StageOutput};
use redline_core::types::{
    Clause, ClauseAnalysis, ClauseTag, Condition, NegotiationRule, Recommendation,
    RiskClassification, RiskScore,
};

pub const STAGE_NAME: &str = "negotiation_advice";

// ── Compiled rules ───────────────────────────────────────────────────────

/// A condition with its pattern pre-compiled. Compile failures are kept
/// rather than dropped: a poisoned condition reports a per-clause skip so
/// the audit log shows exactly which rule did not run where.
enum CompiledCondition {
    HasTag(ClauseTag),
    Contains(String),
    Lacks(String),
    Matches(Result<Regex, String>),
    LacksMatch(Result<Regex, String>),
    MinClassification(RiskClassification),
}

struct CompiledRule {
    rule: NegotiationRule,
    conditions: Vec<CompiledCondition>,
}

fn compile(rules: &[NegotiationRule]) -> Vec<CompiledRule> {
    rules
        .iter()
        .map(|rule| CompiledRule {
            rule: rule.clone(),
            conditions: rule.conditions.iter().map(compile_condition).collect(),
        })
        .collect()
}

fn compile_condition(condition: &Condition) -> CompiledCondition {
    match condition {
        Condition::HasTag { tag } => CompiledCondition::HasTag(*tag),
        Condition::Contains { needle } => CompiledCondition::Contains(needle.to_lowercase()),
        Condition::Lacks { needle } => CompiledCondition::Lacks(needle.to_lowercase()),
        Condition::Matches { pattern } => {
            CompiledCondition::Matches(Regex::new(pattern).map_err(|e| e.to_string()))
        }
        Condition::LacksMatch { pattern } => {
            CompiledCondition::LacksMatch(Regex::new(pattern).map_err(|e| e.to_string()))
        }
        Condition::MinClassification { classification } => {
            CompiledCondition::MinClassification(*classification)
        }
    }
}

// ── The advisor stage ────────────────────────────────────────────────────

/// Rule engine over analyzed clauses. Every rule is evaluated against
/// every clause independently; matches are never short-circuited, never
/// merged, and never silently dropped. The rule set is swappable at a
/// checkpoint (modify-and-continue).
pub struct NegotiationAdviceStage {
    rules: RwLock<Arc<Vec<CompiledRule>>>,
}

impl NegotiationAdviceStage {
    pub fn new(rules: Vec<NegotiationRule>) -> Self {
        Self {
            rules: RwLock::new(Arc::new(compile(&rules))),
        }
    }

    fn current(&self) -> Arc<Vec<CompiledRule>> {
        self.rules
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

fn evaluate(
    condition: &CompiledCondition,
    text_lower: &str,
    text: &str,
    analysis: &ClauseAnalysis,
    score: Option<&RiskScore>,
) -> Result<bool, String> {
    match condition {
        CompiledCondition::HasTag(tag) => Ok(analysis.tags.contains(tag)),
        CompiledCondition::Contains(needle) => Ok(text_lower.contains(needle.as_str())),
        CompiledCondition::Lacks(needle) => Ok(!text_lower.contains(needle.as_str())),
        CompiledCondition::Matches(re) => match re {
            Ok(re) => Ok(re.is_match(text)),
            Err(e) => Err(format!("malformed pattern: {e}")),
        },
        CompiledCondition::LacksMatch(re) => match re {
            Ok(re) => Ok(!re.is_match(text)),
            Err(e) => Err(format!("malformed pattern: {e}")),
        },
        CompiledCondition::MinClassification(min) => {
            Ok(score.and_then(|s| s.classification).is_some_and(|c| c >= *min))
        }
    }
}

/// Same-priority recommendations on one clause with overlapping suggested
/// text get a shared group label. Both stay in the output; which rule
/// fired is an audit requirement.
fn group_overlaps(clause_id: u64, recs: &mut [Recommendation]) {
    let mut next_group = 0u32;
    for i in 0..recs.len() {
        for j in (i + 1)..recs.len() {
            if recs[i].priority != recs[j].priority {
                continue;
            }
            let a = recs[i].suggested_change.to_lowercase();
            let b = recs[j].suggested_change.to_lowercase();
            if !(a.contains(b.as_str()) || b.contains(a.as_str())) {
                continue;
            }
            let label = match recs[i].group.clone() {
                Some(label) => label,
                None => {
                    next_group += 1;
                    let label = format!("c{clause_id}-g{next_group}");
                    recs[i].group = Some(label.clone());
                    label
                }
            };
            if recs[j].group.is_none() {
                recs[j].group = Some(label);
            }
        }
    }
}

#[async_trait]
impl ProcessingStage for NegotiationAdviceStage {
    fn name(&self) -> &str {
        STAGE_NAME
    }

    fn reads(&self) -> &'static [ContextField] {
        &[ContextField::Analyses, ContextField::Scores]
    }

    fn writes(&self) -> &'static [ContextField] {
        &[ContextField::Recommendations]
    }

    async fn run(
        &self,
        ctx: &AnalysisContext,
        clause: &Clause,
    ) -> Result<StageOutput, StageError> {
        let analysis = ctx.analyses.get(&clause.id).ok_or_else(|| {
            StageError::fatal(
                STAGE_NAME,
                format!("clause {} reached the advisor without an analysis", clause.id),
            )
        })?;
        let score = ctx.scores.get(&clause.id);
        let text_lower = clause.text.to_lowercase();

        let mut recommendations: Vec<Recommendation> = Vec::new();
        let mut skipped_rules: Vec<RuleSkip> = Vec::new();

        'rules: for compiled in self.current().iter() {
            for condition in &compiled.conditions {
                match evaluate(condition, &text_lower, &clause.text, analysis, score) {
                    Ok(true) => {}
                    Ok(false) => continue 'rules,
                    Err(reason) => {
                        let err = ReviewError::RuleEvaluation {
                            rule_id: compiled.rule.id.clone(),
                            reason,
                        };
                        skipped_rules.push((compiled.rule.id.clone(), err.to_string()));
                        continue 'rules;
                    }
                }
            }
            let template = &compiled.rule.template;
            recommendations.push(Recommendation {
                rule_id: compiled.rule.id.clone(),
                clause_id: clause.id,
                priority: compiled.rule.priority,
                kind: template.kind,
                suggested_change: template.suggested_change.clone(),
                rationale: template.rationale.clone(),
                strategy: template.strategy.clone(),
                group: None,
            });
        }

        group_overlaps(clause.id, &mut recommendations);
        debug!(
            clause = clause.id,
            matched = recommendations.len(),
            skipped = skipped_rules.len(),
            "advisor evaluated clause"
        );

        Ok(StageOutput::Advice {
            recommendations,
            skipped_rules,
        })
    }

    fn reload_rules(&self, rules: &[NegotiationRule]) {
        let compiled = Arc::new(compile(rules));
        *self.rules.write().unwrap_or_else(|e| e.into_inner()) = compiled;
    }
}
