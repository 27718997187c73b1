use std::collections::{BTreeMap, HashMap};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::types::{ClauseTag, RiskCategory};

/// Keyword pattern set for one clause tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagPattern {
    pub tag: ClauseTag,
    pub keywords: Vec<String>,
}

/// A standard leverage point for the opportunity layer: applies when the
/// clause carries `tag`, contains `requires`, and lacks `lacking`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeveragePoint {
    pub tag: ClauseTag,
    pub requires: String,
    pub lacking: String,
    pub text: String,
}

/// Process-wide immutable review configuration. Loaded once before any
/// session starts and passed by Arc into every component; never a mutable
/// global.
#[derive(Debug, Clone)]
pub struct ReviewConfig {
    // Risk scoring
    pub category_weights: BTreeMap<RiskCategory, f64>,
    pub critical_threshold: f64,
    pub material_threshold: f64,

    // Checkpoint thresholds
    pub checkpoint_clauses: u64,
    pub checkpoint_tokens: u64,

    // Error budget
    pub max_recoverable_errors: u32,
    pub max_consecutive_failures: u32,

    // Analyzer tables
    pub tag_patterns: Vec<TagPattern>,
    pub leverage_points: Vec<LeveragePoint>,

    // Negotiation rule file (empty = built-in rule set)
    pub rules_path: String,

    // Server
    pub bind: String,
    pub port: u16,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            category_weights: default_weights(),
            critical_threshold: 0.70,
            material_threshold: 0.35,
            checkpoint_clauses: 3,
            checkpoint_tokens: 3000,
            max_recoverable_errors: 5,
            max_consecutive_failures: 3,
            tag_patterns: default_tag_patterns(),
            leverage_points: default_leverage_points(),
            rules_path: String::new(),
            bind: "127.0.0.1".into(),
            port: 3141,
        }
    }
}

fn parse_dotenv() -> HashMap<String, String> {
    let mut map = HashMap::new();
    let Ok(contents) = std::fs::read_to_string(".env") else {
        return map;
    };
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            map.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    map
}

fn get(key: &str, dotenv: &HashMap<String, String>) -> Option<String> {
    std::env::var(key).ok().or_else(|| dotenv.get(key).cloned())
}

fn get_str(key: &str, dotenv: &HashMap<String, String>, default: &str) -> String {
    get(key, dotenv).unwrap_or_else(|| default.to_string())
}

fn get_f64(key: &str, dotenv: &HashMap<String, String>, default: f64) -> f64 {
    get(key, dotenv)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn get_u64(key: &str, dotenv: &HashMap<String, String>, default: u64) -> u64 {
    get(key, dotenv)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn get_u32(key: &str, dotenv: &HashMap<String, String>, default: u32) -> u32 {
    get(key, dotenv)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn get_u16(key: &str, dotenv: &HashMap<String, String>, default: u16) -> u16 {
    get(key, dotenv)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Structured overlay file (REVIEW_CONFIG). Any present field replaces the
/// corresponding table or scalar wholesale.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    category_weights: Option<BTreeMap<RiskCategory, f64>>,
    critical_threshold: Option<f64>,
    material_threshold: Option<f64>,
    checkpoint_clauses: Option<u64>,
    checkpoint_tokens: Option<u64>,
    max_recoverable_errors: Option<u32>,
    max_consecutive_failures: Option<u32>,
    tag_patterns: Option<Vec<TagPattern>>,
    leverage_points: Option<Vec<LeveragePoint>>,
}

impl ReviewConfig {
    pub fn from_env() -> Result<Self> {
        let dotenv = parse_dotenv();
        let mut c = Self {
            critical_threshold: get_f64("REVIEW_CRITICAL_THRESHOLD", &dotenv, 0.70),
            material_threshold: get_f64("REVIEW_MATERIAL_THRESHOLD", &dotenv, 0.35),
            checkpoint_clauses: get_u64("REVIEW_CHECKPOINT_CLAUSES", &dotenv, 3),
            checkpoint_tokens: get_u64("REVIEW_CHECKPOINT_TOKENS", &dotenv, 3000),
            max_recoverable_errors: get_u32("REVIEW_MAX_RECOVERABLE_ERRORS", &dotenv, 5),
            max_consecutive_failures: get_u32("REVIEW_MAX_CONSECUTIVE_FAILURES", &dotenv, 3),
            rules_path: get_str("REVIEW_RULES", &dotenv, ""),
            bind: get_str("REVIEW_BIND", &dotenv, "127.0.0.1"),
            port: get_u16("REVIEW_PORT", &dotenv, 3141),
            ..Self::default()
        };

        let config_path = get_str("REVIEW_CONFIG", &dotenv, "");
        if !config_path.is_empty() {
            c.apply_file(&config_path)
                .with_context(|| format!("load config file {config_path}"))?;
        }
        Ok(c)
    }

    /// Overlay analysis tables and scalars from a JSON config file.
    pub fn apply_file(&mut self, path: &str) -> Result<()> {
        let contents = std::fs::read_to_string(path)?;
        let file: ConfigFile = serde_json::from_str(&contents)?;
        if let Some(w) = file.category_weights {
            self.category_weights = w;
        }
        if let Some(v) = file.critical_threshold {
            self.critical_threshold = v;
        }
        if let Some(v) = file.material_threshold {
            self.material_threshold = v;
        }
        if let Some(v) = file.checkpoint_clauses {
            self.checkpoint_clauses = v;
        }
        if let Some(v) = file.checkpoint_tokens {
            self.checkpoint_tokens = v;
        }
        if let Some(v) = file.max_recoverable_errors {
            self.max_recoverable_errors = v;
        }
        if let Some(v) = file.max_consecutive_failures {
            self.max_consecutive_failures = v;
        }
        if let Some(v) = file.tag_patterns {
            self.tag_patterns = v;
        }
        if let Some(v) = file.leverage_points {
            self.leverage_points = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        for cat in RiskCategory::ALL {
            match self.category_weights.get(&cat) {
                Some(w) if *w > 0.0 => {}
                Some(w) => bail!("non-positive weight {w} for category {}", cat.as_str()),
                None => bail!("missing weight for category {}", cat.as_str()),
            }
        }
        if !(0.0 < self.material_threshold && self.material_threshold < self.critical_threshold) {
            bail!(
                "thresholds must satisfy 0 < material ({}) < critical ({})",
                self.material_threshold,
                self.critical_threshold
            );
        }
        if self.critical_threshold > 1.0 {
            bail!("critical threshold {} exceeds 1.0", self.critical_threshold);
        }
        if self.checkpoint_clauses == 0 || self.checkpoint_tokens == 0 {
            bail!("checkpoint thresholds must be non-zero");
        }
        Ok(())
    }

    pub fn weight(&self, category: RiskCategory) -> f64 {
        self.category_weights
            .get(&category)
            .copied()
            .unwrap_or_else(|| category.default_weight())
    }
}

fn default_weights() -> BTreeMap<RiskCategory, f64> {
    RiskCategory::ALL
        .iter()
        .map(|c| (*c, c.default_weight()))
        .collect()
}

fn pattern(tag: ClauseTag, keywords: &[&str]) -> TagPattern {
    TagPattern {
        tag,
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
    }
}

fn default_tag_patterns() -> Vec<TagPattern> {
    vec![
        pattern(
            ClauseTag::Tec,
            &["deliverable", "milestone", "sla", "service level", "uptime", "performance"],
        ),
        pattern(
            ClauseTag::Leg,
            &["jurisdiction", "governing law", "indemnif", "liability", "breach", "warranty"],
        ),
        pattern(
            ClauseTag::Fin,
            &["payment", "invoice", "fee", "cost", "penalty", "refund", "currency"],
        ),
        pattern(
            ClauseTag::Com,
            &["compliance", "regulation", "license", "aml", "gdpr", "privacy"],
        ),
        pattern(
            ClauseTag::Ipx,
            &["intellectual property", "copyright", "ownership", "exclusive"],
        ),
        pattern(
            ClauseTag::Trm,
            &["termination", "breach", "default", "cure period", "notice"],
        ),
        pattern(
            ClauseTag::Dis,
            &["dispute", "arbitration", "mediation", "venue"],
        ),
        pattern(
            ClauseTag::Doc,
            &["annex", "amendment", "modification", "version"],
        ),
        pattern(
            ClauseTag::Exe,
            &["signature", "execution", "authority", "effective date"],
        ),
        pattern(
            ClauseTag::Ext,
            &["third party", "vendor", "subcontract", "dependency"],
        ),
    ]
}

fn leverage(tag: ClauseTag, requires: &str, lacking: &str, text: &str) -> LeveragePoint {
    LeveragePoint {
        tag,
        requires: requires.into(),
        lacking: lacking.into(),
        text: text.into(),
    }
}

fn default_leverage_points() -> Vec<LeveragePoint> {
    vec![
        leverage(
            ClauseTag::Fin,
            "penalty",
            "cap",
            "Negotiate penalty caps to limit financial exposure",
        ),
        leverage(
            ClauseTag::Fin,
            "payment",
            "escrow",
            "Explore escrow arrangements for payment security",
        ),
        leverage(
            ClauseTag::Fin,
            "late",
            "cure",
            "Request a cure period before late-payment penalties apply",
        ),
        leverage(
            ClauseTag::Leg,
            "indemnif",
            "mutual",
            "Push for mutual indemnification to balance liability",
        ),
        leverage(
            ClauseTag::Leg,
            "liability",
            "limit",
            "Negotiate liability limitations and caps",
        ),
        leverage(
            ClauseTag::Tec,
            "deliverable",
            "acceptance",
            "Define clear acceptance criteria for deliverables",
        ),
        leverage(
            ClauseTag::Tec,
            "sla",
            "remedy",
            "Include specific remedies for SLA breaches",
        ),
        leverage(
            ClauseTag::Trm,
            "terminat",
            "cure",
            "Negotiate cure periods before termination rights activate",
        ),
        leverage(
            ClauseTag::Trm,
            "convenience",
            "reciprocal",
            "Seek reciprocal termination rights or notice periods",
        ),
    ]
}
