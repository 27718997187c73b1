use std::io::Write;

use redline_core::config::ReviewConfig;
use redline_core::context::estimate_tokens;
use redline_core::types::{ClauseTag, RiskCategory};

// ── defaults ─────────────────────────────────────────────────────────────

#[test]
fn defaults_carry_the_documented_constants() {
    let cfg = ReviewConfig::default();
    assert_eq!(cfg.critical_threshold, 0.70);
    assert_eq!(cfg.material_threshold, 0.35);
    assert_eq!(cfg.checkpoint_clauses, 3);
    assert_eq!(cfg.checkpoint_tokens, 3000);
    assert_eq!(cfg.max_recoverable_errors, 5);
    assert_eq!(cfg.max_consecutive_failures, 3);
    cfg.validate().expect("defaults validate");
}

#[test]
fn every_tag_has_a_pattern_set() {
    let cfg = ReviewConfig::default();
    for tag in ClauseTag::ALL {
        assert!(
            cfg.tag_patterns.iter().any(|p| p.tag == tag),
            "no pattern set for {}",
            tag.as_str()
        );
    }
}

// ── validation ───────────────────────────────────────────────────────────

#[test]
fn inverted_thresholds_are_rejected() {
    let mut cfg = ReviewConfig::default();
    cfg.material_threshold = 0.8;
    assert!(cfg.validate().is_err());
}

#[test]
fn zero_checkpoint_thresholds_are_rejected() {
    let mut cfg = ReviewConfig::default();
    cfg.checkpoint_clauses = 0;
    assert!(cfg.validate().is_err());
}

#[test]
fn non_positive_weights_are_rejected() {
    let mut cfg = ReviewConfig::default();
    cfg.category_weights.insert(RiskCategory::Legal, 0.0);
    assert!(cfg.validate().is_err());
}

// ── file overlay ─────────────────────────────────────────────────────────

#[test]
fn json_overlay_replaces_tables_and_scalars() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    write!(
        file,
        r#"{{
            "checkpoint_clauses": 5,
            "category_weights": {{
                "financial": 2.0,
                "legal": 1.0,
                "operational": 1.0,
                "compliance": 1.0,
                "reputational": 1.0,
                "strategic": 1.0
            }}
        }}"#
    )
    .expect("write overlay");

    let mut cfg = ReviewConfig::default();
    cfg.apply_file(file.path().to_str().expect("utf-8 path"))
        .expect("apply overlay");

    assert_eq!(cfg.checkpoint_clauses, 5);
    assert_eq!(cfg.weight(RiskCategory::Financial), 2.0);
    // Untouched fields keep their defaults.
    assert_eq!(cfg.checkpoint_tokens, 3000);
    assert_eq!(cfg.critical_threshold, 0.70);
    cfg.validate().expect("overlaid config validates");
}

// ── tokenization ─────────────────────────────────────────────────────────

#[test]
fn token_estimate_is_deterministic_and_word_sensitive() {
    let text = "Payment shall be made within 30 days.";
    assert_eq!(estimate_tokens(text), estimate_tokens(text));
    // words + bytes/4
    assert_eq!(estimate_tokens(text), 7 + (text.len() / 4) as u64);
    assert_eq!(estimate_tokens(""), 0);
}
