//! L1 document classification: a whitelist-constrained regex cascade.
//!
//! The rule table ships as data (`rules/classifier-rules.json`) so the
//! legal-domain vocabulary can be audited and edited without recompiling.
//! Each rule scores three scopes of the PJe-stripped text: the full body,
//! the heading (first 5 non-trivial lines — the classifier wants more
//! heading signal than the segmenter's 3-line window), and the tail (last
//! 3 non-trivial lines, where dispositives and signatures live).
//!
//! Per rule:
//! `min(1, unique_body/|patterns| · weight + 0.15·heading_hits (≤ 0.30)
//!  + 0.10·tail_hits (≤ 0.20))`,
//! then the disambiguation penalties (entity-mention-only ×0.30,
//! structural-not-in-heading ×0.70) and the +0.05 specificity bonus.
//!
//! Any type outside the whitelist collapses to `unknown`; classification
//! is idempotent over the whitelist.

use crate::model::Classification;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};

use crate::pipeline::garbage::is_pje_footer_line;

const RULES_RAW: &str = include_str!("../../rules/classifier-rules.json");

/// Heading window: first N non-trivial lines.
pub const HEADING_LINES: usize = 5;
/// Tail window: last N non-trivial lines.
pub const TAIL_LINES: usize = 3;

const HEADING_HIT_BONUS: f64 = 0.15;
const HEADING_BONUS_CAP: f64 = 0.30;
const TAIL_HIT_BONUS: f64 = 0.10;
const TAIL_BONUS_CAP: f64 = 0.20;
const SPECIFICITY_BONUS: f64 = 0.05;
const ENTITY_ONLY_FACTOR: f64 = 0.30;
const STRUCTURAL_NOT_HEADING_FACTOR: f64 = 0.70;

// ── Rule table (data file → compiled) ────────────────────────────────────

#[derive(Deserialize)]
struct RawRules {
    valid_types: Vec<String>,
    rules: Vec<RawRule>,
    disambiguation: Vec<RawDisambiguation>,
    specificity: Vec<String>,
}

#[derive(Deserialize)]
struct RawRule {
    #[serde(rename = "type")]
    doc_type: String,
    weight: f64,
    patterns: Vec<String>,
}

#[derive(Deserialize)]
struct RawDisambiguation {
    #[serde(rename = "type")]
    doc_type: String,
    structural: Vec<String>,
    entity_only: Vec<String>,
}

pub(crate) struct CompiledRule {
    pub doc_type: String,
    pub weight: f64,
    pub patterns: Vec<(String, Regex)>,
}

pub(crate) struct Disambiguation {
    pub structural: Vec<Regex>,
    pub entity_only: Vec<Regex>,
}

pub(crate) struct RuleSet {
    pub valid_types: HashSet<String>,
    pub rules: Vec<CompiledRule>,
    pub disambiguation: HashMap<String, Disambiguation>,
    pub specificity: HashSet<String>,
}

fn compile(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .multi_line(true)
        .dot_matches_new_line(true)
        .build()
        .unwrap_or_else(|e| panic!("classifier rule pattern '{pattern}': {e}"))
}

pub(crate) static RULESET: Lazy<RuleSet> = Lazy::new(|| {
    let raw: RawRules =
        serde_json::from_str(RULES_RAW).expect("rules/classifier-rules.json is well-formed");
    RuleSet {
        valid_types: raw.valid_types.into_iter().collect(),
        rules: raw
            .rules
            .into_iter()
            .map(|r| CompiledRule {
                doc_type: r.doc_type,
                weight: r.weight,
                patterns: r
                    .patterns
                    .into_iter()
                    .map(|p| {
                        let re = compile(&p);
                        (p, re)
                    })
                    .collect(),
            })
            .collect(),
        disambiguation: raw
            .disambiguation
            .into_iter()
            .map(|d| {
                (
                    d.doc_type,
                    Disambiguation {
                        structural: d.structural.iter().map(|p| compile(p)).collect(),
                        entity_only: d.entity_only.iter().map(|p| compile(p)).collect(),
                    },
                )
            })
            .collect(),
        specificity: raw.specificity.into_iter().collect(),
    }
});

// ── Scope extraction ─────────────────────────────────────────────────────

fn non_trivial_lines(text: &str) -> Vec<&str> {
    text.lines().filter(|l| l.trim().chars().count() > 3).collect()
}

/// Remove PJe chrome lines anywhere in the text before scoring.
pub fn strip_pje_blocks(text: &str) -> String {
    text.lines()
        .filter(|l| !is_pje_footer_line(l))
        .collect::<Vec<_>>()
        .join("\n")
}

/// First `n` non-trivial lines, joined.
pub fn heading_of(text: &str, n: usize) -> String {
    non_trivial_lines(text)
        .into_iter()
        .take(n)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Last `n` non-trivial lines, joined.
pub fn tail_of(text: &str, n: usize) -> String {
    let lines = non_trivial_lines(text);
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

// ── Scoring ──────────────────────────────────────────────────────────────

struct ScoredRule<'a> {
    rule: &'a CompiledRule,
    confidence: f64,
    matched: Vec<String>,
    disambiguation: Option<&'static str>,
}

fn score_rule<'a>(
    rule: &'a CompiledRule,
    body: &str,
    heading: &str,
    tail: &str,
    ruleset: &RuleSet,
) -> ScoredRule<'a> {
    let mut matched = Vec::new();
    let mut body_hits = 0usize;
    let mut heading_hits = 0usize;
    let mut tail_hits = 0usize;

    for (src, re) in &rule.patterns {
        let in_body = re.is_match(body);
        if in_body {
            body_hits += 1;
            matched.push(src.clone());
        }
        if re.is_match(heading) {
            heading_hits += 1;
        }
        if re.is_match(tail) {
            tail_hits += 1;
        }
    }

    let base = (body_hits as f64 / rule.patterns.len() as f64) * rule.weight;
    let heading_bonus = (HEADING_HIT_BONUS * heading_hits as f64).min(HEADING_BONUS_CAP);
    let tail_bonus = (TAIL_HIT_BONUS * tail_hits as f64).min(TAIL_BONUS_CAP);
    let mut confidence = (base + heading_bonus + tail_bonus).min(1.0);
    let mut disambiguation = None;

    if confidence > 0.0 {
        if let Some(d) = ruleset.disambiguation.get(&rule.doc_type) {
            let structural_in_body = d.structural.iter().any(|re| re.is_match(body));
            if !structural_in_body {
                let entity_matched = d.entity_only.iter().any(|re| re.is_match(body));
                if entity_matched {
                    confidence *= ENTITY_ONLY_FACTOR;
                    disambiguation = Some("entity-mention-only");
                }
            } else if !d.structural.iter().any(|re| re.is_match(heading)) {
                confidence *= STRUCTURAL_NOT_HEADING_FACTOR;
                disambiguation = Some("structural-not-in-heading");
            }
        }
        if ruleset.specificity.contains(&rule.doc_type) {
            confidence = (confidence + SPECIFICITY_BONUS).min(1.0);
        }
    }

    ScoredRule {
        rule,
        confidence,
        matched,
        disambiguation,
    }
}

/// Collapse an arbitrary type name onto the whitelist.
pub fn validate_type(doc_type: &str) -> String {
    if doc_type == "unknown" || RULESET.valid_types.contains(doc_type) {
        doc_type.to_string()
    } else {
        "unknown".to_string()
    }
}

/// Classify a document (or segment) text with heading/tail windows of the
/// given sizes. Emits a secondary type when the primary scores below
/// `secondary_threshold`.
pub fn classify_windows(
    text: &str,
    heading_lines: usize,
    tail_lines: usize,
    secondary_threshold: f64,
) -> Classification {
    let body = strip_pje_blocks(text);
    if body.trim().is_empty() {
        return Classification::unknown();
    }
    let heading = heading_of(&body, heading_lines);
    let tail = tail_of(&body, tail_lines);

    let mut scored: Vec<ScoredRule<'_>> = RULESET
        .rules
        .iter()
        .map(|r| score_rule(r, &body, &heading, &tail, &RULESET))
        .filter(|s| s.confidence > 0.0)
        .collect();
    scored.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .expect("confidences are finite")
    });

    let Some(best) = scored.first() else {
        return Classification::unknown();
    };

    let primary_type = validate_type(&best.rule.doc_type);
    let (secondary_type, secondary_confidence) = if best.confidence < secondary_threshold {
        match scored.get(1) {
            Some(second) => (
                Some(validate_type(&second.rule.doc_type)),
                Some(second.confidence),
            ),
            None => (None, None),
        }
    } else {
        (None, None)
    };

    Classification {
        primary_type,
        confidence: best.confidence,
        indicators: best.matched.clone(),
        secondary_type,
        secondary_confidence,
        disambiguation: best.disambiguation.map(str::to_string),
        reclassified: None,
    }
}

/// Classify a whole document with the default L1 windows.
pub fn classify(text: &str, secondary_threshold: f64) -> Classification {
    classify_windows(text, HEADING_LINES, TAIL_LINES, secondary_threshold)
}
