//! Contextual reclassification: two linear passes over the segment array.
//!
//! **Stage 5.5** re-runs the L1 classifier on each segment's own text,
//! with tighter 3-line heading/tail windows (a segment is shorter and
//! denser than a whole PDF). A confident per-segment result overrides the
//! boundary-rule type.
//!
//! **Stage 5.6** adjusts by structural position: which piece follows which
//! inside a Brazilian case file is strongly conventional (a sentença is
//! followed by embargos or apelação, an inicial never appears twice, the
//! first piece is an initiator). The transition tables live in
//! `rules/transitions.json`.
//!
//! 5.6 always recomputes from the stored L1 confidence
//! (`classification_confidence`), never from an already-boosted value, so
//! applying it twice yields the same `doc_type` and `confidence`.

use crate::config::PipelineConfig;
use crate::model::{Classification, ClassificationSource, Page, Segment, SegmentType};
use crate::pipeline::classify::{self, validate_type};
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use tracing::debug;

const TRANSITIONS_RAW: &str = include_str!("../../rules/transitions.json");

/// Per-segment L1 windows: first/last 3 meaningful lines.
const SEGMENT_HEADING_LINES: usize = 3;
const SEGMENT_TAIL_LINES: usize = 3;

const SUCCESSOR_BOOST: f64 = 0.15;
const IMPOSSIBLE_INITIATOR_PENALTY: f64 = -0.20;
const FIRST_INITIATOR_BOOST: f64 = 0.10;
const FIRST_RESPONSE_PENALTY: f64 = -0.15;
const DUPLICATE_INICIAL_PENALTY: f64 = -0.25;
const PDF_EEF_AGREEMENT_BOOST: f64 = 0.05;
const PDF_AGREEMENT_BOOST: f64 = 0.10;
const PDF_AGREEMENT_CAP: f64 = 0.8;
/// Document classification strongly implies inicial-eef at this confidence.
const PDF_EEF_IMPLICATION_CONFIDENCE: f64 = 0.5;
/// Below this adjusted confidence the secondary type gets its shot.
const SECONDARY_RESCUE_THRESHOLD: f64 = 0.5;

#[derive(Deserialize)]
struct RawTransitions {
    transitions: HashMap<String, Vec<String>>,
    initiator_types: Vec<String>,
    response_types: Vec<String>,
    neutral_types: Vec<String>,
}

struct TransitionTables {
    transitions: HashMap<String, HashSet<String>>,
    initiators: HashSet<String>,
    responses: HashSet<String>,
    neutral: HashSet<String>,
}

static TABLES: Lazy<TransitionTables> = Lazy::new(|| {
    let raw: RawTransitions =
        serde_json::from_str(TRANSITIONS_RAW).expect("rules/transitions.json is well-formed");
    TransitionTables {
        transitions: raw
            .transitions
            .into_iter()
            .map(|(k, v)| (k, v.into_iter().collect()))
            .collect(),
        initiators: raw.initiator_types.into_iter().collect(),
        responses: raw.response_types.into_iter().collect(),
        neutral: raw.neutral_types.into_iter().collect(),
    }
});

fn is_inicial(doc_type: &str) -> bool {
    doc_type == "peticao-inicial" || doc_type.starts_with("inicial-")
}

/// The text of one segment: its pages joined in order.
pub fn segment_text(segment: &Segment, pages: &[Page]) -> String {
    pages
        .iter()
        .filter(|p| p.page_number >= segment.page_start && p.page_number <= segment.page_end)
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Stage 5.5: per-segment L1 ────────────────────────────────────────────

/// Re-run L1 on each non-separator segment's own text. Overrides the
/// boundary-rule type when the result is known and confident enough.
pub fn reclassify_l1(segments: &mut [Segment], pages: &[Page], cfg: &PipelineConfig) {
    for seg in segments
        .iter_mut()
        .filter(|s| s.segment_type != SegmentType::Separator)
    {
        let text = segment_text(seg, pages);
        let c = classify::classify_windows(
            &text,
            SEGMENT_HEADING_LINES,
            SEGMENT_TAIL_LINES,
            cfg.secondary_emit_threshold,
        );

        if c.primary_type != "unknown" && c.confidence >= cfg.segment_override_confidence {
            if seg.doc_type != c.primary_type {
                debug!(
                    segment = %seg.segment_id,
                    from = %seg.doc_type,
                    to = %c.primary_type,
                    "per-segment L1 override"
                );
            }
            seg.doc_type = validate_type(&c.primary_type);
            seg.classification_source = ClassificationSource::PerSegmentL1;
        }
        // The L1 evidence is recorded either way: 5.6 recomputes from it.
        seg.classification_confidence = Some(c.confidence);
        seg.classification_indicators = Some(c.indicators);
        seg.secondary_type = c.secondary_type;
        seg.secondary_confidence = c.secondary_confidence;
        seg.cascade_level = Some(1);
    }
}

// ── Stage 5.6: positional / contextual L2 ────────────────────────────────

/// Positional boost for `doc_type` at position `index` (0-based over
/// non-separator segments) with the given predecessor.
fn positional_boost(
    doc_type: &str,
    index: usize,
    prev_type: Option<&str>,
    seen_inicial_before: bool,
    reasons: &mut Vec<String>,
) -> f64 {
    let t = &*TABLES;
    let mut boost = 0.0;

    if let Some(prev) = prev_type {
        let prev_neutral = t.neutral.contains(prev);
        if !prev_neutral {
            if t.transitions
                .get(prev)
                .is_some_and(|succ| succ.contains(doc_type))
            {
                boost += SUCCESSOR_BOOST;
                reasons.push(format!("probable-successor-of-{prev}"));
            }
            if t.initiators.contains(doc_type) {
                boost += IMPOSSIBLE_INITIATOR_PENALTY;
                reasons.push(format!("impossible-initiator-after-{prev}"));
            }
        }
    }

    if index == 0 {
        if t.initiators.contains(doc_type) {
            boost += FIRST_INITIATOR_BOOST;
            reasons.push("initiator-at-document-start".to_string());
        }
        if t.responses.contains(doc_type) {
            boost += FIRST_RESPONSE_PENALTY;
            reasons.push("response-type-at-document-start".to_string());
        }
    }

    if seen_inicial_before && is_inicial(doc_type) {
        boost += DUPLICATE_INICIAL_PENALTY;
        reasons.push("duplicate-inicial-in-document".to_string());
    }

    boost
}

/// PDF-context boost (and promotion) for `doc_type`.
fn pdf_context_boost(
    doc_type: &str,
    base: f64,
    pdf_class: Option<&Classification>,
    reasons: &mut Vec<String>,
) -> f64 {
    let Some(pdf) = pdf_class else { return 0.0 };
    let mut boost = 0.0;
    if doc_type == "inicial-eef" && pdf.primary_type == "inicial-eef" {
        boost += PDF_EEF_AGREEMENT_BOOST;
        reasons.push("pdf-agreement-inicial-eef".to_string());
    }
    if doc_type == pdf.primary_type && base < PDF_AGREEMENT_CAP {
        boost += PDF_AGREEMENT_BOOST;
        reasons.push("pdf-agreement".to_string());
    }
    boost
}

fn pdf_implies_eef(pdf_class: Option<&Classification>) -> bool {
    pdf_class.is_some_and(|c| {
        c.primary_type == "inicial-eef" && c.confidence >= PDF_EEF_IMPLICATION_CONFIDENCE
    })
}

/// Apply the positional/contextual pass. Idempotent: recomputes from the
/// stored L1 confidences every time.
pub fn reclassify_l2(
    segments: &mut [Segment],
    pdf_class: Option<&Classification>,
) {
    let mut prev_type: Option<String> = None;
    let mut seen_inicial = false;
    let mut index = 0usize;

    for seg in segments.iter_mut() {
        if seg.segment_type == SegmentType::Separator {
            continue;
        }
        if seg.doc_type == "unknown" {
            // Position still advances past unclassified pieces; an unknown
            // predecessor carries no signal, so it does not become prev.
            index += 1;
            continue;
        }

        let entry_type = seg.doc_type.clone();
        let mut current = entry_type.clone();
        let mut reasons: Vec<String> = Vec::new();

        // Promotion runs before scoring so the boosts see the final type.
        if current == "inicial-execfiscal" && pdf_implies_eef(pdf_class) {
            current = "inicial-eef".to_string();
            reasons.push("pdf-context-promotes-inicial-eef".to_string());
        }

        let base = seg.classification_confidence.unwrap_or(seg.confidence);
        // Duplicate detection looks at pieces BEFORE this one only.
        let dup_context = seen_inicial;
        let boost = positional_boost(
            &current,
            index,
            prev_type.as_deref(),
            dup_context,
            &mut reasons,
        ) + pdf_context_boost(&current, base, pdf_class, &mut reasons);
        let mut adjusted = (base + boost).clamp(0.0, 1.0);
        let mut chosen = current;
        let mut chosen_boost = boost;

        // Secondary rescue: when the boosts sank the primary below 0.5,
        // the L1 runner-up competes under the same rules.
        if adjusted < SECONDARY_RESCUE_THRESHOLD && adjusted < base {
            if let (Some(sec), Some(sec_base)) =
                (seg.secondary_type.clone(), seg.secondary_confidence)
            {
                if sec != "unknown" && sec != chosen {
                    let mut sec_reasons = Vec::new();
                    let sec_boost = positional_boost(
                        &sec,
                        index,
                        prev_type.as_deref(),
                        dup_context,
                        &mut sec_reasons,
                    ) + pdf_context_boost(&sec, sec_base, pdf_class, &mut sec_reasons);
                    let sec_adjusted = (sec_base + sec_boost).clamp(0.0, 1.0);
                    if sec_adjusted > adjusted {
                        debug!(
                            segment = %seg.segment_id,
                            from = %chosen,
                            to = %sec,
                            "L2 secondary rescue"
                        );
                        // Swap primary and secondary with their L1 bases so
                        // a repeat pass recomputes the same comparison.
                        seg.secondary_type = Some(chosen.clone());
                        seg.secondary_confidence = Some(base);
                        seg.classification_confidence = Some(sec_base);
                        chosen = sec;
                        chosen_boost = sec_boost;
                        adjusted = sec_adjusted;
                        reasons = sec_reasons;
                        reasons.push("secondary-rescue".to_string());
                    }
                }
            }
        }

        if chosen != entry_type {
            seg.l2_previous_type = Some(entry_type);
            seg.classification_source = ClassificationSource::PerSegmentL2;
        } else if chosen_boost != 0.0 {
            seg.classification_source = ClassificationSource::PerSegmentL2;
        }
        seg.doc_type = validate_type(&chosen);
        seg.confidence = adjusted;
        seg.l2_boost = Some(chosen_boost);
        seg.l2_reasons = Some(reasons);
        seg.cascade_level = Some(2);

        seen_inicial = seen_inicial || is_inicial(&seg.doc_type);
        prev_type = Some(seg.doc_type.clone());
        index += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BoundaryMarker;

    fn seg(id: usize, doc_type: &str, l1_conf: f64, start: usize, end: usize) -> Segment {
        Segment {
            segment_id: Segment::make_id(id),
            segment_type: SegmentType::Piece,
            doc_type: doc_type.to_string(),
            classification_source: ClassificationSource::BoundaryRules,
            page_start: start,
            page_end: end,
            confidence: 0.7,
            boundary_markers: vec![BoundaryMarker {
                rule: "court-header".into(),
                weight: 0.7,
            }],
            classification_confidence: Some(l1_conf),
            classification_indicators: Some(vec![]),
            secondary_type: None,
            secondary_confidence: None,
            l2_previous_type: None,
            l2_boost: None,
            l2_reasons: None,
            cascade_level: Some(1),
        }
    }

    #[test]
    fn successor_boost_applied() {
        let mut segs = vec![seg(0, "sentenca", 0.6, 1, 4), seg(1, "apelacao", 0.5, 5, 9)];
        reclassify_l2(&mut segs, None);
        assert!((segs[1].confidence - 0.65).abs() < 1e-9, "{}", segs[1].confidence);
        assert!(segs[1]
            .l2_reasons
            .as_ref()
            .unwrap()
            .iter()
            .any(|r| r.contains("probable-successor")));
    }

    #[test]
    fn impossible_initiator_penalized() {
        let mut segs = vec![
            seg(0, "sentenca", 0.6, 1, 4),
            seg(1, "peticao-inicial", 0.6, 5, 9),
        ];
        reclassify_l2(&mut segs, None);
        // -0.20 impossible initiator, -0.25 would need a prior inicial.
        assert!((segs[1].confidence - 0.40).abs() < 1e-9, "{}", segs[1].confidence);
    }

    #[test]
    fn initiator_boosted_at_start_response_penalized() {
        let mut segs = vec![seg(0, "peticao-inicial", 0.6, 1, 3)];
        reclassify_l2(&mut segs, None);
        assert!((segs[0].confidence - 0.70).abs() < 1e-9);

        let mut segs = vec![seg(0, "contestacao", 0.6, 1, 3)];
        reclassify_l2(&mut segs, None);
        assert!((segs[0].confidence - 0.45).abs() < 1e-9);
    }

    #[test]
    fn duplicate_inicial_penalized() {
        let mut segs = vec![
            seg(0, "peticao-inicial", 0.8, 1, 3),
            seg(1, "procuracao", 0.7, 4, 4),
            seg(2, "inicial-execfiscal", 0.6, 5, 8),
        ];
        reclassify_l2(&mut segs, None);
        let reasons = segs[2].l2_reasons.as_ref().unwrap();
        assert!(reasons.iter().any(|r| r == "duplicate-inicial-in-document"));
        assert!(segs[2].confidence < 0.6);
    }

    #[test]
    fn pdf_context_promotes_to_eef() {
        let pdf = Classification {
            primary_type: "inicial-eef".into(),
            confidence: 0.7,
            indicators: vec![],
            secondary_type: None,
            secondary_confidence: None,
            disambiguation: None,
            reclassified: None,
        };
        let mut segs = vec![seg(0, "inicial-execfiscal", 0.6, 1, 5)];
        reclassify_l2(&mut segs, Some(&pdf));
        assert_eq!(segs[0].doc_type, "inicial-eef");
        assert_eq!(segs[0].l2_previous_type.as_deref(), Some("inicial-execfiscal"));
        // +0.10 initiator at start, +0.05 eef agreement, +0.10 pdf agreement.
        assert!((segs[0].confidence - 0.85).abs() < 1e-9, "{}", segs[0].confidence);
    }

    #[test]
    fn l2_is_idempotent() {
        let pdf = Classification {
            primary_type: "inicial-eef".into(),
            confidence: 0.7,
            indicators: vec![],
            secondary_type: None,
            secondary_confidence: None,
            disambiguation: None,
            reclassified: None,
        };
        let mut segs = vec![
            seg(0, "inicial-execfiscal", 0.6, 1, 5),
            seg(1, "cda", 0.5, 6, 7),
            seg(2, "despacho", 0.4, 8, 8),
        ];
        reclassify_l2(&mut segs, Some(&pdf));
        let once: Vec<(String, f64)> = segs
            .iter()
            .map(|s| (s.doc_type.clone(), s.confidence))
            .collect();
        reclassify_l2(&mut segs, Some(&pdf));
        let twice: Vec<(String, f64)> = segs
            .iter()
            .map(|s| (s.doc_type.clone(), s.confidence))
            .collect();
        assert_eq!(once, twice);
    }

    #[test]
    fn secondary_rescue_swaps_when_better() {
        let mut s = seg(0, "contestacao", 0.45, 1, 3);
        s.secondary_type = Some("procuracao".into());
        s.secondary_confidence = Some(0.40);
        let mut segs = vec![s];
        reclassify_l2(&mut segs, None);
        // contestacao at index 0: 0.45 - 0.15 = 0.30 < 0.5 and < base;
        // procuracao: 0.40 + 0 = 0.40 > 0.30 → rescue.
        assert_eq!(segs[0].doc_type, "procuracao");
        assert!((segs[0].confidence - 0.40).abs() < 1e-9);
        assert_eq!(segs[0].secondary_type.as_deref(), Some("contestacao"));
        // And the swap is stable.
        reclassify_l2(&mut segs, None);
        assert_eq!(segs[0].doc_type, "procuracao");
        assert!((segs[0].confidence - 0.40).abs() < 1e-9);
    }

    #[test]
    fn unknown_segments_untouched() {
        let mut segs = vec![seg(0, "unknown", 0.0, 1, 2), seg(1, "sentenca", 0.6, 3, 5)];
        reclassify_l2(&mut segs, None);
        assert_eq!(segs[0].doc_type, "unknown");
        assert_eq!(segs[0].cascade_level, Some(1));
        // The sentença sits at index 1, so no first-position boost.
        assert_eq!(segs[1].cascade_level, Some(2));
    }

    #[test]
    fn tables_load() {
        assert!(TABLES.transitions.len() >= 20);
        assert!(TABLES.initiators.contains("peticao-inicial"));
        assert!(TABLES.responses.contains("contestacao"));
        assert!(TABLES.neutral.contains("unknown"));
    }
}
