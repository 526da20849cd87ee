//! Page-level segmentation: split one PDF into procedural pieces.
//!
//! Boundary detection deliberately looks at the **heading only** — the
//! first 3 meaningful lines after PJe-block stripping — because legal
//! pieces announce themselves at the top of their first page, while body
//! text is full of references to *other* pieces that must not open
//! boundaries. (The classifier uses a wider 5-line heading; the segmenter
//! keeps 3 to hold false positives down.)
//!
//! A page opens a new piece iff it carries at least one marker with
//! weight ≥ 0.7 that is not `blank-page`. Blank pages extend the current
//! piece, never open one. Numbered-paragraph continuation across a page
//! break suppresses would-be boundaries below 0.85 — structural headers
//! at or above that weight always win.

use crate::config::{PipelineConfig, BLANK_PAGE_CHARS};
use crate::model::{
    BoundaryMarker, Classification, ClassificationSource, Page, Segment, SegmentType,
};
use crate::pipeline::classify::{heading_of, strip_pje_blocks, tail_of};
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use tracing::warn;

/// Boundary heading window: first N meaningful lines.
pub const BOUNDARY_HEADING_LINES: usize = 3;

/// Lines scanned at the end of the previous page for a numbered paragraph.
const CONTINUATION_TAIL_LINES: usize = 20;
/// Lines scanned at the start of the current page for the successor.
const CONTINUATION_HEAD_LINES: usize = 5;

struct BoundaryRule {
    name: &'static str,
    weight: f64,
    re: Regex,
}

fn rule(name: &'static str, weight: f64, pattern: &str) -> BoundaryRule {
    BoundaryRule {
        name,
        weight,
        re: RegexBuilder::new(pattern)
            .case_insensitive(true)
            .multi_line(true)
            .dot_matches_new_line(true)
            .build()
            .unwrap_or_else(|e| panic!("boundary rule {name}: {e}")),
    }
}

static BOUNDARY_RULES: Lazy<Vec<BoundaryRule>> = Lazy::new(|| {
    vec![
        rule(
            "court-header",
            0.7,
            r"^\s*(poder\s+judici[áa]rio|justi[çc]a\s+federal|tribunal\s+(regional|de\s+justi[çc]a)|ju[ií]zo\s+(federal|de\s+direito))",
        ),
        rule(
            "petition-opening",
            0.9,
            r"excelent[ií]ssimo\s+senhor|exmo\.?\s+sr\.?\s+dr\.?|excelent[ií]ssima\s+senhora",
        ),
        rule("sentenca-heading", 0.9, r"^\s*senten[çc]a\s*$"),
        rule("acordao-heading", 0.9, r"^\s*ac[óo]rd[ãa]o\s*$"),
        rule("certidao-heading", 0.8, r"certid[ãa]o.{0,200}certifico"),
        rule(
            "attachment-label",
            0.7,
            r"^\s*(anexo|documento|doc\.?)\s*n?\.?[ºo°]?\s*\d+",
        ),
        rule("cnj-number", 0.6, r"\d{7}-\d{2}\.\d{4}\.\d\.\d{2}\.\d{4}"),
        rule("despacho-heading", 0.85, r"^\s*despacho\s*$"),
        rule(
            "decisao-heading",
            0.85,
            r"^\s*decis[ãa]o(\s+interlocut[óo]ria)?\s*$",
        ),
        rule("oficio-heading", 0.8, r"^\s*of[ií]cio\s+n\.?[ºo°]?\s*[\d./-]+"),
    ]
});

/// Marker-name → (segment type, doc type) for type inference.
fn marker_type(name: &str) -> (SegmentType, &'static str) {
    match name {
        "petition-opening" => (SegmentType::Piece, "peticao-inicial"),
        "sentenca-heading" => (SegmentType::Piece, "sentenca"),
        "acordao-heading" => (SegmentType::Piece, "acordao"),
        "certidao-heading" => (SegmentType::Piece, "certidao"),
        "attachment-label" => (SegmentType::Attachment, "anexo"),
        "despacho-heading" => (SegmentType::Piece, "despacho"),
        "decisao-heading" => (SegmentType::Piece, "decisao-interlocutoria"),
        "oficio-heading" => (SegmentType::Piece, "oficio"),
        _ => (SegmentType::Piece, "unknown"),
    }
}

static RE_NUMBERED_PARA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d{1,3})[.)\-]\s").unwrap());

/// Detect boundary markers on a page's heading.
pub fn detect_markers(page_text: &str) -> Vec<BoundaryMarker> {
    let stripped = strip_pje_blocks(page_text);
    let heading = heading_of(&stripped, BOUNDARY_HEADING_LINES);
    BOUNDARY_RULES
        .iter()
        .filter(|r| r.re.is_match(&heading))
        .map(|r| BoundaryMarker {
            rule: r.name.to_string(),
            weight: r.weight,
        })
        .collect()
}

/// A blank page for segmentation purposes: cleaned text below 30 chars.
pub fn is_blank_page(page_text: &str) -> bool {
    strip_pje_blocks(page_text).trim().chars().count() < BLANK_PAGE_CHARS
}

/// Numbered-paragraph continuation across a page break: the previous page
/// ends with paragraph K, the current starts with K+1.
fn is_paragraph_continuation(prev_text: &str, curr_text: &str) -> bool {
    let prev = strip_pje_blocks(prev_text);
    let curr = strip_pje_blocks(curr_text);

    let prev_k = tail_of(&prev, CONTINUATION_TAIL_LINES)
        .lines()
        .rev()
        .find_map(|l| {
            RE_NUMBERED_PARA
                .captures(l)
                .and_then(|c| c[1].parse::<u32>().ok())
        });
    let curr_k = heading_of(&curr, CONTINUATION_HEAD_LINES)
        .lines()
        .find_map(|l| {
            RE_NUMBERED_PARA
                .captures(l)
                .and_then(|c| c[1].parse::<u32>().ok())
        });

    matches!((prev_k, curr_k), (Some(a), Some(b)) if b == a + 1)
}

/// Split the document into segments.
///
/// `doc_classification` feeds the profiler fallback: a segment whose
/// markers infer `unknown` inherits the document classification when that
/// carries at least the configured confidence.
pub fn segment_document(
    pages: &[Page],
    doc_classification: Option<&Classification>,
    cfg: &PipelineConfig,
) -> Vec<Segment> {
    if pages.is_empty() {
        return Vec::new();
    }

    struct Open {
        start: usize,
        end: usize,
        markers: Vec<BoundaryMarker>,
    }
    let mut finished: Vec<Open> = Vec::new();
    let mut current: Option<Open> = None;

    for (idx, page) in pages.iter().enumerate() {
        let blank = is_blank_page(&page.text);
        let markers = if blank { Vec::new() } else { detect_markers(&page.text) };
        let max_weight = markers.iter().map(|m| m.weight).fold(0.0, f64::max);

        let opens = match &current {
            // The first page always opens the first piece, markers or not.
            None => true,
            Some(_) if blank => false,
            Some(_) => {
                let mut opens = max_weight >= cfg.boundary_min_weight;
                if opens
                    && max_weight < cfg.suppression_weight
                    && idx > 0
                    && is_paragraph_continuation(&pages[idx - 1].text, &page.text)
                {
                    opens = false;
                }
                opens
            }
        };

        if opens {
            if let Some(open) = current.take() {
                finished.push(open);
            }
            current = Some(Open {
                start: page.page_number,
                end: page.page_number,
                markers,
            });
        } else if let Some(open) = current.as_mut() {
            open.end = page.page_number;
        }
    }
    if let Some(open) = current.take() {
        finished.push(open);
    }

    finished
        .into_iter()
        .enumerate()
        .map(|(i, open)| {
            let best = open
                .markers
                .iter()
                .max_by(|a, b| a.weight.partial_cmp(&b.weight).expect("finite weights"));
            let (seg_type, mut doc_type) = best
                .map(|m| {
                    let (t, d) = marker_type(&m.rule);
                    (t, d.to_string())
                })
                .unwrap_or((SegmentType::Piece, "unknown".to_string()));
            let confidence = best.map(|m| m.weight).unwrap_or(0.5);

            // The document-level fallback fills the doc type only; the
            // marker's segment type stands.
            let mut source = ClassificationSource::BoundaryRules;
            if doc_type == "unknown" {
                if let Some(doc_class) = doc_classification {
                    if doc_class.primary_type != "unknown"
                        && doc_class.confidence >= cfg.profiler_fallback_confidence
                    {
                        doc_type = doc_class.primary_type.clone();
                        source = ClassificationSource::ProfilerFallback;
                    }
                }
            }

            Segment {
                segment_id: Segment::make_id(i),
                segment_type: seg_type,
                doc_type,
                classification_source: source,
                page_start: open.start,
                page_end: open.end,
                confidence,
                boundary_markers: open.markers,
                classification_confidence: None,
                classification_indicators: None,
                secondary_type: None,
                secondary_confidence: None,
                l2_previous_type: None,
                l2_boost: None,
                l2_reasons: None,
                cascade_level: None,
            }
        })
        .collect()
}

/// Verify total page coverage: every page 1..=page_count must lie in
/// exactly one non-separator segment. Returns orphan pages; overlaps and
/// orphans are logged as warnings, never errors.
pub fn check_coverage(segments: &[Segment], page_count: usize) -> Vec<usize> {
    let mut covered = vec![0usize; page_count + 1];
    for seg in segments
        .iter()
        .filter(|s| s.segment_type != SegmentType::Separator)
    {
        for p in seg.page_start..=seg.page_end.min(page_count) {
            covered[p] += 1;
        }
    }
    let orphans: Vec<usize> = (1..=page_count).filter(|&p| covered[p] == 0).collect();
    if !orphans.is_empty() {
        warn!(?orphans, "segmentation left orphan pages");
    }
    for p in 1..=page_count {
        if covered[p] > 1 {
            warn!(page = p, "page covered by multiple segments");
        }
    }
    orphans
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(n: usize, text: &str) -> Page {
        Page {
            page_number: n,
            text: text.to_string(),
            confidence: 0.95,
            empty: text.len() < 50,
            method: "fast-parse-poppler".into(),
            rotation_applied: None,
            word_garbage_score: None,
            ocr_replaced: None,
            ocr_fallback_to_fp: None,
        }
    }

    fn filler() -> String {
        "Seguem as razões de fato e de direito que fundamentam o pedido, \
         conforme narrado anteriormente nos autos do processo em epígrafe."
            .to_string()
    }

    #[test]
    fn sentenca_heading_detected() {
        let markers = detect_markers(&format!("SENTENÇA\n\n{}", filler()));
        assert!(markers.iter().any(|m| m.rule == "sentenca-heading" && m.weight == 0.9));
    }

    #[test]
    fn marker_outside_heading_window_ignored() {
        let text = format!("{}\n{}\n{}\n{}\nSENTENÇA", filler(), filler(), filler(), filler());
        let markers = detect_markers(&text);
        assert!(!markers.iter().any(|m| m.rule == "sentenca-heading"));
    }

    #[test]
    fn cnj_number_alone_does_not_open() {
        let cfg = PipelineConfig::default();
        let pages = vec![
            page(1, &format!("EXCELENTÍSSIMO SENHOR DOUTOR JUIZ FEDERAL\n{}", filler())),
            page(2, &format!("0001234-55.2020.4.03.6182\n{}", filler())),
        ];
        let segs = segment_document(&pages, None, &cfg);
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].page_end, 2);
    }

    #[test]
    fn blank_pages_extend_never_open() {
        let cfg = PipelineConfig::default();
        let pages = vec![
            page(1, &format!("SENTENÇA\n{}", filler())),
            page(2, "  \n "),
            page(3, &filler()),
        ];
        let segs = segment_document(&pages, None, &cfg);
        assert_eq!(segs.len(), 1);
        assert_eq!((segs[0].page_start, segs[0].page_end), (1, 3));
    }

    #[test]
    fn two_pieces_split_on_strong_marker() {
        let cfg = PipelineConfig::default();
        let pages = vec![
            page(1, &format!("EXCELENTÍSSIMO SENHOR DOUTOR JUIZ\n{}", filler())),
            page(2, &filler()),
            page(3, &format!("SENTENÇA\n{}", filler())),
        ];
        let segs = segment_document(&pages, None, &cfg);
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[0].segment_id, "seg-001");
        assert_eq!(segs[1].segment_id, "seg-002");
        assert_eq!(segs[0].doc_type, "peticao-inicial");
        assert_eq!(segs[1].doc_type, "sentenca");
        assert_eq!((segs[1].page_start, segs[1].page_end), (3, 3));
    }

    #[test]
    fn paragraph_continuation_suppresses_weak_boundary() {
        let cfg = PipelineConfig::default();
        // Page 2 starts with paragraph 13 continuing page 1's 12, and its
        // only marker is a court header (0.7 < 0.85): suppressed.
        let pages = vec![
            page(1, &format!("SENTENÇA\n{}\n12. Do exposto acima se extrai a conclusão.", filler())),
            page(
                2,
                &format!("PODER JUDICIÁRIO\n13. Prosseguindo na análise dos autos.\n{}", filler()),
            ),
        ];
        let segs = segment_document(&pages, None, &cfg);
        assert_eq!(segs.len(), 1, "weak boundary should be suppressed");
    }

    #[test]
    fn structural_header_beats_continuation() {
        let cfg = PipelineConfig::default();
        // Same continuation, but page 2 opens with SENTENÇA (0.9 ≥ 0.85).
        let pages = vec![
            page(1, &format!("{}\n12. Conclusão parcial do relatório.", filler())),
            page(2, &format!("SENTENÇA\n13. Continuando a numeração.\n{}", filler())),
        ];
        let segs = segment_document(&pages, None, &cfg);
        assert_eq!(segs.len(), 2);
    }

    #[test]
    fn profiler_fallback_fills_unknown() {
        let cfg = PipelineConfig::default();
        let doc_class = Classification {
            primary_type: "inicial-eef".into(),
            confidence: 0.55,
            indicators: vec![],
            secondary_type: None,
            secondary_confidence: None,
            disambiguation: None,
            reclassified: None,
        };
        let pages = vec![page(
            1,
            &format!("PODER JUDICIÁRIO\nJUSTIÇA FEDERAL\n{}", filler()),
        )];
        let segs = segment_document(&pages, Some(&doc_class), &cfg);
        assert_eq!(segs[0].doc_type, "inicial-eef");
        assert_eq!(
            segs[0].classification_source,
            ClassificationSource::ProfilerFallback
        );
    }

    #[test]
    fn low_confidence_doc_class_not_used() {
        let cfg = PipelineConfig::default();
        let doc_class = Classification {
            primary_type: "inicial-eef".into(),
            confidence: 0.1,
            indicators: vec![],
            secondary_type: None,
            secondary_confidence: None,
            disambiguation: None,
            reclassified: None,
        };
        let pages = vec![page(1, &format!("PODER JUDICIÁRIO\n{}", filler()))];
        let segs = segment_document(&pages, Some(&doc_class), &cfg);
        assert_eq!(segs[0].doc_type, "unknown");
    }

    #[test]
    fn coverage_is_total() {
        let cfg = PipelineConfig::default();
        let pages: Vec<Page> = (1..=6)
            .map(|n| {
                if n == 4 {
                    page(n, &format!("SENTENÇA\n{}", filler()))
                } else {
                    page(n, &filler())
                }
            })
            .collect();
        let segs = segment_document(&pages, None, &cfg);
        let orphans = check_coverage(&segs, 6);
        assert!(orphans.is_empty());
        // Ranges must be contiguous and ordered.
        assert_eq!(segs[0].page_start, 1);
        for w in segs.windows(2) {
            assert_eq!(w[1].page_start, w[0].page_end + 1);
        }
        assert_eq!(segs.last().unwrap().page_end, 6);
    }

    #[test]
    fn empty_document_yields_no_segments() {
        let cfg = PipelineConfig::default();
        assert!(segment_document(&[], None, &cfg).is_empty());
    }

    #[test]
    fn attachment_label_typed_as_attachment() {
        let cfg = PipelineConfig::default();
        let pages = vec![
            page(1, &format!("EXCELENTÍSSIMO SENHOR DOUTOR JUIZ\n{}", filler())),
            page(2, &format!("ANEXO Nº 1\nDocumentos que instruem a inicial\n{}", filler())),
        ];
        let segs = segment_document(&pages, None, &cfg);
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[1].segment_type, SegmentType::Attachment);
        assert_eq!(segs[1].doc_type, "anexo");
    }
}
