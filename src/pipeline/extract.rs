//! Text extraction: fast per-page parse, legacy whole-document splitting,
//! hybrid fast+OCR merging, and the method fallback chain.
//!
//! Three layers:
//!
//! 1. [`fast_parse_per_page`] — the bootstrap parse that feeds profiling
//!    and classification; prefers `pdftotext -f N -l N`, falls back to one
//!    whole-document pass split on form feeds, and as a last resort to
//!    equal character chunks.
//! 2. [`extract_hybrid`] — re-extracts only the pages the router flagged
//!    `needs_ocr` and keeps, per page, whichever of OCR text and fast text
//!    carries the lower garbage score.
//! 3. [`extract_with_fallback`] — the method chain
//!    fast-parse → ocr-standard → ocr-enhanced → manual-review, advanced
//!    whenever the overall confidence lands below the configured floor.

use crate::capability::{self, Capabilities};
use crate::config::{PipelineConfig, EMPTY_PAGE_CHARS};
use crate::model::{DocRouteMethod, ExtractedDocument, Page, PageRoute};
use crate::pipeline::garbage::word_garbage_score;
use crate::pipeline::ocr;
use std::path::Path;
use tracing::{debug, info, warn};

/// Flat page confidence for the per-page poppler path.
const FAST_PAGE_CONFIDENCE: f64 = 0.95;
/// Flat page confidence for the legacy form-feed split.
const FORMFEED_SPLIT_CONFIDENCE: f64 = 0.95;
/// Flat page confidence for the legacy equal-chunk split.
const CHUNK_SPLIT_CONFIDENCE: f64 = 0.8;

/// Form-feed splits are trusted when their count is within this fraction
/// of the known page count.
const FORMFEED_TOLERANCE: f64 = 0.8;

fn fast_page(page_number: usize, text: String, method: &str, confidence: f64) -> Page {
    let empty = text.chars().count() < EMPTY_PAGE_CHARS;
    Page {
        page_number,
        confidence: if empty { 0.0 } else { confidence },
        empty,
        method: method.to_string(),
        rotation_applied: None,
        word_garbage_score: None,
        ocr_replaced: None,
        ocr_fallback_to_fp: None,
        text,
    }
}

/// Mean confidence over non-empty pages; 0 when every page is empty.
pub fn overall_confidence(pages: &[Page]) -> f64 {
    let non_empty: Vec<&Page> = pages.iter().filter(|p| !p.empty).collect();
    if non_empty.is_empty() {
        return 0.0;
    }
    non_empty.iter().map(|p| p.confidence).sum::<f64>() / non_empty.len() as f64
}

/// Split a whole-document extraction into page records.
///
/// Form-feed splits win when their count is within 80% of the known page
/// count; otherwise the text is cut into `page_count` equal character
/// chunks with page numbers assigned in order. The flat 0.95/0.8
/// confidences of this legacy path are preserved deliberately; the hybrid
/// path computes means instead.
pub fn legacy_split(full_text: &str, page_count: Option<usize>) -> Vec<Page> {
    let mut splits: Vec<&str> = full_text.split('\u{000C}').collect();
    while matches!(splits.last(), Some(s) if s.trim().is_empty()) {
        splits.pop();
    }

    let usable = match page_count {
        Some(n) if n > 0 => {
            let ratio = splits.len() as f64 / n as f64;
            ratio >= FORMFEED_TOLERANCE && ratio <= 1.0 / FORMFEED_TOLERANCE
        }
        // No independent count: the form feeds are the best evidence there is.
        _ => !splits.is_empty(),
    };

    if usable {
        return splits
            .into_iter()
            .enumerate()
            .map(|(i, text)| {
                fast_page(
                    i + 1,
                    text.to_string(),
                    "legacy-formfeed-split",
                    FORMFEED_SPLIT_CONFIDENCE,
                )
            })
            .collect();
    }

    let n = page_count.unwrap_or(1).max(1);
    let chars: Vec<char> = full_text.chars().collect();
    let chunk = chars.len().div_ceil(n).max(1);
    (0..n)
        .map(|i| {
            let start = (i * chunk).min(chars.len());
            let end = ((i + 1) * chunk).min(chars.len());
            fast_page(
                i + 1,
                chars[start..end].iter().collect(),
                "legacy-chunk-split",
                CHUNK_SPLIT_CONFIDENCE,
            )
        })
        .collect()
}

/// Bootstrap fast parse: one [`Page`] per PDF page, no OCR.
pub async fn fast_parse_per_page(
    pdf: &Path,
    page_count: Option<usize>,
    caps: &Capabilities,
    cfg: &PipelineConfig,
) -> ExtractedDocument {
    let pages = if caps.pdftotext {
        if let Some(n) = page_count {
            let mut pages = Vec::with_capacity(n);
            for page_no in 1..=n {
                match capability::pdftotext_page(pdf, page_no, cfg.text_timeout_secs).await {
                    Ok(text) => pages.push(fast_page(
                        page_no,
                        text,
                        "fast-parse-poppler",
                        FAST_PAGE_CONFIDENCE,
                    )),
                    Err(e) => {
                        warn!("{}: {e}", pdf.display());
                        pages.push(Page::failed(page_no));
                    }
                }
            }
            pages
        } else {
            match capability::pdftotext_full(pdf, cfg.text_timeout_secs).await {
                Ok(full) => legacy_split(&full, None),
                Err(e) => {
                    warn!("{}: whole-document parse failed: {e}", pdf.display());
                    vec![Page::failed(1)]
                }
            }
        }
    } else {
        // No text capability at all: stubs keep the page geometry so the
        // OCR routes still know what to re-extract.
        let n = page_count.unwrap_or(1).max(1);
        (1..=n).map(Page::failed).collect()
    };

    let confidence = overall_confidence(&pages);
    ExtractedDocument {
        method: "fast-parse".to_string(),
        overall_confidence: confidence,
        fallback_triggered: false,
        ocr_pages: None,
        ocr_method: None,
        classification: None,
        pages,
    }
}

/// Hybrid extraction: OCR the routed pages, then arbitrate per page by
/// garbage score. The lower-garbage version wins; a winner still above the
/// penalty gate keeps its text but has its confidence clamped.
pub async fn extract_hybrid(
    pdf: &Path,
    fast: &ExtractedDocument,
    page_routes: &[PageRoute],
    caps: &Capabilities,
    cfg: &PipelineConfig,
) -> ExtractedDocument {
    let mut pages = fast.pages.clone();
    let mut ocr_pages: Vec<usize> = Vec::new();
    let mut ocr_method: Option<String> = None;

    for route in page_routes.iter().filter(|r| r.needs_ocr) {
        if !caps.can_ocr() {
            break;
        }
        let enhanced = matches!(route.method, crate::model::PageRouteMethod::OcrEnhanced);
        let idx = route.page.saturating_sub(1);
        let Some(slot) = pages.get_mut(idx) else {
            continue;
        };

        let ocr_page =
            match ocr::ocr_single_page_with_retry(pdf, route.page, enhanced, caps, cfg).await {
                Ok(p) => p,
                Err(e) => {
                    warn!("{}: {e}", pdf.display());
                    continue;
                }
            };
        ocr_pages.push(route.page);
        ocr_method = Some(if enhanced {
            "ocr-enhanced".to_string()
        } else {
            "ocr-standard".to_string()
        });

        let fast_garbage = word_garbage_score(&slot.text);
        let ocr_garbage = ocr_page
            .word_garbage_score
            .unwrap_or_else(|| word_garbage_score(&ocr_page.text));

        // Empty fast text loses outright; otherwise lower garbage wins.
        let ocr_wins = slot.empty || (!ocr_page.empty && ocr_garbage < fast_garbage);
        if ocr_wins {
            let mut chosen = ocr_page;
            chosen.ocr_replaced = Some(true);
            if ocr_garbage > cfg.garbage_penalty_gate {
                chosen.confidence = cfg.garbage_penalty_confidence;
            }
            *slot = chosen;
        } else {
            slot.ocr_fallback_to_fp = Some(true);
            slot.word_garbage_score = Some(fast_garbage);
            if fast_garbage > cfg.garbage_penalty_gate {
                slot.confidence = cfg.garbage_penalty_confidence;
            }
        }
        debug!(
            page = route.page,
            fast_garbage, ocr_garbage, ocr_wins, "hybrid arbitration"
        );
    }

    let confidence = overall_confidence(&pages);
    ExtractedDocument {
        method: if ocr_pages.is_empty() {
            fast.method.clone()
        } else {
            "hybrid".to_string()
        },
        overall_confidence: confidence,
        fallback_triggered: false,
        ocr_pages: (!ocr_pages.is_empty()).then_some(ocr_pages),
        ocr_method,
        classification: None,
        pages,
    }
}

/// OCR every non-skipped page at one DPI tier. Used by the fallback chain
/// when the hybrid result is untrustworthy as a whole.
async fn extract_full_ocr(
    pdf: &Path,
    page_count: usize,
    enhanced: bool,
    caps: &Capabilities,
    cfg: &PipelineConfig,
) -> ExtractedDocument {
    let method = if enhanced { "ocr-enhanced" } else { "ocr-standard" };
    let mut pages = Vec::with_capacity(page_count);
    let mut ocr_pages = Vec::new();
    for page_no in 1..=page_count {
        match ocr::ocr_single_page_with_retry(pdf, page_no, enhanced, caps, cfg).await {
            Ok(p) => {
                ocr_pages.push(page_no);
                pages.push(p);
            }
            Err(e) => {
                warn!("{}: {e}", pdf.display());
                pages.push(Page::failed(page_no));
            }
        }
    }
    let confidence = overall_confidence(&pages);
    ExtractedDocument {
        method: method.to_string(),
        overall_confidence: confidence,
        fallback_triggered: true,
        ocr_pages: Some(ocr_pages),
        ocr_method: Some(method.to_string()),
        classification: None,
        pages,
    }
}

/// Track the best attempt so far; return the candidate when it clears the
/// confidence floor.
fn consider(
    best: &mut Option<ExtractedDocument>,
    candidate: ExtractedDocument,
    floor: f64,
) -> Option<ExtractedDocument> {
    let good_enough = candidate.overall_confidence >= floor;
    let better = best
        .as_ref()
        .map(|b| candidate.overall_confidence > b.overall_confidence)
        .unwrap_or(true);
    if better {
        *best = Some(candidate.clone());
    }
    good_enough.then_some(candidate)
}

/// Drive the fallback chain starting from the routed method.
///
/// Advancement triggers when the stage's overall confidence lands below
/// `extraction_fallback_confidence`. A chain that runs dry ends in
/// `manual-review`, keeping the best attempt's pages so downstream stages
/// still have something to segment.
pub async fn extract_with_fallback(
    pdf: &Path,
    route_method: DocRouteMethod,
    fast: &ExtractedDocument,
    page_routes: &[PageRoute],
    caps: &Capabilities,
    cfg: &PipelineConfig,
) -> ExtractedDocument {
    let page_count = fast.pages.len();
    let floor = cfg.extraction_fallback_confidence;
    let mut best: Option<ExtractedDocument> = None;

    // Step 1: fast-parse (+hybrid OCR of routed pages).
    if route_method == DocRouteMethod::FastParse || !caps.can_ocr() {
        let hybrid = extract_hybrid(pdf, fast, page_routes, caps, cfg).await;
        if let Some(done) = consider(&mut best, hybrid, floor) {
            return done;
        }
        if !caps.can_ocr() {
            // Nothing further to fall back to.
            let mut out = best.expect("at least one candidate considered");
            out.fallback_triggered = true;
            return out;
        }
        info!(
            "{}: fast-parse confidence below {floor}, falling back to standard OCR",
            pdf.display()
        );
    }

    // Step 2: standard OCR of every page.
    if route_method != DocRouteMethod::OcrEnhanced {
        let std_ocr = extract_full_ocr(pdf, page_count, false, caps, cfg).await;
        if let Some(done) = consider(&mut best, std_ocr, floor) {
            return done;
        }
        info!(
            "{}: standard OCR confidence below {floor}, falling back to enhanced OCR",
            pdf.display()
        );
    }

    // Step 3: enhanced OCR.
    let enh = extract_full_ocr(pdf, page_count, true, caps, cfg).await;
    if let Some(done) = consider(&mut best, enh, floor) {
        return done;
    }

    // Step 4: manual review, keeping the best attempt's pages.
    let mut out = best.expect("at least one candidate considered");
    warn!(
        "{}: all extraction methods below {floor}, flagging manual-review",
        pdf.display()
    );
    out.method = "manual-review".to_string();
    out.fallback_triggered = true;
    out
}
