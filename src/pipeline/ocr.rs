//! Single-page OCR: rasterize, recognize, retry under rotation, and clean
//! up the recurring Portuguese OCR artifacts.
//!
//! Every rasterization lives inside a scoped temp directory that is
//! released on every exit path — success, failure, or timeout — because
//! the `TempDir` guard travels with the call frame.
//!
//! ## Rotation retry
//!
//! Upside-down and sideways pages are common in assembled case files.
//! When the first OCR pass scores at or above the garbage gate, the page
//! image is re-OCRed at 180°, 90°, and 270°, keeping whichever rotation
//! produces the **lowest** garbage score and stopping early once a
//! candidate drops below the early-exit threshold.

use crate::capability::{self, Capabilities, RotateTool};
use crate::config::{PipelineConfig, EMPTY_PAGE_CHARS};
use crate::error::PageFailure;
use crate::model::Page;
use crate::pipeline::garbage::word_garbage_score;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Confidence assigned to standard-DPI OCR pages.
pub const OCR_STANDARD_CONFIDENCE: f64 = 0.85;
/// Confidence assigned to enhanced-DPI OCR pages.
pub const OCR_ENHANCED_CONFIDENCE: f64 = 0.80;

const ROTATIONS: [u32; 3] = [180, 90, 270];

// ── Portuguese OCR post-processing ───────────────────────────────────────

static RE_SPLIT_LETTERS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:\p{L} ){2,}\p{L}\b").unwrap());
static RE_DIGIT_IN_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\p{L}{2})([01465])(\p{L}|\b)").unwrap());
static RE_MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]{2,}").unwrap());

/// Known whole-word misreads tesseract produces on PJe chrome and common
/// names. Closed table; ordered before the generic digit fix would touch
/// the same bytes.
const KNOWN_MISREADS: &[(&str, &str)] = &[
    ("Jos6", "José"),
    ("JOS6", "JOSÉ"),
    ("Mar1a", "Maria"),
    ("Bras1lia", "Brasília"),
    ("Sdo Paulo", "São Paulo"),
    ("Julz", "Juiz"),
    ("Vistcs", "Vistos"),
    ("PODER JUDICIARlO", "PODER JUDICIÁRIO"),
];

fn digit_substitute(d: char) -> char {
    match d {
        '0' => 'o',
        '1' => 'i',
        '4' => 'a',
        '5' => 's',
        '6' => 'é',
        other => other,
    }
}

/// Deterministic cleanup of raw tesseract output, applied after every OCR
/// run and before garbage scoring.
///
/// Rules (applied in order):
/// 1. Rejoin shattered words: runs of 3+ single letters separated by
///    single spaces collapse into one word
/// 2. Replace known whole-word misreads from the closed table
/// 3. Fix digits spliced into words ("Jos6" → "José")
/// 4. Collapse runs of spaces/tabs
pub fn postprocess_ocr_text(input: &str) -> String {
    let s = RE_SPLIT_LETTERS
        .replace_all(input, |caps: &regex::Captures<'_>| {
            caps[0].split(' ').collect::<String>()
        })
        .into_owned();

    let mut s = s;
    for (from, to) in KNOWN_MISREADS {
        s = s.replace(from, to);
    }

    let s = RE_DIGIT_IN_WORD
        .replace_all(&s, |caps: &regex::Captures<'_>| {
            let digit = caps[2].chars().next().expect("single digit capture");
            format!("{}{}{}", &caps[1], digit_substitute(digit), &caps[3])
        })
        .into_owned();

    RE_MULTI_SPACE.replace_all(&s, " ").into_owned()
}

// ── OCR invocation ───────────────────────────────────────────────────────

fn psm_for(enhanced: bool) -> u8 {
    if enhanced {
        6
    } else {
        3
    }
}

fn make_page(page_number: usize, text: String, enhanced: bool, rotation: Option<u32>) -> Page {
    let confidence = if enhanced {
        OCR_ENHANCED_CONFIDENCE
    } else {
        OCR_STANDARD_CONFIDENCE
    };
    let empty = text.chars().count() < EMPTY_PAGE_CHARS;
    Page {
        page_number,
        confidence: if empty { 0.0 } else { confidence },
        empty,
        method: if enhanced {
            "ocr-enhanced".to_string()
        } else {
            "ocr-standard".to_string()
        },
        rotation_applied: rotation.filter(|r| *r != 0),
        word_garbage_score: Some(word_garbage_score(&text)),
        ocr_replaced: None,
        ocr_fallback_to_fp: None,
        text,
    }
}

/// OCR one page at the configured DPI. The rasterization temp directory is
/// dropped (and deleted) when this function returns by any path.
pub async fn ocr_single_page(
    pdf: &std::path::Path,
    page: usize,
    enhanced: bool,
    cfg: &PipelineConfig,
) -> Result<Page, PageFailure> {
    let dpi = if enhanced {
        cfg.ocr_dpi_enhanced
    } else {
        cfg.ocr_dpi_standard
    };
    let tmp = tempfile::tempdir().map_err(|e| PageFailure::RasterFailed {
        page,
        detail: e.to_string(),
    })?;
    let img = capability::rasterize_page(pdf, page, dpi, tmp.path(), cfg.raster_timeout_secs).await?;
    let raw = capability::tesseract_image(
        &img,
        &cfg.ocr_lang,
        psm_for(enhanced),
        page,
        cfg.ocr_timeout_secs,
    )
    .await?;
    let text = postprocess_ocr_text(&raw);
    Ok(make_page(page, text, enhanced, None))
}

/// OCR one page, retrying under rotation when the result smells like an
/// upside-down or sideways scan.
pub async fn ocr_single_page_with_retry(
    pdf: &std::path::Path,
    page: usize,
    enhanced: bool,
    caps: &Capabilities,
    cfg: &PipelineConfig,
) -> Result<Page, PageFailure> {
    let dpi = if enhanced {
        cfg.ocr_dpi_enhanced
    } else {
        cfg.ocr_dpi_standard
    };
    let tmp = tempfile::tempdir().map_err(|e| PageFailure::RasterFailed {
        page,
        detail: e.to_string(),
    })?;
    let img = capability::rasterize_page(pdf, page, dpi, tmp.path(), cfg.raster_timeout_secs).await?;

    let ocr_once = |img_path: std::path::PathBuf| {
        let lang = cfg.ocr_lang.clone();
        let timeout = cfg.ocr_timeout_secs;
        async move {
            capability::tesseract_image(&img_path, &lang, psm_for(enhanced), page, timeout)
                .await
                .map(|raw| postprocess_ocr_text(&raw))
        }
    };

    let base_text = ocr_once(img.clone()).await?;
    let base_score = word_garbage_score(&base_text);
    if base_score < cfg.rotation_garbage_gate {
        return Ok(make_page(page, base_text, enhanced, None));
    }
    let Some(tool) = caps.rotate else {
        debug!(page, score = base_score, "garbage above gate but no rotation tool");
        return Ok(make_page(page, base_text, enhanced, None));
    };

    let mut best_text = base_text;
    let mut best_score = base_score;
    let mut best_rotation = 0u32;
    // sips rotates in place, so rotations accumulate on the same file;
    // track the image's current orientation and rotate by the delta.
    let mut current_rotation = 0u32;
    let mut current_img = img.clone();

    for target in ROTATIONS {
        let delta = (360 + target - current_rotation) % 360;
        let rotated = capability::rotate_image(
            tool,
            &current_img,
            delta,
            page,
            cfg.rotate_timeout_secs,
        )
        .await?;
        current_rotation = target;
        if tool == RotateTool::Convert {
            current_img = rotated.clone();
        }
        match ocr_once(rotated).await {
            Ok(text) => {
                let score = word_garbage_score(&text);
                debug!(page, rotation = target, score, "rotation retry");
                if score < best_score {
                    best_score = score;
                    best_text = text;
                    best_rotation = target;
                }
                if best_score < cfg.rotation_early_exit {
                    break;
                }
            }
            Err(e) => debug!(page, rotation = target, "rotation OCR failed: {e}"),
        }
    }

    Ok(make_page(
        page,
        best_text,
        enhanced,
        Some(best_rotation),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejoins_shattered_words() {
        let input = "a p e t i ç ã o foi protocolada";
        let out = postprocess_ocr_text(input);
        assert!(out.contains("petição"), "got: {out}");
        assert!(out.contains("protocolada"));
    }

    #[test]
    fn two_letter_pairs_are_left_alone() {
        // "e a" is real Portuguese, not a shattered word.
        let out = postprocess_ocr_text("réu e a autora");
        assert_eq!(out, "réu e a autora");
    }

    #[test]
    fn fixes_digit_in_word() {
        assert_eq!(postprocess_ocr_text("Jos6 da Silva"), "José da Silva");
        assert_eq!(postprocess_ocr_text("calculad0 em"), "calculado em");
        assert_eq!(postprocess_ocr_text("proces5o"), "processo");
    }

    #[test]
    fn preserves_real_numbers() {
        let s = "Processo 0001234-55.2020.4.03.6182, valor R$ 1.500,00";
        assert_eq!(postprocess_ocr_text(s), s);
    }

    #[test]
    fn known_misreads_replaced() {
        let out = postprocess_ocr_text("PODER JUDICIARlO Julz Federal");
        assert!(out.contains("PODER JUDICIÁRIO"));
        assert!(out.contains("Juiz"));
    }

    #[test]
    fn collapses_double_spaces() {
        assert_eq!(
            postprocess_ocr_text("texto  com   espaços\tduplos"),
            "texto com espaços duplos"
        );
    }

    #[test]
    fn psm_mapping() {
        assert_eq!(psm_for(false), 3);
        assert_eq!(psm_for(true), 6);
    }

    #[test]
    fn ocr_page_confidence_and_method() {
        let long = "texto ".repeat(30);
        let p = make_page(4, long, false, None);
        assert_eq!(p.confidence, OCR_STANDARD_CONFIDENCE);
        assert_eq!(p.method, "ocr-standard");
        assert!(!p.empty);
        let p = make_page(4, "curto".into(), true, Some(180));
        assert!(p.empty);
        assert_eq!(p.confidence, 0.0);
        assert_eq!(p.method, "ocr-enhanced");
        assert_eq!(p.rotation_applied, Some(180));
    }

    #[test]
    fn zero_rotation_not_recorded() {
        let p = make_page(1, "texto ".repeat(30), false, Some(0));
        assert_eq!(p.rotation_applied, None);
    }
}
