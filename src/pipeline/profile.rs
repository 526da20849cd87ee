//! Per-page quality profiling and document-level aggregation.
//!
//! The readability score (0–100) combines four weighted heuristics over the
//! page text: character density, average word length, printable-Latin
//! ratio, and average line length. Tiers: A ≥ 80, B ≥ 60, C ≥ 40, D ≥ 20,
//! else F.
//!
//! Aggregation uses the **median** readability so a few degraded pages
//! cannot hide behind a clean majority, and propagates the degraded flag to
//! every non-empty page once half of them are degraded — a scan batch that
//! mangles half the pages has almost certainly mangled the rest subtly.

use crate::config::{PipelineConfig, EMPTY_PAGE_CHARS};
use crate::model::{DocumentProfile, NoiseLevel, Page, PageProfile, QualityTier};
use crate::pipeline::garbage;

// Heuristic weights; see DESIGN.md for the calibration rationale.
const W_DENSITY: f64 = 0.30;
const W_WORD_LEN: f64 = 0.25;
const W_PRINTABLE: f64 = 0.25;
const W_LINE_LEN: f64 = 0.20;

/// Characters on a typical full legal page; density saturates here.
const FULL_PAGE_CHARS: f64 = 1800.0;

const WORD_LEN_HEALTHY: (f64, f64) = (3.0, 8.0);
const WORD_LEN_DECAY: f64 = 4.0;
const LINE_LEN_HEALTHY: (f64, f64) = (30.0, 120.0);
const LINE_LEN_DECAY: f64 = 60.0;

/// Score 100 inside the healthy band, linear decay to 0 over `decay` units.
fn band_score(value: f64, band: (f64, f64), decay: f64) -> f64 {
    let dist = if value < band.0 {
        band.0 - value
    } else if value > band.1 {
        value - band.1
    } else {
        return 100.0;
    };
    (100.0 * (1.0 - dist / decay)).max(0.0)
}

/// Compute the 0–100 readability score for one page of text.
pub fn readability_score(text: &str) -> f64 {
    let char_count = text.chars().count();
    if char_count == 0 {
        return 0.0;
    }

    let density = (char_count as f64 / FULL_PAGE_CHARS).min(1.0) * 100.0;

    let words: Vec<&str> = text.split_whitespace().collect();
    let avg_word_len = if words.is_empty() {
        0.0
    } else {
        words.iter().map(|w| w.chars().count()).sum::<usize>() as f64 / words.len() as f64
    };
    let word_len = band_score(avg_word_len, WORD_LEN_HEALTHY, WORD_LEN_DECAY);

    let printable = text
        .chars()
        .filter(|c| {
            c.is_ascii_alphanumeric()
                || c.is_ascii_punctuation()
                || c.is_whitespace()
                || matches!(*c, 'à'..='ü' | 'À'..='Ü')
        })
        .count() as f64
        / char_count as f64
        * 100.0;

    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let avg_line_len = if lines.is_empty() {
        0.0
    } else {
        lines.iter().map(|l| l.chars().count()).sum::<usize>() as f64 / lines.len() as f64
    };
    let line_len = band_score(avg_line_len, LINE_LEN_HEALTHY, LINE_LEN_DECAY);

    (W_DENSITY * density + W_WORD_LEN * word_len + W_PRINTABLE * printable + W_LINE_LEN * line_len)
        .clamp(0.0, 100.0)
}

/// Map a readability score onto its tier using the configured cutoffs.
pub fn tier_for(score: f64, thresholds: &[f64; 4]) -> QualityTier {
    if score >= thresholds[0] {
        QualityTier::A
    } else if score >= thresholds[1] {
        QualityTier::B
    } else if score >= thresholds[2] {
        QualityTier::C
    } else if score >= thresholds[3] {
        QualityTier::D
    } else {
        QualityTier::F
    }
}

/// Noise from garbage-operator density and replacement characters.
pub fn noise_level(text: &str) -> NoiseLevel {
    let chars = text.chars().count();
    if chars == 0 {
        return NoiseLevel::Low;
    }
    let ops = text
        .chars()
        .filter(|c| matches!(*c, '~' | '*' | '§' | '¬' | '¨' | '£' | '¢' | '¡' | '¿'))
        .count() as f64
        / chars as f64;
    let replacement = text.chars().filter(|c| *c == '\u{FFFD}').count() as f64 / chars as f64;
    if ops >= 0.02 || replacement >= 0.01 {
        NoiseLevel::High
    } else if ops >= 0.005 {
        NoiseLevel::Medium
    } else {
        NoiseLevel::Low
    }
}

/// Profile a single extracted page.
pub fn profile_page(page: &Page, cfg: &PipelineConfig) -> PageProfile {
    let text = &page.text;
    let char_count = text.chars().count();
    let empty = page.empty || char_count < EMPTY_PAGE_CHARS;
    let readability = readability_score(text);
    let noise = noise_level(text);
    let garbage = garbage::word_garbage_score(text);
    let is_degraded = readability < cfg.degraded_readability
        || noise != NoiseLevel::Low
        || garbage >= cfg.degraded_garbage
        || char_count < EMPTY_PAGE_CHARS;
    PageProfile {
        page_number: page.page_number,
        readability_score: readability,
        noise_level: noise,
        word_garbage_score: garbage,
        quality_tier: tier_for(readability, &cfg.readability_tier_thresholds),
        char_count,
        is_degraded,
        empty,
        propagated: None,
    }
}

/// Profile every page of a document.
pub fn profile_pages(pages: &[Page], cfg: &PipelineConfig) -> Vec<PageProfile> {
    pages.iter().map(|p| profile_page(p, cfg)).collect()
}

fn median(sorted: &[f64]) -> f64 {
    match sorted.len() {
        0 => 0.0,
        n if n % 2 == 1 => sorted[n / 2],
        n => (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0,
    }
}

/// Aggregate page profiles into a document profile, applying the ≥50%
/// degraded propagation rule.
///
/// There is deliberately no document-only profiling path: the document
/// profile is always the aggregate of per-page profiles.
pub fn profile_document(pages: &[Page], cfg: &PipelineConfig) -> DocumentProfile {
    let mut profiles = profile_pages(pages, cfg);

    let non_empty: Vec<usize> = profiles
        .iter()
        .enumerate()
        .filter(|(_, p)| !p.empty)
        .map(|(i, _)| i)
        .collect();

    // Propagation: if half the non-empty pages are degraded, trust none.
    if !non_empty.is_empty() {
        let degraded = non_empty
            .iter()
            .filter(|&&i| profiles[i].is_degraded)
            .count();
        if degraded as f64 / non_empty.len() as f64 >= cfg.degraded_ratio_propagate {
            for &i in &non_empty {
                if !profiles[i].is_degraded {
                    profiles[i].is_degraded = true;
                    profiles[i].propagated = Some(true);
                }
            }
        }
    }

    let mut scores: Vec<f64> = non_empty
        .iter()
        .map(|&i| profiles[i].readability_score)
        .collect();
    scores.sort_by(|a, b| a.partial_cmp(b).expect("readability scores are finite"));
    let median_score = median(&scores);

    let noise = profiles
        .iter()
        .filter(|p| !p.empty)
        .map(|p| p.noise_level)
        .max()
        .unwrap_or(NoiseLevel::Low);

    let degraded_pages: Vec<usize> = profiles
        .iter()
        .filter(|p| p.is_degraded && !p.empty)
        .map(|p| p.page_number)
        .collect();
    let degraded_count = degraded_pages.len();
    let clean_count = non_empty.len().saturating_sub(degraded_count);
    let has_text_layer = profiles.iter().any(|p| !p.empty && !p.is_degraded);

    DocumentProfile {
        readability_score: median_score,
        quality_tier: tier_for(median_score, &cfg.readability_tier_thresholds),
        noise_level: noise,
        degraded_count,
        clean_count,
        is_mixed_quality: degraded_count > 0 && clean_count > 0,
        has_text_layer,
        degraded_pages,
        page_profiles: profiles,
    }
}
