//! Repetitive-chrome stripping: recurring headers/footers, the ADVOGADOS
//! block, and PJe footer lines (including OCR-garbled inverted footers on
//! rotated pages).
//!
//! Runs once per document, after hybrid extraction and before
//! segmentation. Works on line fingerprints — whitespace collapsed,
//! non-alphanumerics dropped, lowercased — so the same header survives
//! OCR spacing jitter and still counts as recurring.

use crate::config::PipelineConfig;
use crate::model::Page;
use crate::pipeline::garbage::is_pje_footer_line;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Window (in lines) scanned for the ADVOGADOS block and inverted footers.
const TOP_WINDOW: usize = 20;

/// Fingerprints shorter than this are too ambiguous to strip on.
const MIN_FINGERPRINT_LEN: usize = 3;

static RE_ADVOGADOS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)advogad|abvoga|advdga").unwrap());

/// OCR-garble signatures of an upside-down PJe footer rendered at the top
/// of a rotated page: reversed fragments of "assinado eletronicamente" and
/// the "Num. … Pág." stamp. Closed set.
static INVERTED_FOOTER_SIGNATURES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)odanissa",
        r"(?i)etnemacinortele",
        r"(?i)g[áa]p\s*[-–—]?\s*\d+.{0,12}\.?mun",
        r"(?i)\bejp\b.{0,20}ptth",
        r"(?i)etnemlatigid\s+odanissa",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("inverted footer signature"))
    .collect()
});

/// Normalize a line into its fingerprint.
fn fingerprint(line: &str) -> String {
    line.chars()
        .filter(|c| c.is_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

/// Build the set of recurring header/footer fingerprints: anything seen in
/// the first `header_lines` or last `footer_lines` of at least
/// `repetitive_threshold` of the non-empty pages.
fn recurring_fingerprints(pages: &[Page], cfg: &PipelineConfig) -> HashSet<String> {
    let non_empty: Vec<&Page> = pages.iter().filter(|p| !p.empty).collect();
    if non_empty.is_empty() {
        return HashSet::new();
    }
    let threshold = ((non_empty.len() as f64) * cfg.repetitive_threshold).ceil() as usize;
    let threshold = threshold.max(2);

    let mut counts: HashMap<String, usize> = HashMap::new();
    for page in &non_empty {
        let lines: Vec<&str> = page.text.lines().collect();
        let head = lines.iter().take(cfg.header_lines);
        let tail_start = lines.len().saturating_sub(cfg.footer_lines);
        let tail = lines.iter().skip(tail_start.max(cfg.header_lines.min(lines.len())));
        // Dedup within a page so one page cannot vote twice.
        let mut seen: HashSet<String> = HashSet::new();
        for line in head.chain(tail) {
            let fp = fingerprint(line);
            if fp.chars().count() >= MIN_FINGERPRINT_LEN && seen.insert(fp.clone()) {
                *counts.entry(fp).or_insert(0) += 1;
            }
        }
    }

    counts
        .into_iter()
        .filter(|(_, c)| *c >= threshold)
        .map(|(fp, _)| fp)
        .collect()
}

/// Strip one page's text: recurring fingerprints, ADVOGADOS block, PJe
/// footers, inverted footers.
fn strip_page_text(text: &str, recurring: &HashSet<String>) -> String {
    let lines: Vec<&str> = text.lines().collect();

    // ADVOGADOS block: first match within the top window ends the block
    // two lines later.
    let mut advogados_end: Option<usize> = None;
    for (i, line) in lines.iter().take(TOP_WINDOW).enumerate() {
        if RE_ADVOGADOS.is_match(line) {
            advogados_end = Some(i + 2);
            break;
        }
    }

    let mut kept: Vec<&str> = Vec::with_capacity(lines.len());
    for (i, line) in lines.iter().enumerate() {
        if let Some(end) = advogados_end {
            if i <= end {
                continue;
            }
        }
        if is_pje_footer_line(line) {
            continue;
        }
        if i < TOP_WINDOW
            && INVERTED_FOOTER_SIGNATURES
                .iter()
                .any(|re| re.is_match(line))
        {
            continue;
        }
        let fp = fingerprint(line);
        if fp.chars().count() >= MIN_FINGERPRINT_LEN && recurring.contains(&fp) {
            continue;
        }
        kept.push(line);
    }
    kept.join("\n")
}

/// Strip repetitive chrome from every page in place. Returns the number of
/// recurring fingerprints that were removed.
pub fn strip_repetitive_content(pages: &mut [Page], cfg: &PipelineConfig) -> usize {
    let recurring = recurring_fingerprints(pages, cfg);
    if !recurring.is_empty() {
        debug!(
            fingerprints = recurring.len(),
            "stripping recurring header/footer chrome"
        );
    }
    for page in pages.iter_mut() {
        if page.empty {
            continue;
        }
        page.text = strip_page_text(&page.text, &recurring);
    }
    recurring.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EMPTY_PAGE_CHARS;

    fn page(n: usize, text: &str) -> Page {
        Page {
            page_number: n,
            text: text.to_string(),
            confidence: 0.95,
            empty: text.chars().count() < EMPTY_PAGE_CHARS,
            method: "fast-parse-poppler".into(),
            rotation_applied: None,
            word_garbage_score: None,
            ocr_replaced: None,
            ocr_fallback_to_fp: None,
        }
    }

    fn body(n: usize) -> String {
        format!(
            "Parágrafo {n} com conteúdo próprio desta página, diferente das demais, \
             tratando do mérito da execução fiscal e dos cálculos apresentados."
        )
    }

    #[test]
    fn recurring_header_is_stripped() {
        let cfg = PipelineConfig::default();
        let header = "TRIBUNAL REGIONAL FEDERAL DA 3A REGIAO";
        let mut pages: Vec<Page> = (1..=5)
            .map(|n| page(n, &format!("{header}\n{}\n{}", body(n), body(n + 10))))
            .collect();
        let removed = strip_repetitive_content(&mut pages, &cfg);
        assert!(removed >= 1);
        for p in &pages {
            assert!(!p.text.contains(header), "page {} kept chrome", p.page_number);
            assert!(p.text.contains("Parágrafo"));
        }
    }

    #[test]
    fn unique_lines_survive() {
        let cfg = PipelineConfig::default();
        let mut pages: Vec<Page> = (1..=4)
            .map(|n| page(n, &format!("{}\n{}", body(n), body(n + 20))))
            .collect();
        strip_repetitive_content(&mut pages, &cfg);
        for (i, p) in pages.iter().enumerate() {
            assert!(p.text.contains(&format!("Parágrafo {}", i + 1)));
        }
    }

    #[test]
    fn advogados_block_stripped_from_top() {
        let recurring = HashSet::new();
        let text = format!(
            "PODER JUDICIARIO\nADVOGADOS: Fulano de Tal OAB/SP 123456\nBeltrano OAB/RJ 9876\nSicrano OAB/MG 555\n{}",
            body(1)
        );
        let out = strip_page_text(&text, &recurring);
        assert!(!out.contains("ADVOGADOS"));
        assert!(!out.contains("OAB"));
        assert!(out.contains("Parágrafo 1"));
    }

    #[test]
    fn ocr_garbled_advogados_matches_fuzzy() {
        let recurring = HashSet::new();
        let text = format!("ABVOGADOS: Fulano\nlinha\nlinha2\n{}", body(2));
        let out = strip_page_text(&text, &recurring);
        assert!(!out.contains("ABVOGADOS"));
        assert!(out.contains("Parágrafo 2"));
    }

    #[test]
    fn pje_footer_always_stripped() {
        let recurring = HashSet::new();
        let text = format!(
            "{}\nAssinado eletronicamente por FULANO DE TAL\nNum. 99887766 - Pág. 12",
            body(3)
        );
        let out = strip_page_text(&text, &recurring);
        assert!(!out.contains("Assinado eletronicamente"));
        assert!(!out.contains("Pág. 12"));
    }

    #[test]
    fn inverted_footer_stripped_only_near_top() {
        let recurring = HashSet::new();
        let text = format!("21 .gáP - 66778899 .muN\netnemacinortele odanissa\n{}", body(4));
        let out = strip_page_text(&text, &recurring);
        assert!(!out.contains("odanissa"));
        assert!(!out.contains(".muN"));
        assert!(out.contains("Parágrafo 4"));
    }

    #[test]
    fn empty_pages_untouched() {
        let cfg = PipelineConfig::default();
        let mut pages = vec![page(1, ""), page(2, &body(2))];
        strip_repetitive_content(&mut pages, &cfg);
        assert_eq!(pages[0].text, "");
    }
}
