//! Word-level garbage scoring for OCR output.
//!
//! Seven signals, each awarding 0–2 integer points, normalized by the
//! maximum total (13) into a score in [0, 1]. The signals target the
//! failure modes tesseract exhibits on degraded PJe scans: shattered
//! single-letter words, symbol soup, missing Portuguese function words,
//! consonant runs, digits spliced into words, and vocabulary that no
//! Portuguese frequency dictionary recognizes.
//!
//! The PJe footer is stripped before scoring — it is boilerplate whose
//! URL-and-hash vocabulary would inflate every signal — but only when it
//! sits in the last 40% of the text, never on short fragments.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// Raw dictionary file; also embedded in the binary so the scoring tables
/// cannot drift from the shipped code.
const PT_FREQUENCY_RAW: &str = include_str!("../../rules/pt-frequency.txt");

/// Number of leading dictionary tokens that form the high-frequency stoplist.
const STOPLIST_LEN: usize = 60;

/// Maximum points the seven signals can award (2+2+1+2+2+2+2).
const MAX_POINTS: f64 = 13.0;

/// Texts shorter than this never have their footer stripped for scoring.
const MIN_STRIP_LEN: usize = 200;

static DICTIONARY: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    PT_FREQUENCY_RAW
        .lines()
        .filter(|l| !l.trim_start().starts_with('#'))
        .flat_map(str::split_whitespace)
        .collect()
});

static STOPLIST: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    PT_FREQUENCY_RAW
        .lines()
        .filter(|l| !l.trim_start().starts_with('#'))
        .flat_map(str::split_whitespace)
        .take(STOPLIST_LEN)
        .collect()
});

/// The closed set of PJe footer line patterns.
pub static PJE_FOOTER_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)num\.?\s*\d+\s*[-–—]\s*p[áa]g\.?\s*\d+",
        r"(?i)assinado\s+eletronicamente\s+por",
        r"(?i)https?://\S*pje\S*|consultadocumento/listview",
        r"(?i)documento\s+assinado\s+digitalmente\s+conforme\s+mp",
        r"(?i)este\s+documento\s+pode\s+ser\s+verificado\s+no\s+endere[çc]o",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("pje footer pattern"))
    .collect()
});

static RE_GARBAGE_OPS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[~*§¬¨£¢¡¿]").unwrap());
static RE_CONSONANT_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)[bcdfghjklmnpqrstvwxzç]{4,}").unwrap());
static RE_CASE_FLIP: Lazy<Regex> = Lazy::new(|| Regex::new(r"\p{Ll}\p{Lu}").unwrap());
static RE_TILDE_EQ_SPLICE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[[:alnum:]][~=][[:alnum:]]").unwrap());
static RE_DIGIT_IN_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\p{L}\d\p{L}|\p{L}\d$").unwrap());
static RE_DASH_SPLICE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\p{L}-\d|\d-\p{L}").unwrap());
static RE_LUL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\p{Ll}\p{Lu}\p{Ll}").unwrap());

/// Does any PJe footer pattern match this line?
pub fn is_pje_footer_line(line: &str) -> bool {
    PJE_FOOTER_PATTERNS.iter().any(|re| re.is_match(line))
}

/// Remove PJe footer lines found in the last 40% of `text` before scoring.
/// Short fragments are returned untouched.
pub fn strip_pje_footer_for_scoring(text: &str) -> String {
    if text.len() < MIN_STRIP_LEN {
        return text.to_string();
    }
    let cutoff = (text.len() as f64 * 0.6) as usize;
    let mut offset = 0usize;
    let mut kept: Vec<&str> = Vec::new();
    for line in text.lines() {
        let in_tail = offset >= cutoff;
        offset += line.len() + 1;
        if in_tail && is_pje_footer_line(line) {
            continue;
        }
        kept.push(line);
    }
    kept.join("\n")
}

fn alnum_len(token: &str) -> usize {
    token.chars().filter(|c| c.is_alphanumeric()).count()
}

fn clean_word(token: &str) -> String {
    token
        .chars()
        .filter(|c| c.is_alphabetic())
        .collect::<String>()
        .to_lowercase()
}

/// Compute the seven-signal word-garbage score in [0, 1].
pub fn word_garbage_score(text: &str) -> f64 {
    let text = strip_pje_footer_for_scoring(text);
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.is_empty() {
        return 0.0;
    }
    let n = tokens.len() as f64;
    let mut points = 0u32;

    // 1. Shattered words: fraction of 1–2-char tokens.
    let short = tokens.iter().filter(|t| matches!(alnum_len(t), 1 | 2)).count() as f64 / n;
    if short > 0.45 {
        points += 2;
    } else if short > 0.30 {
        points += 1;
    }

    // 2. Symbol-heavy tokens: alphanumeric portion below 40%.
    let symbolic = tokens
        .iter()
        .filter(|t| t.chars().count() > 1)
        .filter(|t| (alnum_len(t) as f64) < 0.4 * t.chars().count() as f64)
        .count() as f64
        / n;
    if symbolic > 0.15 {
        points += 2;
    } else if symbolic > 0.08 {
        points += 1;
    }

    // 3. Garbage-operator density over all characters.
    let char_count = text.chars().count().max(1);
    let ops = RE_GARBAGE_OPS.find_iter(&text).count() as f64 / char_count as f64;
    if ops > 0.02 {
        points += 1;
    }

    // 4. Stoplist starvation: real Portuguese text is full of function words.
    let stop_hits = tokens
        .iter()
        .filter(|t| STOPLIST.contains(clean_word(t).as_str()))
        .count() as f64
        / n;
    if stop_hits < 0.05 {
        points += 2;
    } else if stop_hits < 0.10 {
        points += 1;
    }

    // 5. Consonant runs and mid-word case flips.
    let malformed = tokens
        .iter()
        .filter(|t| RE_CONSONANT_RUN.is_match(t) || RE_CASE_FLIP.is_match(t))
        .count() as f64
        / n;
    if malformed > 0.15 {
        points += 2;
    } else if malformed > 0.08 {
        points += 1;
    }

    // 6. Encoding corruption: splices and digits inside letters.
    let corrupted = tokens
        .iter()
        .filter(|t| {
            RE_TILDE_EQ_SPLICE.is_match(t)
                || RE_DIGIT_IN_WORD.is_match(t)
                || RE_DASH_SPLICE.is_match(t)
                || RE_LUL.is_match(t)
        })
        .count() as f64
        / n;
    if corrupted > 0.10 {
        points += 2;
    } else if corrupted > 0.05 {
        points += 1;
    }

    // 7. Dictionary miss rate on words of length >= 4, when enough exist.
    let long_words: Vec<String> = tokens
        .iter()
        .map(|t| clean_word(t))
        .filter(|w| w.chars().count() >= 4)
        .collect();
    if long_words.len() >= 10 {
        let misses = long_words
            .iter()
            .filter(|w| !DICTIONARY.contains(w.as_str()))
            .count() as f64
            / long_words.len() as f64;
        if misses > 0.70 {
            points += 2;
        } else if misses > 0.55 {
            points += 1;
        }
    }

    (points as f64 / MAX_POINTS).clamp(0.0, 1.0)
}
