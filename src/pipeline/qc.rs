//! QC validation of exported Markdown: metadata completeness, mislabel
//! detection, filename cross-checks, and page-range coverage.
//!
//! The ~20 mislabel rules are data (`rules/mislabel-rules.json`): for each
//! doc_type listed there, at least one required pattern must match the
//! body or the file is rejected. A rejection is a QC outcome, not a
//! pipeline failure — the file is copied into `review/` and tallied.

use crate::error::PipelineError;
use crate::model::QcSummary;
use crate::pipeline::export::ExportIndex;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{info, warn};

const MISLABEL_RAW: &str = include_str!("../../rules/mislabel-rules.json");

const MIN_BODY_CHARS: usize = 50;
const LOW_EXTRACTION_CONFIDENCE: f64 = 0.7;
const LOW_SEGMENTATION_CONFIDENCE: f64 = 0.6;

// ── Rule tables ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RawMislabel {
    rules: Vec<RawMislabelRule>,
    filename_expectations: HashMap<String, Vec<String>>,
}

#[derive(Deserialize)]
struct RawMislabelRule {
    doc_type: String,
    required_patterns: Vec<String>,
    description: String,
}

struct MislabelRule {
    patterns: Vec<Regex>,
    description: String,
}

struct MislabelTables {
    rules: HashMap<String, MislabelRule>,
    filename_expectations: HashMap<String, HashSet<String>>,
}

static TABLES: Lazy<MislabelTables> = Lazy::new(|| {
    let raw: RawMislabel =
        serde_json::from_str(MISLABEL_RAW).expect("rules/mislabel-rules.json is well-formed");
    MislabelTables {
        rules: raw
            .rules
            .into_iter()
            .map(|r| {
                (
                    r.doc_type,
                    MislabelRule {
                        patterns: r
                            .required_patterns
                            .iter()
                            .map(|p| {
                                RegexBuilder::new(p)
                                    .case_insensitive(true)
                                    .dot_matches_new_line(true)
                                    .build()
                                    .unwrap_or_else(|e| panic!("mislabel pattern '{p}': {e}"))
                            })
                            .collect(),
                        description: r.description,
                    },
                )
            })
            .collect(),
        filename_expectations: raw
            .filename_expectations
            .into_iter()
            .map(|(k, v)| (k, v.into_iter().collect()))
            .collect(),
    }
});

// ── Results ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Reject,
    Flag,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QcIssue {
    pub check: String,
    pub severity: Severity,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QcFileResult {
    pub file: String,
    /// "rejected" | "flagged" | "passed".
    pub status: String,
    pub issues: Vec<QcIssue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QcReport {
    pub files: Vec<QcFileResult>,
    pub summary: QcSummary,
    /// Document-level coverage flags (missing pages), one per page.
    pub coverage_flags: Vec<String>,
}

/// The parsed YAML frontmatter of an exported file. Every field optional:
/// completeness is a check, not a parse precondition.
#[derive(Debug, Default, Deserialize)]
pub struct Frontmatter {
    pub segment_id: Option<String>,
    pub source_pdf: Option<String>,
    pub source_pdf_path: Option<String>,
    pub page_range: Option<String>,
    pub total_pages: Option<usize>,
    pub segment_type: Option<String>,
    pub doc_type: Option<String>,
    pub segmentation_confidence: Option<f64>,
    pub extraction_method: Option<String>,
    pub extraction_confidence: Option<f64>,
    pub fallback_triggered: Option<bool>,
    pub generated_at: Option<String>,
    pub pipeline_version: Option<String>,
}

/// Split a Markdown file into (frontmatter, body).
pub fn split_frontmatter(contents: &str) -> (Option<Frontmatter>, &str) {
    let Some(rest) = contents.strip_prefix("---\n") else {
        return (None, contents);
    };
    let Some(end) = rest.find("\n---\n") else {
        return (None, contents);
    };
    let yaml = &rest[..end];
    let body = &rest[end + 5..];
    match serde_yaml::from_str::<Frontmatter>(yaml) {
        Ok(fm) => (Some(fm), body),
        Err(e) => {
            warn!("unparseable frontmatter: {e}");
            (None, body)
        }
    }
}

fn check_file(name: &str, contents: &str, overlap_pages: &[usize]) -> QcFileResult {
    let mut issues = Vec::new();
    let (fm, body) = split_frontmatter(contents);
    let fm = fm.unwrap_or_default();

    // 1. Metadata completeness (REJECT).
    let mut missing: Vec<&str> = Vec::new();
    if fm.segment_id.is_none() {
        missing.push("segment_id");
    }
    if fm.source_pdf.is_none() {
        missing.push("source_pdf");
    }
    if fm.page_range.is_none() {
        missing.push("page_range");
    }
    if fm.segment_type.is_none() {
        missing.push("segment_type");
    }
    if fm.doc_type.is_none() {
        missing.push("doc_type");
    }
    if fm.extraction_method.is_none() {
        missing.push("extraction_method");
    }
    if fm.generated_at.is_none() {
        missing.push("generated_at");
    }
    if !missing.is_empty() {
        issues.push(QcIssue {
            check: "metadata".into(),
            severity: Severity::Reject,
            detail: format!("missing required frontmatter fields: {}", missing.join(", ")),
        });
    }

    // 2. Empty content (REJECT).
    if body.trim().chars().count() < MIN_BODY_CHARS {
        issues.push(QcIssue {
            check: "empty-content".into(),
            severity: Severity::Reject,
            detail: format!("body below {MIN_BODY_CHARS} characters"),
        });
    }

    let doc_type = fm.doc_type.as_deref().unwrap_or("unknown");

    // 3. Mislabel rules (REJECT). Doc types without a rule are not checked.
    if let Some(rule) = TABLES.rules.get(doc_type) {
        if !rule.patterns.iter().any(|re| re.is_match(body)) {
            issues.push(QcIssue {
                check: "mislabel".into(),
                severity: Severity::Reject,
                detail: format!("labeled {doc_type} but {}", rule.description),
            });
        }
    }

    // 4. Filename vs classification (FLAG).
    if doc_type != "unknown" {
        for (token, expected) in &TABLES.filename_expectations {
            if name.contains(token.as_str()) && !expected.contains(doc_type) {
                issues.push(QcIssue {
                    check: "filename-mismatch".into(),
                    severity: Severity::Flag,
                    detail: format!("filename token '{token}' contradicts doc_type {doc_type}"),
                });
                break;
            }
        }
    }

    // 5. Unknown doc_type (FLAG).
    if doc_type == "unknown" {
        issues.push(QcIssue {
            check: "unknown-type".into(),
            severity: Severity::Flag,
            detail: "segment could not be classified".into(),
        });
    }

    // 6. Low confidences (FLAG).
    if let Some(c) = fm.extraction_confidence {
        if c < LOW_EXTRACTION_CONFIDENCE {
            issues.push(QcIssue {
                check: "low-extraction-confidence".into(),
                severity: Severity::Flag,
                detail: format!("extraction confidence {c:.2} below {LOW_EXTRACTION_CONFIDENCE}"),
            });
        }
    }
    if let Some(c) = fm.segmentation_confidence {
        if c < LOW_SEGMENTATION_CONFIDENCE {
            issues.push(QcIssue {
                check: "low-segmentation-confidence".into(),
                severity: Severity::Flag,
                detail: format!(
                    "segmentation confidence {c:.2} below {LOW_SEGMENTATION_CONFIDENCE}"
                ),
            });
        }
    }

    // 7. Page overlap from index.json (REJECT).
    if !overlap_pages.is_empty() {
        issues.push(QcIssue {
            check: "page-overlap".into(),
            severity: Severity::Reject,
            detail: format!("pages {overlap_pages:?} also covered by another segment"),
        });
    }

    let status = if issues.iter().any(|i| i.severity == Severity::Reject) {
        "rejected"
    } else if !issues.is_empty() {
        "flagged"
    } else {
        "passed"
    };
    QcFileResult {
        file: name.to_string(),
        status: status.to_string(),
        issues,
    }
}

fn parse_range(pages: &str) -> Option<(usize, usize)> {
    let (a, b) = pages.split_once('-')?;
    Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
}

/// Validate one export directory against `index.json`; copy rejected
/// files into `review_dir`.
pub fn validate_exports(markdown_dir: &Path, review_dir: &Path) -> Result<QcReport, PipelineError> {
    let index_path = markdown_dir.join("index.json");
    let raw = std::fs::read_to_string(&index_path).map_err(|e| {
        PipelineError::OutputWriteFailed {
            path: index_path.clone(),
            source: e,
        }
    })?;
    let index: ExportIndex = serde_json::from_str(&raw)
        .map_err(|e| PipelineError::Internal(format!("corrupt index.json: {e}")))?;

    // Coverage analysis over the declared ranges.
    let mut coverage: HashMap<usize, Vec<usize>> = HashMap::new();
    let ranges: Vec<Option<(usize, usize)>> =
        index.files.iter().map(|e| parse_range(&e.pages)).collect();
    for (i, range) in ranges.iter().enumerate() {
        if let Some((start, end)) = range {
            for p in *start..=*end {
                coverage.entry(p).or_default().push(i);
            }
        }
    }
    let mut coverage_flags: Vec<String> = (1..=index.total_pages)
        .filter(|p| !coverage.contains_key(p))
        .map(|p| format!("page {p} not covered by any segment"))
        .collect();
    coverage_flags.sort();

    let mut files = Vec::with_capacity(index.files.len());
    let mut summary = QcSummary::default();

    for (i, entry) in index.files.iter().enumerate() {
        let overlap_pages: Vec<usize> = ranges[i]
            .map(|(s, e)| {
                (s..=e)
                    .filter(|p| coverage.get(p).map(|v| v.len() > 1).unwrap_or(false))
                    .collect()
            })
            .unwrap_or_default();

        let contents = match std::fs::read_to_string(&entry.file_path) {
            Ok(c) => c,
            Err(e) => {
                warn!("{}: unreadable export: {e}", entry.file_path.display());
                files.push(QcFileResult {
                    file: entry.file.clone(),
                    status: "rejected".into(),
                    issues: vec![QcIssue {
                        check: "unreadable".into(),
                        severity: Severity::Reject,
                        detail: e.to_string(),
                    }],
                });
                summary.rejected += 1;
                continue;
            }
        };

        let result = check_file(&entry.file, &contents, &overlap_pages);
        match result.status.as_str() {
            "rejected" => {
                summary.rejected += 1;
                if result.issues.iter().any(|i| i.check == "mislabel") {
                    summary.mislabels_caught += 1;
                }
                std::fs::create_dir_all(review_dir).map_err(|e| {
                    PipelineError::OutputWriteFailed {
                        path: review_dir.to_path_buf(),
                        source: e,
                    }
                })?;
                if let Err(e) = std::fs::copy(&entry.file_path, review_dir.join(&entry.file)) {
                    warn!("could not copy {} to review/: {e}", entry.file);
                }
            }
            "flagged" => summary.flagged += 1,
            _ => summary.passed += 1,
        }
        files.push(result);
    }

    info!(
        passed = summary.passed,
        flagged = summary.flagged,
        rejected = summary.rejected,
        mislabels = summary.mislabels_caught,
        "QC complete"
    );
    Ok(QcReport {
        files,
        summary,
        coverage_flags,
    })
}
