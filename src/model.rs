//! Data model shared across pipeline stages.
//!
//! Ownership is simple on purpose: the orchestrator owns every entity
//! transitively, each entity is produced by exactly one stage and read by
//! later ones. The only entity mutated after its producing stage is
//! [`Segment`], which stages 5.5 and 5.6 decorate in place. Everything here
//! serializes to the on-disk JSON artifacts, so field names are part of the
//! interchange contract and must not drift.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

// ── Intake (C1) ──────────────────────────────────────────────────────────

/// One registered source PDF.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    pub name: String,
    /// Absolute path.
    pub source_path: PathBuf,
    pub size: u64,
    /// Modification time (RFC 3339).
    pub modified: String,
    /// Full-file SHA-256, streamed.
    pub sha256: String,
    /// SHA-256 of the first 4096 bytes, for cheap cross-batch probing.
    pub sha256_prefix_4k: String,
    pub timestamp: String,
}

/// A file skipped because its full hash was already registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateEntry {
    pub name: String,
    pub sha256: String,
    /// Path of the first-seen file with the same hash.
    pub original_path: PathBuf,
}

/// A file that could not be read or fingerprinted. Non-fatal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeError {
    pub name: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntakeSummary {
    pub total_scanned: usize,
    pub registered: usize,
    pub duplicates: usize,
    pub errors: usize,
}

/// The deduplicated, deterministically ordered intake manifest.
///
/// `files` is sorted lexicographically by name; downstream stage arrays are
/// indexed positionally against it, so the order is load-bearing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub generated_at: String,
    pub source_path: PathBuf,
    pub files: Vec<SourceFile>,
    pub duplicates: Vec<DuplicateEntry>,
    pub errors: Vec<IntakeError>,
    pub summary: IntakeSummary,
}

// ── Extraction (C2) ──────────────────────────────────────────────────────

/// One extracted page of text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    /// 1-based.
    pub page_number: usize,
    pub text: String,
    /// In [0, 1].
    pub confidence: f64,
    /// Text shorter than [`crate::config::EMPTY_PAGE_CHARS`] or extraction failed.
    pub empty: bool,
    /// Open set: "fast-parse-poppler", "legacy-formfeed-split",
    /// "legacy-chunk-split", "ocr-standard", "ocr-enhanced", "failed".
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation_applied: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub word_garbage_score: Option<f64>,
    /// OCR text replaced the fast-parse text for this page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_replaced: Option<bool>,
    /// OCR ran but the fast-parse text scored better and was kept.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_fallback_to_fp: Option<bool>,
}

impl Page {
    /// An empty-page stub standing in for a failed extraction.
    pub fn failed(page_number: usize) -> Self {
        Self {
            page_number,
            text: String::new(),
            confidence: 0.0,
            empty: true,
            method: "failed".to_string(),
            rotation_applied: None,
            word_garbage_score: None,
            ocr_replaced: None,
            ocr_fallback_to_fp: None,
        }
    }
}

/// Full extraction result for one PDF.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedDocument {
    /// "fast-parse", "hybrid", "ocr-standard", "ocr-enhanced", "manual-review".
    pub method: String,
    pub pages: Vec<Page>,
    /// Mean confidence over non-empty pages.
    pub overall_confidence: f64,
    pub fallback_triggered: bool,
    /// 1-based numbers of pages that went through OCR.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_pages: Option<Vec<usize>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,
}

impl ExtractedDocument {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

// ── Quality profiling (C3) ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoiseLevel {
    Low,
    Medium,
    High,
}

/// Coarse readability bucket from the 0–100 score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityTier {
    A,
    B,
    C,
    D,
    F,
}

/// Per-page quality profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageProfile {
    pub page_number: usize,
    /// In [0, 100].
    pub readability_score: f64,
    pub noise_level: NoiseLevel,
    /// In [0, 1].
    pub word_garbage_score: f64,
    pub quality_tier: QualityTier,
    pub char_count: usize,
    pub is_degraded: bool,
    pub empty: bool,
    /// Set when document-level propagation flipped a clean page to degraded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub propagated: Option<bool>,
}

/// Document-level aggregation of page profiles.
///
/// Readability aggregates by median, not mean, so a few degraded pages
/// cannot hide behind a clean majority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentProfile {
    pub page_profiles: Vec<PageProfile>,
    /// Median readability over non-empty pages.
    pub readability_score: f64,
    pub quality_tier: QualityTier,
    /// Worst observed page noise.
    pub noise_level: NoiseLevel,
    /// 1-based numbers of degraded pages.
    pub degraded_pages: Vec<usize>,
    pub degraded_count: usize,
    pub clean_count: usize,
    pub is_mixed_quality: bool,
    /// Any page is non-empty and non-degraded.
    pub has_text_layer: bool,
}

// ── Classification (C4/C7) ───────────────────────────────────────────────

/// L1/L2 classification result. `primary_type` is always a whitelist member
/// or "unknown".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub primary_type: String,
    /// In [0, 1].
    pub confidence: f64,
    /// Pattern names that matched, for audit.
    pub indicators: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_confidence: Option<f64>,
    /// "entity-mention-only" or "structural-not-in-heading" when a
    /// disambiguation penalty applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disambiguation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reclassified: Option<bool>,
}

impl Classification {
    pub fn unknown() -> Self {
        Self {
            primary_type: "unknown".to_string(),
            confidence: 0.0,
            indicators: Vec::new(),
            secondary_type: None,
            secondary_confidence: None,
            disambiguation: None,
            reclassified: None,
        }
    }
}

// ── Routing (C5) ─────────────────────────────────────────────────────────

/// Document-level extraction method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DocRouteMethod {
    FastParse,
    OcrStandard,
    OcrEnhanced,
    ManualReview,
}

/// Per-page extraction method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PageRouteMethod {
    FastParse,
    OcrStandard,
    OcrEnhanced,
    Skip,
}

/// Image preprocessing requested before OCR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Preprocessing {
    AutoRotate,
    Deskew,
    Denoise,
    ContrastEnhance,
    Binarize,
}

/// Document-level route decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDecision {
    pub file: String,
    pub method: DocRouteMethod,
    /// "pdf-parse", "tesseract", or "-" for manual review.
    pub engine: String,
    pub preprocessing: Vec<Preprocessing>,
    pub rationale: String,
    pub quality_tier: QualityTier,
    pub readability_score: f64,
    pub routed_at: String,
}

/// Per-page route decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRoute {
    /// 1-based.
    pub page: usize,
    pub method: PageRouteMethod,
    pub needs_ocr: bool,
    pub reason: String,
}

// ── Segmentation (C6/C7) ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentType {
    Piece,
    Attachment,
    Exhibit,
    Cover,
    Separator,
}

impl SegmentType {
    /// Lowercase name used in exported filenames.
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentType::Piece => "piece",
            SegmentType::Attachment => "attachment",
            SegmentType::Exhibit => "exhibit",
            SegmentType::Cover => "cover",
            SegmentType::Separator => "separator",
        }
    }
}

/// Which pass last decided the segment's `doc_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClassificationSource {
    BoundaryRules,
    ProfilerFallback,
    PerSegmentL1,
    PerSegmentL2,
}

/// A boundary marker that fired on a segment's first page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundaryMarker {
    pub rule: String,
    pub weight: f64,
}

/// One procedural piece: a page range within one PDF.
///
/// Produced by stage 5, decorated in place by stages 5.5 and 5.6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    /// "seg-NNN", dense and 1-origin.
    pub segment_id: String,
    #[serde(rename = "type")]
    pub segment_type: SegmentType,
    /// Whitelist member or "unknown".
    pub doc_type: String,
    pub classification_source: ClassificationSource,
    /// 1-based, inclusive.
    pub page_start: usize,
    /// 1-based, inclusive.
    pub page_end: usize,
    /// Segmentation confidence in [0, 1].
    pub confidence: f64,
    pub boundary_markers: Vec<BoundaryMarker>,
    /// L1 confidence backing `doc_type`; stage 5.6 recomputes from this.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification_confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification_indicators: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub l2_previous_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub l2_boost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub l2_reasons: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cascade_level: Option<u8>,
}

impl Segment {
    pub fn page_count(&self) -> usize {
        self.page_end.saturating_sub(self.page_start) + 1
    }

    /// Formats the dense 1-origin id: `seg-001`, `seg-002`, …
    pub fn make_id(index: usize) -> String {
        format!("seg-{:03}", index + 1)
    }
}

// ── Reports ──────────────────────────────────────────────────────────────

/// QC tallies for one PDF. Additive across a batch.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QcSummary {
    pub passed: usize,
    pub flagged: usize,
    pub rejected: usize,
    pub mislabels_caught: usize,
}

impl QcSummary {
    /// Field-wise sum; batch merging must never be "last wins".
    pub fn add(&mut self, other: &QcSummary) {
        self.passed += other.passed;
        self.flagged += other.flagged;
        self.rejected += other.rejected;
        self.mislabels_caught += other.mislabels_caught;
    }
}

/// Histogram of segment doc_types, sorted by key for deterministic output.
pub type TypeHistogram = BTreeMap<String, usize>;
