//! Configuration for a pipeline run.
//!
//! Every tunable threshold lives in [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. Keeping every knob in one record makes it
//! trivial to serialize a run's exact parameters into the decision log and
//! to diff two runs to understand why their outputs differ. No threshold is
//! allowed to exist as a scattered literal inside a stage.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};

/// Pipeline version stamped into checkpoints, frontmatter, and reports.
pub const PIPELINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A page whose extracted text is shorter than this is `empty`.
pub const EMPTY_PAGE_CHARS: usize = 50;

/// A page whose cleaned text is shorter than this is blank for segmentation.
pub const BLANK_PAGE_CHARS: usize = 30;

/// Configuration for a pipeline run.
///
/// Built via [`PipelineConfig::builder()`] or [`PipelineConfig::default()`].
/// Defaults reproduce the reference behavior for PJe case files; overriding
/// them is mostly useful in tests and calibration runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    // ── Intake ───────────────────────────────────────────────────────────
    /// Recurse into subdirectories when the source is a directory. Default: true.
    pub recursive: bool,
    /// Skip files whose full SHA-256 was already registered. Default: true.
    pub dedup_enabled: bool,

    // ── Quality profiling ────────────────────────────────────────────────
    /// Readability cutoffs for tiers A, B, C, D (score below the last is F).
    pub readability_tier_thresholds: [f64; 4],
    /// Readability below this marks a page degraded. Default: 60.
    pub degraded_readability: f64,
    /// Word-garbage score at or above this marks a page degraded. Default: 0.15.
    pub degraded_garbage: f64,
    /// When this fraction of non-empty pages is degraded, all non-empty
    /// pages are marked degraded. Default: 0.5.
    pub degraded_ratio_propagate: f64,
    /// A header/footer fingerprint seen on this fraction of non-empty pages
    /// is recurring chrome. Default: 0.4.
    pub repetitive_threshold: f64,
    /// Lines fingerprinted at the top of each page. Default: 12.
    pub header_lines: usize,
    /// Lines fingerprinted at the bottom of each page. Default: 8.
    pub footer_lines: usize,

    // ── OCR ──────────────────────────────────────────────────────────────
    /// Tesseract language. Default: "por".
    pub ocr_lang: String,
    /// Raster DPI for standard OCR. Default: 300.
    pub ocr_dpi_standard: u32,
    /// Raster DPI for enhanced OCR. Default: 400.
    pub ocr_dpi_enhanced: u32,
    /// Garbage score at or above which rotation retries run. Default: 0.4.
    pub rotation_garbage_gate: f64,
    /// Rotation retries stop early once a candidate scores below this. Default: 0.2.
    pub rotation_early_exit: f64,
    /// Hybrid arbitration: a kept page still above this garbage score has
    /// its confidence clamped. Default: 0.3.
    pub garbage_penalty_gate: f64,
    /// The clamped confidence for such pages. Default: 0.4.
    pub garbage_penalty_confidence: f64,

    // ── Extraction fallback chain ────────────────────────────────────────
    /// Overall confidence below this advances the fallback chain
    /// (fast-parse → ocr-standard → ocr-enhanced → manual-review). Default: 0.6.
    pub extraction_fallback_confidence: f64,

    // ── Classification ───────────────────────────────────────────────────
    /// L1 results below this also emit a secondary type. Default: 0.80.
    pub secondary_emit_threshold: f64,
    /// Stage 5.5 overrides a segment's type when the per-segment L1
    /// confidence reaches this. Default: 0.30.
    pub segment_override_confidence: f64,
    /// Segment type inference falls back to the document classification
    /// when its confidence reaches this. Default: 0.20.
    pub profiler_fallback_confidence: f64,

    // ── Segmentation ─────────────────────────────────────────────────────
    /// Minimum boundary-marker weight that opens a new piece. Default: 0.7.
    pub boundary_min_weight: f64,
    /// Paragraph-continuation suppression spares markers at or above this
    /// weight. Default: 0.85.
    pub suppression_weight: f64,

    // ── External-tool timeouts (seconds) ─────────────────────────────────
    /// Per-page text extraction. Default: 15.
    pub text_timeout_secs: u64,
    /// Single-page rasterization. Default: 30.
    pub raster_timeout_secs: u64,
    /// Single-page OCR. Default: 60.
    pub ocr_timeout_secs: u64,
    /// Image rotation. Default: 10.
    pub rotate_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            recursive: true,
            dedup_enabled: true,
            readability_tier_thresholds: [80.0, 60.0, 40.0, 20.0],
            degraded_readability: 60.0,
            degraded_garbage: 0.15,
            degraded_ratio_propagate: 0.5,
            repetitive_threshold: 0.4,
            header_lines: 12,
            footer_lines: 8,
            ocr_lang: "por".to_string(),
            ocr_dpi_standard: 300,
            ocr_dpi_enhanced: 400,
            rotation_garbage_gate: 0.4,
            rotation_early_exit: 0.2,
            garbage_penalty_gate: 0.3,
            garbage_penalty_confidence: 0.4,
            extraction_fallback_confidence: 0.6,
            secondary_emit_threshold: 0.80,
            segment_override_confidence: 0.30,
            profiler_fallback_confidence: 0.20,
            boundary_min_weight: 0.7,
            suppression_weight: 0.85,
            text_timeout_secs: 15,
            raster_timeout_secs: 30,
            ocr_timeout_secs: 60,
            rotate_timeout_secs: 10,
        }
    }
}

impl PipelineConfig {
    /// Create a new builder.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn recursive(mut self, v: bool) -> Self {
        self.config.recursive = v;
        self
    }

    pub fn dedup_enabled(mut self, v: bool) -> Self {
        self.config.dedup_enabled = v;
        self
    }

    pub fn ocr_lang(mut self, lang: impl Into<String>) -> Self {
        self.config.ocr_lang = lang.into();
        self
    }

    pub fn ocr_dpi_standard(mut self, dpi: u32) -> Self {
        self.config.ocr_dpi_standard = dpi.clamp(72, 600);
        self
    }

    pub fn ocr_dpi_enhanced(mut self, dpi: u32) -> Self {
        self.config.ocr_dpi_enhanced = dpi.clamp(72, 600);
        self
    }

    pub fn repetitive_threshold(mut self, t: f64) -> Self {
        self.config.repetitive_threshold = t.clamp(0.0, 1.0);
        self
    }

    pub fn degraded_ratio_propagate(mut self, t: f64) -> Self {
        self.config.degraded_ratio_propagate = t.clamp(0.0, 1.0);
        self
    }

    pub fn extraction_fallback_confidence(mut self, t: f64) -> Self {
        self.config.extraction_fallback_confidence = t.clamp(0.0, 1.0);
        self
    }

    pub fn text_timeout_secs(mut self, secs: u64) -> Self {
        self.config.text_timeout_secs = secs.max(1);
        self
    }

    pub fn ocr_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ocr_timeout_secs = secs.max(1);
        self
    }

    /// Build the configuration, validating cross-field constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        let t = &c.readability_tier_thresholds;
        if !(t[0] > t[1] && t[1] > t[2] && t[2] > t[3]) {
            return Err(PipelineError::InvalidConfig(format!(
                "tier thresholds must be strictly descending, got {t:?}"
            )));
        }
        if c.rotation_early_exit >= c.rotation_garbage_gate {
            return Err(PipelineError::InvalidConfig(format!(
                "rotation_early_exit ({}) must be below rotation_garbage_gate ({})",
                c.rotation_early_exit, c.rotation_garbage_gate
            )));
        }
        if c.ocr_dpi_enhanced < c.ocr_dpi_standard {
            return Err(PipelineError::InvalidConfig(format!(
                "enhanced DPI ({}) must be at least standard DPI ({})",
                c.ocr_dpi_enhanced, c.ocr_dpi_standard
            )));
        }
        Ok(self.config)
    }
}
