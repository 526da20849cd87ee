//! Error types for the pje2md pipeline.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`PipelineError`] — **Fatal**: the run cannot proceed at all (missing
//!   source, unwritable output directory, a broken code invariant). Returned
//!   as `Err(PipelineError)` from the top-level entry points and mapped to
//!   exit code 1 by the binary.
//!
//! * [`PageFailure`] — **Non-fatal**: one page of one PDF failed (a tool
//!   timed out, a raster came back empty). Absorbed at the stage boundary
//!   where it occurred: the page becomes an empty-page stub and the stage
//!   continues. Stored inside [`crate::model::Page`] records so reports can
//!   show partial degradation instead of losing the whole document.
//!
//! Capability absence is neither: a missing external tool downgrades the
//! route and is recorded in the report's `limitations` list.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pje2md library.
///
/// Per-page failures use [`PageFailure`] and never propagate here; a QC
/// rejection is a report outcome, not an error.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Input errors ─────────────────────────────────────────────────────
    /// Source path does not exist.
    #[error("source not found: '{path}'\nCheck the path exists and is readable.")]
    SourceNotFound { path: PathBuf },

    /// Source file exists but is not a PDF (bad magic bytes).
    #[error("file is not a valid PDF: '{path}' (first bytes: {magic:?})")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// A directory source contained no PDF files at all.
    #[error("no PDF files found under '{path}'")]
    NoPdfsFound { path: PathBuf },

    /// The PDF is encrypted; password-protected inputs are unsupported.
    #[error("PDF '{path}' is encrypted; password-protected inputs are not supported")]
    EncryptedPdf { path: PathBuf },

    // ── Checkpoint errors ────────────────────────────────────────────────
    /// `--resume` was given but the checkpoint file does not exist.
    #[error("checkpoint not found: '{path}'")]
    CheckpointNotFound { path: PathBuf },

    // ── I/O errors ───────────────────────────────────────────────────────
    /// Could not create or write into the output directory tree.
    #[error("failed to write output '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Invariant violations ─────────────────────────────────────────────
    /// A code invariant was broken (e.g. parallel arrays out of step).
    /// These indicate a bug, not bad input.
    #[error("pipeline invariant violated: {0}")]
    InvariantViolation(String),

    // ── Catch-all ────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// A non-fatal failure for a single page of a single PDF.
///
/// The extractor converts these into empty-page stubs; the stage keeps
/// going. Serialized so extracted artifacts preserve the failure detail.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageFailure {
    /// Per-page text extraction failed or produced no output.
    #[error("page {page}: text extraction failed: {detail}")]
    ExtractFailed { page: usize, detail: String },

    /// Rasterization produced no image for the page.
    #[error("page {page}: rasterization failed: {detail}")]
    RasterFailed { page: usize, detail: String },

    /// OCR run failed on the page image.
    #[error("page {page}: OCR failed: {detail}")]
    OcrFailed { page: usize, detail: String },

    /// An external tool exceeded its inline timeout.
    #[error("page {page}: {tool} timed out after {secs}s")]
    ToolTimeout { page: usize, tool: String, secs: u64 },
}

impl PageFailure {
    /// 1-based page number the failure belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageFailure::ExtractFailed { page, .. }
            | PageFailure::RasterFailed { page, .. }
            | PageFailure::OcrFailed { page, .. }
            | PageFailure::ToolTimeout { page, .. } => *page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_display_includes_path() {
        let e = PipelineError::SourceNotFound {
            path: PathBuf::from("/tmp/missing.pdf"),
        };
        assert!(e.to_string().contains("/tmp/missing.pdf"));
    }

    #[test]
    fn page_failure_reports_page() {
        let f = PageFailure::ToolTimeout {
            page: 7,
            tool: "tesseract".into(),
            secs: 60,
        };
        assert_eq!(f.page(), 7);
        assert!(f.to_string().contains("tesseract"));
    }
}
