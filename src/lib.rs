//! # pje2md
//!
//! Segment Brazilian legal-case PDFs (PJe exports) into classified
//! per-piece Markdown files with full provenance metadata.
//!
//! Case files arrive as monolithic PDFs — often hundreds of pages mixing
//! born-digital petitions, degraded scans, and the PJe system's repetitive
//! chrome on every page. This crate runs a six-stage deterministic
//! pipeline over them:
//!
//! ```text
//! PDF(s)
//!  │
//!  ├─ 1. Intake      enumerate sorted, SHA-256 fingerprint, dedup
//!  ├─ 2. Profile     per-page readability + garbage score; L1 classify
//!  ├─ 3. Route       fast-parse vs OCR, per document and per page
//!  ├─ 4. Extract     hybrid fast+OCR with rotation retry; strip chrome
//!  ├─ 5. Segment     heading-only boundaries; L1+L2 reclassification
//!  └─ 6. Export      Markdown + frontmatter; QC validation; reports
//! ```
//!
//! Everything is deterministic: enumeration is sorted, stages run
//! strictly serially, every stage persists its artifact, and a
//! checksum-guarded checkpoint makes runs resumable (`--resume`).
//! External tools (`pdftotext`, `pdftoppm`, `tesseract`, `sips`/
//! `convert`) are capability providers probed at startup; a missing tool
//! downgrades the affected routes and is reported, never fatal.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use pje2md::{run, PipelineConfig};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::default();
//!     let outcome = run(Path::new("autos.pdf"), Path::new("out"), &config).await?;
//!     println!("{} PDFs, QC passed {}", outcome.batch.pdf_count, outcome.batch.summary.passed);
//!     Ok(())
//! }
//! ```
//!
//! The classifier rule table, the QC mislabel rules, and the L2
//! transition tables are data files under `rules/`, embedded at compile
//! time and parsed once at startup, so the legal-domain vocabulary can be
//! audited without reading Rust.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod capability;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod pipeline;
pub mod report;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PipelineConfig, PipelineConfigBuilder, PIPELINE_VERSION};
pub use error::{PageFailure, PipelineError};
pub use orchestrator::{inspect, resume, run, run_sync, InspectReport, RunOutcome};
pub use report::{BatchReport, PipelineReport};
