//! Stage orchestration: sequence the six stages per PDF, checkpoint after
//! each, honor interrupts between stages, and assemble the reports.
//!
//! ## Scheduling model
//!
//! Single-threaded cooperative. Within a PDF the stages run strictly
//! serially 1→6 (5.5 and 5.6 live inside stage 5); across a batch the
//! PDFs run sequentially in sorted manifest order. The parallel per-file
//! arrays (`manifest.files`, profiles, routes, …) share one index, and
//! resume restores that parallelism by reloading artifacts for the file
//! list obtained from a fresh **sorted** enumeration.
//!
//! ## Interruption
//!
//! SIGINT/SIGTERM set one atomic flag. The flag is polled **between**
//! stages only — a stage is the unit of atomicity — so the current stage
//! finishes, the checkpoint is written, and the caller exits 130. A second
//! signal forces exit 1.

use crate::capability::Capabilities;
use crate::checkpoint::{Checkpoint, CHECKPOINT_FILE};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::model::{
    Classification, DocumentProfile, ExtractedDocument, Manifest, PageRoute, RouteDecision,
    SourceFile,
};
use crate::pipeline::{classify, export, extract, intake, profile, qc, reclassify, route, segment, strip};
use crate::report::{
    type_histogram, BatchReport, DecisionLog, ExtractionSummary, IntakeCounts, PipelineReport,
    ProfilingSummary, SegmentationSummary,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{info, warn};

/// The seven per-PDF output subdirectories.
pub const OUTPUT_SKELETON: [&str; 7] = [
    "intake",
    "profiles",
    "routes",
    "extracted",
    "segments",
    "markdown",
    "review",
];

static INTERRUPTED: AtomicBool = AtomicBool::new(false);
static INTERRUPT_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Request a graceful stop: the current stage completes, a checkpoint is
/// written, and the run returns with `interrupted = true`.
pub fn request_interrupt() {
    let prior = INTERRUPT_COUNT.fetch_add(1, Ordering::SeqCst);
    if prior >= 1 {
        // Second signal: the operator means it.
        eprintln!("second interrupt, forcing exit");
        std::process::exit(1);
    }
    INTERRUPTED.store(true, Ordering::SeqCst);
}

pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Reset the flag (a new run in the same process starts clean).
pub fn clear_interrupt() {
    INTERRUPTED.store(false, Ordering::SeqCst);
    INTERRUPT_COUNT.store(0, Ordering::SeqCst);
}

/// Outcome of a full run.
#[derive(Debug)]
pub struct RunOutcome {
    pub batch: BatchReport,
    pub interrupted: bool,
}

/// Lightweight probe used by `inspect`: capabilities and page count only.
#[derive(Debug, serde::Serialize)]
pub struct InspectReport {
    pub file: PathBuf,
    pub page_count: Option<usize>,
    pub pdftotext: bool,
    pub pdftoppm: bool,
    pub tesseract: bool,
    pub limitations: Vec<String>,
}

/// Probe a PDF and the environment without running the pipeline.
pub async fn inspect(pdf: &Path, cfg: &PipelineConfig) -> Result<InspectReport, PipelineError> {
    if !pdf.exists() {
        return Err(PipelineError::SourceNotFound {
            path: pdf.to_path_buf(),
        });
    }
    let caps = Capabilities::detect();
    let page_count = crate::capability::probe_page_count(&caps, pdf, cfg.text_timeout_secs).await?;
    Ok(InspectReport {
        file: pdf.to_path_buf(),
        page_count,
        pdftotext: caps.pdftotext,
        pdftoppm: caps.pdftoppm,
        tesseract: caps.tesseract,
        limitations: caps.limitations(),
    })
}

// ── Layout helpers ───────────────────────────────────────────────────────

/// Create the seven-directory skeleton inside one per-PDF output dir.
pub fn prepare_output_dir(dir: &Path) -> Result<(), PipelineError> {
    for sub in OUTPUT_SKELETON {
        std::fs::create_dir_all(dir.join(sub)).map_err(|e| PipelineError::OutputWriteFailed {
            path: dir.join(sub),
            source: e,
        })?;
    }
    Ok(())
}

/// Filesystem-safe basename for a source file (stem, conservative charset).
pub fn file_base(name: &str) -> String {
    let stem = name.strip_suffix(".pdf").or_else(|| name.strip_suffix(".PDF")).unwrap_or(name);
    stem.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn manifest_path(dir: &Path) -> PathBuf {
    dir.join("intake").join(format!(
        "manifest-{}.json",
        chrono::Utc::now().format("%Y-%m-%d")
    ))
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), PipelineError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| PipelineError::Internal(format!("serialize {}: {e}", path.display())))?;
    export::write_atomic(path, &json)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    let raw = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("malformed stage artifact {}: {e}", path.display());
            None
        }
    }
}

// ── Per-PDF state ────────────────────────────────────────────────────────

/// In-memory state for one PDF as it moves through the stages. Fields fill
/// in stage order; resume repopulates them from disk artifacts.
struct PdfState {
    source: SourceFile,
    page_count: Option<usize>,
    fast: Option<ExtractedDocument>,
    doc_profile: Option<DocumentProfile>,
    classification: Option<Classification>,
    route: Option<RouteDecision>,
    page_routes: Option<Vec<PageRoute>>,
    extracted: Option<ExtractedDocument>,
    segments: Option<Vec<crate::model::Segment>>,
}

impl PdfState {
    fn new(source: SourceFile) -> Self {
        Self {
            source,
            page_count: None,
            fast: None,
            doc_profile: None,
            classification: None,
            route: None,
            page_routes: None,
            extracted: None,
            segments: None,
        }
    }
}

// ── Public entry points ──────────────────────────────────────────────────

/// Run the pipeline over a source file or directory.
pub async fn run(
    source: &Path,
    output: &Path,
    cfg: &PipelineConfig,
) -> Result<RunOutcome, PipelineError> {
    let caps = Capabilities::detect();
    run_with_capabilities(source, output, cfg, &caps, None).await
}

/// Synchronous wrapper around [`run`]; creates a runtime internally.
pub fn run_sync(
    source: &Path,
    output: &Path,
    cfg: &PipelineConfig,
) -> Result<RunOutcome, PipelineError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| PipelineError::Internal(format!("tokio runtime: {e}")))?
        .block_on(run(source, output, cfg))
}

/// Resume from a checkpoint file. The source path is read from the
/// checkpoint; a corrupt or tampered checkpoint restarts from stage 1
/// with a warning, reproducing a clean run.
pub async fn resume(
    checkpoint_path: &Path,
    cfg: &PipelineConfig,
) -> Result<RunOutcome, PipelineError> {
    if !checkpoint_path.exists() {
        return Err(PipelineError::CheckpointNotFound {
            path: checkpoint_path.to_path_buf(),
        });
    }
    let out_dir = checkpoint_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let validated = Checkpoint::load(checkpoint_path);
    let source = match &validated {
        Some(c) => c.source.clone(),
        None => {
            // Checksum or parse failure: salvage the source path so the run
            // can restart cleanly from stage 1.
            let source = salvage_source(checkpoint_path).ok_or_else(|| {
                PipelineError::CheckpointNotFound {
                    path: checkpoint_path.to_path_buf(),
                }
            })?;
            warn!("invalid checkpoint; restarting {} from stage 1", source.display());
            source
        }
    };

    let caps = Capabilities::detect();
    run_with_capabilities(&source, &out_dir, cfg, &caps, validated).await
}

/// Best-effort extraction of `source` from a checkpoint that failed
/// validation.
fn salvage_source(path: &Path) -> Option<PathBuf> {
    let raw = std::fs::read_to_string(path).ok()?;
    let value: serde_json::Value = serde_json::from_str(&raw).ok()?;
    value.get("source")?.as_str().map(PathBuf::from)
}

async fn run_with_capabilities(
    source: &Path,
    output: &Path,
    cfg: &PipelineConfig,
    caps: &Capabilities,
    resume_checkpoint: Option<Checkpoint>,
) -> Result<RunOutcome, PipelineError> {
    let limitations = caps.limitations();
    for l in &limitations {
        warn!("{l}");
    }

    // Stage 1 (batch level): enumerate, fingerprint, dedup. Resume reloads
    // from a fresh sorted enumeration — the determinism invariant.
    let manifest = intake::ingest(source, cfg)?;
    let is_batch = source.is_dir();
    let multi_file = manifest.files.len() > 1;

    let mut batch = BatchReport::new(manifest.source_path.clone());
    let mut was_interrupted = false;

    for file in &manifest.files {
        let per_dir = if is_batch {
            output.join(file_base(&file.name))
        } else {
            output.to_path_buf()
        };
        prepare_output_dir(&per_dir)?;

        let resume_for_this = resume_checkpoint
            .as_ref()
            .filter(|c| c.source == manifest.source_path || c.source == file.source_path)
            .cloned();

        match process_pdf(
            file.clone(),
            &manifest,
            &per_dir,
            multi_file,
            caps,
            cfg,
            &limitations,
            resume_for_this,
        )
        .await
        {
            Ok(Some(report)) => batch.merge(report),
            Ok(None) => {
                info!("interrupt observed; checkpoint saved, stopping batch");
                was_interrupted = true;
                break;
            }
            // Encrypted inputs are an input-class error: skip the file,
            // keep the batch moving, surface it in the report.
            Err(PipelineError::EncryptedPdf { path }) => {
                warn!("{}: encrypted PDF, skipping", path.display());
                batch.merge(skipped_report(
                    &file.name,
                    &manifest,
                    &limitations,
                    "encrypted PDF; password-protected inputs are unsupported",
                ));
            }
            Err(e) => return Err(e),
        }

        if interrupted() {
            info!("interrupt observed between files; stopping batch");
            was_interrupted = true;
            break;
        }
    }

    // The parallel-array invariant: one report per processed file.
    if !was_interrupted && batch.reports.len() != manifest.files.len() {
        return Err(PipelineError::InvariantViolation(format!(
            "reports ({}) out of step with manifest files ({})",
            batch.reports.len(),
            manifest.files.len()
        )));
    }

    batch.interrupted = was_interrupted;
    if is_batch {
        write_json(&output.join("batch-report.json"), &batch)?;
    }

    Ok(RunOutcome {
        batch,
        interrupted: was_interrupted,
    })
}

// ── The six stages for one PDF ───────────────────────────────────────────

/// Minimal report for a file the pipeline could not process at all.
fn skipped_report(
    name: &str,
    manifest: &Manifest,
    limitations: &[String],
    reason: &str,
) -> PipelineReport {
    PipelineReport {
        file: name.to_string(),
        generated_at: chrono::Utc::now().to_rfc3339(),
        pipeline_version: crate::config::PIPELINE_VERSION.to_string(),
        intake: IntakeCounts {
            registered: manifest.summary.registered,
            duplicates: manifest.summary.duplicates,
            errors: manifest.summary.errors,
        },
        profiling: ProfilingSummary {
            page_count: 0,
            readability_score: 0.0,
            quality_tier: "F".to_string(),
            degraded_count: 0,
            has_text_layer: false,
        },
        route_method: "ManualReview".to_string(),
        extraction: ExtractionSummary {
            method: "manual-review".to_string(),
            confidence: 0.0,
            ocr_page_count: 0,
            fallback_triggered: false,
        },
        segmentation: SegmentationSummary {
            total_segments: 0,
            types: crate::model::TypeHistogram::new(),
        },
        exported_files: 0,
        qc: crate::model::QcSummary::default(),
        limitations: limitations.to_vec(),
        review_needed: true,
        review_reasons: vec![reason.to_string()],
    }
}

/// Run stages 1–6 for one PDF. Returns `None` when an interrupt was
/// observed at a stage boundary — the checkpoint is already saved.
#[allow(clippy::too_many_arguments)]
async fn process_pdf(
    file: SourceFile,
    batch_manifest: &Manifest,
    per_dir: &Path,
    multi_file: bool,
    caps: &Capabilities,
    cfg: &PipelineConfig,
    limitations: &[String],
    resume_checkpoint: Option<Checkpoint>,
) -> Result<Option<PipelineReport>, PipelineError> {
    let base = file_base(&file.name);
    let checkpoint_path = per_dir.join(CHECKPOINT_FILE);
    let mut ckpt =
        resume_checkpoint.unwrap_or_else(|| Checkpoint::new(file.source_path.clone()));
    ckpt.source = file.source_path.clone();
    let mut decisions = DecisionLog::open(&per_dir.join("pipeline-decisions.log"));
    let mut state = PdfState::new(file);

    // Artifact paths, fixed per stage.
    let profile_path = per_dir.join("profiles").join(format!("{base}-profile.json"));
    let class_path = per_dir
        .join("profiles")
        .join(format!("{base}-classification.json"));
    let route_path = per_dir.join("routes").join(format!("{base}-route.json"));
    let page_routes_path = per_dir
        .join("routes")
        .join(format!("{base}-page-routes.json"));
    let extracted_path = per_dir
        .join("extracted")
        .join(format!("{base}-extracted.json"));
    let segments_path = per_dir
        .join("segments")
        .join(format!("{base}-segments.json"));

    // Reload completed stages from disk; a malformed artifact voids that
    // stage and everything after it.
    if ckpt.is_stage_complete(2) {
        state.doc_profile = read_json(&profile_path);
        state.classification = read_json(&class_path);
        if state.doc_profile.is_none() || state.classification.is_none() {
            warn!("{base}: stage 2 artifacts unusable, recomputing from stage 2");
            ckpt.completed_stages.retain(|s| *s < 2);
        }
    }
    if ckpt.is_stage_complete(3) {
        state.route = read_json(&route_path);
        state.page_routes = read_json(&page_routes_path);
        if state.route.is_none() || state.page_routes.is_none() {
            ckpt.completed_stages.retain(|s| *s < 3);
        }
    }
    if ckpt.is_stage_complete(4) {
        state.extracted = read_json(&extracted_path);
        if state.extracted.is_none() {
            ckpt.completed_stages.retain(|s| *s < 4);
        }
    }
    if ckpt.is_stage_complete(5) {
        state.segments = read_json(&segments_path);
        if state.segments.is_none() {
            ckpt.completed_stages.retain(|s| *s < 5);
        }
    }

    // ── Stage 1: intake ──────────────────────────────────────────────────
    if !ckpt.is_stage_complete(1) {
        let started = Instant::now();
        let manifest_file = manifest_path(per_dir);
        let single = Manifest {
            generated_at: batch_manifest.generated_at.clone(),
            source_path: state.source.source_path.clone(),
            files: vec![state.source.clone()],
            duplicates: Vec::new(),
            errors: Vec::new(),
            summary: crate::model::IntakeSummary {
                total_scanned: 1,
                registered: 1,
                duplicates: 0,
                errors: 0,
            },
        };
        write_json(&manifest_file, &single)?;
        decisions.log("intake", &format!("registered {} ({} bytes)", state.source.name, state.source.size));
        ckpt.complete_stage(1, started.elapsed().as_millis() as u64, Some(manifest_file));
        ckpt.save(&checkpoint_path)?;
        if interrupted() {
            return Ok(None);
        }
    }

    // The bootstrap fast parse feeds stages 2–4; it is recomputed on
    // resume (deterministic, and cheap next to OCR).
    let needs_bootstrap =
        !ckpt.is_stage_complete(2) || !ckpt.is_stage_complete(3) || !ckpt.is_stage_complete(4);
    if needs_bootstrap {
        state.page_count = crate::capability::probe_page_count(
            caps,
            &state.source.source_path,
            cfg.text_timeout_secs,
        )
        .await?;
        state.fast = Some(
            extract::fast_parse_per_page(
                &state.source.source_path,
                state.page_count,
                caps,
                cfg,
            )
            .await,
        );
    }

    // ── Stage 2: profiling + document classification ─────────────────────
    if !ckpt.is_stage_complete(2) {
        let started = Instant::now();
        let fast = state.fast.as_ref().expect("bootstrap ran");
        let doc_profile = profile::profile_document(&fast.pages, cfg);
        let full_text: String = fast
            .pages
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let classification = classify::classify(&full_text, cfg.secondary_emit_threshold);
        decisions.log(
            "profile",
            &format!(
                "median readability {:.0}, tier {:?}, {} degraded of {} pages; classified {} ({:.2})",
                doc_profile.readability_score,
                doc_profile.quality_tier,
                doc_profile.degraded_count,
                fast.pages.len(),
                classification.primary_type,
                classification.confidence
            ),
        );
        write_json(&profile_path, &doc_profile)?;
        write_json(&class_path, &classification)?;
        state.doc_profile = Some(doc_profile);
        state.classification = Some(classification);
        ckpt.complete_stage(2, started.elapsed().as_millis() as u64, Some(profile_path.clone()));
        ckpt.save(&checkpoint_path)?;
        if interrupted() {
            return Ok(None);
        }
    }

    // ── Stage 3: routing ─────────────────────────────────────────────────
    if !ckpt.is_stage_complete(3) {
        let started = Instant::now();
        let doc_profile = state.doc_profile.as_ref().expect("stage 2 output");
        let decision = route::route_document(
            &state.source.name,
            doc_profile,
            caps,
            route::RasterHints::default(),
            cfg,
        );
        let page_routes = route::route_pages(&doc_profile.page_profiles, cfg);
        decisions.log(
            "route",
            &format!(
                "{:?} via {} ({}); {} of {} pages need OCR",
                decision.method,
                decision.engine,
                decision.rationale,
                page_routes.iter().filter(|r| r.needs_ocr).count(),
                page_routes.len()
            ),
        );
        write_json(&route_path, &decision)?;
        write_json(&page_routes_path, &page_routes)?;
        state.route = Some(decision);
        state.page_routes = Some(page_routes);
        ckpt.complete_stage(3, started.elapsed().as_millis() as u64, Some(route_path.clone()));
        ckpt.save(&checkpoint_path)?;
        if interrupted() {
            return Ok(None);
        }
    }

    // ── Stage 4: hybrid extraction + chrome stripping ────────────────────
    if !ckpt.is_stage_complete(4) {
        let started = Instant::now();
        let fast = state.fast.as_ref().expect("bootstrap ran");
        let decision = state.route.as_ref().expect("stage 3 output");
        let page_routes = state.page_routes.as_ref().expect("stage 3 output");
        let mut extracted = extract::extract_with_fallback(
            &state.source.source_path,
            decision.method,
            fast,
            page_routes,
            caps,
            cfg,
        )
        .await;
        let stripped = strip::strip_repetitive_content(&mut extracted.pages, cfg);
        extracted.overall_confidence = extract::overall_confidence(&extracted.pages);
        extracted.classification = state.classification.clone();
        decisions.log(
            "extract",
            &format!(
                "method {} confidence {:.2}, {} OCR pages, {} recurring fingerprints stripped{}",
                extracted.method,
                extracted.overall_confidence,
                extracted.ocr_pages.as_ref().map(Vec::len).unwrap_or(0),
                stripped,
                if extracted.fallback_triggered { " (fallback chain advanced)" } else { "" }
            ),
        );
        write_json(&extracted_path, &extracted)?;
        state.extracted = Some(extracted);
        ckpt.complete_stage(4, started.elapsed().as_millis() as u64, Some(extracted_path.clone()));
        ckpt.save(&checkpoint_path)?;
        if interrupted() {
            return Ok(None);
        }
    }

    // ── Stage 5: segmentation + reclassification (5.5, 5.6) ──────────────
    if !ckpt.is_stage_complete(5) {
        let started = Instant::now();
        let extracted = state.extracted.as_ref().expect("stage 4 output");
        let mut segments =
            segment::segment_document(&extracted.pages, state.classification.as_ref(), cfg);
        let orphans = segment::check_coverage(&segments, extracted.pages.len());
        if !orphans.is_empty() {
            decisions.log("segment", &format!("orphan pages after segmentation: {orphans:?}"));
        }
        reclassify::reclassify_l1(&mut segments, &extracted.pages, cfg);
        reclassify::reclassify_l2(&mut segments, state.classification.as_ref());
        decisions.log(
            "segment",
            &format!(
                "{} segments; types: {:?}",
                segments.len(),
                type_histogram(&segments)
            ),
        );
        write_json(&segments_path, &segments)?;
        state.segments = Some(segments);
        ckpt.complete_stage(5, started.elapsed().as_millis() as u64, Some(segments_path.clone()));
        ckpt.save(&checkpoint_path)?;
        if interrupted() {
            return Ok(None);
        }
    }

    // ── Stage 6: export + QC + report ────────────────────────────────────
    let started = Instant::now();
    let extracted = state.extracted.as_ref().expect("stage 4 output");
    let segments = state.segments.as_ref().expect("stage 5 output");
    let markdown_dir = per_dir.join("markdown");
    let nest = multi_file.then(|| file_base(&state.source.name));
    export::export_segments(
        segments,
        extracted,
        &state.source,
        &markdown_dir,
        nest.as_deref(),
    )?;

    let qc_dir = match &nest {
        Some(n) => markdown_dir.join(n),
        None => markdown_dir.clone(),
    };
    let qc_report = qc::validate_exports(&qc_dir, &per_dir.join("review"))?;
    decisions.log(
        "qc",
        &format!(
            "passed {} flagged {} rejected {} mislabels {}",
            qc_report.summary.passed,
            qc_report.summary.flagged,
            qc_report.summary.rejected,
            qc_report.summary.mislabels_caught
        ),
    );

    let doc_profile = state.doc_profile.as_ref().expect("stage 2 output");
    let decision = state.route.as_ref().expect("stage 3 output");

    let mut review_reasons: Vec<String> = Vec::new();
    if extracted.method == "manual-review" {
        review_reasons.push("extraction fell through to manual-review".into());
    }
    if qc_report.summary.rejected > 0 {
        review_reasons.push(format!("{} files rejected by QC", qc_report.summary.rejected));
    }
    if !qc_report.coverage_flags.is_empty() {
        review_reasons.push(format!(
            "{} pages uncovered by segments",
            qc_report.coverage_flags.len()
        ));
    }

    let report = PipelineReport {
        file: state.source.name.clone(),
        generated_at: chrono::Utc::now().to_rfc3339(),
        pipeline_version: crate::config::PIPELINE_VERSION.to_string(),
        intake: IntakeCounts {
            registered: batch_manifest.summary.registered,
            duplicates: batch_manifest.summary.duplicates,
            errors: batch_manifest.summary.errors,
        },
        profiling: ProfilingSummary {
            page_count: extracted.pages.len(),
            readability_score: doc_profile.readability_score,
            quality_tier: format!("{:?}", doc_profile.quality_tier),
            degraded_count: doc_profile.degraded_count,
            has_text_layer: doc_profile.has_text_layer,
        },
        route_method: format!("{:?}", decision.method),
        extraction: ExtractionSummary {
            method: extracted.method.clone(),
            confidence: extracted.overall_confidence,
            ocr_page_count: extracted.ocr_pages.as_ref().map(Vec::len).unwrap_or(0),
            fallback_triggered: extracted.fallback_triggered,
        },
        segmentation: SegmentationSummary {
            total_segments: segments.len(),
            types: type_histogram(segments),
        },
        exported_files: segments.len(),
        qc: qc_report.summary,
        limitations: limitations.to_vec(),
        review_needed: !review_reasons.is_empty(),
        review_reasons,
    };
    write_json(&per_dir.join("pipeline-report.json"), &report)?;
    ckpt.complete_stage(6, started.elapsed().as_millis() as u64, Some(markdown_dir));
    ckpt.save(&checkpoint_path)?;

    info!(
        "{}: {} segments, QC {}P/{}F/{}R",
        state.source.name,
        segments.len(),
        report.qc.passed,
        report.qc.flagged,
        report.qc.rejected
    );
    Ok(Some(report))
}
