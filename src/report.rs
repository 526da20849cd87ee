//! Run reports and the decision log.
//!
//! [`PipelineReport`] is the compact per-PDF record — under 5 KB even for
//! a 100+ page input, which rules out embedding page texts or per-page
//! arrays; only counts, histograms, and headline numbers survive.
//! [`BatchReport`] wraps the per-PDF reports and **sums** their QC
//! tallies field-wise; a merge that kept only the last PDF's counters is
//! the bug the E4 scenario exists to catch.
//!
//! The decision log is the verbose counterpart: one timestamped line per
//! routing, fallback, boundary, or reclassification decision, appended to
//! `pipeline-decisions.log`.

use crate::model::{QcSummary, Segment, SegmentType, TypeHistogram};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeCounts {
    pub registered: usize,
    pub duplicates: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilingSummary {
    pub page_count: usize,
    pub readability_score: f64,
    pub quality_tier: String,
    pub degraded_count: usize,
    pub has_text_layer: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionSummary {
    pub method: String,
    pub confidence: f64,
    pub ocr_page_count: usize,
    pub fallback_triggered: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentationSummary {
    pub total_segments: usize,
    pub types: TypeHistogram,
}

/// Compact per-PDF record persisted as `pipeline-report.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub file: String,
    pub generated_at: String,
    pub pipeline_version: String,
    pub intake: IntakeCounts,
    pub profiling: ProfilingSummary,
    pub route_method: String,
    pub extraction: ExtractionSummary,
    pub segmentation: SegmentationSummary,
    pub exported_files: usize,
    pub qc: QcSummary,
    pub limitations: Vec<String>,
    pub review_needed: bool,
    pub review_reasons: Vec<String>,
}

/// Batch-level wrapper persisted as `batch-report.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub generated_at: String,
    pub source: PathBuf,
    pub pdf_count: usize,
    pub reports: Vec<PipelineReport>,
    /// Field-wise sum of every per-PDF QC summary.
    pub summary: QcSummary,
    pub interrupted: bool,
}

impl BatchReport {
    pub fn new(source: PathBuf) -> Self {
        Self {
            generated_at: chrono::Utc::now().to_rfc3339(),
            source,
            pdf_count: 0,
            reports: Vec::new(),
            summary: QcSummary::default(),
            interrupted: false,
        }
    }

    /// Fold one per-PDF report in. Additive, never "last wins".
    pub fn merge(&mut self, report: PipelineReport) {
        self.summary.add(&report.qc);
        self.pdf_count += 1;
        self.reports.push(report);
    }
}

/// Histogram of segment doc_types, deterministic order.
pub fn type_histogram(segments: &[Segment]) -> TypeHistogram {
    let mut hist = TypeHistogram::new();
    for seg in segments
        .iter()
        .filter(|s| s.segment_type != SegmentType::Separator)
    {
        *hist.entry(seg.doc_type.clone()).or_insert(0) += 1;
    }
    hist
}

/// Append-only audit log of pipeline decisions.
pub struct DecisionLog {
    file: Option<std::fs::File>,
}

impl DecisionLog {
    /// Open (append) the decisions log. Logging failures never fail the
    /// pipeline; a broken log degrades to a no-op with one warning.
    pub fn open(path: &Path) -> Self {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match std::fs::OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Self { file: Some(file) },
            Err(e) => {
                warn!("decision log unavailable ({e}); decisions will not be recorded");
                Self { file: None }
            }
        }
    }

    /// A no-op log for tests and library callers that do not want a file.
    pub fn disabled() -> Self {
        Self { file: None }
    }

    pub fn log(&mut self, stage: &str, message: &str) {
        if let Some(file) = self.file.as_mut() {
            let line = format!(
                "[{}] [{stage}] {message}\n",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ")
            );
            let _ = file.write_all(line.as_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ClassificationSource;

    fn report(passed: usize, flagged: usize, rejected: usize, mislabels: usize) -> PipelineReport {
        PipelineReport {
            file: "x.pdf".into(),
            generated_at: "2026-08-01T00:00:00Z".into(),
            pipeline_version: "0.3.0".into(),
            intake: IntakeCounts {
                registered: 1,
                duplicates: 0,
                errors: 0,
            },
            profiling: ProfilingSummary {
                page_count: 100,
                readability_score: 85.0,
                quality_tier: "A".into(),
                degraded_count: 0,
                has_text_layer: true,
            },
            route_method: "fast-parse".into(),
            extraction: ExtractionSummary {
                method: "fast-parse".into(),
                confidence: 0.95,
                ocr_page_count: 0,
                fallback_triggered: false,
            },
            segmentation: SegmentationSummary {
                total_segments: 12,
                types: TypeHistogram::new(),
            },
            exported_files: 12,
            qc: QcSummary {
                passed,
                flagged,
                rejected,
                mislabels_caught: mislabels,
            },
            limitations: vec![],
            review_needed: rejected > 0,
            review_reasons: vec![],
        }
    }

    #[test]
    fn batch_summary_is_additive() {
        let mut batch = BatchReport::new(PathBuf::from("/data"));
        batch.merge(report(3, 1, 0, 0));
        batch.merge(report(2, 0, 1, 1));
        batch.merge(report(5, 2, 0, 0));
        assert_eq!(batch.pdf_count, 3);
        assert_eq!(batch.summary.passed, 10);
        assert_eq!(batch.summary.flagged, 3);
        assert_eq!(batch.summary.rejected, 1);
        assert_eq!(batch.summary.mislabels_caught, 1);
    }

    #[test]
    fn report_stays_compact_for_large_inputs() {
        // A 100-page PDF's report must serialize below 5 KB.
        let mut r = report(40, 5, 2, 1);
        let mut types = TypeHistogram::new();
        for t in [
            "peticao-inicial",
            "procuracao",
            "cda",
            "despacho",
            "sentenca",
            "apelacao",
            "acordao",
            "certidao-publicacao",
            "anexo",
            "oficio",
        ] {
            types.insert(t.to_string(), 5);
        }
        r.segmentation.types = types;
        r.limitations =
            vec!["tesseract unavailable: OCR routes downgraded to fast-parse".into()];
        let json = serde_json::to_string_pretty(&r).unwrap();
        assert!(json.len() < 5 * 1024, "report is {} bytes", json.len());
    }

    #[test]
    fn histogram_skips_separators() {
        let mut seg = Segment {
            segment_id: "seg-001".into(),
            segment_type: SegmentType::Piece,
            doc_type: "sentenca".into(),
            classification_source: ClassificationSource::BoundaryRules,
            page_start: 1,
            page_end: 2,
            confidence: 0.9,
            boundary_markers: vec![],
            classification_confidence: None,
            classification_indicators: None,
            secondary_type: None,
            secondary_confidence: None,
            l2_previous_type: None,
            l2_boost: None,
            l2_reasons: None,
            cascade_level: None,
        };
        let mut sep = seg.clone();
        sep.segment_type = SegmentType::Separator;
        seg.doc_type = "sentenca".into();
        let hist = type_histogram(&[seg, sep]);
        assert_eq!(hist.get("sentenca"), Some(&1));
        assert_eq!(hist.len(), 1);
    }

    #[test]
    fn decision_log_appends_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("pipeline-decisions.log");
        let mut log = DecisionLog::open(&path);
        log.log("route", "document routed fast-parse (tier A)");
        log.log("segment", "12 boundaries detected");
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("[route]"));
        assert!(contents.contains("12 boundaries"));
    }
}
