//! Integration tests for the pje2md pipeline.
//!
//! These drive the stage functions on synthetic in-memory pages — no
//! external binaries, no real PDFs — so they run everywhere. The flows
//! that need a real `pdftotext`/`tesseract` are gated behind
//! `PJE2MD_E2E_PDF` (a path to a test PDF) and skipped otherwise.
//!
//! Run with:
//!   cargo test --test pipeline
//! Full e2e:
//!   PJE2MD_E2E_PDF=./test_cases/Inicial_EF.pdf cargo test --test pipeline -- --nocapture

use pje2md::config::{PipelineConfig, EMPTY_PAGE_CHARS};
use pje2md::model::{Page, QcSummary, SegmentType};
use pje2md::pipeline::{classify, export, profile, qc, reclassify, segment, strip};
use pje2md::report::BatchReport;
use regex::Regex;
use std::path::PathBuf;

// ── Test helpers ─────────────────────────────────────────────────────────

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

fn source_file(name: &str) -> pje2md::model::SourceFile {
    pje2md::model::SourceFile {
        name: name.to_string(),
        source_path: PathBuf::from(format!("/data/{name}")),
        size: 4096,
        modified: "2026-08-01T00:00:00Z".into(),
        sha256: "ab".repeat(32),
        sha256_prefix_4k: "cd".repeat(32),
        timestamp: "2026-08-01T00:00:00Z".into(),
    }
}

/// A synthetic 6-page tax-enforcement case file:
/// inicial (1-2) · CDA (3) · despacho (4) · blank (5) · sentença (6).
fn synthetic_case_pages() -> Vec<Page> {
    let chrome = "Num. 12345678 - Pág. 1\nAssinado eletronicamente por FULANO";
    vec![
        page(
            1,
            &format!(
                "EXCELENTÍSSIMO SENHOR DOUTOR JUIZ FEDERAL DA VARA DE EXECUÇÕES FISCAIS\n\
                 A FAZENDA NACIONAL, pela Procuradoria-Geral da Fazenda Nacional, vem propor \
                 a presente execução fiscal contra a executada, com fundamento na Lei nº 6.830/80 \
                 e na certidão de dívida ativa que instrui esta inicial, requerendo a citação \
                 do executado para pagamento da dívida ativa da União.\n{chrome}"
            ),
        ),
        page(
            2,
            "Dá-se à causa o valor de R$ 152.340,12. Nestes termos, pede deferimento. \
             Procuradoria da Fazenda Nacional, datado e assinado digitalmente pelo \
             procurador da Fazenda com atribuição para o feito executivo.",
        ),
        page(
            3,
            "CERTIDÃO DE DÍVIDA ATIVA Nº 80.6.19.011234-56\nInscrição em dívida ativa da \
             União. Fundamentação legal da dívida: arts. 2º e 3º da Lei nº 6.830/80. Valor \
             originário acrescido de juros, multa e encargo legal conforme demonstrativo.",
        ),
        page(
            4,
            "DESPACHO\nCite-se o executado para, no prazo de cinco dias, pagar a dívida com \
             os encargos indicados na CDA ou garantir a execução, sob pena de penhora. \
             Intime-se. Cumpra-se.",
        ),
        page(5, "  "),
        page(
            6,
            "SENTENÇA\nVistos. Satisfeita a obrigação pelo executado, julgo extinta a \
             presente execução fiscal, nos termos do art. 924, II, do CPC. Custas na forma \
             da lei. Publique-se. Registre-se. Intimem-se. P.R.I.",
        ),
    ]
}

fn run_segmentation(pages: &[Page], cfg: &PipelineConfig) -> Vec<pje2md::model::Segment> {
    let full_text: String = pages
        .iter()
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let doc_class = classify::classify(&full_text, cfg.secondary_emit_threshold);
    let mut segments = segment::segment_document(pages, Some(&doc_class), cfg);
    reclassify::reclassify_l1(&mut segments, pages, cfg);
    reclassify::reclassify_l2(&mut segments, Some(&doc_class));
    segments
}

// ── Stage-chain tests ────────────────────────────────────────────────────

#[test]
fn synthetic_case_segments_and_covers_all_pages() {
    let cfg = PipelineConfig::default();
    let mut pages = synthetic_case_pages();
    strip::strip_repetitive_content(&mut pages, &cfg);
    let segments = run_segmentation(&pages, &cfg);

    assert!(segments.len() >= 3, "got {} segments", segments.len());
    let orphans = segment::check_coverage(&segments, pages.len());
    assert!(orphans.is_empty(), "orphans: {orphans:?}");

    // Ranges are dense, ordered, and in bounds.
    assert_eq!(segments[0].page_start, 1);
    for seg in &segments {
        assert!(seg.page_start <= seg.page_end);
        assert!(seg.page_end <= pages.len());
    }
    for w in segments.windows(2) {
        assert_eq!(w[1].page_start, w[0].page_end + 1);
    }

    // The blank page 5 extended a piece instead of opening one.
    assert!(segments.iter().all(|s| s.page_start != 5));

    // Every doc_type is whitelisted (or unknown).
    for seg in &segments {
        assert_eq!(classify::validate_type(&seg.doc_type), seg.doc_type);
    }

    // The sentença at the end was recognized.
    assert!(
        segments.iter().any(|s| s.doc_type == "sentenca"),
        "types: {:?}",
        segments.iter().map(|s| &s.doc_type).collect::<Vec<_>>()
    );
}

#[test]
fn document_classification_identifies_execucao_fiscal() {
    let cfg = PipelineConfig::default();
    let pages = synthetic_case_pages();
    let full: String = pages
        .iter()
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let c = classify::classify(&full, cfg.secondary_emit_threshold);
    assert!(
        ["peticao-inicial", "inicial-eef", "inicial-execfiscal"].contains(&c.primary_type.as_str()),
        "got {}",
        c.primary_type
    );
}

#[test]
fn clean_synthetic_pages_profile_with_text_layer() {
    let cfg = PipelineConfig::default();
    let pages = synthetic_case_pages();
    let doc = profile::profile_document(&pages, &cfg);
    assert!(doc.has_text_layer);
    assert!(doc.readability_score > 40.0, "median {}", doc.readability_score);
    // One blank page: it must not drag the median down.
    assert!(doc.page_profiles[4].empty);
}

#[test]
fn segmentation_is_deterministic() {
    let cfg = PipelineConfig::default();
    let mut a = synthetic_case_pages();
    let mut b = synthetic_case_pages();
    strip::strip_repetitive_content(&mut a, &cfg);
    strip::strip_repetitive_content(&mut b, &cfg);
    let sa = run_segmentation(&a, &cfg);
    let sb = run_segmentation(&b, &cfg);
    let fa: Vec<_> = sa
        .iter()
        .map(|s| (s.segment_id.clone(), s.doc_type.clone(), s.page_start, s.page_end))
        .collect();
    let fb: Vec<_> = sb
        .iter()
        .map(|s| (s.segment_id.clone(), s.doc_type.clone(), s.page_start, s.page_end))
        .collect();
    assert_eq!(fa, fb);
}

#[test]
fn l2_applied_twice_is_stable() {
    let cfg = PipelineConfig::default();
    let mut pages = synthetic_case_pages();
    strip::strip_repetitive_content(&mut pages, &cfg);
    let full: String = pages
        .iter()
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let doc_class = classify::classify(&full, cfg.secondary_emit_threshold);
    let mut segments = segment::segment_document(&pages, Some(&doc_class), &cfg);
    reclassify::reclassify_l1(&mut segments, &pages, &cfg);
    reclassify::reclassify_l2(&mut segments, Some(&doc_class));
    let once: Vec<_> = segments
        .iter()
        .map(|s| (s.doc_type.clone(), s.confidence))
        .collect();
    reclassify::reclassify_l2(&mut segments, Some(&doc_class));
    let twice: Vec<_> = segments
        .iter()
        .map(|s| (s.doc_type.clone(), s.confidence))
        .collect();
    assert_eq!(once, twice);
}

// ── Export + QC round trip ───────────────────────────────────────────────

#[test]
fn export_then_qc_round_trip() {
    let cfg = PipelineConfig::default();
    let mut pages = synthetic_case_pages();
    strip::strip_repetitive_content(&mut pages, &cfg);
    let segments = run_segmentation(&pages, &cfg);
    let extracted = pje2md::model::ExtractedDocument {
        method: "fast-parse".into(),
        overall_confidence: 0.95,
        fallback_triggered: false,
        ocr_pages: None,
        ocr_method: None,
        classification: None,
        pages,
    };

    let tmp = tempfile::tempdir().unwrap();
    let markdown_dir = tmp.path().join("markdown");
    let review_dir = tmp.path().join("review");
    let index = export::export_segments(
        &segments,
        &extracted,
        &source_file("Inicial_EF.pdf"),
        &markdown_dir,
        None,
    )
    .unwrap();

    // Filename contract and index ↔ disk parity.
    let name_re = Regex::new(r"^[0-9]{3}-[a-z-]+-[a-z-]+\.md$").unwrap();
    for entry in &index.files {
        assert!(name_re.is_match(&entry.file), "bad name {}", entry.file);
        assert!(entry.file_path.exists());
    }
    let on_disk: Vec<String> = std::fs::read_dir(&markdown_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".md") && n != "INDEX.md")
        .collect();
    assert_eq!(on_disk.len(), index.files.len());

    let report = qc::validate_exports(&markdown_dir, &review_dir).unwrap();
    assert_eq!(report.summary.rejected, 0, "files: {:#?}", report.files);
    assert!(report.coverage_flags.is_empty());
    assert_eq!(
        report.summary.passed + report.summary.flagged,
        index.files.len()
    );
}

#[test]
fn export_twice_yields_identical_bodies() {
    let cfg = PipelineConfig::default();
    let mut pages = synthetic_case_pages();
    strip::strip_repetitive_content(&mut pages, &cfg);
    let segments = run_segmentation(&pages, &cfg);
    let extracted = pje2md::model::ExtractedDocument {
        method: "fast-parse".into(),
        overall_confidence: 0.95,
        fallback_triggered: false,
        ocr_pages: None,
        ocr_method: None,
        classification: None,
        pages,
    };

    let body_of = |contents: &str| -> String {
        // Strip the frontmatter (timestamps live there, bodies must match).
        contents
            .splitn(3, "---\n")
            .nth(2)
            .unwrap_or(contents)
            .to_string()
    };

    let tmp1 = tempfile::tempdir().unwrap();
    let tmp2 = tempfile::tempdir().unwrap();
    let src = source_file("Inicial_EF.pdf");
    let i1 = export::export_segments(&segments, &extracted, &src, tmp1.path(), None).unwrap();
    let i2 = export::export_segments(&segments, &extracted, &src, tmp2.path(), None).unwrap();
    assert_eq!(i1.files.len(), i2.files.len());
    for (a, b) in i1.files.iter().zip(i2.files.iter()) {
        assert_eq!(a.file, b.file);
        let ca = std::fs::read_to_string(&a.file_path).unwrap();
        let cb = std::fs::read_to_string(&b.file_path).unwrap();
        assert_eq!(body_of(&ca), body_of(&cb), "body drift in {}", a.file);
    }
}

#[test]
fn qc_catches_planted_mislabel() {
    // A despacho body exported under doc_type sentenca must be rejected.
    let cfg = PipelineConfig::default();
    let mut pages = synthetic_case_pages();
    strip::strip_repetitive_content(&mut pages, &cfg);
    let mut segments = run_segmentation(&pages, &cfg);
    let victim = segments
        .iter_mut()
        .find(|s| s.doc_type == "despacho")
        .expect("synthetic case has a despacho");
    victim.doc_type = "sentenca".into();

    let extracted = pje2md::model::ExtractedDocument {
        method: "fast-parse".into(),
        overall_confidence: 0.95,
        fallback_triggered: false,
        ocr_pages: None,
        ocr_method: None,
        classification: None,
        pages,
    };
    let tmp = tempfile::tempdir().unwrap();
    let markdown_dir = tmp.path().join("markdown");
    let review_dir = tmp.path().join("review");
    export::export_segments(
        &segments,
        &extracted,
        &source_file("Inicial_EF.pdf"),
        &markdown_dir,
        None,
    )
    .unwrap();

    let report = qc::validate_exports(&markdown_dir, &review_dir).unwrap();
    assert!(report.summary.mislabels_caught >= 1);
    assert!(report.summary.rejected >= 1);
    // Rejected files are copied to review/.
    let copies = std::fs::read_dir(&review_dir).unwrap().count();
    assert!(copies >= 1);
}

// ── Batch aggregation ────────────────────────────────────────────────────

#[test]
fn batch_summary_sums_across_pdfs() {
    // The E4 scenario: three per-PDF QC summaries must sum, not last-win.
    let inputs = [(3, 1, 0, 0), (2, 0, 1, 1), (5, 2, 0, 0)];
    let mut total = QcSummary::default();
    for (p, f, r, m) in inputs {
        total.add(&QcSummary {
            passed: p,
            flagged: f,
            rejected: r,
            mislabels_caught: m,
        });
    }
    assert_eq!(
        (total.passed, total.flagged, total.rejected, total.mislabels_caught),
        (10, 3, 1, 1)
    );

    let batch = BatchReport::new(PathBuf::from("/data"));
    assert_eq!(batch.pdf_count, 0);
}

// ── Separator handling ───────────────────────────────────────────────────

#[test]
fn separator_segments_excluded_from_coverage() {
    let cfg = PipelineConfig::default();
    let mut pages = synthetic_case_pages();
    strip::strip_repetitive_content(&mut pages, &cfg);
    let mut segments = run_segmentation(&pages, &cfg);
    // A synthetic separator overlapping a piece must not break coverage of
    // the non-separator union.
    let mut sep = segments[0].clone();
    sep.segment_type = SegmentType::Separator;
    sep.segment_id = "seg-999".into();
    segments.push(sep);
    let orphans = segment::check_coverage(&segments, 6);
    assert!(orphans.is_empty());
}

// ── Gated e2e (needs real external tools and a PDF) ──────────────────────

#[tokio::test]
async fn e2e_full_pipeline_on_real_pdf() {
    let Ok(pdf) = std::env::var("PJE2MD_E2E_PDF") else {
        println!("SKIP — set PJE2MD_E2E_PDF=/path/to/test.pdf to run the full e2e");
        return;
    };
    let pdf = PathBuf::from(pdf);
    if !pdf.exists() {
        println!("SKIP — test file not found: {}", pdf.display());
        return;
    }

    let cfg = PipelineConfig::default();
    let out = tempfile::tempdir().unwrap();
    let outcome = pje2md::run(&pdf, out.path(), &cfg).await.unwrap();
    assert!(!outcome.interrupted);
    assert_eq!(outcome.batch.pdf_count, 1);
    let report = &outcome.batch.reports[0];
    assert!(report.segmentation.total_segments >= 1);
    assert!(out.path().join("pipeline-report.json").exists());
    assert!(out.path().join(".checkpoint.json").exists());
    assert!(out.path().join("markdown").join("index.json").exists());

    // The compact-report contract.
    let raw = std::fs::read_to_string(out.path().join("pipeline-report.json")).unwrap();
    assert!(raw.len() < 5 * 1024, "report is {} bytes", raw.len());
}
