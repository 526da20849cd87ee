//! Markdown export: one file per segment, plus `index.json` and a
//! human-readable `INDEX.md`.
//!
//! The YAML frontmatter is **the** interchange surface with downstream
//! consumers; field names must match verbatim and string values are
//! double-quoted. Filenames are deterministic —
//! `NNN-{segment_type}-{doc_type}.md` with NNN padded to three digits — so
//! reruns overwrite rather than accumulate. Every write is temp-then-rename
//! in the target directory.

use crate::config::PIPELINE_VERSION;
use crate::error::PipelineError;
use crate::model::{ExtractedDocument, Segment, SourceFile};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// One exported file, as enumerated by `index.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub file: String,
    pub file_path: PathBuf,
    pub segment_id: String,
    pub doc_type: String,
    /// "START-END", 1-based inclusive.
    pub pages: String,
    pub confidence: f64,
}

/// The `index.json` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportIndex {
    pub generated_at: String,
    pub source_pdf: String,
    pub total_segments: usize,
    pub total_pages: usize,
    pub files: Vec<IndexEntry>,
}

/// Atomic write: temp file in the same directory, then rename.
pub fn write_atomic(path: &Path, contents: &str) -> Result<(), PipelineError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| PipelineError::OutputWriteFailed {
        path: parent.to_path_buf(),
        source: e,
    })?;
    let tmp = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|e| e.to_str()).unwrap_or("out")
    ));
    std::fs::write(&tmp, contents).map_err(|e| PipelineError::OutputWriteFailed {
        path: tmp.clone(),
        source: e,
    })?;
    std::fs::rename(&tmp, path).map_err(|e| PipelineError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    })
}

/// The deterministic export filename for a segment.
pub fn segment_filename(index: usize, segment: &Segment) -> String {
    format!(
        "{:03}-{}-{}.md",
        index + 1,
        segment.segment_type.as_str(),
        segment.doc_type
    )
}

fn yaml_str(key: &str, value: &str) -> String {
    format!("{key}: \"{}\"\n", value.replace('"', "\\\""))
}

fn frontmatter(
    segment: &Segment,
    source: &SourceFile,
    extracted: &ExtractedDocument,
    generated_at: &str,
) -> String {
    let mut y = String::from("---\n");
    y.push_str(&yaml_str("segment_id", &segment.segment_id));
    y.push_str(&yaml_str("source_pdf", &source.name));
    y.push_str(&yaml_str(
        "source_pdf_path",
        &source.source_path.to_string_lossy(),
    ));
    y.push_str(&yaml_str(
        "page_range",
        &format!("{}-{}", segment.page_start, segment.page_end),
    ));
    y.push_str(&format!("total_pages: {}\n", segment.page_count()));
    y.push_str(&yaml_str("segment_type", segment.segment_type.as_str()));
    y.push_str(&yaml_str("doc_type", &segment.doc_type));
    y.push_str(&format!(
        "segmentation_confidence: {:.2}\n",
        segment.confidence
    ));
    y.push_str(&yaml_str("extraction_method", &extracted.method));
    y.push_str(&format!(
        "extraction_confidence: {:.2}\n",
        extracted.overall_confidence
    ));
    if extracted.fallback_triggered {
        y.push_str("fallback_triggered: true\n");
    }
    y.push_str(&yaml_str("generated_at", generated_at));
    y.push_str(&yaml_str("pipeline_version", PIPELINE_VERSION));
    y.push_str("---\n\n");
    y
}

fn segment_body(segment: &Segment, extracted: &ExtractedDocument) -> String {
    let pages: Vec<_> = extracted
        .pages
        .iter()
        .filter(|p| p.page_number >= segment.page_start && p.page_number <= segment.page_end)
        .collect();

    if pages.is_empty() {
        return format!(
            "> Manual review required: segment {} covers pages {}-{} but no \
             extracted text is available for that range.\n",
            segment.segment_id, segment.page_start, segment.page_end
        );
    }

    let mut parts: Vec<String> = Vec::with_capacity(pages.len() * 2);
    for (i, page) in pages.iter().enumerate() {
        if i > 0 {
            parts.push(format!("\n\n---\n\n<!-- page: p.{} -->\n\n", page.page_number));
        }
        if page.empty {
            parts.push(format!("<!-- page: p.{} (empty) -->", page.page_number));
        } else {
            parts.push(page.text.trim_end().to_string());
        }
    }
    let mut body: String = parts.concat();
    body.push('\n');
    body
}

/// Export every segment of one PDF into `markdown_dir` (nested under the
/// PDF's basename when `nest_under` is set — multi-file batches need the
/// extra level to keep the deterministic names collision-free).
pub fn export_segments(
    segments: &[Segment],
    extracted: &ExtractedDocument,
    source: &SourceFile,
    markdown_dir: &Path,
    nest_under: Option<&str>,
) -> Result<ExportIndex, PipelineError> {
    let dir = match nest_under {
        Some(base) => markdown_dir.join(base),
        None => markdown_dir.to_path_buf(),
    };
    let generated_at = chrono::Utc::now().to_rfc3339();

    let mut entries = Vec::with_capacity(segments.len());
    for (i, segment) in segments.iter().enumerate() {
        let name = segment_filename(i, segment);
        let path = dir.join(&name);
        let contents = format!(
            "{}{}",
            frontmatter(segment, source, extracted, &generated_at),
            segment_body(segment, extracted)
        );
        write_atomic(&path, &contents)?;
        entries.push(IndexEntry {
            file: name,
            file_path: path,
            segment_id: segment.segment_id.clone(),
            doc_type: segment.doc_type.clone(),
            pages: format!("{}-{}", segment.page_start, segment.page_end),
            confidence: segment.confidence,
        });
    }

    let index = ExportIndex {
        generated_at,
        source_pdf: source.name.clone(),
        total_segments: segments.len(),
        total_pages: extracted.pages.len(),
        files: entries,
    };

    let index_json = serde_json::to_string_pretty(&index)
        .map_err(|e| PipelineError::Internal(format!("index serialization: {e}")))?;
    write_atomic(&dir.join("index.json"), &index_json)?;
    write_atomic(&dir.join("INDEX.md"), &render_index_md(&index))?;

    info!(
        "exported {} segments for {} into {}",
        segments.len(),
        source.name,
        dir.display()
    );
    Ok(index)
}

fn render_index_md(index: &ExportIndex) -> String {
    let mut md = format!(
        "# {} — exported segments\n\n{} segments over {} pages.\n\n\
         | # | File | Type | Pages | Confidence |\n|---|---|---|---|---|\n",
        index.source_pdf, index.total_segments, index.total_pages
    );
    for (i, e) in index.files.iter().enumerate() {
        md.push_str(&format!(
            "| {} | [{}]({}) | {} | {} | {:.2} |\n",
            i + 1,
            e.file,
            e.file,
            e.doc_type,
            e.pages,
            e.confidence
        ));
    }
    md
}
