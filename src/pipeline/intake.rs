//! Intake: enumerate, fingerprint, and deduplicate source PDFs.
//!
//! Enumeration is **sorted lexicographically** and that order is
//! load-bearing: every downstream stage array is indexed positionally
//! against `manifest.files`, and resume reloads re-list the directory in
//! the same order. Hashing is streamed (full SHA-256) plus a cheap
//! first-4096-bytes prefix fingerprint for cross-batch probing.
//!
//! I/O failures on individual files are recorded in `errors` and never
//! abort the batch.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::model::{DuplicateEntry, IntakeError, IntakeSummary, Manifest, SourceFile};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Bytes hashed for the prefix fingerprint.
const PREFIX_LEN: usize = 4096;

fn hex(digest: &[u8]) -> String {
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Streamed full-file SHA-256 plus the 4 KiB prefix hash.
fn fingerprint_file(path: &Path) -> std::io::Result<(String, String)> {
    let mut file = std::fs::File::open(path)?;
    let mut full = Sha256::new();
    let mut prefix = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut seen = 0usize;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        full.update(&buf[..n]);
        if seen < PREFIX_LEN {
            let take = (PREFIX_LEN - seen).min(n);
            prefix.update(&buf[..take]);
        }
        seen += n;
    }
    Ok((hex(&full.finalize()), hex(&prefix.finalize())))
}

fn is_pdf_name(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

fn has_pdf_magic(path: &Path) -> std::io::Result<bool> {
    let mut file = std::fs::File::open(path)?;
    let mut magic = [0u8; 4];
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(&magic == b"%PDF"),
        Err(_) => Ok(false),
    }
}

/// Enumerate candidate PDFs, sorted lexicographically by path.
pub fn enumerate_pdfs(source: &Path, recursive: bool) -> Result<Vec<PathBuf>, PipelineError> {
    if !source.exists() {
        return Err(PipelineError::SourceNotFound {
            path: source.to_path_buf(),
        });
    }
    if source.is_file() {
        return Ok(vec![source.to_path_buf()]);
    }
    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut paths: Vec<PathBuf> = WalkDir::new(source)
        .max_depth(max_depth)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| is_pdf_name(p))
        .collect();
    paths.sort();
    if paths.is_empty() {
        return Err(PipelineError::NoPdfsFound {
            path: source.to_path_buf(),
        });
    }
    Ok(paths)
}

/// Build the intake manifest for a source file or directory.
pub fn ingest(source: &Path, cfg: &PipelineConfig) -> Result<Manifest, PipelineError> {
    let paths = enumerate_pdfs(source, cfg.recursive)?;
    let now = chrono::Utc::now().to_rfc3339();

    let mut files: Vec<SourceFile> = Vec::new();
    let mut duplicates: Vec<DuplicateEntry> = Vec::new();
    let mut errors: Vec<IntakeError> = Vec::new();
    // Per-batch fingerprint table: written once per file, probed by every
    // subsequent file.
    let mut seen: HashMap<String, PathBuf> = HashMap::new();

    for path in &paths {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        match intake_one(path, &name, cfg, &mut seen, &now) {
            Ok(IntakeOutcome::Registered(file)) => files.push(*file),
            Ok(IntakeOutcome::Duplicate {
                sha256,
                original_path,
            }) => duplicates.push(DuplicateEntry {
                name,
                sha256,
                original_path,
            }),
            Err(e) => {
                warn!("intake error on {name}: {e}");
                errors.push(IntakeError {
                    name,
                    message: e.to_string(),
                });
            }
        }
    }

    let summary = IntakeSummary {
        total_scanned: paths.len(),
        registered: files.len(),
        duplicates: duplicates.len(),
        errors: errors.len(),
    };
    info!(
        scanned = summary.total_scanned,
        registered = summary.registered,
        duplicates = summary.duplicates,
        errors = summary.errors,
        "intake complete"
    );

    Ok(Manifest {
        generated_at: now,
        source_path: source
            .canonicalize()
            .unwrap_or_else(|_| source.to_path_buf()),
        files,
        duplicates,
        errors,
        summary,
    })
}

enum IntakeOutcome {
    Registered(Box<SourceFile>),
    Duplicate {
        sha256: String,
        original_path: PathBuf,
    },
}

fn intake_one(
    path: &Path,
    name: &str,
    cfg: &PipelineConfig,
    seen: &mut HashMap<String, PathBuf>,
    now: &str,
) -> std::io::Result<IntakeOutcome> {
    if !has_pdf_magic(path)? {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "not a PDF (bad magic bytes)",
        ));
    }
    let meta = std::fs::metadata(path)?;
    let (sha256, sha256_prefix_4k) = fingerprint_file(path)?;

    if cfg.dedup_enabled {
        if let Some(original) = seen.get(&sha256) {
            debug!("dedup hit: {name}");
            return Ok(IntakeOutcome::Duplicate {
                sha256,
                original_path: original.clone(),
            });
        }
        seen.insert(sha256.clone(), path.to_path_buf());
    }

    let modified = meta
        .modified()
        .map(|t| chrono::DateTime::<chrono::Utc>::from(t).to_rfc3339())
        .unwrap_or_else(|_| now.to_string());
    let abs = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

    Ok(IntakeOutcome::Registered(Box::new(SourceFile {
        name: name.to_string(),
        source_path: abs,
        size: meta.len(),
        modified,
        sha256,
        sha256_prefix_4k,
        timestamp: now.to_string(),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_pdf(dir: &Path, name: &str, body: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut contents = b"%PDF-1.7\n".to_vec();
        contents.extend_from_slice(body);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn enumeration_is_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        write_pdf(tmp.path(), "zz.pdf", b"z");
        write_pdf(tmp.path(), "aa.pdf", b"a");
        write_pdf(tmp.path(), "Mm.pdf", b"m");
        std::fs::write(tmp.path().join("notes.txt"), "skip me").unwrap();
        let paths = enumerate_pdfs(tmp.path(), true).unwrap();
        let names: Vec<_> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["Mm.pdf", "aa.pdf", "zz.pdf"]);
    }

    #[test]
    fn ingest_twice_is_identical_modulo_timestamps() {
        let tmp = tempfile::tempdir().unwrap();
        write_pdf(tmp.path(), "a.pdf", b"alpha");
        write_pdf(tmp.path(), "b.pdf", b"beta");
        let cfg = PipelineConfig::default();
        let m1 = ingest(tmp.path(), &cfg).unwrap();
        let m2 = ingest(tmp.path(), &cfg).unwrap();
        let names1: Vec<_> = m1.files.iter().map(|f| (&f.name, &f.sha256)).collect();
        let names2: Vec<_> = m2.files.iter().map(|f| (&f.name, &f.sha256)).collect();
        assert_eq!(names1, names2);
        assert_eq!(m1.summary.registered, 2);
    }

    #[test]
    fn duplicates_detected_by_content() {
        let tmp = tempfile::tempdir().unwrap();
        write_pdf(tmp.path(), "a.pdf", b"same-bytes");
        write_pdf(tmp.path(), "b.pdf", b"same-bytes");
        let cfg = PipelineConfig::default();
        let m = ingest(tmp.path(), &cfg).unwrap();
        assert_eq!(m.summary.registered, 1);
        assert_eq!(m.summary.duplicates, 1);
        assert_eq!(m.duplicates[0].name, "b.pdf");
        assert!(m.duplicates[0].original_path.ends_with("a.pdf"));
    }

    #[test]
    fn dedup_disabled_registers_both() {
        let tmp = tempfile::tempdir().unwrap();
        write_pdf(tmp.path(), "a.pdf", b"same-bytes");
        write_pdf(tmp.path(), "b.pdf", b"same-bytes");
        let cfg = PipelineConfig::builder().dedup_enabled(false).build().unwrap();
        let m = ingest(tmp.path(), &cfg).unwrap();
        assert_eq!(m.summary.registered, 2);
        assert_eq!(m.summary.duplicates, 0);
    }

    #[test]
    fn non_pdf_magic_recorded_as_error() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("fake.pdf"), "not a pdf at all").unwrap();
        write_pdf(tmp.path(), "real.pdf", b"content");
        let cfg = PipelineConfig::default();
        let m = ingest(tmp.path(), &cfg).unwrap();
        assert_eq!(m.summary.registered, 1);
        assert_eq!(m.summary.errors, 1);
        assert_eq!(m.errors[0].name, "fake.pdf");
    }

    #[test]
    fn prefix_hash_differs_from_full_on_long_files() {
        let tmp = tempfile::tempdir().unwrap();
        let long_body = vec![b'x'; 10_000];
        let path = write_pdf(tmp.path(), "long.pdf", &long_body);
        let (full, prefix) = fingerprint_file(&path).unwrap();
        assert_ne!(full, prefix);
        assert_eq!(full.len(), 64);
        assert_eq!(prefix.len(), 64);
    }

    #[test]
    fn missing_source_is_fatal() {
        let err = enumerate_pdfs(Path::new("/definitely/missing"), true).unwrap_err();
        assert!(matches!(err, PipelineError::SourceNotFound { .. }));
    }

    #[test]
    fn empty_dir_is_no_pdfs() {
        let tmp = tempfile::tempdir().unwrap();
        let err = enumerate_pdfs(tmp.path(), true).unwrap_err();
        assert!(matches!(err, PipelineError::NoPdfsFound { .. }));
    }
}
