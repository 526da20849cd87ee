//! External-tool capabilities: discovery and timeout-guarded invocation.
//!
//! The pipeline never parses, rasterizes, or OCRs PDFs itself. Four
//! capabilities are provided by external binaries, probed once at startup:
//!
//! | Capability | Binary | Contract |
//! |---|---|---|
//! | Per-page text | `pdftotext` (+ `pdfinfo` for page counts) | `-f N -l N -raw <pdf> -`, UTF-8 on stdout |
//! | Rasterization | `pdftoppm` | `-r {300\|400} -f N -l N -png <pdf> <prefix>` → `<prefix>-NNNNNN.png` |
//! | OCR | `tesseract` | `<png> stdout -l por --psm {3\|6} --oem 1 -c thresholding_method=1`, `OMP_NUM_THREADS=1` |
//! | Image rotation | `sips` (in place) or `convert` (to a new file) | rotate by 90/180/270 degrees |
//!
//! Every invocation carries an inline timeout. A timed-out or failed call
//! returns a failure value, never an exception upward: the page becomes a
//! stub and the stage continues. `kill_on_drop` ensures a timed-out child
//! does not outlive its invocation.

use crate::error::{PageFailure, PipelineError};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Which rotation tool is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotateTool {
    /// `sips --rotate <deg> <img>` — rotates in place (macOS).
    Sips,
    /// `convert <img> -rotate <deg> <out>` — ImageMagick.
    Convert,
}

/// Detected external tools. Probed once per run; absence downgrades the
/// affected routes and is reported under `limitations`.
#[derive(Debug, Clone)]
pub struct Capabilities {
    pub pdftotext: bool,
    pub pdfinfo: bool,
    pub pdftoppm: bool,
    pub tesseract: bool,
    pub rotate: Option<RotateTool>,
}

impl Capabilities {
    /// Probe the PATH for every capability binary.
    pub fn detect() -> Self {
        let caps = Self {
            pdftotext: which::which("pdftotext").is_ok(),
            pdfinfo: which::which("pdfinfo").is_ok(),
            pdftoppm: which::which("pdftoppm").is_ok(),
            tesseract: which::which("tesseract").is_ok(),
            rotate: if which::which("sips").is_ok() {
                Some(RotateTool::Sips)
            } else if which::which("convert").is_ok() {
                Some(RotateTool::Convert)
            } else {
                None
            },
        };
        debug!(?caps, "capability probe");
        caps
    }

    /// Everything present, for tests and synthetic runs.
    pub fn all_absent() -> Self {
        Self {
            pdftotext: false,
            pdfinfo: false,
            pdftoppm: false,
            tesseract: false,
            rotate: None,
        }
    }

    /// OCR needs both a rasterizer and the OCR engine.
    pub fn can_ocr(&self) -> bool {
        self.pdftoppm && self.tesseract
    }

    /// Human-readable limitations for the report.
    pub fn limitations(&self) -> Vec<String> {
        let mut out = Vec::new();
        if !self.pdftotext {
            out.push(
                "pdftotext unavailable: per-page fast parse degraded to whole-document split"
                    .to_string(),
            );
        }
        if !self.pdfinfo {
            out.push("pdfinfo unavailable: page counts inferred from form feeds".to_string());
        }
        if !self.pdftoppm {
            out.push("pdftoppm unavailable: no rasterization, OCR routes downgraded".to_string());
        }
        if !self.tesseract {
            out.push("tesseract unavailable: OCR routes downgraded to fast-parse".to_string());
        }
        if self.rotate.is_none() {
            out.push("no image-rotation tool (sips/convert): rotation retries disabled".to_string());
        }
        out
    }
}

// ── Invocation plumbing ──────────────────────────────────────────────────

/// Outcome of one external invocation, before mapping to a page failure.
enum RunOutcome {
    Ok(std::process::Output),
    Timeout,
    Failed(String),
}

async fn run_with_timeout(mut cmd: Command, secs: u64) -> RunOutcome {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => return RunOutcome::Failed(format!("spawn: {e}")),
    };
    match tokio::time::timeout(Duration::from_secs(secs), child.wait_with_output()).await {
        Ok(Ok(out)) => RunOutcome::Ok(out),
        Ok(Err(e)) => RunOutcome::Failed(format!("wait: {e}")),
        // Dropping the in-flight future kills the child (kill_on_drop).
        Err(_) => RunOutcome::Timeout,
    }
}

fn stderr_lossy(out: &std::process::Output) -> String {
    String::from_utf8_lossy(&out.stderr).trim().to_string()
}

// ── Poppler: page counts and text ────────────────────────────────────────

/// Probe a PDF with `pdfinfo`: page count, or `None` when the tool is
/// absent or failed non-fatally. Encrypted PDFs are a fatal input error.
pub async fn probe_page_count(
    caps: &Capabilities,
    pdf: &Path,
    timeout_secs: u64,
) -> Result<Option<usize>, PipelineError> {
    if !caps.pdfinfo {
        return Ok(None);
    }
    let mut cmd = Command::new("pdfinfo");
    cmd.arg(pdf);
    match run_with_timeout(cmd, timeout_secs).await {
        RunOutcome::Ok(out) if out.status.success() => {
            let stdout = String::from_utf8_lossy(&out.stdout);
            for line in stdout.lines() {
                if let Some(rest) = line.strip_prefix("Pages:") {
                    return Ok(rest.trim().parse::<usize>().ok());
                }
                if line.starts_with("Encrypted:") && line.contains("yes") {
                    return Err(PipelineError::EncryptedPdf {
                        path: pdf.to_path_buf(),
                    });
                }
            }
            Ok(None)
        }
        RunOutcome::Ok(out) => {
            let err = stderr_lossy(&out).to_lowercase();
            if err.contains("encrypt") || err.contains("password") {
                return Err(PipelineError::EncryptedPdf {
                    path: pdf.to_path_buf(),
                });
            }
            warn!("pdfinfo failed on {}: {}", pdf.display(), err);
            Ok(None)
        }
        RunOutcome::Timeout => {
            warn!("pdfinfo timed out on {}", pdf.display());
            Ok(None)
        }
        RunOutcome::Failed(e) => {
            warn!("pdfinfo error on {}: {}", pdf.display(), e);
            Ok(None)
        }
    }
}

/// Extract the text of a single page: `pdftotext -f N -l N -raw <pdf> -`.
pub async fn pdftotext_page(
    pdf: &Path,
    page: usize,
    timeout_secs: u64,
) -> Result<String, PageFailure> {
    let mut cmd = Command::new("pdftotext");
    cmd.arg("-f")
        .arg(page.to_string())
        .arg("-l")
        .arg(page.to_string())
        .arg("-raw")
        .arg("-q")
        .arg(pdf)
        .arg("-");
    match run_with_timeout(cmd, timeout_secs).await {
        RunOutcome::Ok(out) if out.status.success() => {
            Ok(String::from_utf8_lossy(&out.stdout).into_owned())
        }
        RunOutcome::Ok(out) => Err(PageFailure::ExtractFailed {
            page,
            detail: stderr_lossy(&out),
        }),
        RunOutcome::Timeout => Err(PageFailure::ToolTimeout {
            page,
            tool: "pdftotext".into(),
            secs: timeout_secs,
        }),
        RunOutcome::Failed(e) => Err(PageFailure::ExtractFailed { page, detail: e }),
    }
}

/// Extract the whole document in one pass, keeping form feeds so the
/// caller can split on them. Legacy path for when `pdftotext` per-page or
/// `pdfinfo` is unavailable.
pub async fn pdftotext_full(pdf: &Path, timeout_secs: u64) -> Result<String, PageFailure> {
    let mut cmd = Command::new("pdftotext");
    cmd.arg("-q").arg(pdf).arg("-");
    match run_with_timeout(cmd, timeout_secs).await {
        RunOutcome::Ok(out) if out.status.success() => {
            Ok(String::from_utf8_lossy(&out.stdout).into_owned())
        }
        RunOutcome::Ok(out) => Err(PageFailure::ExtractFailed {
            page: 0,
            detail: stderr_lossy(&out),
        }),
        RunOutcome::Timeout => Err(PageFailure::ToolTimeout {
            page: 0,
            tool: "pdftotext".into(),
            secs: timeout_secs,
        }),
        RunOutcome::Failed(e) => Err(PageFailure::ExtractFailed { page: 0, detail: e }),
    }
}

// ── Rasterization ────────────────────────────────────────────────────────

/// Rasterize one page to PNG inside `dir`:
/// `pdftoppm -r <dpi> -f N -l N -png <pdf> <dir>/page`.
///
/// Returns the produced image path. The caller owns `dir` (a scoped temp
/// directory) and releases it on every exit path.
pub async fn rasterize_page(
    pdf: &Path,
    page: usize,
    dpi: u32,
    dir: &Path,
    timeout_secs: u64,
) -> Result<PathBuf, PageFailure> {
    let prefix = dir.join("page");
    let mut cmd = Command::new("pdftoppm");
    cmd.arg("-r")
        .arg(dpi.to_string())
        .arg("-f")
        .arg(page.to_string())
        .arg("-l")
        .arg(page.to_string())
        .arg("-png")
        .arg(pdf)
        .arg(&prefix);
    match run_with_timeout(cmd, timeout_secs).await {
        RunOutcome::Ok(out) if out.status.success() => {
            // pdftoppm appends a zero-padded page suffix whose width depends
            // on the document's page count; glob rather than guess.
            let mut produced: Vec<PathBuf> = std::fs::read_dir(dir)
                .map_err(|e| PageFailure::RasterFailed {
                    page,
                    detail: e.to_string(),
                })?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    p.extension().is_some_and(|x| x == "png")
                        && p.file_name()
                            .and_then(|n| n.to_str())
                            .is_some_and(|n| n.starts_with("page"))
                })
                .collect();
            produced.sort();
            match produced.into_iter().next() {
                Some(img) if std::fs::metadata(&img).map(|m| m.len() > 0).unwrap_or(false) => {
                    Ok(img)
                }
                Some(_) => Err(PageFailure::RasterFailed {
                    page,
                    detail: "zero-size image".into(),
                }),
                None => Err(PageFailure::RasterFailed {
                    page,
                    detail: "no image produced".into(),
                }),
            }
        }
        RunOutcome::Ok(out) => Err(PageFailure::RasterFailed {
            page,
            detail: stderr_lossy(&out),
        }),
        RunOutcome::Timeout => Err(PageFailure::ToolTimeout {
            page,
            tool: "pdftoppm".into(),
            secs: timeout_secs,
        }),
        RunOutcome::Failed(e) => Err(PageFailure::RasterFailed { page, detail: e }),
    }
}

// ── OCR ──────────────────────────────────────────────────────────────────

/// Run tesseract on a page image:
/// `tesseract <png> stdout -l <lang> --psm <psm> --oem 1 -c thresholding_method=1`.
///
/// `OMP_NUM_THREADS=1` forces a single OCR thread per invocation; page-level
/// parallelism, if any, belongs to the caller.
pub async fn tesseract_image(
    img: &Path,
    lang: &str,
    psm: u8,
    page: usize,
    timeout_secs: u64,
) -> Result<String, PageFailure> {
    let mut cmd = Command::new("tesseract");
    cmd.arg(img)
        .arg("stdout")
        .arg("-l")
        .arg(lang)
        .arg("--psm")
        .arg(psm.to_string())
        .arg("--oem")
        .arg("1")
        .arg("-c")
        .arg("thresholding_method=1")
        .env("OMP_NUM_THREADS", "1");
    match run_with_timeout(cmd, timeout_secs).await {
        RunOutcome::Ok(out) if out.status.success() => {
            Ok(String::from_utf8_lossy(&out.stdout).into_owned())
        }
        RunOutcome::Ok(out) => Err(PageFailure::OcrFailed {
            page,
            detail: stderr_lossy(&out),
        }),
        RunOutcome::Timeout => Err(PageFailure::ToolTimeout {
            page,
            tool: "tesseract".into(),
            secs: timeout_secs,
        }),
        RunOutcome::Failed(e) => Err(PageFailure::OcrFailed { page, detail: e }),
    }
}

// ── Image rotation ───────────────────────────────────────────────────────

/// Rotate a page image by `degrees`, returning the path of the rotated
/// image (same as input for `sips`, a sibling file for `convert`).
pub async fn rotate_image(
    tool: RotateTool,
    img: &Path,
    degrees: u32,
    page: usize,
    timeout_secs: u64,
) -> Result<PathBuf, PageFailure> {
    match tool {
        RotateTool::Sips => {
            let mut cmd = Command::new("sips");
            cmd.arg("--rotate").arg(degrees.to_string()).arg(img);
            match run_with_timeout(cmd, timeout_secs).await {
                RunOutcome::Ok(out) if out.status.success() => Ok(img.to_path_buf()),
                RunOutcome::Ok(out) => Err(PageFailure::RasterFailed {
                    page,
                    detail: format!("sips: {}", stderr_lossy(&out)),
                }),
                RunOutcome::Timeout => Err(PageFailure::ToolTimeout {
                    page,
                    tool: "sips".into(),
                    secs: timeout_secs,
                }),
                RunOutcome::Failed(e) => Err(PageFailure::RasterFailed { page, detail: e }),
            }
        }
        RotateTool::Convert => {
            let out_path = img.with_file_name(format!(
                "{}-r{degrees}.png",
                img.file_stem().and_then(|s| s.to_str()).unwrap_or("page")
            ));
            let mut cmd = Command::new("convert");
            cmd.arg(img)
                .arg("-rotate")
                .arg(degrees.to_string())
                .arg(&out_path);
            match run_with_timeout(cmd, timeout_secs).await {
                RunOutcome::Ok(out) if out.status.success() => Ok(out_path),
                RunOutcome::Ok(out) => Err(PageFailure::RasterFailed {
                    page,
                    detail: format!("convert: {}", stderr_lossy(&out)),
                }),
                RunOutcome::Timeout => Err(PageFailure::ToolTimeout {
                    page,
                    tool: "convert".into(),
                    secs: timeout_secs,
                }),
                RunOutcome::Failed(e) => Err(PageFailure::RasterFailed { page, detail: e }),
            }
        }
    }
}
