//! CLI binary for pje2md.
//!
//! A thin shim over the library crate: maps flags to `PipelineConfig`,
//! installs signal handling, renders a progress spinner, and prints the
//! batch summary. Exit codes: 0 success, 130 graceful interrupt with a
//! saved checkpoint, 1 fatal.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pje2md::{orchestrator, PipelineConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}

/// Segment Brazilian legal-case PDFs into classified Markdown pieces.
#[derive(Parser, Debug)]
#[command(name = "pje2md", version, about, long_about = None)]
struct Cli {
    /// Source PDF file or directory of PDFs.
    #[arg(long, required_unless_present = "resume")]
    source: Option<PathBuf>,

    /// Output directory (default: ./output).
    #[arg(long, default_value = "output")]
    output: PathBuf,

    /// Resume from a saved checkpoint; --source is read from it.
    #[arg(long)]
    resume: Option<PathBuf>,

    /// Verbose (debug-level) logging.
    #[arg(long, short)]
    verbose: bool,

    /// Probe the PDF and the external tools without running the pipeline.
    #[arg(long)]
    inspect: bool,
}

fn install_signal_handlers() {
    tokio::spawn(async {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            eprintln!(
                "\n{} finishing current stage, writing checkpoint (press again to force quit)",
                yellow("interrupt:")
            );
            orchestrator::request_interrupt();
        }
    });
    #[cfg(unix)]
    tokio::spawn(async {
        let Ok(mut term) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        else {
            return;
        };
        while term.recv().await.is_some() {
            orchestrator::request_interrupt();
        }
    });
}

async fn run_cli(cli: Cli) -> Result<u8> {
    let config = PipelineConfig::builder()
        .build()
        .context("configuration")?;

    if cli.inspect {
        let source = cli
            .source
            .clone()
            .context("--inspect requires --source")?;
        let report = orchestrator::inspect(&source, &config).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(0);
    }

    install_signal_handlers();

    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.set_prefix("pje2md");
    bar.enable_steady_tick(Duration::from_millis(120));

    let outcome = match &cli.resume {
        Some(checkpoint) => {
            bar.set_message(format!("resuming from {}", checkpoint.display()));
            orchestrator::resume(checkpoint, &config).await?
        }
        None => {
            let source = cli.source.clone().context("--source is required")?;
            bar.set_message(format!("processing {}", source.display()));
            orchestrator::run(&source, &cli.output, &config).await?
        }
    };
    bar.finish_and_clear();

    // ── Summary ──────────────────────────────────────────────────────────
    let b = &outcome.batch;
    println!("{}", bold("pje2md summary"));
    println!("  PDFs processed : {}", b.pdf_count);
    for r in &b.reports {
        println!(
            "  {} {} — {} segments, {} / {} / {}",
            dim("•"),
            r.file,
            r.segmentation.total_segments,
            green(&format!("{} passed", r.qc.passed)),
            yellow(&format!("{} flagged", r.qc.flagged)),
            red(&format!("{} rejected", r.qc.rejected)),
        );
        for l in &r.limitations {
            println!("      {} {}", yellow("!"), dim(l));
        }
        for reason in &r.review_reasons {
            println!("      {} {}", red("review:"), reason);
        }
    }
    println!(
        "  QC totals      : {} passed, {} flagged, {} rejected, {} mislabels caught",
        b.summary.passed, b.summary.flagged, b.summary.rejected, b.summary.mislabels_caught
    );

    if outcome.interrupted {
        println!("{}", yellow("interrupted — checkpoint saved, resume with --resume"));
        return Ok(130);
    }
    Ok(0)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run_cli(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{} {e:#}", red("error:"));
            ExitCode::from(1)
        }
    }
}
