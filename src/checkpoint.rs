//! Checksum-guarded stage checkpoints.
//!
//! After every stage the orchestrator atomically writes
//! `.checkpoint.json`: the current stage, the completed stages, per-stage
//! results, and a SHA-256 over the JSON **without** its `checksum` field.
//! On `--resume` the file is reloaded and the checksum recomputed; any
//! mismatch — truncation, tampering, a partial write that survived a
//! crash — rejects the checkpoint and the run restarts from stage 1 with
//! a warning. A corrupt checkpoint is treated as absent, never as fatal.

use crate::config::PIPELINE_VERSION;
use crate::error::PipelineError;
use crate::pipeline::export::write_atomic;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name of the checkpoint file inside the per-PDF output directory.
pub const CHECKPOINT_FILE: &str = ".checkpoint.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    /// "completed" | "failed".
    pub status: String,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub pipeline_version: String,
    /// Absolute source path.
    pub source: PathBuf,
    pub started_at: String,
    pub current_stage: u8,
    /// Subset of 1..=6, ascending.
    pub completed_stages: Vec<u8>,
    /// Keyed "1".."6".
    pub stage_results: BTreeMap<String, StageResult>,
    /// SHA-256 of this document serialized without the checksum field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl Checkpoint {
    pub fn new(source: PathBuf) -> Self {
        Self {
            pipeline_version: PIPELINE_VERSION.to_string(),
            source,
            started_at: chrono::Utc::now().to_rfc3339(),
            current_stage: 1,
            completed_stages: Vec::new(),
            stage_results: BTreeMap::new(),
            checksum: None,
        }
    }

    /// Record a completed stage.
    pub fn complete_stage(&mut self, stage: u8, duration_ms: u64, output_path: Option<PathBuf>) {
        if !self.completed_stages.contains(&stage) {
            self.completed_stages.push(stage);
            self.completed_stages.sort_unstable();
        }
        self.current_stage = stage.saturating_add(1).min(6);
        self.stage_results.insert(
            stage.to_string(),
            StageResult {
                status: "completed".to_string(),
                duration_ms,
                output_path,
            },
        );
    }

    pub fn is_stage_complete(&self, stage: u8) -> bool {
        self.completed_stages.contains(&stage)
    }

    /// SHA-256 of the serialized checkpoint with `checksum` absent.
    pub fn compute_checksum(&self) -> String {
        let mut unsigned = self.clone();
        unsigned.checksum = None;
        let bytes = serde_json::to_vec(&unsigned).expect("checkpoint serializes");
        let digest = Sha256::digest(&bytes);
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Sign and atomically persist.
    pub fn save(&mut self, path: &Path) -> Result<(), PipelineError> {
        self.checksum = Some(self.compute_checksum());
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| PipelineError::Internal(format!("checkpoint serialization: {e}")))?;
        write_atomic(path, &json)?;
        debug!(
            stage = self.current_stage,
            completed = ?self.completed_stages,
            "checkpoint saved"
        );
        Ok(())
    }

    /// Load and validate. Any defect — unreadable, malformed JSON, version
    /// drift, checksum mismatch — returns `None` with a warning, which
    /// callers treat as "no checkpoint, start from stage 1".
    pub fn load(path: &Path) -> Option<Checkpoint> {
        let raw = match std::fs::read_to_string(path) {
            Ok(r) => r,
            Err(e) => {
                if path.exists() {
                    warn!("checkpoint unreadable, restarting from stage 1: {e}");
                }
                return None;
            }
        };
        let ckpt: Checkpoint = match serde_json::from_str(&raw) {
            Ok(c) => c,
            Err(e) => {
                warn!("checkpoint malformed, restarting from stage 1: {e}");
                return None;
            }
        };
        let Some(stored) = ckpt.checksum.as_deref() else {
            warn!("checkpoint missing checksum, restarting from stage 1");
            return None;
        };
        let computed = ckpt.compute_checksum();
        if stored != computed {
            warn!("checkpoint checksum mismatch (tampered or truncated), restarting from stage 1");
            return None;
        }
        if ckpt.pipeline_version != PIPELINE_VERSION {
            warn!(
                "checkpoint from pipeline {} (this is {}), restarting from stage 1",
                ckpt.pipeline_version, PIPELINE_VERSION
            );
            return None;
        }
        Some(ckpt)
    }
}
