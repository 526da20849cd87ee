//! Pipeline stages.
//!
//! Each submodule implements exactly one transformation; keeping stages
//! separate makes each independently testable and lets the orchestrator
//! sequence, checkpoint, and resume them uniformly.
//!
//! ## Data flow
//!
//! ```text
//! intake ─▶ extract(fast) ─▶ profile ─▶ classify ─▶ route
//!                                                    │
//!            extract(hybrid+ocr) ◀───────────────────┘
//!                   │
//!                 strip ─▶ segment ─▶ reclassify ─▶ export ─▶ qc
//! ```
//!
//! 1. [`intake`] — enumerate sorted, fingerprint, deduplicate
//! 2. [`extract`] — bootstrap fast parse; later the hybrid re-extract
//! 3. [`profile`] + [`garbage`] — readability, tiers, 7-signal garbage score
//! 4. [`classify`] — L1 regex cascade over body/heading/tail
//! 5. [`route`] — document + per-page extraction decisions
//! 6. [`ocr`] — rasterize, tesseract, rotation retry, artifact cleanup
//! 7. [`strip`] — recurring header/footer and PJe chrome removal
//! 8. [`segment`] — heading-only boundary detection
//! 9. [`reclassify`] — per-segment L1 (5.5) and positional L2 (5.6)
//! 10. [`export`] — Markdown + frontmatter + index
//! 11. [`qc`] — mislabel, completeness, and coverage validation

pub mod classify;
pub mod export;
pub mod extract;
pub mod garbage;
pub mod intake;
pub mod ocr;
pub mod profile;
pub mod qc;
pub mod reclassify;
pub mod route;
pub mod segment;
pub mod strip;
