//! Error kinds for the execution core.
//!
//! Only the kinds that abort startup (bad config, a missing/malformed
//! image, PTY setup failure) are surfaced as [`EmuError`]. Runtime faults
//! (memory violations, illegal opcodes, arithmetic overflow, stack
//! over/underflow, a full IRQ queue, a full UART buffer) are handled
//! locally and only observable through `tracing` events — they're
//! recoverable conditions, not reasons to abort the whole run.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum EmuError {
    #[error("config error in {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    #[error("failed to load {kind} image from {path}: {reason}")]
    Load {
        kind: &'static str,
        path: PathBuf,
        reason: String,
    },

    #[error("PTY setup failed: {0}")]
    Pty(String),
}
