//! Message types for the Elm Architecture

use crate::backend::{DiffParams, PageReply, StructureReply};
use crate::command::TimerKind;
use crate::error::DiffError;

/// All lifecycle requests, timer ticks and backend completions
#[derive(Debug, Clone)]
pub enum Message {
    // === Lifecycle ===
    /// Open a diff; resets the session if the params differ from the active ones
    Start(DiffParams),
    /// Restart the active diff from structure resolution
    Refresh,
    /// Close the diff view
    Cancel,

    // === Timers ===
    Tick {
        timer: TimerKind,
        generation: u64,
    },

    // === Backend completions ===
    StructureReceived {
        generation: u64,
        reply: Result<StructureReply, DiffError>,
    },
    NodePageReceived {
        generation: u64,
        offset: usize,
        reply: Result<PageReply, DiffError>,
    },
}
