//! Effects requested by [`crate::update::update`].
//!
//! `update` never performs I/O; it returns commands and the
//! [`crate::runtime::Driver`] carries them out.

use std::time::Duration;

use crate::backend::DiffParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Retries the structure request while it is pending
    StructurePoll,
    /// Retries the node-page request while hydration is incomplete
    NodePoll,
}

impl TimerKind {
    pub const ALL: [Self; 2] = [Self::StructurePoll, Self::NodePoll];
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    FetchStructure {
        generation: u64,
        params: DiffParams,
    },
    FetchNodePage {
        generation: u64,
        params: DiffParams,
        offset: usize,
        limit: usize,
    },
    /// Start a fixed-period timer; replaces any timer of the same kind.
    ArmTimer {
        timer: TimerKind,
        generation: u64,
        period: Duration,
    },
    CancelTimer(TimerKind),
}
