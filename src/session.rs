//! Diff session state and its read-only view.

use std::collections::HashSet;
use std::fmt;

use crate::backend::DiffParams;
use crate::command::{Command, TimerKind};
use crate::config::DiffConfig;
use crate::cursor::HydrationCursor;
use crate::error::DiffError;
use crate::label::{Classification, LabelResolver, NodeLabel, PropertyDiff, property_diffs};
use crate::table::NodeTable;
use crate::tree::{DiffTree, NodeId, NodeKey};

/// Lifecycle phase of a diff session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// No diff requested yet
    #[default]
    Idle,
    LoadingStructure,
    LoadingNodes,
    /// Fully hydrated; the tree stays browsable
    Done,
    /// The snapshots do not differ
    Empty,
    Error,
    /// The view was closed
    Cancelled,
}

impl Phase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::LoadingStructure => "loadingStructure",
            Self::LoadingNodes => "loadingNodes",
            Self::Done => "done",
            Self::Empty => "empty",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub const fn is_polling(self) -> bool {
        matches!(self, Self::LoadingStructure | Self::LoadingNodes)
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Empty | Self::Error | Self::Cancelled)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub structure_requests: usize,
    pub page_requests: usize,
    /// Responses dropped for a superseded generation, phase or offset
    pub stale_responses: usize,
}

/// Hydration progress as seen by the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub filled: usize,
    pub total: Option<usize>,
    pub complete: bool,
}

/// State for one diff request.
///
/// Transitions are made by [`crate::update::update`]; everything else reads
/// the session through [`DiffSession::view`].
#[derive(Debug)]
pub struct DiffSession {
    pub(crate) phase: Phase,
    /// Bumped on every reset and cancel; requests and timers carry it
    pub(crate) generation: u64,
    pub(crate) params: Option<DiffParams>,
    pub(crate) tree: Option<DiffTree>,
    pub(crate) table: NodeTable,
    pub(crate) cursor: Option<HydrationCursor>,
    pub(crate) last_error: Option<DiffError>,
    pub(crate) armed: HashSet<TimerKind>,
    pub(crate) stats: SessionStats,
    pub(crate) config: DiffConfig,
    labels: LabelResolver,
}

impl DiffSession {
    #[must_use]
    pub fn new(config: DiffConfig) -> Self {
        let labels = LabelResolver::new(config.label_properties.clone());
        Self {
            phase: Phase::Idle,
            generation: 0,
            params: None,
            tree: None,
            table: NodeTable::default(),
            cursor: None,
            last_error: None,
            armed: HashSet::new(),
            stats: SessionStats::default(),
            config,
            labels,
        }
    }

    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub const fn params(&self) -> Option<&DiffParams> {
        self.params.as_ref()
    }

    #[must_use]
    pub const fn stats(&self) -> SessionStats {
        self.stats
    }

    #[must_use]
    pub const fn config(&self) -> &DiffConfig {
        &self.config
    }

    #[must_use]
    pub const fn cursor(&self) -> Option<&HydrationCursor> {
        self.cursor.as_ref()
    }

    #[must_use]
    pub const fn table(&self) -> &NodeTable {
        &self.table
    }

    #[must_use]
    pub fn is_armed(&self, timer: TimerKind) -> bool {
        self.armed.contains(&timer)
    }

    #[must_use]
    pub const fn view(&self) -> DiffView<'_> {
        DiffView { session: self }
    }

    /// Cancel every timer, whether or not it is armed.
    pub(crate) fn cancel_timers(&mut self, commands: &mut Vec<Command>) {
        for timer in TimerKind::ALL {
            commands.push(Command::CancelTimer(timer));
        }
        self.armed.clear();
    }

    pub(crate) fn arm(&mut self, timer: TimerKind, commands: &mut Vec<Command>) {
        self.armed.insert(timer);
        commands.push(Command::ArmTimer {
            timer,
            generation: self.generation,
            period: self.config.poll_interval(),
        });
    }

    /// Drop all child state and begin structure resolution for `params`.
    pub(crate) fn reset(&mut self, params: DiffParams) -> Vec<Command> {
        let mut commands = Vec::new();
        self.cancel_timers(&mut commands);

        self.generation += 1;
        self.tree = None;
        self.table = NodeTable::default();
        self.cursor = None;
        self.last_error = None;
        self.phase = Phase::LoadingStructure;

        commands.push(self.fetch_structure(&params));
        self.params = Some(params);
        self.arm(TimerKind::StructurePoll, &mut commands);
        commands
    }

    pub(crate) fn fetch_structure(&mut self, params: &DiffParams) -> Command {
        self.stats.structure_requests += 1;
        Command::FetchStructure {
            generation: self.generation,
            params: params.clone(),
        }
    }

    /// Ask the cursor for the next page; `None` when hydration is complete.
    pub(crate) fn fetch_next_page(&mut self) -> Option<Command> {
        let params = self.params.as_ref()?;
        let request = self.cursor.as_ref()?.request_next_page()?;
        self.stats.page_requests += 1;
        Some(Command::FetchNodePage {
            generation: self.generation,
            params: params.clone(),
            offset: request.offset,
            limit: request.limit,
        })
    }

    /// Stop polling and keep whatever was built.
    pub(crate) fn finish(&mut self, phase: Phase) -> Vec<Command> {
        let mut commands = Vec::new();
        self.cancel_timers(&mut commands);
        self.phase = phase;
        commands
    }

    pub(crate) fn fail(&mut self, error: DiffError) -> Vec<Command> {
        self.last_error = Some(error);
        self.finish(Phase::Error)
    }
}

/// Read-only view model handed to renderers.
#[derive(Clone, Copy)]
pub struct DiffView<'a> {
    session: &'a DiffSession,
}

impl<'a> DiffView<'a> {
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.session.phase
    }

    #[must_use]
    pub const fn tree(&self) -> Option<&'a DiffTree> {
        self.session.tree.as_ref()
    }

    #[must_use]
    pub const fn last_error(&self) -> Option<&'a DiffError> {
        self.session.last_error.as_ref()
    }

    #[must_use]
    pub const fn params(&self) -> Option<&'a DiffParams> {
        self.session.params.as_ref()
    }

    /// Label, classification and load state of a node, or `None` if the node
    /// is not in the tree.
    #[must_use]
    pub fn label(&self, key: &NodeKey) -> Option<NodeLabel> {
        let node = self.tree()?.get(key)?;
        Some(self.session.labels.resolve(node, &self.session.table))
    }

    /// Like [`DiffView::label`], by arena id. `None` for an id that is not
    /// in the current tree, such as one kept across a reset.
    #[must_use]
    pub fn label_of(&self, id: NodeId) -> Option<NodeLabel> {
        let node = self.tree()?.try_node(id)?;
        Some(self.session.labels.resolve(node, &self.session.table))
    }

    #[must_use]
    pub fn classification(&self, key: &NodeKey) -> Option<Classification> {
        let node = self.tree()?.get(key)?;
        Some(Classification::from_side(node.side))
    }

    #[must_use]
    pub fn is_loaded(&self, key: &NodeKey) -> bool {
        self.session.table.detail_for(key).is_some()
    }

    /// Per-property comparison for a node whose detail has arrived.
    #[must_use]
    pub fn property_diffs(&self, key: &NodeKey) -> Option<Vec<PropertyDiff>> {
        self.session.table.detail_for(key).map(property_diffs)
    }

    #[must_use]
    pub fn progress(&self) -> Progress {
        let cursor = self.session.cursor.as_ref();
        Progress {
            filled: self.session.table.filled(),
            total: cursor.and_then(HydrationCursor::total),
            complete: cursor.is_some_and(HydrationCursor::is_complete),
        }
    }
}
