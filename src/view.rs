//! Per-view presentation state over a shared [`DiffTree`].
//!
//! The tree belongs to the session; collapse and selection belong to whoever
//! is looking at it, so several views can browse one diff independently.

use std::collections::HashSet;

use crate::label::Classification;
use crate::session::{DiffView, Phase};
use crate::tree::{DiffTree, NodeId, NodeKey};

#[derive(Debug, Clone, Default)]
pub struct ViewState {
    pub collapsed: HashSet<NodeKey>,
    pub selected: Option<NodeKey>,
}

impl ViewState {
    pub fn toggle(&mut self, key: &NodeKey) {
        if !self.collapsed.remove(key) {
            self.collapsed.insert(key.clone());
        }
    }

    pub fn collapse(&mut self, key: NodeKey) {
        self.collapsed.insert(key);
    }

    pub fn expand(&mut self, key: &NodeKey) {
        self.collapsed.remove(key);
    }

    pub fn expand_all(&mut self) {
        self.collapsed.clear();
    }

    /// Collapse every node of `model_type` that has children.
    pub fn collapse_model(&mut self, tree: &DiffTree, model_type: &str) {
        self.collapsed.extend(
            tree.preorder()
                .filter(|(_, node)| node.key.model_type == model_type && !node.children.is_empty())
                .map(|(_, node)| node.key.clone()),
        );
    }

    pub fn select(&mut self, key: Option<NodeKey>) {
        self.selected = key;
    }

    #[must_use]
    pub fn is_collapsed(&self, key: &NodeKey) -> bool {
        self.collapsed.contains(key)
    }

    /// Rows in preorder, skipping the descendants of collapsed nodes.
    #[must_use]
    pub fn visible_rows(&self, tree: &DiffTree) -> Vec<NodeId> {
        let mut rows = Vec::new();
        let mut hidden_below: Option<usize> = None;

        for (id, node) in tree.preorder() {
            if let Some(depth) = hidden_below {
                if node.depth > depth {
                    continue;
                }
                hidden_below = None;
            }
            rows.push(id);
            if self.collapsed.contains(&node.key) {
                hidden_below = Some(node.depth);
            }
        }

        rows
    }

    /// Move the selection `delta` rows through the visible rows, clamping at
    /// both ends. Selects the first row if nothing visible is selected.
    pub fn move_selection(&mut self, tree: &DiffTree, delta: isize) {
        let rows = self.visible_rows(tree);
        if rows.is_empty() {
            self.selected = None;
            return;
        }
        let current = self
            .selected
            .as_ref()
            .and_then(|key| tree.id_of(key))
            .and_then(|id| rows.iter().position(|row| *row == id));
        let index = current.map_or(0, |i| {
            i.saturating_add_signed(delta).min(rows.len() - 1)
        });
        self.selected = Some(tree.node(rows[index]).key.clone());
    }
}

const fn marker(classification: Classification) -> char {
    match classification {
        Classification::Removed => '-',
        Classification::Added => '+',
        Classification::UnchangedOrModified => '~',
    }
}

/// Render the visible rows as indented text, one line per node.
#[must_use]
pub fn render_lines(view: &DiffView<'_>, state: &ViewState) -> Vec<String> {
    let Some(tree) = view.tree() else {
        return match view.phase() {
            Phase::Empty => vec!["no differences".to_string()],
            Phase::Error => vec![
                view.last_error()
                    .map_or_else(|| "error".to_string(), |err| format!("error: {err}")),
            ],
            phase => vec![phase.to_string()],
        };
    };

    state
        .visible_rows(tree)
        .into_iter()
        .filter_map(|id| {
            let node = tree.try_node(id)?;
            let label = view.label_of(id)?;
            let mut line = format!(
                "{}{} {}: {}",
                "  ".repeat(node.depth),
                marker(label.classification),
                node.key.model_type,
                label.label
            );
            if !label.loaded {
                line.push('…');
            }
            Some(line)
        })
        .collect()
}
