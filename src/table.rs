//! Sparse table of node-detail records, filled page by page.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};

use crate::backend::{NodeDetail, StructureDoc};
use crate::error::{DiffError, Result};
use crate::tree::{DiffTree, NodeKey};

/// Position-indexed node detail plus the `(model_type, id) -> position` index.
///
/// A position is filled at most once; later fills of the same position are
/// ignored. Storage grows with the filled positions, never with `total`.
#[derive(Debug, Clone, Default)]
pub struct NodeTable {
    records: BTreeMap<usize, NodeDetail>,
    total: Option<usize>,
    positions: HashMap<NodeKey, usize>,
}

impl NodeTable {
    #[must_use]
    pub fn new(positions: HashMap<NodeKey, usize>, total: Option<usize>) -> Self {
        Self {
            records: BTreeMap::new(),
            total,
            positions,
        }
    }

    /// Build the reverse index for a freshly resolved structure.
    ///
    /// Uses the document's `nodemap` when present, otherwise numbers the nodes
    /// in tree preorder. The total comes from `nodecount` only.
    ///
    /// # Errors
    ///
    /// Returns [`DiffError::MalformedStructure`] if the node map gives two
    /// identities the same position or a position beyond `nodecount`.
    pub fn for_structure(doc: &StructureDoc, tree: &DiffTree) -> Result<Self> {
        let total = doc.nodecount;
        let Some(nodemap) = &doc.nodemap else {
            let positions = tree
                .preorder()
                .enumerate()
                .map(|(position, (_, node))| (node.key.clone(), position))
                .collect();
            return Ok(Self::new(positions, total));
        };

        let mut positions = HashMap::new();
        let mut owners: HashMap<usize, NodeKey> = HashMap::new();
        for (model_type, ids) in nodemap {
            for (id, &position) in ids {
                let key = NodeKey::new(model_type.as_str(), id.as_str());
                if let Some(total) = total {
                    if position >= total {
                        return Err(DiffError::MalformedStructure(format!(
                            "{key} mapped to position {position} beyond node count {total}"
                        )));
                    }
                }
                if let Some(other) = owners.insert(position, key.clone()) {
                    return Err(DiffError::MalformedStructure(format!(
                        "position {position} mapped to both {other} and {key}"
                    )));
                }
                positions.insert(key, position);
            }
        }
        Ok(Self::new(positions, total))
    }

    /// Fill one position. Returns false if it was already filled.
    pub fn fill(&mut self, position: usize, detail: NodeDetail) -> bool {
        match self.records.entry(position) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(detail);
                true
            }
        }
    }

    #[must_use]
    pub fn get(&self, position: usize) -> Option<&NodeDetail> {
        self.records.get(&position)
    }

    #[must_use]
    pub fn position_of(&self, key: &NodeKey) -> Option<usize> {
        self.positions.get(key).copied()
    }

    /// Detail for a tree node, if its position is known and filled.
    #[must_use]
    pub fn detail_for(&self, key: &NodeKey) -> Option<&NodeDetail> {
        self.position_of(key).and_then(|position| self.get(position))
    }

    #[must_use]
    pub fn is_filled(&self, position: usize) -> bool {
        self.get(position).is_some()
    }

    /// Number of filled positions.
    #[must_use]
    pub fn filled(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub const fn total(&self) -> Option<usize> {
        self.total
    }
}
