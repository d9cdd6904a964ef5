//! Immutable-shape diff tree.
//!
//! Nodes live in an arena and refer to each other by [`NodeId`]. The shape is
//! fixed when the tree is built from a structure document; per-node detail and
//! view state (collapsed, selected) live elsewhere, keyed by [`NodeKey`].

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::backend::StructureDoc;
use crate::error::{DiffError, Result};

/// Identity of a node within one session.
///
/// Ordering is `(model_type, id)` by ordinal string comparison, which is the
/// sibling order used for rendering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey {
    pub model_type: String,
    pub id: String,
}

impl NodeKey {
    #[must_use]
    pub fn new(model_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            model_type: model_type.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.model_type, self.id)
    }
}

/// Which snapshot(s) a node was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Only in the earlier snapshot
    #[serde(rename = "left-only", alias = "left")]
    LeftOnly,
    /// Only in the later snapshot
    #[serde(rename = "right-only", alias = "right")]
    RightOnly,
    /// In both snapshots, properties possibly changed
    #[serde(rename = "both")]
    Both,
}

/// Index of a node in its tree's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct TreeNode {
    pub key: NodeKey,
    pub side: Side,
    pub parent: Option<NodeId>,
    /// Sorted by `NodeKey`
    pub children: Vec<NodeId>,
    /// Root is depth 0
    pub depth: usize,
}

#[derive(Debug, Clone)]
pub struct DiffTree {
    nodes: Vec<TreeNode>,
    index: HashMap<NodeKey, NodeId>,
}

impl DiffTree {
    /// Build the tree in one pass over the structure document.
    ///
    /// Children are sorted by `(model_type, id)` so the backend does not need
    /// to pre-sort.
    ///
    /// # Errors
    ///
    /// Returns [`DiffError::MalformedStructure`] if an identity appears twice.
    pub fn from_document(doc: &StructureDoc) -> Result<Self> {
        let mut tree = Self {
            nodes: Vec::new(),
            index: HashMap::new(),
        };

        // (document node, parent, depth)
        let mut stack: Vec<(&StructureDoc, Option<NodeId>, usize)> = vec![(doc, None, 0)];
        while let Some((node, parent, depth)) = stack.pop() {
            let key = NodeKey::new(node.model_type.as_str(), node.id.as_str());
            if tree.index.contains_key(&key) {
                return Err(DiffError::MalformedStructure(format!(
                    "duplicate node identity {key}"
                )));
            }

            let id = NodeId(tree.nodes.len());
            tree.index.insert(key.clone(), id);
            tree.nodes.push(TreeNode {
                key,
                side: node.side,
                parent,
                children: Vec::with_capacity(node.children.len()),
                depth,
            });
            if let Some(parent) = parent {
                tree.nodes[parent.0].children.push(id);
            }

            // Push in reverse so siblings are visited (and numbered) in order.
            let mut children: Vec<&StructureDoc> = node.children.iter().collect();
            children.sort_by(|a, b| {
                (a.model_type.as_str(), a.id.as_str()).cmp(&(b.model_type.as_str(), b.id.as_str()))
            });
            for child in children.into_iter().rev() {
                stack.push((child, Some(id), depth + 1));
            }
        }

        Ok(tree)
    }

    #[must_use]
    pub const fn root(&self) -> NodeId {
        NodeId(0)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// # Panics
    ///
    /// Panics if `id` was not produced by this tree.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &TreeNode {
        &self.nodes[id.0]
    }

    /// Like [`DiffTree::node`], for ids that may come from an earlier tree.
    #[must_use]
    pub fn try_node(&self, id: NodeId) -> Option<&TreeNode> {
        self.nodes.get(id.0)
    }

    #[must_use]
    pub fn find(&self, model_type: &str, id: &str) -> Option<NodeId> {
        self.index.get(&NodeKey::new(model_type, id)).copied()
    }

    #[must_use]
    pub fn get(&self, key: &NodeKey) -> Option<&TreeNode> {
        self.index.get(key).map(|id| &self.nodes[id.0])
    }

    #[must_use]
    pub fn id_of(&self, key: &NodeKey) -> Option<NodeId> {
        self.index.get(key).copied()
    }

    /// Depth-first, parent before children, siblings in sorted order.
    #[must_use]
    pub fn preorder(&self) -> Preorder<'_> {
        Preorder {
            tree: self,
            stack: if self.nodes.is_empty() {
                Vec::new()
            } else {
                vec![self.root()]
            },
        }
    }
}

/// Lazy preorder walk over a [`DiffTree`].
pub struct Preorder<'a> {
    tree: &'a DiffTree,
    stack: Vec<NodeId>,
}

impl<'a> Iterator for Preorder<'a> {
    type Item = (NodeId, &'a TreeNode);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        let node = self.tree.node(id);
        self.stack.extend(node.children.iter().rev().copied());
        Some((id, node))
    }
}
