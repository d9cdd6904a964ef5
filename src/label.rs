//! Display labels and diff classification for tree nodes.
//!
//! Everything here is computed on demand from the latest [`NodeTable`], so a
//! label improves as soon as the node's detail page lands.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use crate::backend::{NodeDetail, PropertyMap};
use crate::config::default_label_properties;
use crate::table::NodeTable;
use crate::tree::{Side, TreeNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    Removed,
    Added,
    UnchangedOrModified,
}

impl Classification {
    #[must_use]
    pub const fn from_side(side: Side) -> Self {
        match side {
            Side::LeftOnly => Self::Removed,
            Side::RightOnly => Self::Added,
            Side::Both => Self::UnchangedOrModified,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Removed => "removed",
            Self::Added => "added",
            Self::UnchangedOrModified => "unchanged-or-modified",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved display data for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeLabel {
    pub label: String,
    pub classification: Classification,
    /// Whether the node's detail record has arrived
    pub loaded: bool,
}

/// One property compared across the two snapshots.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDiff {
    pub name: String,
    pub left: Option<Value>,
    pub right: Option<Value>,
}

impl PropertyDiff {
    #[must_use]
    pub fn changed(&self) -> bool {
        self.left != self.right
    }
}

#[derive(Debug, Clone)]
pub struct LabelResolver {
    /// Model type -> name of the property used as its label
    label_properties: BTreeMap<String, String>,
}

impl Default for LabelResolver {
    fn default() -> Self {
        Self::new(default_label_properties())
    }
}

impl LabelResolver {
    #[must_use]
    pub const fn new(label_properties: BTreeMap<String, String>) -> Self {
        Self { label_properties }
    }

    #[must_use]
    pub fn label_property(&self, model_type: &str) -> Option<&str> {
        self.label_properties.get(model_type).map(String::as_str)
    }

    /// Label for `node`, falling back to its id when the detail or the
    /// configured property is missing.
    #[must_use]
    pub fn label(&self, node: &TreeNode, table: &NodeTable) -> String {
        let Some(property) = self.label_property(&node.key.model_type) else {
            return node.key.id.clone();
        };
        table
            .detail_for(&node.key)
            .and_then(|detail| preferred_value(detail, property))
            .map_or_else(|| node.key.id.clone(), display_value)
    }

    #[must_use]
    pub fn resolve(&self, node: &TreeNode, table: &NodeTable) -> NodeLabel {
        NodeLabel {
            label: self.label(node, table),
            classification: Classification::from_side(node.side),
            loaded: table.detail_for(&node.key).is_some(),
        }
    }
}

/// Value of `property`, preferring `both`, then `right`, then `left`.
///
/// Null counts as not defined.
#[must_use]
pub fn preferred_value<'a>(detail: &'a NodeDetail, property: &str) -> Option<&'a Value> {
    [Some(&detail.both), detail.right.as_ref(), detail.left.as_ref()]
        .into_iter()
        .flatten()
        .find_map(|props| props.get(property).filter(|v| !v.is_null()))
}

/// Compare every property across the snapshots, sorted by name.
///
/// The earlier snapshot sees `left` over `both`, the later one `right` over
/// `both`.
#[must_use]
pub fn property_diffs(detail: &NodeDetail) -> Vec<PropertyDiff> {
    let empty = PropertyMap::new();
    let left = detail.left.as_ref().unwrap_or(&empty);
    let right = detail.right.as_ref().unwrap_or(&empty);

    let mut names: Vec<&String> = left
        .keys()
        .chain(right.keys())
        .chain(detail.both.keys())
        .collect();
    names.sort();
    names.dedup();

    names
        .into_iter()
        .map(|name| PropertyDiff {
            name: name.clone(),
            left: left.get(name).or_else(|| detail.both.get(name)).cloned(),
            right: right.get(name).or_else(|| detail.both.get(name)).cloned(),
        })
        .collect()
}

/// Render a scalar for display; strings lose their quotes.
#[must_use]
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
