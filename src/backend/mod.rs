//! Backend contract for diff structure and node-detail pages.
//!
//! The backend computes the diff; this crate only polls for it. Replies are
//! explicit tagged values so "not computed yet" and "no differences" can never
//! be confused.

mod cli;
mod db;

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::DiffError;
use crate::tree::Side;

pub use cli::CliBackend;
pub use db::SqliteBackend;

/// Property name to scalar value, as recorded on one snapshot.
pub type PropertyMap = BTreeMap<String, Value>;

/// The pair of snapshots being compared, for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiffParams {
    pub entity_type: String,
    pub entity_id: String,
    /// Earlier snapshot, milliseconds since the epoch
    pub left_time: u64,
    /// Later snapshot, milliseconds since the epoch
    pub right_time: u64,
}

impl DiffParams {
    #[must_use]
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        left_time: u64,
        right_time: u64,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            left_time,
            right_time,
        }
    }
}

/// One node of the structure document, recursively.
///
/// The root may carry the enriched fields `nodemap` (position of every node in
/// the backend's enumeration) and `nodecount` (total number of detail records).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureDoc {
    #[serde(rename = "modelType", alias = "model")]
    pub model_type: String,
    pub id: String,
    pub side: Side,
    #[serde(default)]
    pub children: Vec<StructureDoc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodemap: Option<BTreeMap<String, BTreeMap<String, usize>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodecount: Option<usize>,
}

impl StructureDoc {
    /// A plain (non-enriched) node.
    #[must_use]
    pub fn node(
        model_type: impl Into<String>,
        id: impl Into<String>,
        side: Side,
        children: Vec<Self>,
    ) -> Self {
        Self {
            model_type: model_type.into(),
            id: id.into(),
            side,
            children,
            nodemap: None,
            nodecount: None,
        }
    }
}

/// Property detail for one node position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeDetail {
    /// Properties as seen only in the earlier snapshot
    #[serde(default)]
    pub left: Option<PropertyMap>,
    /// Properties as seen only in the later snapshot
    #[serde(default)]
    pub right: Option<PropertyMap>,
    /// Properties shared by both snapshots
    #[serde(default, deserialize_with = "null_as_default")]
    pub both: PropertyMap,
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Outcome of a structure request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructureReply {
    /// Not computed yet; poll again.
    Pending,
    /// The snapshots do not differ.
    Empty,
    Ready(StructureDoc),
}

/// Outcome of a node-page request.
#[derive(Debug, Clone, PartialEq)]
pub enum PageReply {
    /// Detail not available yet; poll again.
    Pending,
    /// Records in position order starting at the requested offset.
    Ready(Vec<NodeDetail>),
}

/// Source of diff structure and node pages.
pub trait DiffBackend {
    /// Fetch the structure document for `params`.
    ///
    /// # Errors
    ///
    /// Returns an error on transport or backend failure.
    fn diff_structure(&self, params: &DiffParams) -> Result<StructureReply>;

    /// Fetch up to `limit` node-detail records starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error on transport or backend failure.
    fn diff_node_page(&self, params: &DiffParams, offset: usize, limit: usize)
    -> Result<PageReply>;
}

impl<B: DiffBackend + ?Sized> DiffBackend for Box<B> {
    fn diff_structure(&self, params: &DiffParams) -> Result<StructureReply> {
        (**self).diff_structure(params)
    }

    fn diff_node_page(
        &self,
        params: &DiffParams,
        offset: usize,
        limit: usize,
    ) -> Result<PageReply> {
        (**self).diff_node_page(params, offset, limit)
    }
}

/// Interpret the `frame` field of a structure response.
///
/// Missing means pending, `null` or `{}` means no differences.
///
/// # Errors
///
/// Returns [`DiffError::MalformedStructure`] if a populated frame is not a
/// valid structure document.
pub fn structure_reply_from_frame(frame: Option<Value>) -> Result<StructureReply> {
    match frame {
        None => Ok(StructureReply::Pending),
        Some(Value::Null) => Ok(StructureReply::Empty),
        Some(Value::Object(map)) if map.is_empty() => Ok(StructureReply::Empty),
        Some(value) => serde_json::from_value(value)
            .map(StructureReply::Ready)
            .map_err(|err| DiffError::MalformedStructure(err.to_string()).into()),
    }
}

/// Decode a `{ "frame": ... }` response body.
///
/// # Errors
///
/// Returns an error if the body is not a JSON object or the frame is invalid.
pub fn decode_structure_reply(body: &[u8]) -> Result<StructureReply> {
    let mut body: serde_json::Map<String, Value> =
        serde_json::from_slice(body).context("Failed to parse structure response JSON")?;
    structure_reply_from_frame(body.remove("frame"))
}

#[derive(Deserialize)]
struct NodePageBody {
    #[serde(default)]
    nodes: Option<Vec<NodeDetail>>,
}

/// Decode a `{ "nodes": [...] }` response body. Missing `nodes` means pending.
///
/// # Errors
///
/// Returns an error if the body is not valid JSON of that shape.
pub fn decode_page_reply(body: &[u8]) -> Result<PageReply> {
    let body: NodePageBody =
        serde_json::from_slice(body).context("Failed to parse node page JSON")?;
    Ok(body.nodes.map_or(PageReply::Pending, PageReply::Ready))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_frame_is_pending() {
        let reply = decode_structure_reply(br#"{"status": "running"}"#).unwrap();
        assert_eq!(reply, StructureReply::Pending);
    }

    #[test]
    fn test_null_or_empty_frame_is_empty() {
        assert_eq!(
            decode_structure_reply(br#"{"frame": null}"#).unwrap(),
            StructureReply::Empty
        );
        assert_eq!(
            decode_structure_reply(br#"{"frame": {}}"#).unwrap(),
            StructureReply::Empty
        );
    }

    #[test]
    fn test_populated_frame_decodes() {
        let body = br#"{"frame": {
            "modelType": "Environment", "id": "env-1", "side": "both",
            "children": [{"model": "Host", "id": "h1", "side": "left-only"}],
            "nodemap": {"Environment": {"env-1": 0}, "Host": {"h1": 1}},
            "nodecount": 2
        }}"#;
        let StructureReply::Ready(doc) = decode_structure_reply(body).unwrap() else {
            panic!("expected a structure document");
        };
        assert_eq!(doc.model_type, "Environment");
        assert_eq!(doc.nodecount, Some(2));
        assert_eq!(doc.children[0].side, Side::LeftOnly);
        assert!(doc.children[0].children.is_empty());
        assert_eq!(doc.nodemap.unwrap()["Host"]["h1"], 1);
    }

    #[test]
    fn test_invalid_frame_is_error() {
        let err = decode_structure_reply(br#"{"frame": {"id": "x"}}"#).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DiffError>(),
            Some(DiffError::MalformedStructure(_))
        ));

        let err = decode_structure_reply(b"not json").unwrap_err();
        assert!(err.downcast_ref::<DiffError>().is_none());
    }

    #[test]
    fn test_page_reply() {
        assert_eq!(decode_page_reply(b"{}").unwrap(), PageReply::Pending);

        let reply = decode_page_reply(
            br#"{"nodes": [
                {"both": {"name": "eth0"}},
                {"left": {"mtu": 1500}, "right": {"mtu": 9000}, "both": null}
            ]}"#,
        )
        .unwrap();
        let PageReply::Ready(nodes) = reply else {
            panic!("expected records");
        };
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].both["name"], "eth0");
        assert!(nodes[0].left.is_none());
        assert!(nodes[1].both.is_empty());
        assert_eq!(nodes[1].right.as_ref().unwrap()["mtu"], 9000);
    }
}
