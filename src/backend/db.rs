//! Read access to a SQLite diff cache populated by the diff service.

use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;

use super::{DiffBackend, DiffParams, NodeDetail, PageReply, StructureReply, structure_reply_from_frame};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS diff_structures (
    entity_type TEXT NOT NULL,
    entity_id   TEXT NOT NULL,
    left_time   INTEGER NOT NULL,
    right_time  INTEGER NOT NULL,
    frame       TEXT,
    nodes_ready INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (entity_type, entity_id, left_time, right_time)
);
CREATE TABLE IF NOT EXISTS diff_nodes (
    entity_type TEXT NOT NULL,
    entity_id   TEXT NOT NULL,
    left_time   INTEGER NOT NULL,
    right_time  INTEGER NOT NULL,
    position    INTEGER NOT NULL,
    detail      TEXT NOT NULL,
    PRIMARY KEY (entity_type, entity_id, left_time, right_time, position)
);
";

/// Database handle for a diff cache.
pub struct SqliteBackend {
    conn: Connection,
}

impl SqliteBackend {
    /// Open an existing diff cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        Ok(Self { conn })
    }

    /// Open (or create) a diff cache and make sure its tables exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the schema cannot be applied.
    pub fn create(path: &Path) -> Result<Self> {
        let backend = Self::open(path)?;
        backend
            .conn
            .execute_batch(SCHEMA)
            .context("Failed to create diff cache schema")?;
        Ok(backend)
    }

    /// Record the structure frame for `params`. A `null` frame means no differences.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be written.
    pub fn put_structure(&self, params: &DiffParams, frame: &Value) -> Result<()> {
        let (left, right) = times(params)?;
        self.conn
            .execute(
                "INSERT INTO diff_structures (entity_type, entity_id, left_time, right_time, frame)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (entity_type, entity_id, left_time, right_time)
                 DO UPDATE SET frame = excluded.frame",
                params![
                    params.entity_type,
                    params.entity_id,
                    left,
                    right,
                    serde_json::to_string(frame)?
                ],
            )
            .context("Failed to store structure")?;
        Ok(())
    }

    /// Record node details in position order and mark the nodes as ready.
    ///
    /// # Errors
    ///
    /// Returns an error if any row cannot be written.
    pub fn put_nodes(&mut self, params: &DiffParams, details: &[NodeDetail]) -> Result<()> {
        let (left, right) = times(params)?;
        let tx = self.conn.transaction()?;
        for (position, detail) in details.iter().enumerate() {
            tx.execute(
                "INSERT OR REPLACE INTO diff_nodes
                 (entity_type, entity_id, left_time, right_time, position, detail)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    params.entity_type,
                    params.entity_id,
                    left,
                    right,
                    i64::try_from(position)?,
                    serde_json::to_string(detail)?
                ],
            )?;
        }
        tx.execute(
            "UPDATE diff_structures SET nodes_ready = 1
             WHERE entity_type = ?1 AND entity_id = ?2 AND left_time = ?3 AND right_time = ?4",
            params![params.entity_type, params.entity_id, left, right],
        )?;
        tx.commit().context("Failed to store node details")
    }

    /// `None` when no row exists; `Some((frame, nodes_ready))` otherwise.
    fn structure_row(&self, params: &DiffParams) -> Result<Option<(Option<String>, bool)>> {
        let (left, right) = times(params)?;
        self.conn
            .query_row(
                "SELECT frame, nodes_ready FROM diff_structures
                 WHERE entity_type = ?1 AND entity_id = ?2 AND left_time = ?3 AND right_time = ?4",
                params![params.entity_type, params.entity_id, left, right],
                |row| Ok((row.get(0)?, row.get::<_, i64>(1)? != 0)),
            )
            .optional()
            .context("Failed to query diff structure")
    }
}

fn times(params: &DiffParams) -> Result<(i64, i64)> {
    let left = i64::try_from(params.left_time).context("left time out of range")?;
    let right = i64::try_from(params.right_time).context("right time out of range")?;
    Ok((left, right))
}

impl DiffBackend for SqliteBackend {
    fn diff_structure(&self, params: &DiffParams) -> Result<StructureReply> {
        let Some((frame, _)) = self.structure_row(params)? else {
            return Ok(StructureReply::Pending);
        };
        let frame = match frame {
            Some(text) => serde_json::from_str(&text).context("Failed to parse stored frame")?,
            None => Value::Null,
        };
        structure_reply_from_frame(Some(frame))
    }

    fn diff_node_page(
        &self,
        params: &DiffParams,
        offset: usize,
        limit: usize,
    ) -> Result<PageReply> {
        if !matches!(self.structure_row(params)?, Some((_, true))) {
            return Ok(PageReply::Pending);
        }

        let (left, right) = times(params)?;
        let start = i64::try_from(offset)?;
        let end = start.saturating_add(i64::try_from(limit)?);
        let mut stmt = self.conn.prepare(
            "SELECT detail FROM diff_nodes
             WHERE entity_type = ?1 AND entity_id = ?2 AND left_time = ?3 AND right_time = ?4
               AND position >= ?5 AND position < ?6
             ORDER BY position",
        )?;
        let rows = stmt
            .query_map(
                params![params.entity_type, params.entity_id, left, right, start, end],
                |row| row.get::<_, String>(0),
            )?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to query node details")?;

        let details = rows
            .iter()
            .map(|text| serde_json::from_str(text).context("Failed to parse stored node detail"))
            .collect::<Result<Vec<NodeDetail>>>()?;
        Ok(PageReply::Ready(details))
    }
}
