//! Persistence for Merkle nodes: spec §4.3.3's "encode children, gzip if
//! encoded size > 100 bytes" rule, and a `NodeProvider` impl over the catalog
//! connection so `merkle::diff` can walk nodes straight out of the database.

use crate::merkle::{ChildSummary, MerkleNode, NodeKind, NodeProvider};
use crate::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

const COMPRESSION_GZIP: &str = "GZIP";
const COMPRESS_THRESHOLD: usize = 100;

#[derive(Serialize, Deserialize)]
struct StoredChild {
    hash: String,
    kind: String,
    name: String,
    size: i64,
    file_id: Option<String>,
}

impl From<&ChildSummary> for StoredChild {
    fn from(c: &ChildSummary) -> Self {
        Self {
            hash: c.hash.clone(),
            kind: c.kind.as_db_str().to_string(),
            name: c.name.clone(),
            size: c.size as i64,
            file_id: c.file_id.clone(),
        }
    }
}

pub fn upsert_node(conn: &Connection, node: &MerkleNode) -> Result<()> {
    let (children_blob, compression) = match &node.children {
        None => (None, None),
        Some(children) => {
            let stored: Vec<StoredChild> = children.iter().map(StoredChild::from).collect();
            let json = serde_json::to_vec(&stored)?;
            if json.len() > COMPRESS_THRESHOLD {
                let mut encoder =
                    flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(&json)?;
                (Some(encoder.finish()?), Some(COMPRESSION_GZIP))
            } else {
                (Some(json), None)
            }
        }
    };

    conn.execute(
        "INSERT INTO merkle_nodes(hash, type, name, size, children, file_id, compression)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(hash) DO NOTHING",
        params![
            node.hash,
            node.kind.as_db_str(),
            node.name,
            node.size as i64,
            children_blob,
            node.file_id,
            compression,
        ],
    )?;
    Ok(())
}

pub fn get_node(conn: &Connection, hash: &str) -> Result<Option<MerkleNode>> {
    let row = conn
        .query_row(
            "SELECT type, name, size, children, file_id, compression FROM merkle_nodes WHERE hash = ?1",
            [hash],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Option<Vec<u8>>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            },
        )
        .optional()?;

    let Some((kind_str, name, size, children_blob, file_id, compression)) = row else {
        return Ok(None);
    };

    let kind = NodeKind::from_db_str(&kind_str)?;
    let children = match children_blob {
        None => None,
        Some(blob) => {
            let json = if compression.as_deref() == Some(COMPRESSION_GZIP) {
                let mut decoder = flate2::read::GzDecoder::new(&blob[..]);
                let mut out = Vec::new();
                decoder.read_to_end(&mut out)?;
                out
            } else {
                blob
            };
            let stored: Vec<StoredChild> = serde_json::from_slice(&json)?;
            Some(
                stored
                    .into_iter()
                    .map(|c| {
                        Ok(ChildSummary {
                            hash: c.hash,
                            kind: NodeKind::from_db_str(&c.kind)?,
                            name: c.name,
                            size: c.size as u64,
                            file_id: c.file_id,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?,
            )
        }
    };

    Ok(Some(MerkleNode {
        hash: hash.to_string(),
        kind,
        name,
        size: size as u64,
        children,
        file_id,
    }))
}

/// Deletes Merkle nodes not reachable from any snapshot's root (offline GC
/// sweep, spec §4.6). Walks every live root, marks everything reachable, and
/// removes the rest.
pub fn gc_unreachable(conn: &Connection) -> Result<usize> {
    let mut roots_stmt = conn.prepare("SELECT merkle_root FROM snapshots WHERE merkle_root IS NOT NULL")?;
    let roots: Vec<String> = roots_stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut reachable = std::collections::HashSet::new();
    let mut stack = roots;
    while let Some(hash) = stack.pop() {
        if !reachable.insert(hash.clone()) {
            continue;
        }
        if let Some(node) = get_node(conn, &hash)? {
            for child in node.children.iter().flatten() {
                stack.push(child.hash.clone());
            }
        }
    }

    let mut all_stmt = conn.prepare("SELECT hash FROM merkle_nodes")?;
    let all: Vec<String> = all_stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut removed = 0;
    for hash in all {
        if !reachable.contains(&hash) {
            conn.execute("DELETE FROM merkle_nodes WHERE hash = ?1", [&hash])?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// `NodeProvider` over a live catalog connection, so `merkle::diff` can run
/// directly against persisted nodes instead of an in-memory map.
pub struct CatalogNodeProvider<'a> {
    pub conn: &'a Connection,
}

impl<'a> NodeProvider for CatalogNodeProvider<'a> {
    fn get_node(&self, hash: &str) -> Result<Option<MerkleNode>> {
        get_node(self.conn, hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::migrations::SchemaMigrator;
    use crate::merkle::build_tree;
    use crate::merkle::FileLeaf;

    fn setup() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        SchemaMigrator::migrate(&mut conn).unwrap();
        conn
    }

    fn leaf(path: &str, content: &[u8]) -> FileLeaf {
        FileLeaf {
            path: path.to_string(),
            file_hash: hex::encode(blake3::hash(content).as_bytes()),
            size: content.len() as u64,
            file_id: format!("id-{path}"),
        }
    }

    #[test]
    fn round_trips_small_and_large_children_lists() {
        let conn = setup();
        let leaves: Vec<FileLeaf> = (0..20)
            .map(|i| leaf(&format!("file{i}.txt"), format!("content-{i}").as_bytes()))
            .collect();
        let tree = build_tree(&leaves).unwrap();

        for node in tree.nodes.values() {
            upsert_node(&conn, node).unwrap();
        }

        for node in tree.nodes.values() {
            let fetched = get_node(&conn, &node.hash).unwrap().unwrap();
            assert_eq!(fetched.hash, node.hash);
            assert_eq!(fetched.children, node.children);
        }
    }

    #[test]
    fn upsert_is_idempotent() {
        let conn = setup();
        let leaves = vec![leaf("a.txt", b"aa")];
        let tree = build_tree(&leaves).unwrap();
        for node in tree.nodes.values() {
            upsert_node(&conn, node).unwrap();
            upsert_node(&conn, node).unwrap();
        }
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM merkle_nodes", [], |r| r.get(0)).unwrap();
        assert_eq!(count as usize, tree.nodes.len());
    }

    #[test]
    fn gc_unreachable_removes_orphaned_nodes() {
        let conn = setup();
        let leaves = vec![leaf("a.txt", b"aa")];
        let tree = build_tree(&leaves).unwrap();
        for node in tree.nodes.values() {
            upsert_node(&conn, node).unwrap();
        }
        // no snapshot references the root, so every node is unreachable
        let removed = gc_unreachable(&conn).unwrap();
        assert_eq!(removed, tree.nodes.len());
    }
}
