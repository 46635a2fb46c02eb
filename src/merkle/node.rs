//! Canonical, byte-exact Merkle node serialization (spec'd wire format).
//!
//! FILE:      tag=0x01 | uvarint(len(name)) | name_utf8 | uvarint(size) | file_hash_32
//! DIRECTORY: tag=0x02 | uvarint(len(name)) | name_utf8 | uvarint(size) |
//!            uvarint(num_children) | child_hash_32 for each child, sorted by name
//!
//! This is the interoperability contract for cross-host diffing (spec §6.3):
//! any two implementations must produce byte-identical serializations for the
//! same logical tree.

use crate::hash::{to_hex, DIGEST_LEN};
use crate::Result;

const TAG_FILE: u8 = 0x01;
const TAG_DIRECTORY: u8 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
}

impl NodeKind {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            NodeKind::File => "FILE",
            NodeKind::Directory => "DIRECTORY",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self> {
        match s {
            "FILE" => Ok(NodeKind::File),
            "DIRECTORY" => Ok(NodeKind::Directory),
            other => Err(crate::Error::IntegrityError {
                reason: format!("unknown merkle node type: {other}"),
            }),
        }
    }
}

/// A lightweight reference to a child node, as stored inside a directory
/// node's persisted `children` list. Only `hash` feeds the parent's own hash
/// computation; the rest is convenience for readers walking the tree without
/// a second catalog round-trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildSummary {
    pub hash: String,
    pub kind: NodeKind,
    pub name: String,
    pub size: u64,
    pub file_id: Option<String>,
}

impl ChildSummary {
    pub fn from_node(node: &MerkleNode) -> Self {
        Self {
            hash: node.hash.clone(),
            kind: node.kind,
            name: node.name.clone(),
            size: node.size,
            file_id: node.file_id.clone(),
        }
    }
}

/// A node in the per-snapshot Merkle tree, identified by `hash`, the digest
/// of its canonical serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleNode {
    pub hash: String,
    pub kind: NodeKind,
    pub name: String,
    pub size: u64,
    pub children: Option<Vec<ChildSummary>>,
    pub file_id: Option<String>,
}

impl MerkleNode {
    pub fn new_file(name: String, size: u64, file_hash: [u8; DIGEST_LEN], file_id: String) -> Self {
        let serialized = serialize_file(&name, size, &file_hash);
        let hash = to_hex(blake3::hash(&serialized).as_bytes());
        Self {
            hash,
            kind: NodeKind::File,
            name,
            size,
            children: None,
            file_id: Some(file_id),
        }
    }

    pub fn new_directory(name: String, size: u64, children: Vec<ChildSummary>) -> Result<Self> {
        let serialized = serialize_directory(&name, size, &children)?;
        let hash = to_hex(blake3::hash(&serialized).as_bytes());
        Ok(Self {
            hash,
            kind: NodeKind::Directory,
            name,
            size,
            children: Some(children),
            file_id: None,
        })
    }
}

fn serialize_file(name: &str, size: u64, file_hash: &[u8; DIGEST_LEN]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + 5 + name.len() + 5 + DIGEST_LEN);
    buf.push(TAG_FILE);
    uvarint_encode(name.len() as u64, &mut buf);
    buf.extend_from_slice(name.as_bytes());
    uvarint_encode(size, &mut buf);
    buf.extend_from_slice(file_hash);
    buf
}

fn serialize_directory(name: &str, size: u64, children: &[ChildSummary]) -> Result<Vec<u8>> {
    let mut sorted: Vec<&ChildSummary> = children.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let mut buf = Vec::with_capacity(1 + 5 + name.len() + 5 + 5 + sorted.len() * DIGEST_LEN);
    buf.push(TAG_DIRECTORY);
    uvarint_encode(name.len() as u64, &mut buf);
    buf.extend_from_slice(name.as_bytes());
    uvarint_encode(size, &mut buf);
    uvarint_encode(sorted.len() as u64, &mut buf);
    for child in sorted {
        let digest = crate::hash::from_hex(&child.hash)?;
        buf.extend_from_slice(&digest);
    }
    Ok(buf)
}

/// LEB128 unsigned varint encoding.
pub fn uvarint_encode(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Decode a uvarint from the front of `buf`, returning the value and the
/// number of bytes consumed.
pub fn uvarint_decode(buf: &[u8]) -> Option<(u64, usize)> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    for (i, &byte) in buf.iter().enumerate() {
        value |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
        shift += 7;
        if shift >= 64 {
            return None;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uvarint_round_trips() {
        for value in [0u64, 1, 127, 128, 300, u32::MAX as u64, u64::MAX] {
            let mut buf = Vec::new();
            uvarint_encode(value, &mut buf);
            let (decoded, consumed) = uvarint_decode(&buf).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(consumed, buf.len());
        }
    }

    #[test]
    fn file_node_hash_is_deterministic() {
        let hash_bytes = [7u8; DIGEST_LEN];
        let a = MerkleNode::new_file("a.txt".to_string(), 5, hash_bytes, "id1".to_string());
        let b = MerkleNode::new_file("a.txt".to_string(), 5, hash_bytes, "id2".to_string());
        // file_id does not feed the canonical serialization
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn file_node_hash_changes_with_content() {
        let a = MerkleNode::new_file("a.txt".to_string(), 5, [1u8; DIGEST_LEN], "id".to_string());
        let b = MerkleNode::new_file("a.txt".to_string(), 5, [2u8; DIGEST_LEN], "id".to_string());
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn directory_hash_ignores_child_order_in_input() {
        let f1 = MerkleNode::new_file("a.txt".to_string(), 1, [1u8; DIGEST_LEN], "1".to_string());
        let f2 = MerkleNode::new_file("b.txt".to_string(), 2, [2u8; DIGEST_LEN], "2".to_string());

        let d1 = MerkleNode::new_directory(
            "dir".to_string(),
            3,
            vec![ChildSummary::from_node(&f1), ChildSummary::from_node(&f2)],
        )
        .unwrap();
        let d2 = MerkleNode::new_directory(
            "dir".to_string(),
            3,
            vec![ChildSummary::from_node(&f2), ChildSummary::from_node(&f1)],
        )
        .unwrap();
        assert_eq!(d1.hash, d2.hash);
    }
}
