//! Per-snapshot Merkle tree: builds, persists, and diffs the file-namespace
//! tree so that two snapshots can be compared in O(|Delta|) rather than
//! O(|files|).
//!
//! Node identities are deterministic functions of their canonical
//! serialization (`node.rs`), which eliminates the parent/child cycle a
//! naive in-memory tree would have: parents only ever reference children by
//! hash, never by pointer (see design notes on cyclic references).

mod diff;
mod node;

pub use diff::{diff, DiffEntry, DiffKind};
pub use node::{uvarint_decode, uvarint_encode, ChildSummary, MerkleNode, NodeKind};

use crate::{Error, Result};
use std::collections::HashMap;

/// A leaf input to `build_tree`: one file's identity within the snapshot.
#[derive(Debug, Clone)]
pub struct FileLeaf {
    /// Slash-separated path relative to the snapshot root.
    pub path: String,
    pub file_hash: String,
    pub size: u64,
    pub file_id: String,
}

/// Result of building a tree: the root node's hash plus every node created
/// (including deduplicated shared subtrees, keyed by hash so each is listed
/// once), ready to be persisted via `Catalog::upsert_node`.
#[derive(Debug, Default)]
pub struct BuiltTree {
    pub root_hash: String,
    pub nodes: HashMap<String, MerkleNode>,
}

#[derive(Default)]
struct DirEntry {
    files: Vec<FileLeaf>,
    dirs: HashMap<String, DirEntry>,
}

/// Build a Merkle tree over a flat list of files, grouping by '/'-separated
/// path prefixes. Post-order traversal sorts children by name at each level,
/// then computes and persists (into `nodes`) each directory node; a node's
/// hash depends only on its children's hashes, never on how those children
/// happen to be encoded for storage.
pub fn build_tree(leaves: &[FileLeaf]) -> Result<BuiltTree> {
    let mut root = DirEntry::default();
    for leaf in leaves {
        insert_leaf(&mut root, leaf.path.split('/').collect(), leaf);
    }

    let mut nodes = HashMap::new();
    let root_node = build_dir_node("", &root, &mut nodes)?;
    let root_hash = root_node.hash.clone();
    nodes.insert(root_hash.clone(), root_node);

    Ok(BuiltTree { root_hash, nodes })
}

fn insert_leaf(dir: &mut DirEntry, mut segments: Vec<&str>, leaf: &FileLeaf) {
    if segments.len() == 1 {
        dir.files.push(leaf.clone());
        return;
    }
    let head = segments.remove(0);
    let child = dir.dirs.entry(head.to_string()).or_default();
    insert_leaf(child, segments, leaf);
}

fn build_dir_node(
    name: &str,
    dir: &DirEntry,
    nodes: &mut HashMap<String, MerkleNode>,
) -> Result<MerkleNode> {
    let mut children = Vec::new();

    for leaf in &dir.files {
        let file_hash_bytes = crate::hash::from_hex(&leaf.file_hash)?;
        let file_name = leaf
            .path
            .rsplit('/')
            .next()
            .unwrap_or(leaf.path.as_str())
            .to_string();
        let node = MerkleNode::new_file(file_name, leaf.size, file_hash_bytes, leaf.file_id.clone());
        children.push(ChildSummary::from_node(&node));
        nodes.insert(node.hash.clone(), node);
    }

    for (child_name, child_dir) in &dir.dirs {
        let child_node = build_dir_node(child_name, child_dir, nodes)?;
        children.push(ChildSummary::from_node(&child_node));
        nodes.insert(child_node.hash.clone(), child_node);
    }

    children.sort_by(|a, b| a.name.cmp(&b.name));
    let size = children.iter().map(|c| c.size).sum();
    MerkleNode::new_directory(name.to_string(), size, children)
}

/// Lookup used by `diff` to resolve a node hash to its persisted form.
/// Implemented by `crate::catalog::merkle_store::MerkleNodeCatalog` in
/// production and by an in-memory `HashMap` in tests.
pub trait NodeProvider {
    fn get_node(&self, hash: &str) -> Result<Option<MerkleNode>>;
}

impl NodeProvider for HashMap<String, MerkleNode> {
    fn get_node(&self, hash: &str) -> Result<Option<MerkleNode>> {
        Ok(self.get(hash).cloned())
    }
}

impl NodeProvider for BuiltTree {
    fn get_node(&self, hash: &str) -> Result<Option<MerkleNode>> {
        Ok(self.nodes.get(hash).cloned())
    }
}

pub(crate) fn require_node<P: NodeProvider + ?Sized>(
    provider: &P,
    hash: &str,
) -> Result<MerkleNode> {
    provider.get_node(hash)?.ok_or_else(|| Error::IntegrityError {
        reason: format!("merkle node {hash} referenced but missing"),
    })
}
