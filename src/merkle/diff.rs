//! Diff between two Merkle roots: a stream of `{path, kind}` entries where
//! kind is Added/Removed/Modified, computed in O(|Delta|) by short-circuiting
//! on equal hashes and merge-sorting children by name otherwise.

use super::{require_node, NodeKind, NodeProvider};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffKind {
    Added,
    Removed,
    Modified,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEntry {
    pub path: String,
    pub kind: DiffKind,
}

/// Diff two snapshot roots. Either root may be `None` (e.g. diffing against
/// an empty snapshot, or the first snapshot in a chain).
pub fn diff<P: NodeProvider + ?Sized>(
    provider: &P,
    root_a: Option<&str>,
    root_b: Option<&str>,
) -> Result<Vec<DiffEntry>> {
    let mut out = Vec::new();
    diff_node(provider, "", root_a, root_b, &mut out)?;
    Ok(out)
}

fn diff_node<P: NodeProvider + ?Sized>(
    provider: &P,
    prefix: &str,
    hash_a: Option<&str>,
    hash_b: Option<&str>,
    out: &mut Vec<DiffEntry>,
) -> Result<()> {
    match (hash_a, hash_b) {
        (Some(a), Some(b)) if a == b => Ok(()),
        (None, Some(b)) => emit_subtree(provider, prefix, b, DiffKind::Added, out),
        (Some(a), None) => emit_subtree(provider, prefix, a, DiffKind::Removed, out),
        (Some(a), Some(b)) => {
            let node_a = require_node(provider, a)?;
            let node_b = require_node(provider, b)?;
            match (node_a.kind, node_b.kind) {
                (NodeKind::Directory, NodeKind::Directory) => {
                    diff_directories(provider, prefix, &node_a, &node_b, out)
                }
                _ => {
                    out.push(DiffEntry {
                        path: join(prefix, &node_b.name),
                        kind: DiffKind::Modified,
                    });
                    Ok(())
                }
            }
        }
        (None, None) => Ok(()),
    }
}

fn diff_directories<P: NodeProvider + ?Sized>(
    provider: &P,
    prefix: &str,
    node_a: &super::MerkleNode,
    node_b: &super::MerkleNode,
    out: &mut Vec<DiffEntry>,
) -> Result<()> {
    let children_a = node_a.children.as_deref().unwrap_or(&[]);
    let children_b = node_b.children.as_deref().unwrap_or(&[]);

    let child_prefix = if prefix.is_empty() {
        String::new()
    } else {
        format!("{prefix}/")
    };
    let dir_prefix = format!("{child_prefix}{}", node_b.name);
    let dir_prefix = dir_prefix.trim_start_matches('/');

    let mut ia = 0usize;
    let mut ib = 0usize;
    while ia < children_a.len() || ib < children_b.len() {
        match (children_a.get(ia), children_b.get(ib)) {
            (Some(ca), Some(cb)) => match ca.name.cmp(&cb.name) {
                std::cmp::Ordering::Equal => {
                    diff_node(provider, dir_prefix, Some(&ca.hash), Some(&cb.hash), out)?;
                    ia += 1;
                    ib += 1;
                }
                std::cmp::Ordering::Less => {
                    emit_subtree(provider, dir_prefix, &ca.hash, DiffKind::Removed, out)?;
                    ia += 1;
                }
                std::cmp::Ordering::Greater => {
                    emit_subtree(provider, dir_prefix, &cb.hash, DiffKind::Added, out)?;
                    ib += 1;
                }
            },
            (Some(ca), None) => {
                emit_subtree(provider, dir_prefix, &ca.hash, DiffKind::Removed, out)?;
                ia += 1;
            }
            (None, Some(cb)) => {
                emit_subtree(provider, dir_prefix, &cb.hash, DiffKind::Added, out)?;
                ib += 1;
            }
            (None, None) => unreachable!(),
        }
    }
    Ok(())
}

fn emit_subtree<P: NodeProvider + ?Sized>(
    provider: &P,
    prefix: &str,
    hash: &str,
    kind: DiffKind,
    out: &mut Vec<DiffEntry>,
) -> Result<()> {
    let node = require_node(provider, hash)?;
    match node.kind {
        NodeKind::File => {
            out.push(DiffEntry {
                path: join(prefix, &node.name),
                kind,
            });
            Ok(())
        }
        NodeKind::Directory => {
            let dir_path = join(prefix, &node.name);
            for child in node.children.iter().flatten() {
                emit_subtree(provider, &dir_path, &child.hash, kind, out)?;
            }
            Ok(())
        }
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::super::{build_tree, FileLeaf};
    use super::*;
    use pretty_assertions::assert_eq;

    fn leaf(path: &str, content: &[u8]) -> FileLeaf {
        FileLeaf {
            path: path.to_string(),
            file_hash: hex::encode(blake3::hash(content).as_bytes()),
            size: content.len() as u64,
            file_id: format!("id-{path}"),
        }
    }

    #[test]
    fn diff_against_none_yields_all_added() {
        let tree = build_tree(&[leaf("a.txt", b"aa"), leaf("dir/b.txt", b"bb")]).unwrap();
        let entries = diff(&tree, None, Some(&tree.root_hash)).unwrap();
        let mut paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        paths.sort();
        assert_eq!(paths, vec!["a.txt", "dir/b.txt"]);
        assert!(entries.iter().all(|e| e.kind == DiffKind::Added));
    }

    #[test]
    fn diff_is_empty_for_identical_roots() {
        let tree = build_tree(&[leaf("a.txt", b"aa")]).unwrap();
        let entries = diff(&tree, Some(&tree.root_hash), Some(&tree.root_hash)).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn diff_detects_single_modified_file() {
        let tree_a = build_tree(&[leaf("a.txt", b"aa"), leaf("b.txt", b"bb")]).unwrap();
        let tree_b = build_tree(&[leaf("a.txt", b"aa"), leaf("b.txt", b"bbX")]).unwrap();

        let mut combined = tree_a.nodes.clone();
        combined.extend(tree_b.nodes.clone());

        let entries = diff(&combined, Some(&tree_a.root_hash), Some(&tree_b.root_hash)).unwrap();
        assert_eq!(entries, vec![DiffEntry {
            path: "b.txt".to_string(),
            kind: DiffKind::Modified,
        }]);
    }

    #[test]
    fn diff_detects_added_and_removed_paths() {
        let tree_a = build_tree(&[leaf("a.txt", b"aa")]).unwrap();
        let tree_b = build_tree(&[leaf("c.txt", b"cc")]).unwrap();

        let mut combined = tree_a.nodes.clone();
        combined.extend(tree_b.nodes.clone());

        let mut entries = diff(&combined, Some(&tree_a.root_hash), Some(&tree_b.root_hash)).unwrap();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        assert_eq!(
            entries,
            vec![
                DiffEntry { path: "a.txt".to_string(), kind: DiffKind::Removed },
                DiffEntry { path: "c.txt".to_string(), kind: DiffKind::Added },
            ]
        );
    }
}
