//! The older full-path body form (spec §4.2): one length-prefixed absolute
//! path per entry, root first as the empty string, parents inferred
//! lexically.

use std::collections::HashMap;
use std::io::{Read, Write};

use super::inode::{
    into_node, read_inode_payload, write_node_payload, InodeKind,
};
use super::tree::{DirNode, Node, PermissionStatus};
use super::wire::{read_string, write_string};
use super::LayoutCodecError;

fn node_path(parent_path: &str, name: &str) -> String {
    if parent_path.is_empty() {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent_path, name)
    }
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "",
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Emit every node of the tree as `(absolute_path, node)` in preorder:
/// the root first, then each subtree fully before moving to the next
/// sibling.
fn collect_preorder<'a>(
    parent_path: &str,
    node: &'a Node,
    out: &mut Vec<(String, &'a Node)>,
) {
    let path = if parent_path.is_empty() && node_is_root(node) {
        String::new()
    } else {
        node_path(parent_path, node.name())
    };
    out.push((path.clone(), node));
    if let Node::Directory(d) = node {
        for child in &d.children {
            collect_preorder(&path, child, out);
        }
    }
}

fn node_is_root(node: &Node) -> bool {
    matches!(node, Node::Directory(d) if d.name.is_empty())
}

pub fn write_tree(
    w: &mut impl Write,
    root: &DirNode,
    layout_version: i32,
) -> std::io::Result<()> {
    let root_node = Node::Directory(root.clone());
    let mut entries = Vec::new();
    collect_preorder("", &root_node, &mut entries);
    for (path, node) in entries {
        write_string(w, &path)?;
        write_node_payload(w, node, layout_version)?;
    }
    Ok(())
}

pub fn read_tree(
    r: &mut impl Read,
    num_files: u64,
    layout_version: i32,
    default_permissions: &PermissionStatus,
    adjust_replication: &dyn Fn(i16) -> i16,
) -> Result<DirNode, LayoutCodecError> {
    if num_files == 0 {
        return Err(LayoutCodecError::EofBeforeCompletion(
            "numFiles is zero but a root entry is always required".to_string(),
        ));
    }

    struct Entry {
        path: String,
        node: Option<Node>,
    }

    let mut entries: Vec<Entry> = Vec::with_capacity(num_files as usize);
    let mut path_to_index: HashMap<String, usize> = HashMap::new();
    let mut children_of: Vec<Vec<usize>> = vec![Vec::new(); num_files as usize];

    for i in 0..num_files {
        let path = read_string(r)?;
        let decoded = read_inode_payload(r, layout_version, default_permissions, adjust_replication)?;
        let name = if i == 0 {
            String::new()
        } else {
            path.rsplit('/').next().unwrap_or("").to_string()
        };
        let node = into_node(name, decoded);

        if i == 0 {
            if !path.is_empty() {
                return Err(LayoutCodecError::MalformedRootEntry);
            }
        } else {
            let parent_path = parent_of(&path);
            let parent_idx = *path_to_index
                .get(parent_path)
                .ok_or_else(|| LayoutCodecError::ParentNotFound(path.clone()))?;
            children_of[parent_idx].push(entries.len());
        }

        path_to_index.insert(path.clone(), entries.len());
        entries.push(Entry {
            path,
            node: Some(node),
        });
    }

    fn assemble(idx: usize, entries: &mut Vec<Entry>, children_of: &[Vec<usize>]) -> Node {
        let child_indices = children_of[idx].clone();
        let mut node = entries[idx].node.take().expect("each index assembled once");
        if let Node::Directory(d) = &mut node {
            for child_idx in child_indices {
                let child = assemble(child_idx, entries, children_of);
                d.children.push(child);
            }
        }
        node
    }

    let root_node = assemble(0, &mut entries, &children_of);
    match root_node {
        Node::Directory(d) => Ok(d),
        Node::File(_) => Err(LayoutCodecError::MalformedRootEntry),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout_codec::tree::FileNode;
    use crate::layout_codec::LAYOUT_VERSION;

    #[test]
    fn round_trips_single_level_tree() {
        let mut root = DirNode::root();
        root.children.push(Node::File(FileNode {
            name: "a.txt".into(),
            replication: 1,
            mtime: 1,
            atime: 1,
            preferred_block_size: 128,
            blocks: vec![],
            permissions: PermissionStatus::default(),
        }));
        let mut buf = Vec::new();
        write_tree(&mut buf, &root, LAYOUT_VERSION).unwrap();
        let mut cursor = &buf[..];
        let decoded = read_tree(
            &mut cursor,
            root.count_nodes() as u64,
            LAYOUT_VERSION,
            &PermissionStatus::default(),
            &|r| r,
        )
        .unwrap();
        assert_eq!(decoded, root);
    }

    #[test]
    fn round_trips_nested_directories() {
        let mut sub = DirNode::root();
        sub.name = "sub".into();
        sub.children.push(Node::File(FileNode {
            name: "nested.txt".into(),
            replication: 2,
            mtime: 2,
            atime: 2,
            preferred_block_size: 64,
            blocks: vec![],
            permissions: PermissionStatus::default(),
        }));
        let mut root = DirNode::root();
        root.children.push(Node::Directory(sub));
        root.children.push(Node::File(FileNode {
            name: "top.txt".into(),
            replication: 1,
            mtime: 3,
            atime: 3,
            preferred_block_size: 32,
            blocks: vec![],
            permissions: PermissionStatus::default(),
        }));

        let mut buf = Vec::new();
        write_tree(&mut buf, &root, LAYOUT_VERSION).unwrap();
        let mut cursor = &buf[..];
        let decoded = read_tree(
            &mut cursor,
            root.count_nodes() as u64,
            LAYOUT_VERSION,
            &PermissionStatus::default(),
            &|r| r,
        )
        .unwrap();
        assert_eq!(decoded, root);
    }

    #[test]
    fn empty_tree_is_root_only() {
        let root = DirNode::root();
        let mut buf = Vec::new();
        write_tree(&mut buf, &root, LAYOUT_VERSION).unwrap();
        let mut cursor = &buf[..];
        let decoded = read_tree(
            &mut cursor,
            1,
            LAYOUT_VERSION,
            &PermissionStatus::default(),
            &|r| r,
        )
        .unwrap();
        assert_eq!(decoded, root);
    }
}
