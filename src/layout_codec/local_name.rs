//! The newer local-name (preorder) body form (spec §4.2): root payload
//! first, then each directory emits its own `parentName, childCount,
//! [localName, inodePayload]` record, recursing into child directories.

use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::inode::{into_node, read_inode_payload, write_node_payload};
use super::tree::{DirNode, Node, PermissionStatus};
use super::wire::{read_string, write_string};
use super::LayoutCodecError;

fn write_dir_record(w: &mut impl Write, dir: &DirNode, layout_version: i32) -> std::io::Result<()> {
    write_string(w, &dir.name)?;
    w.write_i32::<BigEndian>(dir.children.len() as i32)?;
    for child in &dir.children {
        write_string(w, child.name())?;
        write_node_payload(w, child, layout_version)?;
    }
    for child in &dir.children {
        if let Node::Directory(d) = child {
            write_dir_record(w, d, layout_version)?;
        }
    }
    Ok(())
}

pub fn write_tree(w: &mut impl Write, root: &DirNode, layout_version: i32) -> std::io::Result<()> {
    write_node_payload(w, &Node::Directory(root.clone()), layout_version)?;
    write_dir_record(w, root, layout_version)
}

fn fill_dir_record(
    r: &mut impl Read,
    dir: &mut DirNode,
    layout_version: i32,
    default_permissions: &PermissionStatus,
    adjust_replication: &dyn Fn(i16) -> i16,
    expect_root: bool,
) -> Result<(), LayoutCodecError> {
    // Spec §4.2 back-compat oddity: the root's parent-name length field is
    // zero; this is a dedicated check rather than a generic "empty parent
    // name means no parent" branch, so the special case can't be skipped.
    let parent_name = read_string(r)?;
    if expect_root {
        if !parent_name.is_empty() {
            return Err(LayoutCodecError::MalformedRootEntry);
        }
    } else if parent_name != dir.name {
        return Err(LayoutCodecError::ParentNotFound(parent_name));
    }

    let child_count = r.read_i32::<BigEndian>()?;
    if child_count < 0 {
        return Err(LayoutCodecError::ChildCountOverflow);
    }

    let mut children = Vec::with_capacity(child_count as usize);
    for _ in 0..child_count {
        let name = read_string(r)?;
        let decoded = read_inode_payload(r, layout_version, default_permissions, adjust_replication)?;
        children.push(into_node(name, decoded));
    }

    for child in children.iter_mut() {
        if let Node::Directory(d) = child {
            fill_dir_record(r, d, layout_version, default_permissions, adjust_replication, false)?;
        }
    }

    dir.children = children;
    Ok(())
}

pub fn read_tree(
    r: &mut impl Read,
    layout_version: i32,
    default_permissions: &PermissionStatus,
    adjust_replication: &dyn Fn(i16) -> i16,
) -> Result<DirNode, LayoutCodecError> {
    let root_payload = read_inode_payload(r, layout_version, default_permissions, adjust_replication)?;
    if !root_payload.is_directory {
        return Err(LayoutCodecError::MalformedRootEntry);
    }
    let mut root = DirNode {
        name: String::new(),
        children: Vec::new(),
        ns_quota: root_payload.ns_quota,
        ds_quota: root_payload.ds_quota,
        mtime: root_payload.mtime,
        permissions: root_payload.permissions,
    };
    fill_dir_record(
        r,
        &mut root,
        layout_version,
        default_permissions,
        adjust_replication,
        true,
    )?;
    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout_codec::tree::FileNode;
    use crate::layout_codec::LAYOUT_VERSION;

    fn sample_tree() -> DirNode {
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
        root
    }

    #[test]
    fn round_trips_nested_directories() {
        let root = sample_tree();
        let mut buf = Vec::new();
        write_tree(&mut buf, &root, LAYOUT_VERSION).unwrap();
        let mut cursor = &buf[..];
        let decoded = read_tree(
            &mut cursor,
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
            LAYOUT_VERSION,
            &PermissionStatus::default(),
            &|r| r,
        )
        .unwrap();
        assert_eq!(decoded, root);
    }

    #[test]
    fn large_child_count_round_trips() {
        let mut root = DirNode::root();
        for i in 0..(1 << 15) + 10 {
            root.children.push(Node::File(FileNode {
                name: format!("f{i}"),
                replication: 1,
                mtime: 0,
                atime: 0,
                preferred_block_size: 1,
                blocks: vec![],
                permissions: PermissionStatus::default(),
            }));
        }
        let mut buf = Vec::new();
        write_tree(&mut buf, &root, LAYOUT_VERSION).unwrap();
        let mut cursor = &buf[..];
        let decoded = read_tree(
            &mut cursor,
            LAYOUT_VERSION,
            &PermissionStatus::default(),
            &|r| r,
        )
        .unwrap();
        assert_eq!(decoded.children.len(), root.children.len());
    }

    #[test]
    fn nonzero_root_parent_name_is_rejected() {
        // Hand-craft a stream where the root record's parent-name length is
        // nonzero, which spec §4.2/§9 requires decoders to reject rather
        // than silently searching for a nonexistent parent.
        let root = DirNode::root();
        let mut buf = Vec::new();
        super::super::inode::write_node_payload(
            &mut buf,
            &Node::Directory(root.clone()),
            LAYOUT_VERSION,
        )
        .unwrap();
        write_string(&mut buf, "not-empty").unwrap();
        buf.write_i32::<BigEndian>(0).unwrap();

        let mut cursor = &buf[..];
        let err = read_tree(
            &mut cursor,
            LAYOUT_VERSION,
            &PermissionStatus::default(),
            &|r| r,
        )
        .unwrap_err();
        assert!(matches!(err, LayoutCodecError::MalformedRootEntry));
    }
}
