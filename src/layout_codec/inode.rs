//! The inode payload shared by both body forms (spec §4.2).

use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::thresholds::{ATIME_LAYOUT, PERMISSION_LAYOUT, PREFERRED_BLOCK_SIZE_LAYOUT};
use super::tree::{BlockInfo, FileNode, Node, PermissionStatus, NO_GENERATION_STAMP};
use super::wire::{read_permission_status, read_string, write_permission_status, write_string};
use super::LayoutCodecError;

/// Whether the block records in this layout carry a generation stamp, and
/// whether the prefix even needs it at all (spec §4.2: "earlier layouts
/// omit the generation stamp; decoder substitutes a sentinel").
fn has_generation_stamp(layout_version: i32) -> bool {
    layout_version <= super::thresholds::GENERATION_STAMP_LAYOUT
}

pub fn write_inode_payload(
    w: &mut impl Write,
    name: &str,
    node_kind: InodeKind<'_>,
    layout_version: i32,
) -> std::io::Result<()> {
    match node_kind {
        InodeKind::Directory {
            ns_quota,
            ds_quota,
            mtime,
            permissions,
        } => {
            w.write_i16::<BigEndian>(0)?; // replication
            w.write_i64::<BigEndian>(mtime)?;
            if layout_version <= ATIME_LAYOUT {
                w.write_i64::<BigEndian>(0)?; // atime, unused for directories
            }
            if layout_version <= PREFERRED_BLOCK_SIZE_LAYOUT {
                w.write_i64::<BigEndian>(0)?;
            }
            w.write_i32::<BigEndian>(-1)?; // numBlocks sentinel for directories
            w.write_i64::<BigEndian>(ns_quota)?;
            w.write_i64::<BigEndian>(ds_quota)?;
            if layout_version <= PERMISSION_LAYOUT {
                write_permission_status(w, permissions)?;
            }
        }
        InodeKind::File(file) => {
            w.write_i16::<BigEndian>(file.replication)?;
            w.write_i64::<BigEndian>(file.mtime)?;
            if layout_version <= ATIME_LAYOUT {
                w.write_i64::<BigEndian>(file.atime)?;
            }
            if layout_version <= PREFERRED_BLOCK_SIZE_LAYOUT {
                w.write_i64::<BigEndian>(file.preferred_block_size)?;
            }
            w.write_i32::<BigEndian>(file.blocks.len() as i32)?;
            for block in &file.blocks {
                w.write_i64::<BigEndian>(block.block_id)?;
                w.write_i64::<BigEndian>(block.num_bytes)?;
                if has_generation_stamp(layout_version) {
                    w.write_i64::<BigEndian>(block.generation_stamp)?;
                }
            }
            if layout_version <= PERMISSION_LAYOUT {
                write_permission_status(w, &file.permissions)?;
            }
        }
    }
    let _ = name;
    Ok(())
}

pub enum InodeKind<'a> {
    Directory {
        ns_quota: i64,
        ds_quota: i64,
        mtime: i64,
        permissions: &'a PermissionStatus,
    },
    File(&'a FileNode),
}

/// Decoded inode attributes, form-agnostic. `is_directory` is signalled by
/// `num_blocks == -1` exactly as the wire format encodes it.
pub struct DecodedInode {
    pub replication: i16,
    pub mtime: i64,
    pub atime: i64,
    pub preferred_block_size: i64,
    pub blocks: Vec<BlockInfo>,
    pub is_directory: bool,
    pub ns_quota: i64,
    pub ds_quota: i64,
    pub permissions: PermissionStatus,
}

/// Read one inode payload. `default_permissions` is substituted when the
/// layout predates `permissionStatus` (spec §4.2: "otherwise the
/// namespace's default upgrade permission is substituted"). `adjust_replication`
/// is the edit-journal collaborator's clamp function (spec §4.2 back-compat
/// oddities).
pub fn read_inode_payload(
    r: &mut impl Read,
    layout_version: i32,
    default_permissions: &PermissionStatus,
    adjust_replication: &dyn Fn(i16) -> i16,
) -> Result<DecodedInode, LayoutCodecError> {
    let replication = adjust_replication(r.read_i16::<BigEndian>()?);
    let mtime = r.read_i64::<BigEndian>()?;
    let atime = if layout_version <= ATIME_LAYOUT {
        r.read_i64::<BigEndian>()?
    } else {
        0
    };
    let preferred_block_size_raw = if layout_version <= PREFERRED_BLOCK_SIZE_LAYOUT {
        r.read_i64::<BigEndian>()?
    } else {
        0
    };
    let num_blocks = r.read_i32::<BigEndian>()?;
    let is_directory = num_blocks == -1;

    let mut blocks = Vec::new();
    let mut ns_quota = -1i64;
    let mut ds_quota = -1i64;

    if is_directory {
        ns_quota = r.read_i64::<BigEndian>()?;
        ds_quota = r.read_i64::<BigEndian>()?;
    } else {
        if num_blocks < 0 {
            return Err(LayoutCodecError::ChildCountOverflow);
        }
        for _ in 0..num_blocks {
            let block_id = r.read_i64::<BigEndian>()?;
            let num_bytes = r.read_i64::<BigEndian>()?;
            let generation_stamp = if has_generation_stamp(layout_version) {
                r.read_i64::<BigEndian>()?
            } else {
                NO_GENERATION_STAMP
            };
            blocks.push(BlockInfo {
                block_id,
                num_bytes,
                generation_stamp,
            });
        }
    }

    let permissions = if layout_version <= PERMISSION_LAYOUT {
        read_permission_status(r)?
    } else {
        default_permissions.clone()
    };

    // Spec §4.2 back-compat oddity: infer block size from the first block
    // when it was never recorded.
    let preferred_block_size = if preferred_block_size_raw == 0 && blocks.len() > 1 {
        blocks[0].num_bytes
    } else {
        preferred_block_size_raw
    };

    Ok(DecodedInode {
        replication,
        mtime,
        atime,
        preferred_block_size,
        blocks,
        is_directory,
        ns_quota,
        ds_quota,
        permissions,
    })
}

/// Bundle a decoded inode plus its name into the tree `Node` representation.
pub fn into_node(name: String, decoded: DecodedInode) -> Node {
    if decoded.is_directory {
        Node::Directory(super::tree::DirNode {
            name,
            children: Vec::new(),
            ns_quota: decoded.ns_quota,
            ds_quota: decoded.ds_quota,
            mtime: decoded.mtime,
            permissions: decoded.permissions,
        })
    } else {
        Node::File(FileNode {
            name,
            replication: decoded.replication,
            mtime: decoded.mtime,
            atime: decoded.atime,
            preferred_block_size: decoded.preferred_block_size,
            blocks: decoded.blocks,
            permissions: decoded.permissions,
        })
    }
}

pub fn write_node_payload(w: &mut impl Write, node: &Node, layout_version: i32) -> std::io::Result<()> {
    match node {
        Node::Directory(d) => write_inode_payload(
            w,
            &d.name,
            InodeKind::Directory {
                ns_quota: d.ns_quota,
                ds_quota: d.ds_quota,
                mtime: d.mtime,
                permissions: &d.permissions,
            },
            layout_version,
        ),
        Node::File(f) => write_inode_payload(w, &f.name, InodeKind::File(f), layout_version),
    }
}

pub fn write_file_under_construction(
    w: &mut impl Write,
    fuc: &super::tree::FileUnderConstruction,
    layout_version: i32,
) -> std::io::Result<()> {
    write_string(w, &fuc.path)?;
    w.write_i16::<BigEndian>(fuc.replication)?;
    w.write_i64::<BigEndian>(fuc.mtime)?;
    w.write_i64::<BigEndian>(fuc.preferred_block_size)?;
    w.write_i32::<BigEndian>(fuc.blocks.len() as i32)?;
    for block in &fuc.blocks {
        w.write_i64::<BigEndian>(block.block_id)?;
        w.write_i64::<BigEndian>(block.num_bytes)?;
        if has_generation_stamp(layout_version) {
            w.write_i64::<BigEndian>(block.generation_stamp)?;
        }
    }
    write_permission_status(w, &fuc.permissions)?;
    write_string(w, &fuc.client_name)?;
    write_string(w, &fuc.client_machine)?;
    w.write_i32::<BigEndian>(0)?; // numLocations, always discarded on read
    Ok(())
}

pub fn read_file_under_construction(
    r: &mut impl Read,
    layout_version: i32,
) -> Result<super::tree::FileUnderConstruction, LayoutCodecError> {
    let path = read_string(r)?;
    let replication = r.read_i16::<BigEndian>()?;
    let mtime = r.read_i64::<BigEndian>()?;
    let preferred_block_size = r.read_i64::<BigEndian>()?;
    let num_blocks = r.read_i32::<BigEndian>()?;
    if num_blocks < 0 {
        return Err(LayoutCodecError::ChildCountOverflow);
    }
    let mut blocks = Vec::with_capacity(num_blocks as usize);
    for _ in 0..num_blocks {
        let block_id = r.read_i64::<BigEndian>()?;
        let num_bytes = r.read_i64::<BigEndian>()?;
        let generation_stamp = if has_generation_stamp(layout_version) {
            r.read_i64::<BigEndian>()?
        } else {
            NO_GENERATION_STAMP
        };
        blocks.push(BlockInfo {
            block_id,
            num_bytes,
            generation_stamp,
        });
    }
    let permissions = read_permission_status(r)?;
    let client_name = read_string(r)?;
    let client_machine = read_string(r)?;
    let _num_locations = r.read_i32::<BigEndian>()?; // always zero, discarded

    Ok(super::tree::FileUnderConstruction {
        path,
        replication,
        mtime,
        preferred_block_size,
        blocks,
        permissions,
        client_name,
        client_machine,
    })
}
