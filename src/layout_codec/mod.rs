//! Bit-exact namespace image serialization across layout versions (spec
//! §4.2 LayoutCodec). The image file is a self-describing prefix, written
//! uncompressed, followed by a body that is optionally routed through a
//! registered compression codec.
//!
//! This crate always encodes at [`LAYOUT_VERSION`], the newest (most
//! negative) layout, so every optional field is always present on save;
//! decoding honors whatever layout the prefix declares, dispatching between
//! the full-path and local-name body forms and substituting sentinels for
//! fields a given layout predates.

pub mod compression;
pub mod full_path;
pub mod inode;
pub mod local_name;
pub mod thresholds;
pub mod tree;
pub mod wire;

pub use thresholds::CURRENT_LAYOUT_VERSION as LAYOUT_VERSION;
pub use tree::{
    BlockInfo, DirNode, FileNode, FileUnderConstruction, NamespaceImage, Node, PermissionStatus,
};

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use thresholds::{
    FILES_UNDER_CONSTRUCTION_LAYOUT, GENERATION_STAMP_LAYOUT, LOCAL_NAME_FORM_LAYOUT,
    NUM_FILES_I64_LAYOUT, STORED_TXIDS_LAYOUT,
};
use wire::{read_string, write_string};

#[derive(Debug, thiserror::Error)]
pub enum LayoutCodecError {
    #[error("malformed length-prefixed string")]
    MalformedString,

    #[error("negative or overflowing child/block count")]
    ChildCountOverflow,

    #[error("parent not found for entry: {0}")]
    ParentNotFound(String),

    #[error("malformed root entry")]
    MalformedRootEntry,

    #[error("end of stream before completion: {0}")]
    EofBeforeCompletion(String),

    #[error("unknown compression codec: {0}")]
    UnknownCodec(String),

    #[error("{0} trailing byte(s) after image payload")]
    TrailingBytes(usize),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// The fixed prefix preceding the body (spec §4.2). Optional fields are
/// present according to `layout_version` against the thresholds in
/// [`thresholds`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePrefix {
    pub layout_version: i32,
    pub namespace_id: i32,
    pub num_files: i64,
    pub generation_stamp: i64,
    pub image_tx_id: i64,
    pub compressed: bool,
    pub codec_name: Option<String>,
}

fn write_prefix(w: &mut impl Write, prefix: &ImagePrefix) -> io::Result<()> {
    w.write_i32::<BigEndian>(prefix.layout_version)?;
    w.write_i32::<BigEndian>(prefix.namespace_id)?;
    if prefix.layout_version <= NUM_FILES_I64_LAYOUT {
        w.write_i64::<BigEndian>(prefix.num_files)?;
    } else {
        w.write_i32::<BigEndian>(prefix.num_files as i32)?;
    }
    if prefix.layout_version <= GENERATION_STAMP_LAYOUT {
        w.write_i64::<BigEndian>(prefix.generation_stamp)?;
    }
    if prefix.layout_version <= STORED_TXIDS_LAYOUT {
        w.write_i64::<BigEndian>(prefix.image_tx_id)?;
    }
    w.write_u8(prefix.compressed as u8)?;
    if prefix.compressed {
        write_string(w, prefix.codec_name.as_deref().unwrap_or(""))?;
    }
    Ok(())
}

fn read_prefix(r: &mut impl Read) -> Result<ImagePrefix, LayoutCodecError> {
    let layout_version = r.read_i32::<BigEndian>()?;
    let namespace_id = r.read_i32::<BigEndian>()?;
    let num_files = if layout_version <= NUM_FILES_I64_LAYOUT {
        r.read_i64::<BigEndian>()?
    } else {
        r.read_i32::<BigEndian>()? as i64
    };
    let generation_stamp = if layout_version <= GENERATION_STAMP_LAYOUT {
        r.read_i64::<BigEndian>()?
    } else {
        0
    };
    let image_tx_id = if layout_version <= STORED_TXIDS_LAYOUT {
        r.read_i64::<BigEndian>()?
    } else {
        0
    };
    let compressed = r.read_u8()? != 0;
    let codec_name = if compressed { Some(read_string(r)?) } else { None };

    Ok(ImagePrefix {
        layout_version,
        namespace_id,
        num_files,
        generation_stamp,
        image_tx_id,
        compressed,
        codec_name,
    })
}

fn write_body(w: &mut impl Write, image: &NamespaceImage, layout_version: i32) -> io::Result<()> {
    if layout_version <= LOCAL_NAME_FORM_LAYOUT {
        local_name::write_tree(w, &image.root, layout_version)?;
    } else {
        full_path::write_tree(w, &image.root, layout_version)?;
    }
    if layout_version <= FILES_UNDER_CONSTRUCTION_LAYOUT {
        w.write_i32::<BigEndian>(image.files_under_construction.len() as i32)?;
        for fuc in &image.files_under_construction {
            inode::write_file_under_construction(w, fuc, layout_version)?;
        }
    }
    Ok(())
}

fn read_body(
    r: &mut impl Read,
    prefix: &ImagePrefix,
    default_permissions: &PermissionStatus,
    adjust_replication: &dyn Fn(i16) -> i16,
) -> Result<NamespaceImage, LayoutCodecError> {
    let layout_version = prefix.layout_version;
    let root = if layout_version <= LOCAL_NAME_FORM_LAYOUT {
        local_name::read_tree(r, layout_version, default_permissions, adjust_replication)?
    } else {
        full_path::read_tree(
            r,
            prefix.num_files as u64,
            layout_version,
            default_permissions,
            adjust_replication,
        )?
    };

    let files_under_construction = if layout_version <= FILES_UNDER_CONSTRUCTION_LAYOUT {
        let count = r.read_i32::<BigEndian>()?;
        if count < 0 {
            return Err(LayoutCodecError::ChildCountOverflow);
        }
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            entries.push(inode::read_file_under_construction(r, layout_version)?);
        }
        entries
    } else {
        Vec::new()
    };

    Ok(NamespaceImage {
        root,
        generation_stamp: prefix.generation_stamp,
        files_under_construction,
    })
}

/// Encode `image` at [`LAYOUT_VERSION`], writing the prefix uncompressed and
/// then the body, optionally through `codec`.
pub fn encode_image(
    w: &mut impl Write,
    image: &NamespaceImage,
    namespace_id: i32,
    image_tx_id: i64,
    codec: Option<&dyn compression::Codec>,
) -> io::Result<()> {
    let prefix = ImagePrefix {
        layout_version: LAYOUT_VERSION,
        namespace_id,
        num_files: image.root.count_nodes(),
        generation_stamp: image.generation_stamp,
        image_tx_id,
        compressed: codec.is_some(),
        codec_name: codec.map(|c| c.name().to_string()),
    };
    write_prefix(w, &prefix)?;

    match codec {
        Some(codec) => {
            let mut encoder = codec.wrap_writer(Box::new(&mut *w));
            write_body(&mut encoder, image, LAYOUT_VERSION)?;
            encoder.flush()?;
        }
        None => write_body(w, image, LAYOUT_VERSION)?,
    }
    Ok(())
}

/// Decode an image of any layout version the prefix declares. Asserts EOF
/// immediately after the payload (spec §4.2: "any trailing bytes are a
/// fatal corruption signal").
pub fn decode_image(
    r: &mut impl Read,
    registry: &compression::CodecRegistry,
    default_permissions: &PermissionStatus,
    adjust_replication: &dyn Fn(i16) -> i16,
) -> Result<(ImagePrefix, NamespaceImage), LayoutCodecError> {
    let prefix = read_prefix(r)?;

    let image = if prefix.compressed {
        let codec_name = prefix.codec_name.clone().unwrap_or_default();
        let codec = registry
            .get(&codec_name)
            .map_err(|_| LayoutCodecError::UnknownCodec(codec_name.clone()))?;
        let mut decoder = codec.wrap_reader(Box::new(&mut *r));
        read_body(&mut decoder, &prefix, default_permissions, adjust_replication)?
    } else {
        read_body(r, &prefix, default_permissions, adjust_replication)?
    };

    let mut probe = [0u8; 1];
    if r.read(&mut probe)? != 0 {
        return Err(LayoutCodecError::TrailingBytes(1));
    }

    Ok((prefix, image))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tree::{FileNode, FileUnderConstruction};

    fn sample_image() -> NamespaceImage {
        let mut root = DirNode::root();
        root.children.push(Node::File(FileNode {
            name: "a.txt".into(),
            replication: 3,
            mtime: 10,
            atime: 11,
            preferred_block_size: 128,
            blocks: vec![BlockInfo {
                block_id: 1,
                num_bytes: 64,
                generation_stamp: 5,
            }],
            permissions: PermissionStatus::default(),
        }));
        NamespaceImage {
            root,
            generation_stamp: 42,
            files_under_construction: vec![FileUnderConstruction {
                path: "/open.tmp".into(),
                replication: 1,
                mtime: 1,
                preferred_block_size: 256,
                blocks: vec![],
                permissions: PermissionStatus::default(),
                client_name: "client-1".into(),
                client_machine: "host-1".into(),
            }],
        }
    }

    #[test]
    fn round_trips_uncompressed_image() {
        let image = sample_image();
        let mut buf = Vec::new();
        encode_image(&mut buf, &image, 7, 99, None).unwrap();

        let registry = compression::CodecRegistry::with_default_codecs();
        let mut cursor = &buf[..];
        let (prefix, decoded) = decode_image(
            &mut cursor,
            &registry,
            &PermissionStatus::default(),
            &|r| r,
        )
        .unwrap();

        assert_eq!(prefix.layout_version, LAYOUT_VERSION);
        assert_eq!(prefix.namespace_id, 7);
        assert_eq!(prefix.image_tx_id, 99);
        assert!(!prefix.compressed);
        assert_eq!(decoded, image);
    }

    #[test]
    fn round_trips_compressed_image() {
        let image = sample_image();
        let registry = compression::CodecRegistry::with_default_codecs();
        let codec = registry.get("zstd").unwrap();

        let mut buf = Vec::new();
        encode_image(&mut buf, &image, 1, 1, Some(codec)).unwrap();

        let mut cursor = &buf[..];
        let (prefix, decoded) = decode_image(
            &mut cursor,
            &registry,
            &PermissionStatus::default(),
            &|r| r,
        )
        .unwrap();

        assert!(prefix.compressed);
        assert_eq!(prefix.codec_name.as_deref(), Some("zstd"));
        assert_eq!(decoded, image);
    }

    #[test]
    fn unknown_codec_on_load_is_rejected() {
        let image = sample_image();
        let mut buf = Vec::new();
        encode_image(&mut buf, &image, 1, 1, None).unwrap();

        // Splice in a `compressed = true` flag naming an unregistered codec.
        // Offset of the flag byte for this layout: layoutVersion(4) +
        // namespaceId(4) + numFiles(8) + generationStamp(8) + imageTxId(8).
        let flag_offset = 4 + 4 + 8 + 8 + 8;
        let mut corrupted = buf[..flag_offset].to_vec();
        corrupted.push(1); // compressed = true
        write_string(&mut corrupted, "made-up-codec").unwrap();
        corrupted.extend_from_slice(&buf[flag_offset + 1..]);

        let registry = compression::CodecRegistry::with_default_codecs();
        let mut cursor = &corrupted[..];
        let err = decode_image(
            &mut cursor,
            &registry,
            &PermissionStatus::default(),
            &|r| r,
        )
        .unwrap_err();
        assert!(matches!(err, LayoutCodecError::UnknownCodec(_)));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let image = sample_image();
        let mut buf = Vec::new();
        encode_image(&mut buf, &image, 1, 1, None).unwrap();
        buf.push(0xff);

        let registry = compression::CodecRegistry::with_default_codecs();
        let mut cursor = &buf[..];
        let err = decode_image(
            &mut cursor,
            &registry,
            &PermissionStatus::default(),
            &|r| r,
        )
        .unwrap_err();
        assert!(matches!(err, LayoutCodecError::TrailingBytes(_)));
    }

    #[test]
    fn empty_tree_encodes_with_num_files_one() {
        let image = NamespaceImage {
            root: DirNode::root(),
            generation_stamp: 0,
            files_under_construction: vec![],
        };
        let mut buf = Vec::new();
        encode_image(&mut buf, &image, 1, 1, None).unwrap();
        let registry = compression::CodecRegistry::with_default_codecs();
        let mut cursor = &buf[..];
        let (prefix, decoded) = decode_image(
            &mut cursor,
            &registry,
            &PermissionStatus::default(),
            &|r| r,
        )
        .unwrap();
        assert_eq!(prefix.num_files, 1);
        assert_eq!(decoded.root, DirNode::root());
    }
}
