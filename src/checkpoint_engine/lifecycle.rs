//! Upgrade, rollback, finalize, and import (spec §4.3.5).

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use tracing::info;

use crate::collaborators::{EditJournal, NamespaceSource};
use crate::digest::DigestWriter;
use crate::error::{CheckpointEngineError, Result};
use crate::layout_codec::{self, compression::Codec, NamespaceImage, PermissionStatus};
use crate::storage_set::{StorageDirectory, StorageInfo, StorageSet, VersionFile};

/// Upgrade every directory to `new_layout_version`, permitted only while no
/// directory still holds a `previous/` from an unfinalized prior upgrade.
pub fn upgrade(
    storage: &mut StorageSet,
    namespace: &dyn NamespaceSource,
    namespace_id: i32,
    new_layout_version: i32,
    new_c_time: i64,
    image_tx_id: i64,
    codec: Option<&dyn Codec>,
) -> Result<()> {
    if storage.active_dirs().iter().any(|d| d.previous().exists()) {
        return Err(CheckpointEngineError::UpgradeInProgress);
    }

    let root = namespace.root();
    let image = NamespaceImage {
        root,
        generation_stamp: namespace.generation_stamp(),
        files_under_construction: namespace.files_under_construction(),
    };

    let roots: Vec<PathBuf> = storage.active_dirs().iter().map(|d| d.root().to_path_buf()).collect();
    for root in &roots {
        let dir = storage.active_dirs().iter().find(|d| d.root() == root.as_path()).unwrap();
        upgrade_one(dir, &image, namespace_id, new_layout_version, new_c_time, image_tx_id, codec)
            .map_err(|source| CheckpointEngineError::DirectoryIoError { path: dir.root().to_path_buf(), source })?;
    }

    info!(layout_version = new_layout_version, "upgraded all storage directories");
    Ok(())
}

fn upgrade_one(
    dir: &StorageDirectory,
    image: &NamespaceImage,
    namespace_id: i32,
    layout_version: i32,
    c_time: i64,
    image_tx_id: i64,
    codec: Option<&dyn Codec>,
) -> std::io::Result<()> {
    fs::rename(dir.current(), dir.previous_tmp())?;
    fs::create_dir_all(dir.current())?;

    let file = fs::File::create(dir.fsimage())?;
    let mut writer = DigestWriter::new(file);
    layout_codec::encode_image(&mut writer, image, namespace_id, image_tx_id, codec)?;
    let (mut file, digest) = writer.finish();
    file.flush()?;
    file.sync_all()?;

    fs::File::create(dir.edits())?;

    let info = StorageInfo { layout_version, namespace_id, c_time };
    let version = VersionFile::new(info).with_digest(digest);
    version.write_to_file(&dir.version_file())?;

    fs::rename(dir.previous_tmp(), dir.previous())
}

/// Roll every directory with a `previous/` holding the prior layout back to
/// `current`; directories without one are left untouched.
pub fn rollback(storage: &mut StorageSet) -> Result<()> {
    let has_any_previous = storage.active_dirs().iter().any(|d| d.previous().exists());
    if !has_any_previous {
        return Err(CheckpointEngineError::InconsistentFsState(
            "no storage directory has a previous/ to roll back to".into(),
        ));
    }

    for dir in storage.active_dirs() {
        if !dir.previous().exists() {
            continue;
        }
        rollback_one(dir).map_err(|source| CheckpointEngineError::DirectoryIoError {
            path: dir.root().to_path_buf(),
            source,
        })?;
    }

    info!("rolled back storage directories to the previous layout");
    Ok(())
}

fn rollback_one(dir: &StorageDirectory) -> std::io::Result<()> {
    fs::rename(dir.current(), dir.removed_tmp())?;
    fs::rename(dir.previous(), dir.current())?;
    fs::remove_dir_all(dir.removed_tmp())
}

/// Discard every directory's `previous/`, permanently committing the
/// current layout. Idempotent: directories with no `previous/` are no-ops.
pub fn finalize(storage: &mut StorageSet) -> Result<()> {
    for dir in storage.active_dirs() {
        if !dir.previous().exists() {
            continue;
        }
        finalize_one(dir).map_err(|source| CheckpointEngineError::DirectoryIoError {
            path: dir.root().to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

fn finalize_one(dir: &StorageDirectory) -> std::io::Result<()> {
    fs::rename(dir.previous(), dir.finalized_tmp())?;
    fs::remove_dir_all(dir.finalized_tmp())
}

/// Load an image from a pair of external checkpoint directories and save it
/// through the regular protocol into `storage` (spec §4.3.5 `import`).
pub fn import(
    storage: &mut StorageSet,
    journal: &mut dyn EditJournal,
    external_image_dir: &std::path::Path,
    default_permissions: &PermissionStatus,
    namespace_id: i32,
    layout_version: i32,
    c_time: i64,
    codec: Option<&dyn Codec>,
    ctx: &std::sync::Arc<crate::save_context::SaveContext>,
) -> Result<()> {
    let bytes = fs::read(external_image_dir.join("fsimage"))
        .map_err(|source| CheckpointEngineError::DirectoryIoError { path: external_image_dir.to_path_buf(), source })?;
    let mut cursor = &bytes[..];
    let registry = crate::layout_codec::compression::CodecRegistry::with_default_codecs();
    let adjust = |r: i16| journal.adjust_replication(r);
    let (_prefix, image) = layout_codec::decode_image(&mut cursor, &registry, default_permissions, &adjust)
        .map_err(|source| {
            let detail = source.to_string();
            CheckpointEngineError::ImageCorrupt { path: external_image_dir.to_path_buf(), detail, source: Some(source) }
        })?;

    super::save::save_namespace(storage, journal, &image, namespace_id, layout_version, c_time, codec, ctx)?;
    info!(dir = %external_image_dir.display(), "imported external checkpoint");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    use crate::layout_codec::DirNode;
    use crate::save_context::SaveContext;
    use crate::testing::{FakeEditJournal, FakeNamespaceSource};

    fn set_up(root: &std::path::Path) -> StorageSet {
        let mut storage = StorageSet::configure(&[root.join("a"), root.join("b")], &[]).unwrap();
        storage.format_all().unwrap();
        for dir in storage.active_dirs() {
            let info = StorageInfo { layout_version: -63, namespace_id: 1, c_time: 0 };
            let digest = crate::digest::ImageDigest::from_bytes([0u8; 16]);
            storage.write_version(dir, &VersionFile::new(info).with_digest(digest)).unwrap();
        }
        storage
    }

    #[test]
    fn upgrade_moves_current_to_previous_and_bumps_layout() {
        let tmp = tempdir().unwrap();
        let mut storage = set_up(tmp.path());
        let namespace = FakeNamespaceSource::empty();

        upgrade(&mut storage, &namespace, 1, -64, 100, 0, None).unwrap();

        for dir in storage.active_dirs() {
            assert!(dir.previous().exists());
            assert!(dir.current().exists());
            let version = VersionFile::read_from_file(&dir.version_file()).unwrap();
            assert_eq!(version.info.layout_version, -64);
            assert_eq!(version.info.c_time, 100);
        }
    }

    #[test]
    fn upgrade_is_rejected_while_a_previous_already_exists() {
        let tmp = tempdir().unwrap();
        let mut storage = set_up(tmp.path());
        let namespace = FakeNamespaceSource::empty();
        upgrade(&mut storage, &namespace, 1, -64, 100, 0, None).unwrap();

        assert!(matches!(
            upgrade(&mut storage, &namespace, 1, -65, 200, 0, None),
            Err(CheckpointEngineError::UpgradeInProgress)
        ));
    }

    #[test]
    fn rollback_restores_the_prior_layout() {
        let tmp = tempdir().unwrap();
        let mut storage = set_up(tmp.path());
        let namespace = FakeNamespaceSource::empty();
        upgrade(&mut storage, &namespace, 1, -64, 100, 0, None).unwrap();

        rollback(&mut storage).unwrap();

        for dir in storage.active_dirs() {
            assert!(!dir.previous().exists());
            let version = VersionFile::read_from_file(&dir.version_file()).unwrap();
            assert_eq!(version.info.layout_version, -63);
        }
    }

    #[test]
    fn rollback_without_a_previous_is_rejected() {
        let tmp = tempdir().unwrap();
        let mut storage = set_up(tmp.path());
        assert!(matches!(
            rollback(&mut storage),
            Err(CheckpointEngineError::InconsistentFsState(_))
        ));
    }

    #[test]
    fn finalize_discards_previous_and_is_idempotent() {
        let tmp = tempdir().unwrap();
        let mut storage = set_up(tmp.path());
        let namespace = FakeNamespaceSource::empty();
        upgrade(&mut storage, &namespace, 1, -64, 100, 0, None).unwrap();

        finalize(&mut storage).unwrap();
        for dir in storage.active_dirs() {
            assert!(!dir.previous().exists());
        }

        // calling again with nothing left to finalize is a no-op, not an error
        finalize(&mut storage).unwrap();
    }

    #[test]
    fn import_decodes_an_external_image_and_saves_it_through_the_regular_protocol() {
        let tmp = tempdir().unwrap();
        let mut storage = set_up(tmp.path());
        let mut journal = FakeEditJournal::new();

        let external_dir = tmp.path().join("external");
        fs::create_dir_all(&external_dir).unwrap();
        let image = NamespaceImage {
            root: DirNode::root(),
            generation_stamp: 0,
            files_under_construction: Vec::new(),
        };
        let file = fs::File::create(external_dir.join("fsimage")).unwrap();
        layout_codec::encode_image(&mut std::io::BufWriter::new(file), &image, 1, 5, None).unwrap();

        let ctx = SaveContext::new(7);
        let permissions = PermissionStatus::default();
        import(&mut storage, &mut journal, &external_dir, &permissions, 1, -63, 0, None, &ctx).unwrap();

        for dir in storage.active_dirs() {
            assert!(dir.fsimage().exists());
        }
        assert!(journal.call_log().iter().any(|c| c == "close"));
        assert!(journal.call_log().iter().any(|c| c == "open"));
    }
}
