//! The upload-and-roll protocol driven by a secondary actor merging edits
//! into a fresh image (spec §4.3.4): `rollEditLog` / `validateCheckpointUpload`
//! / `checkpointUploadDone` / `rollFSImage`.

use std::fs;

use tracing::info;

use crate::collaborators::EditJournal;
use crate::digest::ImageDigest;
use crate::error::{CheckpointEngineError, Result};
use crate::storage_set::{StorageInfo, StorageSet, VersionFile};

use super::signature::{CheckpointSignature, CheckpointState};

fn expect_state(current: CheckpointState, expected: CheckpointState) -> Result<()> {
    if current != expected {
        return Err(CheckpointEngineError::ProtocolOrdering(format!(
            "expected state {expected:?}, found {current:?}"
        )));
    }
    Ok(())
}

/// `START` is the state a freshly configured engine begins in; `UPLOAD_DONE`
/// is the state `saveNamespace` and a prior `rollFSImage` both leave it in
/// (spec §4.3.3 step 8, §4.3.4). Both are "no roll currently in flight" —
/// only `ROLLED_EDITS`/`UPLOAD_START` are illegal entry points.
fn expect_idle(current: CheckpointState) -> Result<()> {
    if !matches!(current, CheckpointState::Start | CheckpointState::UploadDone) {
        return Err(CheckpointEngineError::ProtocolOrdering(format!(
            "expected an idle state (START or UPLOAD_DONE), found {current:?}"
        )));
    }
    Ok(())
}

/// Seal `current/edits`, open a fresh `edits.new`, and hand the caller a
/// signature to carry through the rest of the protocol.
pub fn roll_edit_log(
    storage: &mut StorageSet,
    state: &mut CheckpointState,
    namespace_id: i32,
    layout_version: i32,
    c_time: i64,
    fstime: i64,
) -> Result<CheckpointSignature> {
    expect_idle(*state)?;

    let mut edits_mtime = 0i64;
    for dir in storage.active_dirs().iter().filter(|d| d.role().includes_edits()) {
        let sealed = dir.current().join("edits.rolled");
        if dir.edits().exists() {
            fs::rename(dir.edits(), &sealed)
                .map_err(|source| CheckpointEngineError::DirectoryIoError { path: dir.edits(), source })?;
            if let Ok(meta) = fs::metadata(&sealed) {
                if let Ok(modified) = meta.modified() {
                    if let Ok(elapsed) = modified.duration_since(std::time::UNIX_EPOCH) {
                        edits_mtime = edits_mtime.max(elapsed.as_millis() as i64);
                    }
                }
            }
        }
        fs::File::create(dir.edits_new())
            .map_err(|source| CheckpointEngineError::DirectoryIoError { path: dir.edits_new(), source })?;
    }

    *state = CheckpointState::RolledEdits;

    Ok(CheckpointSignature {
        namespace_id,
        layout_version,
        c_time,
        fstime,
        edits_mtime,
        image_digest: None,
    })
}

/// Confirm a secondary actor's signature matches the one handed out by
/// `roll_edit_log` before it starts uploading.
pub fn validate_checkpoint_upload(
    state: &mut CheckpointState,
    expected: &CheckpointSignature,
    offered: &CheckpointSignature,
) -> Result<()> {
    expect_state(*state, CheckpointState::RolledEdits)?;

    if expected.namespace_id != offered.namespace_id
        || expected.layout_version != offered.layout_version
        || expected.c_time != offered.c_time
        || expected.fstime != offered.fstime
        || expected.edits_mtime != offered.edits_mtime
    {
        return Err(CheckpointEngineError::ProtocolOrdering(
            "checkpoint signature does not match the one issued by rollEditLog".into(),
        ));
    }

    *state = CheckpointState::UploadStart;
    Ok(())
}

/// Record the digest of the image the secondary actor has finished
/// uploading into every image directory's `current/fsimage.ckpt`.
pub fn checkpoint_upload_done(state: &mut CheckpointState, recorded_digest: &mut Option<ImageDigest>, digest: ImageDigest) -> Result<()> {
    expect_state(*state, CheckpointState::UploadStart)?;
    *recorded_digest = Some(digest);
    *state = CheckpointState::UploadDone;
    Ok(())
}

/// Commit the uploaded `fsimage.ckpt` files into place and purge the sealed
/// edit logs, advancing in-memory bookkeeping and returning to `START`.
#[allow(clippy::too_many_arguments)]
pub fn roll_fs_image(
    storage: &mut StorageSet,
    journal: &mut dyn EditJournal,
    state: &mut CheckpointState,
    recorded_digest: Option<ImageDigest>,
    signature: &CheckpointSignature,
    layout_version: &mut i32,
    fstime: &mut i64,
    image_digest: &mut Option<ImageDigest>,
) -> Result<()> {
    expect_state(*state, CheckpointState::UploadDone)?;

    match (recorded_digest, signature.image_digest) {
        (Some(recorded), Some(offered)) if recorded == offered => {}
        _ => {
            return Err(CheckpointEngineError::ProtocolOrdering(
                "rollFSImage signature digest does not match the recorded upload digest".into(),
            ))
        }
    }

    let has_edits_new = storage
        .active_dirs()
        .iter()
        .filter(|d| d.role().includes_edits())
        .any(|d| d.edits_new().exists());
    if !has_edits_new {
        return Err(CheckpointEngineError::ProtocolOrdering("no edits.new present to roll".into()));
    }

    let image_roots: Vec<_> = storage
        .active_dirs()
        .iter()
        .filter(|d| d.role().includes_image())
        .map(|d| d.root().to_path_buf())
        .collect();
    for root in &image_roots {
        let ckpt = root.join("current").join("fsimage.ckpt");
        if !ckpt.exists() {
            return Err(CheckpointEngineError::ProtocolOrdering(format!(
                "{} has no staged fsimage.ckpt to roll",
                root.display()
            )));
        }
    }

    for root in &image_roots {
        let dir = storage.active_dirs().iter().find(|d| d.root() == root.as_path()).unwrap();
        let ckpt = dir.fsimage_ckpt();
        let fsimage = dir.fsimage();
        let result = (|| -> std::io::Result<()> {
            if fsimage.exists() {
                fs::remove_file(&fsimage)?;
            }
            fs::rename(&ckpt, &fsimage)
        })();
        if let Err(source) = result {
            let detail = source.to_string();
            storage.evict(root, crate::storage_set::EvictionCause::Io(detail), journal)?;
        }
    }

    if storage.image_dirs().next().is_none() {
        return Err(CheckpointEngineError::ActiveSetDepleted(vec![]));
    }

    for dir in storage.active_dirs().iter().filter(|d| d.role().includes_edits()) {
        if dir.edits_new().exists() {
            if dir.edits().exists() {
                fs::remove_file(dir.edits())
                    .map_err(|source| CheckpointEngineError::DirectoryIoError { path: dir.edits(), source })?;
            }
            fs::rename(dir.edits_new(), dir.edits())
                .map_err(|source| CheckpointEngineError::DirectoryIoError { path: dir.edits_new(), source })?;
        }
    }

    *layout_version = signature.layout_version;
    *fstime = signature.fstime;
    *image_digest = recorded_digest;

    for dir in storage.active_dirs() {
        let info = StorageInfo {
            layout_version: signature.layout_version,
            namespace_id: signature.namespace_id,
            c_time: signature.c_time,
        };
        let mut version = VersionFile::new(info);
        if let Some(digest) = image_digest {
            version = version.with_digest(*digest);
        }
        storage.write_version(dir, &version)?;

        if dir.role() == crate::storage_set::DirectoryRole::Image && dir.edits().exists() {
            let _ = fs::remove_file(dir.edits());
        }
        if dir.role() == crate::storage_set::DirectoryRole::Edits && dir.fsimage().exists() {
            let _ = fs::remove_file(dir.fsimage());
        }
    }

    *state = CheckpointState::Start;
    info!(layout_version = *layout_version, fstime = *fstime, "rolled fsimage into place");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeEditJournal;
    use tempfile::tempdir;

    fn set_up(root: &std::path::Path) -> StorageSet {
        let image = root.join("image");
        let edits = root.join("edits");
        let mut storage = StorageSet::configure(&[image.clone()], &[edits.clone()]).unwrap();
        storage.format_all().unwrap();
        for dir in storage.active_dirs() {
            fs::write(dir.edits(), b"sealed-before-roll").unwrap();
            let info = StorageInfo { layout_version: -63, namespace_id: 1, c_time: 0 };
            storage.write_version(dir, &VersionFile::new(info)).unwrap();
        }
        storage
    }

    #[test]
    fn roll_edit_log_seals_edits_and_advances_state() {
        let tmp = tempdir().unwrap();
        let mut storage = set_up(tmp.path());
        let mut state = CheckpointState::Start;

        let sig = roll_edit_log(&mut storage, &mut state, 1, -63, 0, 10).unwrap();
        assert_eq!(state, CheckpointState::RolledEdits);
        assert_eq!(sig.namespace_id, 1);

        let edits_dir = storage.edits_dirs().next().unwrap();
        assert!(edits_dir.edits_new().exists());
    }

    #[test]
    fn roll_edit_log_out_of_order_is_rejected() {
        let tmp = tempdir().unwrap();
        let mut storage = set_up(tmp.path());
        let mut state = CheckpointState::RolledEdits;
        assert!(matches!(
            roll_edit_log(&mut storage, &mut state, 1, -63, 0, 10),
            Err(CheckpointEngineError::ProtocolOrdering(_))
        ));
    }

    #[test]
    fn roll_edit_log_accepts_upload_done_as_well_as_start() {
        // UPLOAD_DONE is the state saveNamespace leaves the engine in (spec
        // §4.3.3 step 8); the next roll must not be locked out by it.
        let tmp = tempdir().unwrap();
        let mut storage = set_up(tmp.path());
        let mut state = CheckpointState::UploadDone;
        assert!(roll_edit_log(&mut storage, &mut state, 1, -63, 0, 10).is_ok());
        assert_eq!(state, CheckpointState::RolledEdits);
    }

    #[test]
    fn validate_checkpoint_upload_rejects_mismatched_signature() {
        let mut state = CheckpointState::RolledEdits;
        let expected = CheckpointSignature { namespace_id: 1, layout_version: -63, c_time: 0, fstime: 10, edits_mtime: 5, image_digest: None };
        let offered = CheckpointSignature { fstime: 11, ..expected.clone() };
        assert!(matches!(
            validate_checkpoint_upload(&mut state, &expected, &offered),
            Err(CheckpointEngineError::ProtocolOrdering(_))
        ));
        assert_eq!(state, CheckpointState::RolledEdits);
    }

    #[test]
    fn validate_checkpoint_upload_accepts_matching_signature() {
        let mut state = CheckpointState::RolledEdits;
        let expected = CheckpointSignature { namespace_id: 1, layout_version: -63, c_time: 0, fstime: 10, edits_mtime: 5, image_digest: None };
        validate_checkpoint_upload(&mut state, &expected, &expected.clone()).unwrap();
        assert_eq!(state, CheckpointState::UploadStart);
    }

    #[test]
    fn full_roll_cycle_commits_staged_image_and_purges_edits_new() {
        let tmp = tempdir().unwrap();
        let mut storage = set_up(tmp.path());
        let mut state = CheckpointState::Start;

        let mut signature = roll_edit_log(&mut storage, &mut state, 1, -63, 0, 10).unwrap();

        let image_dir = storage.image_dirs().next().unwrap().root().to_path_buf();
        let image_dir_ref = storage.active_dirs().iter().find(|d| d.root() == image_dir.as_path()).unwrap();
        fs::write(image_dir_ref.fsimage_ckpt(), b"new image bytes").unwrap();

        let digest = ImageDigest::from_bytes([9u8; 16]);
        validate_checkpoint_upload(&mut state, &signature.clone(), &signature).unwrap();

        let mut recorded = None;
        checkpoint_upload_done(&mut state, &mut recorded, digest).unwrap();
        signature.image_digest = Some(digest);

        let mut layout_version = -63;
        let mut fstime = 10;
        let mut image_digest = None;
        let mut journal = FakeEditJournal::new();
        roll_fs_image(&mut storage, &mut journal, &mut state, recorded, &signature, &mut layout_version, &mut fstime, &mut image_digest).unwrap();

        assert_eq!(state, CheckpointState::Start);
        assert_eq!(image_digest, Some(digest));
        let image_dir_ref = storage.active_dirs().iter().find(|d| d.root() == image_dir.as_path()).unwrap();
        assert!(image_dir_ref.fsimage().exists());
        assert!(!image_dir_ref.fsimage_ckpt().exists());
        let edits_dir_ref = storage.edits_dirs().next().unwrap();
        assert!(!edits_dir_ref.edits_new().exists());
        assert!(edits_dir_ref.edits().exists());
    }

    #[test]
    fn roll_fs_image_requires_matching_digest() {
        let tmp = tempdir().unwrap();
        let mut storage = set_up(tmp.path());
        let mut state = CheckpointState::UploadDone;
        let signature = CheckpointSignature {
            namespace_id: 1,
            layout_version: -63,
            c_time: 0,
            fstime: 10,
            edits_mtime: 0,
            image_digest: Some(ImageDigest::from_bytes([1u8; 16])),
        };
        let mut layout_version = -63;
        let mut fstime = 10;
        let mut image_digest = None;
        let recorded = Some(ImageDigest::from_bytes([2u8; 16]));
        let mut journal = FakeEditJournal::new();
        assert!(matches!(
            roll_fs_image(&mut storage, &mut journal, &mut state, recorded, &signature, &mut layout_version, &mut fstime, &mut image_digest),
            Err(CheckpointEngineError::ProtocolOrdering(_))
        ));
    }
}
