//! Start-up directory selection, consistency checking, and interrupted-
//! checkpoint recovery (spec §4.3.1, §4.3.2).

use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use crate::collaborators::EditJournal;
use crate::config::CheckpointConfig;
use crate::digest::{DigestError, DigestReader, ImageDigest};
use crate::error::{CheckpointEngineError, Result};
use crate::layout_codec::{self, compression::CodecRegistry, ImagePrefix, NamespaceImage, PermissionStatus};
use crate::storage_set::{StorageDirectory, StorageSet};

pub fn read_fstime(path: &Path) -> io::Result<i64> {
    let bytes = fs::read(path)?;
    if bytes.len() != 8 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "fstime file must hold exactly 8 bytes",
        ));
    }
    let mut arr = [0u8; 8];
    arr.copy_from_slice(&bytes);
    Ok(i64::from_be_bytes(arr))
}

pub fn write_fstime(path: &Path, value: i64) -> io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(&value.to_be_bytes())?;
    file.sync_all()
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// The outcome of directory selection and consistency checking (spec
/// §4.3.1), before any image bytes are decoded.
pub struct StartupSelection<'a> {
    pub image_dir: &'a StorageDirectory,
    pub edits_dir: &'a StorageDirectory,
    pub fstime: i64,
    pub needs_save: bool,
    pub reasons: Vec<String>,
}

fn latest_dir<'a>(
    dirs: impl Iterator<Item = &'a StorageDirectory>,
    artifact_exists: impl Fn(&StorageDirectory) -> bool,
) -> Option<(&'a StorageDirectory, i64)> {
    dirs.filter(|d| artifact_exists(d))
        .filter_map(|d| read_fstime(&d.fstime_file()).ok().map(|t| (d, t)))
        .max_by_key(|(_, t)| *t)
}

/// Select `latestImageDir`/`latestEditsDir` and apply the consistency rule
/// from spec §4.3.1: prefer the image alone only when it and the edits
/// source are disjoint single-role directories; otherwise any disagreement
/// is fatal.
pub fn select_startup_dirs(storage: &StorageSet) -> Result<StartupSelection<'_>> {
    let (image_dir, image_time) = latest_dir(storage.image_dirs(), |d| d.fsimage().exists())
        .ok_or_else(|| CheckpointEngineError::NotFormatted("no directory has a current/fsimage".into()))?;
    let (edits_dir, edits_time) = latest_dir(storage.edits_dirs(), |d| d.edits().exists())
        .ok_or_else(|| CheckpointEngineError::NotFormatted("no directory has a current/edits".into()))?;

    let mut reasons = Vec::new();

    for dir in storage.active_dirs() {
        if !dir.version_file().exists() {
            reasons.push(format!("{} has no VERSION file", dir.root().display()));
        }
        if dir.edits_new().exists() {
            reasons.push(format!("{} has a stray edits.new at startup", dir.root().display()));
        }
    }

    let fstimes: Vec<i64> = storage
        .active_dirs()
        .iter()
        .filter_map(|d| read_fstime(&d.fstime_file()).ok())
        .collect();
    if let Some(first) = fstimes.first() {
        if fstimes.iter().any(|t| t != first) {
            reasons.push("fstime disagrees across storage directories".to_string());
        }
    }

    let fstime = if image_time > edits_time {
        let disjoint_single_role = !image_dir.role().includes_edits() && !edits_dir.role().includes_image();
        if !disjoint_single_role {
            return Err(CheckpointEngineError::InconsistentFsState(format!(
                "image time {image_time} precedes edits time {edits_time} in non-disjoint directories"
            )));
        }
        warn!(
            image_time,
            edits_time,
            "image newer than edits in disjoint single-role directories; proceeding from the image and discarding stale edits"
        );
        reasons.push("image and edits latest times diverged; preferred the image".to_string());
        image_time
    } else if image_time != edits_time {
        return Err(CheckpointEngineError::InconsistentFsState(format!(
            "image time {image_time} does not match edits time {edits_time}"
        )));
    } else {
        image_time
    };

    Ok(StartupSelection {
        image_dir,
        edits_dir,
        fstime,
        needs_save: !reasons.is_empty(),
        reasons,
    })
}

/// Inspect `current/fsimage.ckpt` in the chosen image directory and apply
/// the interrupted-checkpoint recovery rule (spec §4.3.2). Returns whether
/// a fresh save is now required.
pub fn recover_interrupted_checkpoint(image_dir: &StorageDirectory, edits_dir: &StorageDirectory) -> Result<bool> {
    let ckpt = image_dir.fsimage_ckpt();
    if !ckpt.exists() {
        return Ok(false);
    }

    if edits_dir.edits_new().exists() {
        info!(dir = %image_dir.root().display(), "interrupted checkpoint: upload never finished, discarding fsimage.ckpt");
        fs::remove_file(&ckpt).map_err(|source| CheckpointEngineError::DirectoryIoError { path: ckpt, source })?;
        Ok(true)
    } else {
        info!(dir = %image_dir.root().display(), "interrupted checkpoint: upload finished, completing the lost rename");
        let fsimage = image_dir.fsimage();
        if fsimage.exists() {
            fs::remove_file(&fsimage)
                .map_err(|source| CheckpointEngineError::DirectoryIoError { path: fsimage.clone(), source })?;
        }
        fs::rename(&ckpt, &fsimage).map_err(|source| CheckpointEngineError::DirectoryIoError { path: ckpt, source })?;
        Ok(false)
    }
}

/// A decoded image plus the edit-journal merge outcome.
pub struct LoadedImage {
    pub image: NamespaceImage,
    pub prefix: ImagePrefix,
    pub edit_records_loaded: u64,
}

/// Decode the image in `image_dir`, verify it against `expected_digest` if
/// one is recorded (spec §4.4: no prior digest means first read after
/// upgrade, so the computed hash is adopted instead), then merge
/// `current/edits` and (if present) `current/edits.new` (spec §4.3.1, last
/// paragraph).
pub fn load_image(
    image_dir: &StorageDirectory,
    edits_dir: &StorageDirectory,
    journal: &mut dyn EditJournal,
    default_permissions: &PermissionStatus,
    expected_digest: Option<ImageDigest>,
) -> Result<LoadedImage> {
    let registry = CodecRegistry::with_default_codecs();
    let bytes = fs::read(image_dir.fsimage())
        .map_err(|source| CheckpointEngineError::DirectoryIoError { path: image_dir.fsimage(), source })?;

    let mut reader = DigestReader::new(&bytes[..]);
    let adjust = |r: i16| journal.adjust_replication(r);
    let (prefix, image) = layout_codec::decode_image(&mut reader, &registry, default_permissions, &adjust)
        .map_err(|source| {
            let detail = source.to_string();
            CheckpointEngineError::ImageCorrupt { path: image_dir.fsimage(), detail, source: Some(source) }
        })?;

    let computed = reader.digest_so_far();
    if let Some(expected) = expected_digest {
        if expected != computed {
            return Err(CheckpointEngineError::Digest(DigestError::Mismatch {
                path: image_dir.fsimage(),
                expected: expected.to_hex(),
                computed: computed.to_hex(),
            }));
        }
    }

    let mut edit_records_loaded = 0u64;
    if edits_dir.edits().exists() {
        let mut f = fs::File::open(edits_dir.edits())
            .map_err(|source| CheckpointEngineError::DirectoryIoError { path: edits_dir.edits(), source })?;
        edit_records_loaded += journal.load_edits(&mut f)?;
    }
    if edits_dir.edits_new().exists() {
        let mut f = fs::File::open(edits_dir.edits_new())
            .map_err(|source| CheckpointEngineError::DirectoryIoError { path: edits_dir.edits_new(), source })?;
        edit_records_loaded += journal.load_edits(&mut f)?;
    }

    Ok(LoadedImage { image, prefix, edit_records_loaded })
}

/// Spec §4.3.1 last bullet: edits loaded plus elapsed time or edits size
/// past the configured thresholds forces a fresh save.
pub fn needs_save_from_edit_volume(
    config: &CheckpointConfig,
    edits_dir: &StorageDirectory,
    fstime: i64,
    edit_records_loaded: u64,
) -> bool {
    if edit_records_loaded == 0 {
        return false;
    }
    let age_millis = now_millis().saturating_sub(fstime).max(0) as u128;
    let period_exceeded = age_millis > config.checkpoint_period.as_millis();
    let size_exceeded = fs::metadata(edits_dir.edits())
        .map(|m| m.len() >= config.checkpoint_size_bytes)
        .unwrap_or(false);
    period_exceeded || size_exceeded
}
