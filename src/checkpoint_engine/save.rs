//! The `saveNamespace` protocol (spec §4.3.3): stage every directory behind
//! `lastcheckpoint.tmp`, save images in parallel, save edits, write
//! `VERSION` last, then retire the prior checkpoint.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, instrument, warn};

use crate::collaborators::EditJournal;
use crate::digest::{DigestWriter, ImageDigest};
use crate::error::{CheckpointEngineError, Result};
use crate::layout_codec::compression::Codec;
use crate::layout_codec::{self, NamespaceImage};
use crate::save_context::SaveContext;
use crate::storage_set::{EvictionCause, StorageDirectory, StorageInfo, StorageSet, VersionFile};

use super::startup::{read_fstime, write_fstime};

pub struct SaveOutcome {
    pub fstime: i64,
}

struct WriterResult {
    root: PathBuf,
    outcome: std::result::Result<ImageDigest, String>,
}

/// Run the full eight-step protocol over every active directory.
#[instrument(skip_all)]
#[allow(clippy::too_many_arguments)]
pub fn save_namespace(
    storage: &mut StorageSet,
    journal: &mut dyn EditJournal,
    image: &NamespaceImage,
    namespace_id: i32,
    layout_version: i32,
    c_time: i64,
    codec: Option<&dyn Codec>,
    ctx: &Arc<SaveContext>,
) -> Result<SaveOutcome> {
    journal.close()?;
    let fstime = monotonic_fstime(storage);

    let staged: Vec<PathBuf> = stage_all(storage, journal)?;

    let image_dirs: Vec<PathBuf> = storage
        .image_dirs()
        .map(|d| d.root().to_path_buf())
        .filter(|root| staged.contains(root))
        .collect();

    let results: Vec<WriterResult> = std::thread::scope(|scope| {
        let handles: Vec<_> = image_dirs
            .iter()
            .map(|root| {
                let ctx = Arc::clone(ctx);
                scope.spawn(move || write_one_image(root, image, namespace_id, codec, &ctx))
            })
            .collect();
        handles.into_iter().map(|h| h.join().expect("image writer thread panicked")).collect()
    });

    let mut errored: Vec<(PathBuf, String)> = Vec::new();
    let mut digests: Vec<(PathBuf, ImageDigest)> = Vec::new();
    for r in results {
        match r.outcome {
            Ok(digest) => digests.push((r.root, digest)),
            Err(msg) => {
                error!(dir = %r.root.display(), error = %msg, "image writer failed");
                errored.push((r.root, msg));
            }
        }
    }

    if ctx.is_cancelled() {
        let reason = match ctx.check_cancelled() {
            Err(crate::save_context::SaveContextError::Cancelled(r)) => r,
            Ok(()) => "cancelled".to_string(),
        };
        for (root, msg) in &errored {
            let _ = storage.evict(root, EvictionCause::Io(msg.clone()), journal);
        }
        for root in staged.iter().filter(|r| !errored.iter().any(|(e, _)| e == *r)) {
            if let Some(dir) = storage.active_dirs().iter().find(|d| d.root() == root.as_path()) {
                restore_from_staging(dir)?;
            }
        }
        journal.open()?;
        warn!(reason = %reason, "saveNamespace cancelled, rolled back to pre-save state");
        return Err(CheckpointEngineError::CheckpointCancelled(reason));
    }

    for (root, msg) in &errored {
        storage.evict(root, EvictionCause::Io(msg.clone()), journal)?;
    }

    for dir in storage.edits_dirs() {
        if staged.contains(&dir.root().to_path_buf()) {
            File::create(dir.edits())
                .map_err(|source| CheckpointEngineError::DirectoryIoError { path: dir.edits(), source })?;
        }
    }

    for root in staged.iter().filter(|r| !errored.iter().any(|(e, _)| e == *r)) {
        let dir = match storage.active_dirs().iter().find(|d| d.root() == root.as_path()) {
            Some(d) => d,
            None => continue,
        };
        write_fstime(&dir.fstime_file(), fstime)?;
        let info = StorageInfo { layout_version, namespace_id, c_time };
        let mut version = VersionFile::new(info);
        if let Some((_, digest)) = digests.iter().find(|(r, _)| r == root) {
            version = version.with_digest(*digest);
        }
        storage.write_version(dir, &version)?;
    }

    for root in staged.iter().filter(|r| !errored.iter().any(|(e, _)| e == *r)) {
        if let Some(dir) = storage.active_dirs().iter().find(|d| d.root() == root.as_path()) {
            retire_checkpoint(dir)?;
        }
    }

    journal.open()?;

    Ok(SaveOutcome { fstime })
}

fn monotonic_fstime(storage: &StorageSet) -> i64 {
    storage
        .active_dirs()
        .iter()
        .filter_map(|d| read_fstime(&d.fstime_file()).ok())
        .max()
        .unwrap_or(0)
        + 1
}

fn stage_all(storage: &mut StorageSet, journal: &mut dyn EditJournal) -> Result<Vec<PathBuf>> {
    let candidates: Vec<PathBuf> = storage
        .active_dirs()
        .iter()
        .filter(|d| d.version_file().exists())
        .map(|d| d.root().to_path_buf())
        .collect();

    let mut staged = Vec::new();
    for root in candidates {
        let dir = storage.active_dirs().iter().find(|d| d.root() == root.as_path()).unwrap();
        match stage_directory(dir) {
            Ok(()) => staged.push(root),
            Err(source) => {
                warn!(dir = %root.display(), error = %source, "failed to stage directory, evicting");
                storage.evict(&root, EvictionCause::Io(source.to_string()), journal)?;
            }
        }
    }
    Ok(staged)
}

fn stage_directory(dir: &StorageDirectory) -> std::io::Result<()> {
    fs::rename(dir.current(), dir.last_checkpoint_tmp())?;
    fs::create_dir_all(dir.current())
}

fn restore_from_staging(dir: &StorageDirectory) -> Result<()> {
    if dir.current().exists() {
        fs::remove_dir_all(dir.current())
            .map_err(|source| CheckpointEngineError::DirectoryIoError { path: dir.current(), source })?;
    }
    fs::rename(dir.last_checkpoint_tmp(), dir.current())
        .map_err(|source| CheckpointEngineError::DirectoryIoError { path: dir.last_checkpoint_tmp(), source })
}

fn retire_checkpoint(dir: &StorageDirectory) -> Result<()> {
    if dir.previous_checkpoint().exists() {
        fs::remove_dir_all(dir.previous_checkpoint())
            .map_err(|source| CheckpointEngineError::DirectoryIoError { path: dir.previous_checkpoint(), source })?;
    }
    fs::rename(dir.last_checkpoint_tmp(), dir.previous_checkpoint())
        .map_err(|source| CheckpointEngineError::DirectoryIoError { path: dir.last_checkpoint_tmp(), source })
}

fn write_one_image(
    root: &Path,
    image: &NamespaceImage,
    namespace_id: i32,
    codec: Option<&dyn Codec>,
    ctx: &SaveContext,
) -> WriterResult {
    let path = root.join("current").join("fsimage");
    let outcome = (|| -> Result<ImageDigest> {
        ctx.check_cancelled()?;
        let file = File::create(&path)?;
        let mut writer = DigestWriter::new(file);
        layout_codec::encode_image(&mut writer, image, namespace_id, ctx.image_tx_id() as i64, codec)?;
        let (mut file, digest) = writer.finish();
        file.flush()?;
        file.sync_all()?;
        Ok(digest)
    })();

    WriterResult { root: root.to_path_buf(), outcome: outcome.map_err(|e| e.to_string()) }
}
