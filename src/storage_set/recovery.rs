//! Recovery rules applied to a directory found in `NeedsRecovery` state at
//! startup (spec §4.1).

use std::fs;
use std::io;

use super::directory::StorageDirectory;
use super::StorageSetError;

/// What `analyzeAndRecover` should do with the storage set as a whole once
/// each directory has been classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupMode {
    /// Ordinary startup: NOT_FORMATTED directories are left empty, the
    /// caller decides whether that's fatal.
    Regular,
    /// `format()` is being requested; NOT_FORMATTED is expected, not an error.
    Format,
}

/// Applies the four recovery rules to a single `NeedsRecovery` directory.
/// Returns `true` if the rules determined a save is required afterward
/// (the `previous.tmp` rule forces one).
pub fn recover_directory(dir: &StorageDirectory) -> Result<bool, StorageSetError> {
    let mut needs_save = false;

    let previous_tmp = dir.previous_tmp();
    let previous = dir.previous();
    let current = dir.current();

    if previous_tmp.exists() && !previous.exists() && !current.exists() {
        rename(&previous_tmp, &previous)?;
        needs_save = true;
    }

    let last_checkpoint_tmp = dir.last_checkpoint_tmp();
    if last_checkpoint_tmp.exists() && !current.exists() {
        rename(&last_checkpoint_tmp, &current)?;
    }

    let removed_tmp = dir.removed_tmp();
    if removed_tmp.exists() {
        remove_dir(&removed_tmp)?;
    }

    let finalized_tmp = dir.finalized_tmp();
    if finalized_tmp.exists() {
        remove_dir(&finalized_tmp)?;
    }

    Ok(needs_save)
}

fn rename(from: &std::path::Path, to: &std::path::Path) -> Result<(), StorageSetError> {
    fs::rename(from, to).map_err(|source| StorageSetError::DirectoryIo {
        path: from.to_path_buf(),
        source,
    })
}

fn remove_dir(path: &std::path::Path) -> Result<(), StorageSetError> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(StorageSetError::DirectoryIo {
            path: path.to_path_buf(),
            source,
        }),
    }
}
