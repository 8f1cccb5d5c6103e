//! A single storage directory: its role, on-disk layout, and advisory lock.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;

/// Which artifacts a storage directory is responsible for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectoryRole {
    Image,
    Edits,
    Both,
}

impl DirectoryRole {
    pub fn includes_image(self) -> bool {
        matches!(self, DirectoryRole::Image | DirectoryRole::Both)
    }

    pub fn includes_edits(self) -> bool {
        matches!(self, DirectoryRole::Edits | DirectoryRole::Both)
    }

    /// Combine the role a directory plays as an image source with the role
    /// it plays as an edits source, per `configure`'s rule: present in
    /// both configured lists -> Both, otherwise whichever list it came from.
    pub fn merge(in_image_list: bool, in_edits_list: bool) -> Option<Self> {
        match (in_image_list, in_edits_list) {
            (true, true) => Some(DirectoryRole::Both),
            (true, false) => Some(DirectoryRole::Image),
            (false, true) => Some(DirectoryRole::Edits),
            (false, false) => None,
        }
    }
}

/// The state a directory is found in at startup, before recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageState {
    /// The configured path does not exist at all.
    NonExistent,
    /// The path exists but has never been formatted (empty, no VERSION).
    NotFormatted,
    /// `current/VERSION` exists and no staging directories are left over.
    Normal,
    /// A staging directory from an interrupted operation is present and
    /// must be resolved by the recovery rules before use.
    NeedsRecovery,
}

/// One local directory participating in the storage set, and the files it
/// is responsible for by role.
///
/// Layout (see spec §3, §6):
/// ```text
/// <root>/
///   current/{fsimage, fsimage.ckpt, edits, edits.new, fstime, VERSION}
///   previous/
///   previous.checkpoint/
///   lastcheckpoint.tmp/
///   removed.tmp/
///   previous.tmp/
///   finalized.tmp/
///   storage.lock
/// ```
#[derive(Debug)]
pub struct StorageDirectory {
    root: PathBuf,
    role: DirectoryRole,
    lock: Option<File>,
}

impl StorageDirectory {
    pub fn new(root: impl Into<PathBuf>, role: DirectoryRole) -> Self {
        StorageDirectory {
            root: root.into(),
            role,
            lock: None,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn role(&self) -> DirectoryRole {
        self.role
    }

    pub fn current(&self) -> PathBuf {
        self.root.join("current")
    }

    pub fn previous(&self) -> PathBuf {
        self.root.join("previous")
    }

    pub fn previous_checkpoint(&self) -> PathBuf {
        self.root.join("previous.checkpoint")
    }

    pub fn last_checkpoint_tmp(&self) -> PathBuf {
        self.root.join("lastcheckpoint.tmp")
    }

    pub fn removed_tmp(&self) -> PathBuf {
        self.root.join("removed.tmp")
    }

    pub fn previous_tmp(&self) -> PathBuf {
        self.root.join("previous.tmp")
    }

    pub fn finalized_tmp(&self) -> PathBuf {
        self.root.join("finalized.tmp")
    }

    pub fn version_file(&self) -> PathBuf {
        self.current().join("VERSION")
    }

    pub fn fsimage(&self) -> PathBuf {
        self.current().join("fsimage")
    }

    pub fn fsimage_ckpt(&self) -> PathBuf {
        self.current().join("fsimage.ckpt")
    }

    pub fn edits(&self) -> PathBuf {
        self.current().join("edits")
    }

    pub fn edits_new(&self) -> PathBuf {
        self.current().join("edits.new")
    }

    pub fn fstime_file(&self) -> PathBuf {
        self.current().join("fstime")
    }

    fn lock_file_path(&self) -> PathBuf {
        self.root.join("storage.lock")
    }

    /// Classify the on-disk state without mutating anything.
    pub fn classify_state(&self) -> io::Result<StorageState> {
        if !self.root.exists() {
            return Ok(StorageState::NonExistent);
        }
        if self.last_checkpoint_tmp().exists()
            || self.removed_tmp().exists()
            || self.previous_tmp().exists()
            || self.finalized_tmp().exists()
        {
            return Ok(StorageState::NeedsRecovery);
        }
        if !self.version_file().exists() {
            return Ok(StorageState::NotFormatted);
        }
        Ok(StorageState::Normal)
    }

    /// Create `current/` (and the root) if absent. Used by `format()` and
    /// whenever a staging slot is recreated as an empty `current/`.
    pub fn create_empty_current(&self) -> io::Result<()> {
        fs::create_dir_all(self.current())
    }

    /// Acquire the exclusive advisory `flock` for this directory's lifetime
    /// in the active set (spec §5: "Each StorageDirectory holds an
    /// exclusive advisory file lock for its lifetime in the active set").
    /// The lock is released by `unlock` or by dropping the `StorageDirectory`
    /// (closing the handle drops the `flock`). Fails with `WouldBlock` if
    /// another process already holds it.
    pub fn lock(&mut self) -> io::Result<()> {
        fs::create_dir_all(&self.root)?;
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.lock_file_path())?;
        file.try_lock_exclusive()?;
        self.lock = Some(file);
        Ok(())
    }

    pub fn unlock(&mut self) {
        if let Some(file) = self.lock.take() {
            let _ = file.unlock();
        }
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }
}
