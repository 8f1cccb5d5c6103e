//! Manages the set of configured storage directories: roles, locking,
//! `VERSION` I/O, startup recovery, and failure eviction (spec §4.1).

pub mod directory;
pub mod recovery;
pub mod version;

pub use directory::{DirectoryRole, StorageDirectory, StorageState};
pub use recovery::StartupMode;
pub use version::{DistributedUpgradeStatus, StorageInfo, VersionFile, DIGEST_REQUIRED_LAYOUT_VERSION};

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::collaborators::EditJournal;

#[derive(Debug, thiserror::Error)]
pub enum StorageSetError {
    #[error("directory I/O error on {path}: {source}")]
    DirectoryIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed VERSION file: {0}")]
    MalformedVersionFile(&'static str),

    #[error("layout {layout_version} requires imageMD5Digest but none is present")]
    MissingRequiredDigest { layout_version: i32 },

    #[error("imageMD5Digest present but layout {layout_version} predates its introduction")]
    DigestPredatesLayout { layout_version: i32 },

    #[error("configured directory does not exist: {0}")]
    DirectoryUnreachable(PathBuf),

    #[error("no configured directories at all")]
    NoDirectories,

    #[error("active storage set depleted after evicting all directories")]
    ActiveSetDepleted,
}

/// Why a directory was removed from the active set (spec §4.1 `evict`),
/// surfaced to the caller and logged at `warn`.
#[derive(Debug, Clone)]
pub enum EvictionCause {
    Io(String),
    ImageCorrupt(String),
}

/// The set of configured storage directories plus the subset currently
/// active (spec §4.1). Directories leave the active set via [`StorageSet::evict`]
/// and may return via [`StorageSet::attempt_restore`].
#[derive(Debug)]
pub struct StorageSet {
    active: Vec<StorageDirectory>,
    removed: Vec<(StorageDirectory, String)>,
}

impl StorageSet {
    /// Compute each directory's role from its membership in the image and
    /// edits configuration lists (spec §4.1 `configure`).
    pub fn configure(
        image_dirs: &[PathBuf],
        edits_dirs: &[PathBuf],
    ) -> Result<Self, StorageSetError> {
        let mut roles: Vec<(PathBuf, bool, bool)> = Vec::new();
        for dir in image_dirs {
            roles.push((dir.clone(), true, false));
        }
        for dir in edits_dirs {
            match roles.iter_mut().find(|(p, _, _)| p == dir) {
                Some(entry) => entry.2 = true,
                None => roles.push((dir.clone(), false, true)),
            }
        }

        if roles.is_empty() {
            return Err(StorageSetError::NoDirectories);
        }

        let mut active = Vec::with_capacity(roles.len());
        for (path, in_image, in_edits) in roles {
            let role = DirectoryRole::merge(in_image, in_edits)
                .expect("every entry originated from at least one list");
            active.push(StorageDirectory::new(path, role));
        }

        Ok(StorageSet {
            active,
            removed: Vec::new(),
        })
    }

    pub fn active_dirs(&self) -> &[StorageDirectory] {
        &self.active
    }

    pub fn active_dirs_mut(&mut self) -> &mut [StorageDirectory] {
        &mut self.active
    }

    pub fn image_dirs(&self) -> impl Iterator<Item = &StorageDirectory> {
        self.active.iter().filter(|d| d.role().includes_image())
    }

    pub fn edits_dirs(&self) -> impl Iterator<Item = &StorageDirectory> {
        self.active.iter().filter(|d| d.role().includes_edits())
    }

    /// Classify and recover every active directory (spec §4.1
    /// `analyzeAndRecover`). `NON_EXISTENT` is fatal outside `Format` mode;
    /// under `Format` it is expected and left for `format()` to populate.
    pub fn analyze_and_recover(&mut self, mode: StartupMode) -> Result<(), StorageSetError> {
        for dir in &mut self.active {
            let state = dir.classify_state().map_err(|source| StorageSetError::DirectoryIo {
                path: dir.root().to_path_buf(),
                source,
            })?;
            match state {
                StorageState::NonExistent => {
                    if matches!(mode, StartupMode::Regular) {
                        return Err(StorageSetError::DirectoryUnreachable(dir.root().to_path_buf()));
                    }
                    continue;
                }
                StorageState::NotFormatted => {}
                StorageState::Normal => {}
                StorageState::NeedsRecovery => {
                    info!(dir = %dir.root().display(), "recovering storage directory");
                    recovery::recover_directory(dir)?;
                }
            }
            // Held for the directory's lifetime in the active set; released
            // by `evict` (spec §5 shared-resource discipline).
            dir.lock().map_err(|source| StorageSetError::DirectoryIo {
                path: dir.root().to_path_buf(),
                source,
            })?;
        }
        Ok(())
    }

    /// Create an empty, formatted `current/` in every active directory
    /// (spec §4.1 `format`).
    pub fn format_all(&mut self) -> Result<(), StorageSetError> {
        for dir in &mut self.active {
            dir.create_empty_current().map_err(|source| StorageSetError::DirectoryIo {
                path: dir.root().to_path_buf(),
                source,
            })?;
            if !dir.is_locked() {
                dir.lock().map_err(|source| StorageSetError::DirectoryIo {
                    path: dir.root().to_path_buf(),
                    source,
                })?;
            }
        }
        Ok(())
    }

    pub fn load_version(&self, dir: &StorageDirectory) -> Result<VersionFile, StorageSetError> {
        VersionFile::read_from_file(&dir.version_file())
    }

    pub fn write_version(&self, dir: &StorageDirectory, version: &VersionFile) -> Result<(), StorageSetError> {
        version
            .write_to_file(&dir.version_file())
            .map_err(|source| StorageSetError::DirectoryIo {
                path: dir.version_file(),
                source,
            })
    }

    /// Move a directory from the active set into the removed set (spec
    /// §4.1 `evict`), notifying `journal` if the directory's role includes
    /// EDITS. Fatal if this empties the active set.
    pub fn evict(
        &mut self,
        root: &Path,
        cause: EvictionCause,
        journal: &mut dyn EditJournal,
    ) -> Result<(), StorageSetError> {
        let index = self
            .active
            .iter()
            .position(|d| d.root() == root)
            .expect("evict called with a directory not in the active set");

        let mut dir = self.active.remove(index);
        dir.unlock();

        if dir.role().includes_edits() {
            journal.process_io_error(root);
        }

        let reason = match cause {
            EvictionCause::Io(detail) => detail,
            EvictionCause::ImageCorrupt(detail) => detail,
        };
        warn!(dir = %root.display(), reason = %reason, "evicting storage directory");
        self.removed.push((dir, reason));

        if self.active.is_empty() {
            return Err(StorageSetError::ActiveSetDepleted);
        }
        Ok(())
    }

    pub fn removed_dirs(&self) -> impl Iterator<Item = (&StorageDirectory, &str)> {
        self.removed.iter().map(|(d, reason)| (d, reason.as_str()))
    }

    /// Re-accept a previously evicted directory if its path is writable
    /// again (spec §4.1 `attemptRestore`). Local contents are discarded;
    /// the next save repopulates it from scratch.
    pub fn attempt_restore(&mut self, root: &Path) -> Result<bool, StorageSetError> {
        let index = match self.removed.iter().position(|(d, _)| d.root() == root) {
            Some(i) => i,
            None => return Ok(false),
        };

        let probe = root.join(".restore-probe");
        let writable = std::fs::create_dir_all(root)
            .and_then(|_| std::fs::write(&probe, b""))
            .and_then(|_| std::fs::remove_file(&probe))
            .is_ok();

        if !writable {
            return Ok(false);
        }

        let (mut dir, _reason) = self.removed.remove(index);
        if dir.current().exists() {
            std::fs::remove_dir_all(dir.current()).map_err(|source| StorageSetError::DirectoryIo {
                path: dir.current(),
                source,
            })?;
        }
        dir.create_empty_current().map_err(|source| StorageSetError::DirectoryIo {
            path: dir.root().to_path_buf(),
            source,
        })?;
        dir.lock().map_err(|source| StorageSetError::DirectoryIo {
            path: dir.root().to_path_buf(),
            source,
        })?;
        info!(dir = %root.display(), "restored previously evicted storage directory");
        self.active.push(dir);
        Ok(true)
    }
}
