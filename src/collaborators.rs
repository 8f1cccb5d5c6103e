//! Trait boundaries for the three external collaborators this crate
//! consumes abstractly (spec §4.6): the in-memory namespace snapshot, the
//! append-only edit journal, and the distributed upgrade manager.
//!
//! None of the three is implemented here beyond test fakes (see
//! [`crate::testing`]): a real server wires its own namespace, journal, and
//! upgrade-manager types against these traits.

use std::io;
use std::path::Path;

use crate::layout_codec::{DirNode, FileUnderConstruction};

/// Read-only view of the in-memory namespace tree during a save (spec §3,
/// §4.6).
pub trait NamespaceSource {
    fn root(&self) -> DirNode;

    /// The generation stamp to carry in the image prefix (spec §4.2
    /// `generationStamp`).
    fn generation_stamp(&self) -> i64;

    /// The auxiliary set of files with an open writer, retained separately
    /// so client identity survives checkpoint (spec §3 "files under
    /// construction", §4.2 files-under-construction section).
    fn files_under_construction(&self) -> Vec<FileUnderConstruction>;
}

/// The append-only edit journal collaborator (spec §4.6, §6 "Edit journal").
pub trait EditJournal {
    fn open(&mut self) -> io::Result<()>;
    fn close(&mut self) -> io::Result<()>;
    fn roll_edit_log(&mut self) -> io::Result<()>;
    fn purge_edit_log(&mut self) -> io::Result<()>;
    fn create_edit_log_file(&mut self, path: &Path) -> io::Result<()>;
    fn load_edits(&mut self, reader: &mut dyn io::Read) -> io::Result<u64>;
    fn exists_new(&self) -> bool;
    fn last_written_tx_id(&self) -> u64;
    fn set_start_transaction_id(&mut self, tx_id: u64);

    /// Back-compat clamp applied to a replication value read from an older
    /// layout (spec §4.2 "Back-compat oddities").
    fn adjust_replication(&self, replication: i16) -> i16;

    /// Notify the journal that `dir` failed and was evicted from the active
    /// storage set (spec §4.1 `evict`: "notifies the edit-journal
    /// collaborator if the role includes EDITS").
    fn process_io_error(&mut self, dir: &Path);
}

/// Whether a distributed upgrade is pending or in flight (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeState {
    None,
    Pending,
    InProgress,
}

/// The distributed upgrade manager collaborator (spec §4.6, §6 "Upgrade
/// manager").
pub trait UpgradeManager {
    fn upgrade_state(&self) -> UpgradeState;
    fn upgrade_version(&self) -> Option<i32>;
    fn initialize_upgrade(&mut self) -> bool;
}
