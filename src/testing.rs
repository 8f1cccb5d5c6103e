//! Test fakes for the three external collaborator traits (spec §4.6, §8
//! "ambient: test tooling") plus directory-layout helpers used across this
//! crate's test suites, patterned on the teacher's own in-memory fakes for
//! out-of-scope collaborators.

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::collaborators::{EditJournal, NamespaceSource, UpgradeManager, UpgradeState};
use crate::layout_codec::{DirNode, FileUnderConstruction};

/// A fixed, in-memory namespace tree handed back unchanged on every call.
pub struct FakeNamespaceSource {
    root: DirNode,
    generation_stamp: i64,
    files_under_construction: Vec<FileUnderConstruction>,
}

impl FakeNamespaceSource {
    pub fn new(root: DirNode) -> Self {
        FakeNamespaceSource { root, generation_stamp: 0, files_under_construction: Vec::new() }
    }

    pub fn empty() -> Self {
        Self::new(DirNode::root())
    }

    pub fn with_generation_stamp(mut self, generation_stamp: i64) -> Self {
        self.generation_stamp = generation_stamp;
        self
    }

    pub fn with_files_under_construction(mut self, files: Vec<FileUnderConstruction>) -> Self {
        self.files_under_construction = files;
        self
    }
}

impl NamespaceSource for FakeNamespaceSource {
    fn root(&self) -> DirNode {
        self.root.clone()
    }

    fn generation_stamp(&self) -> i64 {
        self.generation_stamp
    }

    fn files_under_construction(&self) -> Vec<FileUnderConstruction> {
        self.files_under_construction.clone()
    }
}

/// Records every call it receives instead of maintaining a real append-only
/// log, so tests can assert on the sequence of operations the engine drove.
pub struct FakeEditJournal {
    open: Mutex<bool>,
    pub calls: Mutex<Vec<String>>,
    pub records_per_load: u64,
    pub replication_clamp: Option<i16>,
}

impl FakeEditJournal {
    pub fn new() -> Self {
        FakeEditJournal {
            open: Mutex::new(false),
            calls: Mutex::new(Vec::new()),
            records_per_load: 0,
            replication_clamp: None,
        }
    }

    pub fn with_records_per_load(mut self, count: u64) -> Self {
        self.records_per_load = count;
        self
    }

    pub fn is_open(&self) -> bool {
        *self.open.lock().unwrap()
    }

    pub fn call_log(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }
}

impl Default for FakeEditJournal {
    fn default() -> Self {
        Self::new()
    }
}

impl EditJournal for FakeEditJournal {
    fn open(&mut self) -> io::Result<()> {
        self.record("open");
        *self.open.get_mut().unwrap() = true;
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.record("close");
        *self.open.get_mut().unwrap() = false;
        Ok(())
    }

    fn roll_edit_log(&mut self) -> io::Result<()> {
        self.record("roll_edit_log");
        Ok(())
    }

    fn purge_edit_log(&mut self) -> io::Result<()> {
        self.record("purge_edit_log");
        Ok(())
    }

    fn create_edit_log_file(&mut self, path: &Path) -> io::Result<()> {
        self.record(&format!("create_edit_log_file:{}", path.display()));
        Ok(())
    }

    fn load_edits(&mut self, reader: &mut dyn Read) -> io::Result<u64> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        self.record("load_edits");
        Ok(self.records_per_load)
    }

    fn exists_new(&self) -> bool {
        false
    }

    fn last_written_tx_id(&self) -> u64 {
        0
    }

    fn set_start_transaction_id(&mut self, tx_id: u64) {
        self.record(&format!("set_start_transaction_id:{tx_id}"));
    }

    fn adjust_replication(&self, replication: i16) -> i16 {
        self.replication_clamp.unwrap_or(replication)
    }

    fn process_io_error(&mut self, dir: &Path) {
        self.record(&format!("process_io_error:{}", dir.display()));
    }
}

/// No distributed upgrade ever pending, unless told otherwise.
pub struct FakeUpgradeManager {
    state: UpgradeState,
    version: Option<i32>,
}

impl FakeUpgradeManager {
    pub fn none() -> Self {
        FakeUpgradeManager { state: UpgradeState::None, version: None }
    }

    pub fn pending(version: i32) -> Self {
        FakeUpgradeManager { state: UpgradeState::Pending, version: Some(version) }
    }
}

impl UpgradeManager for FakeUpgradeManager {
    fn upgrade_state(&self) -> UpgradeState {
        self.state
    }

    fn upgrade_version(&self) -> Option<i32> {
        self.version
    }

    fn initialize_upgrade(&mut self) -> bool {
        let was_pending = matches!(self.state, UpgradeState::Pending);
        self.state = UpgradeState::InProgress;
        was_pending
    }
}

/// A single image-and-edits directory playing both roles (spec §8
/// "single_role_dir").
pub fn single_role_dir(root: &Path) -> PathBuf {
    root.to_path_buf()
}

/// Two directories each holding a single role: one image-only, one
/// edits-only (spec §8 "two_image_two_edits" layout family).
pub fn two_image_two_edits(root: &Path) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let image_a = root.join("image-a");
    let image_b = root.join("image-b");
    let edits_a = root.join("edits-a");
    let edits_b = root.join("edits-b");
    (vec![image_a, image_b], vec![edits_a, edits_b])
}
