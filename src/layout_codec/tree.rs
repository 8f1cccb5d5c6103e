//! The namespace snapshot read model (spec §3) and its in-memory codec
//! counterpart — the tree the encoder walks and the decoder rebuilds.

/// A block reference within a file (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub block_id: i64,
    pub num_bytes: i64,
    pub generation_stamp: i64,
}

/// Sentinel substituted by the decoder for layouts that omit the
/// generation stamp (spec §4.2 inode payload).
pub const NO_GENERATION_STAMP: i64 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionStatus {
    pub user: String,
    pub group: String,
    pub mode: i16,
}

impl Default for PermissionStatus {
    fn default() -> Self {
        PermissionStatus {
            user: "root".to_string(),
            group: "supergroup".to_string(),
            mode: 0o755,
        }
    }
}

/// One node of the namespace tree: directory or file (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Directory(DirNode),
    File(FileNode),
}

impl Node {
    pub fn name(&self) -> &str {
        match self {
            Node::Directory(d) => &d.name,
            Node::File(f) => &f.name,
        }
    }

    pub fn mtime(&self) -> i64 {
        match self {
            Node::Directory(d) => d.mtime,
            Node::File(f) => f.mtime,
        }
    }

    pub fn permissions(&self) -> &PermissionStatus {
        match self {
            Node::Directory(d) => &d.permissions,
            Node::File(f) => &f.permissions,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirNode {
    pub name: String,
    pub children: Vec<Node>,
    pub ns_quota: i64,
    pub ds_quota: i64,
    pub mtime: i64,
    pub permissions: PermissionStatus,
}

impl DirNode {
    pub fn root() -> Self {
        DirNode {
            name: String::new(),
            children: Vec::new(),
            ns_quota: -1,
            ds_quota: -1,
            mtime: 0,
            permissions: PermissionStatus::default(),
        }
    }

    /// Count of this node plus every descendant, matching the `numFiles`
    /// prefix field the full-path form encodes (spec §4.2).
    pub fn count_nodes(&self) -> i64 {
        let mut total = 1i64;
        for child in &self.children {
            total += match child {
                Node::Directory(d) => d.count_nodes(),
                Node::File(_) => 1,
            };
        }
        total
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNode {
    pub name: String,
    pub replication: i16,
    pub mtime: i64,
    pub atime: i64,
    pub preferred_block_size: i64,
    pub blocks: Vec<BlockInfo>,
    pub permissions: PermissionStatus,
}

/// A file with an open writer, retained separately so client identity
/// survives checkpoint (spec §3, §4.2 files-under-construction).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUnderConstruction {
    pub path: String,
    pub replication: i16,
    pub mtime: i64,
    pub preferred_block_size: i64,
    pub blocks: Vec<BlockInfo>,
    pub permissions: PermissionStatus,
    pub client_name: String,
    pub client_machine: String,
}

/// The full read model a save walks: the rooted tree plus the
/// files-under-construction auxiliary set (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceImage {
    pub root: DirNode,
    pub generation_stamp: i64,
    pub files_under_construction: Vec<FileUnderConstruction>,
}
