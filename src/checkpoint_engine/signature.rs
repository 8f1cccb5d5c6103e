//! The roll protocol's state machine and the signature exchanged with the
//! secondary actor that merges edits into a new image (spec §4.3.4).

use crate::digest::ImageDigest;

/// Drives the upload-and-roll sequence (spec §3). Advances
/// `START -> ROLLED_EDITS -> UPLOAD_START -> UPLOAD_DONE -> START`; calling
/// a roll operation out of order is a [`crate::error::CheckpointEngineError::ProtocolOrdering`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointState {
    Start,
    RolledEdits,
    UploadStart,
    UploadDone,
}

/// Returned by `rollEditLog` and checked by `validateCheckpointUpload` and
/// `rollFSImage` (spec §4.3.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointSignature {
    pub namespace_id: i32,
    pub layout_version: i32,
    pub c_time: i64,
    pub fstime: i64,
    pub edits_mtime: i64,
    pub image_digest: Option<ImageDigest>,
}
