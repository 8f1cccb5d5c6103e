//! Crate-wide error type.
//!
//! Every component defines its own narrow error enum (see
//! [`crate::storage_set::StorageSetError`], [`crate::digest::DigestError`],
//! [`crate::save_context::SaveContextError`], [`crate::layout_codec::LayoutCodecError`]);
//! [`CheckpointEngineError`] is the type callers of [`crate::checkpoint_engine::CheckpointEngine`]
//! actually see. Its variants are the seven error kinds the engine
//! distinguishes operationally, not a parallel type hierarchy — component
//! errors compose into the variant that matches how the engine reacts to
//! them (evict-and-continue, halt, or propagate-to-caller).

use std::path::PathBuf;

use crate::digest::DigestError;
use crate::layout_codec::LayoutCodecError;
use crate::save_context::SaveContextError;
use crate::storage_set::StorageSetError;

pub type Result<T> = std::result::Result<T, CheckpointEngineError>;

#[derive(Debug, thiserror::Error)]
pub enum CheckpointEngineError {
    /// A directory is present but its contents are inconsistent with the
    /// rest of the active storage set (e.g. fstime disagreement with no
    /// single-role image/edits exception applying).
    #[error("inconsistent storage state: {0}")]
    InconsistentFsState(String),

    /// Startup requires a prior `format()`; the mode in force does not
    /// create state implicitly.
    #[error("storage not formatted: {0}")]
    NotFormatted(String),

    /// Digest mismatch, truncation, or malformed layout. The directory
    /// that produced it is evicted by the caller.
    #[error("image corrupt in {path}: {detail}")]
    ImageCorrupt {
        path: PathBuf,
        detail: String,
        #[source]
        source: Option<LayoutCodecError>,
    },

    /// Transient per-directory failure during save/roll. Non-fatal unless
    /// it empties the active set.
    #[error("directory I/O error on {path}: {source}")]
    DirectoryIoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Every directory was evicted by a prior `DirectoryIoError` and the
    /// active set is now empty.
    #[error("active storage set is empty after evicting: {0:?}")]
    ActiveSetDepleted(Vec<PathBuf>),

    /// A save was cancelled cooperatively; the caller's cancellation
    /// reason is carried through.
    #[error("checkpoint cancelled: {0}")]
    CheckpointCancelled(String),

    /// `rollEditLog`/`validateCheckpointUpload`/`checkpointUploadDone`/`rollFSImage`
    /// called out of `CheckpointState` order.
    #[error("protocol ordering violation: {0}")]
    ProtocolOrdering(String),

    /// Startup layout is older than a pending distributed upgrade demands.
    #[error("upgrade required: current layout {current} older than target {target}")]
    UpgradeRequired { current: i32, target: i32 },

    /// An upgrade is already in flight; a second one was requested.
    #[error("upgrade already in progress")]
    UpgradeInProgress,

    #[error(transparent)]
    StorageSet(#[from] StorageSetError),

    #[error(transparent)]
    Digest(#[from] DigestError),

    #[error(transparent)]
    SaveContext(#[from] SaveContextError),

    #[error(transparent)]
    Codec(#[from] LayoutCodecError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
