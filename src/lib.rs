//! # fscheckpoint
//!
//! A crash-safe namespace checkpoint engine for a distributed file system
//! metadata server.
//!
//! The engine durably captures an in-memory namespace tree (directories,
//! files, block references) to a set of independent storage directories,
//! tolerates partial per-directory I/O failure, verifies every image with
//! a streamed cryptographic digest, and coordinates with an external edit
//! journal so that image-plus-journal always reconstructs the latest
//! committed state.
//!
//! # Components
//!
//! | Component | Module | Responsibility |
//! |-----------|--------|-----------------|
//! | StorageSet | [`storage_set`] | Storage directory lifecycle, roles, VERSION files |
//! | LayoutCodec | [`layout_codec`] | Bit-exact image serialization across layout versions |
//! | CheckpointEngine | [`checkpoint_engine`] | save / roll / rollback / upgrade / finalize / import |
//! | DigestPipeline | [`digest`] | Streaming 128-bit digest over image bytes |
//! | SaveContext | [`save_context`] | Per-save transaction id, cancellation, progress |
//!
//! The in-memory namespace tree, the edit journal, and the upgrade manager
//! are external collaborators; this crate only defines the trait boundary
//! it consumes them through ([`collaborators`]), and exercises that
//! boundary against fakes in its own test suite.

pub mod checkpoint_engine;
pub mod collaborators;
pub mod config;
pub mod digest;
pub mod error;
pub mod layout_codec;
pub mod save_context;
pub mod storage_set;
pub mod testing;

pub use checkpoint_engine::CheckpointEngine;
pub use config::CheckpointConfig;
pub use error::{CheckpointEngineError, Result};
pub use save_context::{CancelToken, SaveContext};
pub use storage_set::{DirectoryRole, StorageSet};
