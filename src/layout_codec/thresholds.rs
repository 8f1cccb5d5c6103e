//! Layout-version thresholds gating optional prefix and payload fields
//! (spec §4.2). More negative means newer; a field gated on "layout_version
//! <= THRESHOLD" was introduced at that generation and is present in every
//! later (more negative) layout.

/// `numFiles` in the prefix is `i64` at or below this layout, `i32` above it.
pub const NUM_FILES_I64_LAYOUT: i32 = -16;

/// The prefix carries `generationStamp` at or below this layout.
pub const GENERATION_STAMP_LAYOUT: i32 = -12;

/// The prefix carries `imageTxId` at or below this layout ("STORED_TXIDS").
pub const STORED_TXIDS_LAYOUT: i32 = -24;

/// Inode payloads carry `atime` at or below this layout.
pub const ATIME_LAYOUT: i32 = -17;

/// Inode payloads carry `preferredBlockSize` at or below this layout.
pub const PREFERRED_BLOCK_SIZE_LAYOUT: i32 = -8;

/// Inode payloads carry an explicit `permissionStatus` at or below this
/// layout; above it the namespace's default upgrade permission is
/// substituted on read (spec §4.2).
pub const PERMISSION_LAYOUT: i32 = -11;

/// The files-under-construction section is present at or below this layout.
pub const FILES_UNDER_CONSTRUCTION_LAYOUT: i32 = -13;

/// The body uses the local-name (preorder) form at or below this layout;
/// above it (less negative / older) it uses the full-path form.
pub const LOCAL_NAME_FORM_LAYOUT: i32 = -19;

/// The layout this crate writes. Most negative of all thresholds above so
/// every optional field is always present on save.
pub const CURRENT_LAYOUT_VERSION: i32 = -63;
