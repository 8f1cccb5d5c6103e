//! The engine that drives startup selection, `saveNamespace`, the upload
//! roll protocol, and upgrade/rollback/finalize/import (spec §4.3).

pub mod lifecycle;
pub mod roll;
pub mod save;
pub mod signature;
pub mod startup;

pub use save::SaveOutcome;
pub use signature::{CheckpointSignature, CheckpointState};

use crate::collaborators::{EditJournal, NamespaceSource, UpgradeManager};
use crate::config::CheckpointConfig;
use crate::digest::ImageDigest;
use crate::error::{CheckpointEngineError, Result};
use crate::layout_codec::compression::{Codec, CodecRegistry, ZstdCodec};
use crate::layout_codec::{NamespaceImage, PermissionStatus, LAYOUT_VERSION};
use crate::save_context::{CancelToken, SaveContext};
use crate::storage_set::{StartupMode, StorageSet};

/// Ties `StorageSet`, `LayoutCodec`, `DigestPipeline`, and the three
/// external collaborators into the single object a caller drives (spec
/// §4.3, §4.6, §9 `&mut self` single-caller-lock decision).
pub struct CheckpointEngine {
    storage: StorageSet,
    config: CheckpointConfig,
    namespace: Box<dyn NamespaceSource>,
    journal: Box<dyn EditJournal>,
    upgrade_manager: Box<dyn UpgradeManager>,
    default_permissions: PermissionStatus,

    namespace_id: i32,
    layout_version: i32,
    c_time: i64,
    fstime: i64,
    image_tx_id: u64,
    image_digest: Option<ImageDigest>,
    checkpoint_state: CheckpointState,
    last_signature: Option<CheckpointSignature>,
}

impl CheckpointEngine {
    /// Configure a fresh engine and classify every storage directory.
    /// `mode` governs whether a missing directory is fatal (spec §4.1
    /// `analyzeAndRecover`).
    pub fn configure(
        image_dirs: &[std::path::PathBuf],
        edits_dirs: &[std::path::PathBuf],
        config: CheckpointConfig,
        namespace: Box<dyn NamespaceSource>,
        journal: Box<dyn EditJournal>,
        upgrade_manager: Box<dyn UpgradeManager>,
        mode: StartupMode,
    ) -> Result<Self> {
        config.validate().map_err(|e| CheckpointEngineError::InconsistentFsState(e.to_string()))?;

        let mut storage = StorageSet::configure(image_dirs, edits_dirs)?;
        storage.analyze_and_recover(mode)?;

        Ok(CheckpointEngine {
            storage,
            config,
            namespace,
            journal,
            upgrade_manager,
            default_permissions: PermissionStatus::default(),
            namespace_id: 0,
            layout_version: LAYOUT_VERSION,
            c_time: 0,
            fstime: 0,
            image_tx_id: 0,
            image_digest: None,
            checkpoint_state: CheckpointState::Start,
            last_signature: None,
        })
    }

    pub fn storage(&self) -> &StorageSet {
        &self.storage
    }

    pub fn checkpoint_state(&self) -> CheckpointState {
        self.checkpoint_state
    }

    pub fn layout_version(&self) -> i32 {
        self.layout_version
    }

    pub fn fstime(&self) -> i64 {
        self.fstime
    }

    pub fn image_digest(&self) -> Option<ImageDigest> {
        self.image_digest
    }

    fn codec(&self) -> Result<Option<ZstdCodec>> {
        if !self.config.compress {
            return Ok(None);
        }
        let name = self
            .config
            .compression_codec
            .as_deref()
            .ok_or_else(|| CheckpointEngineError::InconsistentFsState("compression enabled without a codec name".into()))?;
        if name != "zstd" {
            return Err(CheckpointEngineError::Codec(crate::layout_codec::LayoutCodecError::UnknownCodec(
                name.to_string(),
            )));
        }
        Ok(Some(ZstdCodec::default()))
    }

    /// Format every active directory with an empty, versioned `current/`
    /// (spec §4.1 `format`). Used the first time a fresh installation is
    /// brought up.
    pub fn format(&mut self, namespace_id: i32, c_time: i64) -> Result<()> {
        self.storage.format_all()?;
        for dir in self.storage.active_dirs() {
            let info = crate::storage_set::StorageInfo { layout_version: LAYOUT_VERSION, namespace_id, c_time };
            self.storage.write_version(dir, &crate::storage_set::VersionFile::new(info))?;
        }
        self.namespace_id = namespace_id;
        self.c_time = c_time;
        self.layout_version = LAYOUT_VERSION;
        Ok(())
    }

    /// Run startup selection, interrupted-checkpoint recovery, and image
    /// load (spec §4.3.1, §4.3.2). Returns whether a save is now required.
    pub fn load(&mut self) -> Result<bool> {
        let selection = startup::select_startup_dirs(&self.storage)?;
        let image_root = selection.image_dir.root().to_path_buf();
        let edits_root = selection.edits_dir.root().to_path_buf();
        let mut needs_save = selection.needs_save;
        let mut fstime = selection.fstime;

        let image_dir_ref = self.storage.active_dirs().iter().find(|d| d.root() == image_root).unwrap();
        let edits_dir_ref = self.storage.active_dirs().iter().find(|d| d.root() == edits_root).unwrap();
        if startup::recover_interrupted_checkpoint(image_dir_ref, edits_dir_ref)? {
            needs_save = true;
        }

        let version = self.storage.load_version(image_dir_ref)?;
        self.namespace_id = version.info.namespace_id;
        self.layout_version = version.info.layout_version;
        self.c_time = version.info.c_time;
        self.image_digest = version.image_digest;

        if self.layout_version < LAYOUT_VERSION {
            needs_save = true;
        }

        let loaded = startup::load_image(
            image_dir_ref,
            edits_dir_ref,
            self.journal.as_mut(),
            &self.default_permissions,
            self.image_digest,
        )?;

        if startup::needs_save_from_edit_volume(&self.config, edits_dir_ref, fstime, loaded.edit_records_loaded) {
            needs_save = true;
        }

        self.image_tx_id = loaded.prefix.image_tx_id as u64;
        self.journal.set_start_transaction_id(self.image_tx_id + 1);
        self.fstime = fstime;

        let _ = loaded.image;
        Ok(needs_save || self.config.save_on_start)
    }

    /// Run the full `saveNamespace` protocol (spec §4.3.3), uncancellable:
    /// equivalent to [`Self::save_namespace_cancellable`] with a token
    /// nobody else holds a handle to.
    pub fn save_namespace(&mut self) -> Result<SaveOutcome> {
        self.save_namespace_cancellable(CancelToken::new())
    }

    /// Run `saveNamespace` against a [`CancelToken`] the caller created (and
    /// kept a clone of) before the call, so `token.cancel(reason)` can be
    /// called from another thread while this thread is blocked inside this
    /// method (spec §5 `cancelSaveNamespace(reason)`). The engine's `&mut
    /// self` methods are otherwise single-threaded by construction (spec §9
    /// Open Question resolution), so the token — not `self` — is the only
    /// handle a concurrent caller can act through.
    pub fn save_namespace_cancellable(&mut self, token: CancelToken) -> Result<SaveOutcome> {
        let image = self.namespace.root();
        let namespace_image = NamespaceImage {
            root: image,
            generation_stamp: self.namespace.generation_stamp(),
            files_under_construction: self.namespace.files_under_construction(),
        };
        let ctx = SaveContext::with_token(self.image_tx_id, token);
        let codec = self.codec()?;
        let codec_ref: Option<&dyn Codec> = codec.as_ref().map(|c| c as &dyn Codec);

        let outcome = save::save_namespace(
            &mut self.storage,
            self.journal.as_mut(),
            &namespace_image,
            self.namespace_id,
            self.layout_version,
            self.c_time,
            codec_ref,
            &ctx,
        )?;

        self.fstime = outcome.fstime;
        self.image_tx_id += 1;
        self.checkpoint_state = CheckpointState::UploadDone;
        Ok(outcome)
    }

    /// Seal `current/edits`, open a fresh `edits.new`, and advance to
    /// `ROLLED_EDITS`, returning a signature the secondary actor carries
    /// through the rest of the upload protocol (spec §4.3.4 `rollEditLog`).
    pub fn roll_edit_log(&mut self) -> Result<CheckpointSignature> {
        let sig = roll::roll_edit_log(
            &mut self.storage,
            &mut self.checkpoint_state,
            self.namespace_id,
            self.layout_version,
            self.c_time,
            self.fstime,
        )?;
        self.last_signature = Some(sig.clone());
        Ok(sig)
    }

    pub fn validate_checkpoint_upload(&mut self, offered: &CheckpointSignature) -> Result<()> {
        let expected = self
            .last_signature
            .clone()
            .ok_or_else(|| CheckpointEngineError::ProtocolOrdering("no signature issued by rollEditLog yet".into()))?;
        roll::validate_checkpoint_upload(&mut self.checkpoint_state, &expected, offered)
    }

    pub fn checkpoint_upload_done(&mut self, digest: ImageDigest) -> Result<()> {
        let mut recorded = self.image_digest;
        roll::checkpoint_upload_done(&mut self.checkpoint_state, &mut recorded, digest)?;
        self.image_digest = recorded;
        if let Some(sig) = &mut self.last_signature {
            sig.image_digest = Some(digest);
        }
        Ok(())
    }

    pub fn roll_fs_image(&mut self) -> Result<()> {
        let signature = self
            .last_signature
            .clone()
            .ok_or_else(|| CheckpointEngineError::ProtocolOrdering("no signature to roll".into()))?;
        roll::roll_fs_image(
            &mut self.storage,
            self.journal.as_mut(),
            &mut self.checkpoint_state,
            self.image_digest,
            &signature,
            &mut self.layout_version,
            &mut self.fstime,
            &mut self.image_digest,
        )
    }

    /// Upgrade every directory to the layout this binary writes (spec
    /// §4.3.5 `upgrade`).
    pub fn upgrade(&mut self, new_c_time: i64) -> Result<()> {
        if matches!(self.upgrade_manager.upgrade_state(), crate::collaborators::UpgradeState::InProgress) {
            return Err(CheckpointEngineError::UpgradeInProgress);
        }
        let codec = self.codec()?;
        let codec_ref: Option<&dyn Codec> = codec.as_ref().map(|c| c as &dyn Codec);
        self.image_tx_id += 1;
        lifecycle::upgrade(
            &mut self.storage,
            self.namespace.as_ref(),
            self.namespace_id,
            LAYOUT_VERSION,
            new_c_time,
            self.image_tx_id as i64,
            codec_ref,
        )?;
        self.layout_version = LAYOUT_VERSION;
        self.c_time = new_c_time;
        self.upgrade_manager.initialize_upgrade();
        Ok(())
    }

    pub fn rollback(&mut self) -> Result<()> {
        lifecycle::rollback(&mut self.storage)
    }

    pub fn finalize(&mut self) -> Result<()> {
        lifecycle::finalize(&mut self.storage)
    }

    /// Import an externally produced checkpoint (spec §4.3.5 `import`).
    pub fn import(&mut self, external_image_dir: &std::path::Path) -> Result<()> {
        let codec = self.codec()?;
        let codec_ref: Option<&dyn Codec> = codec.as_ref().map(|c| c as &dyn Codec);
        let ctx = SaveContext::new(self.image_tx_id);
        lifecycle::import(
            &mut self.storage,
            self.journal.as_mut(),
            external_image_dir,
            &self.default_permissions,
            self.namespace_id,
            self.layout_version,
            self.c_time,
            codec_ref,
            &ctx,
        )
    }

    /// Default codec registry this engine loads images against (spec §9).
    pub fn codec_registry() -> CodecRegistry {
        CodecRegistry::with_default_codecs()
    }
}
