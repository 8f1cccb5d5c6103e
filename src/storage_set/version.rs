//! The `VERSION` properties file and the `StorageInfo` it encodes.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::digest::ImageDigest;

use super::StorageSetError;

/// Layout at or below this value requires `imageMD5Digest` to be present
/// in `VERSION` (spec §3, ImageDigest).
pub const DIGEST_REQUIRED_LAYOUT_VERSION: i32 = -26;

/// The tuple identifying a namespace's on-disk generation (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageInfo {
    /// Negative, monotonic in generation: more negative is newer.
    pub layout_version: i32,
    /// Generated once at format time, uniform across all directories.
    pub namespace_id: i32,
    /// Changes only on upgrade.
    pub c_time: i64,
}

/// Distributed upgrade bookkeeping persisted alongside `StorageInfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DistributedUpgradeStatus {
    pub state: bool,
    pub version: Option<i32>,
}

/// The fully parsed contents of a `VERSION` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionFile {
    pub info: StorageInfo,
    pub upgrade: DistributedUpgradeStatus,
    pub image_digest: Option<ImageDigest>,
}

const STORAGE_TYPE: &str = "NAME_NODE";

impl VersionFile {
    pub fn new(info: StorageInfo) -> Self {
        VersionFile {
            info,
            upgrade: DistributedUpgradeStatus::default(),
            image_digest: None,
        }
    }

    pub fn with_digest(mut self, digest: ImageDigest) -> Self {
        self.image_digest = Some(digest);
        self
    }

    fn digest_required(&self) -> bool {
        self.info.layout_version <= DIGEST_REQUIRED_LAYOUT_VERSION
    }

    /// Validate the invariant from spec §3/§4.1: digest required by layout
    /// version must be present; a digest predating its introduction is a
    /// format error rather than silently ignored.
    pub fn validate(&self) -> Result<(), StorageSetError> {
        if self.digest_required() && self.image_digest.is_none() {
            return Err(StorageSetError::MissingRequiredDigest {
                layout_version: self.info.layout_version,
            });
        }
        if !self.digest_required() && self.image_digest.is_some() {
            return Err(StorageSetError::DigestPredatesLayout {
                layout_version: self.info.layout_version,
            });
        }
        Ok(())
    }

    /// Serialize as the properties-file text format from spec §6.
    pub fn to_properties(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("layoutVersion={}\n", self.info.layout_version));
        out.push_str(&format!("namespaceID={}\n", self.info.namespace_id));
        out.push_str(&format!("cTime={}\n", self.info.c_time));
        out.push_str(&format!("storageType={}\n", STORAGE_TYPE));
        if self.upgrade.state {
            out.push_str("distributedUpgradeState=true\n");
            if let Some(v) = self.upgrade.version {
                out.push_str(&format!("distributedUpgradeVersion={}\n", v));
            }
        }
        if let Some(digest) = &self.image_digest {
            out.push_str(&format!("imageMD5Digest={}\n", digest.to_hex()));
        }
        out
    }

    pub fn parse(text: &str) -> Result<Self, StorageSetError> {
        let mut props: HashMap<&str, &str> = HashMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((k, v)) = line.split_once('=') {
                props.insert(k.trim(), v.trim());
            }
        }

        let layout_version = props
            .get("layoutVersion")
            .ok_or(StorageSetError::MalformedVersionFile("missing layoutVersion"))?
            .parse::<i32>()
            .map_err(|_| StorageSetError::MalformedVersionFile("layoutVersion not an integer"))?;
        let namespace_id = props
            .get("namespaceID")
            .ok_or(StorageSetError::MalformedVersionFile("missing namespaceID"))?
            .parse::<i32>()
            .map_err(|_| StorageSetError::MalformedVersionFile("namespaceID not an integer"))?;
        let c_time = props
            .get("cTime")
            .ok_or(StorageSetError::MalformedVersionFile("missing cTime"))?
            .parse::<i64>()
            .map_err(|_| StorageSetError::MalformedVersionFile("cTime not an integer"))?;

        let upgrade = DistributedUpgradeStatus {
            state: props.get("distributedUpgradeState").copied() == Some("true"),
            version: props
                .get("distributedUpgradeVersion")
                .and_then(|v| v.parse::<i32>().ok()),
        };

        let image_digest = match props.get("imageMD5Digest") {
            Some(hex) => Some(
                ImageDigest::from_hex(hex)
                    .map_err(|_| StorageSetError::MalformedVersionFile("imageMD5Digest not valid hex"))?,
            ),
            None => None,
        };

        let version = VersionFile {
            info: StorageInfo {
                layout_version,
                namespace_id,
                c_time,
            },
            upgrade,
            image_digest,
        };
        version.validate()?;
        Ok(version)
    }

    /// Write the VERSION file. Callers are responsible for writing this
    /// *after* every other file in the directory is durable (spec §3, §4.1
    /// `writeVersion`): this function only performs the write-fsync for
    /// this one file, not the whole-directory ordering.
    pub fn write_to_file(&self, path: &Path) -> std::io::Result<()> {
        let mut file = fs::File::create(path)?;
        file.write_all(self.to_properties().as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    pub fn read_from_file(path: &Path) -> Result<Self, StorageSetError> {
        let text = fs::read_to_string(path).map_err(StorageSetError::Io)?;
        Self::parse(&text)
    }
}
