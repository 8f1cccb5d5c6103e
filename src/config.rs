//! Checkpoint configuration (spec §6 "Configuration"), patterned on the
//! teacher's `DatabaseConfig`: typed fields, a builder, and a `.validate()`
//! that rejects combinations the engine can't act on.

use std::time::Duration;

use crate::layout_codec::compression::CodecRegistry;

/// Recognized configuration keys from spec §6, exposed as typed fields.
#[derive(Debug, Clone)]
pub struct CheckpointConfig {
    /// `dfs.image.compress`
    pub compress: bool,
    /// `dfs.image.compression.codec`; required if `compress` is set.
    pub compression_codec: Option<String>,
    /// `dfs.image.save.on.start`
    pub save_on_start: bool,
    /// `dfs.image.transfer.bandwidthPerSec`
    pub transfer_bandwidth_per_sec: Option<u64>,
    /// `fs.checkpoint.period`
    pub checkpoint_period: Duration,
    /// `fs.checkpoint.size`
    pub checkpoint_size_bytes: u64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        CheckpointConfig {
            compress: false,
            compression_codec: None,
            save_on_start: false,
            transfer_bandwidth_per_sec: None,
            checkpoint_period: Duration::from_secs(3600),
            checkpoint_size_bytes: 4 * 1024 * 1024,
        }
    }
}

impl CheckpointConfig {
    /// Short period and size so tests don't wait on real clocks or grow
    /// large namespaces to trigger a size-based checkpoint.
    pub fn for_testing() -> Self {
        CheckpointConfig {
            checkpoint_period: Duration::from_millis(50),
            checkpoint_size_bytes: 1024,
            ..Default::default()
        }
    }

    pub fn with_compression(mut self, codec_name: impl Into<String>) -> Self {
        self.compress = true;
        self.compression_codec = Some(codec_name.into());
        self
    }

    pub fn with_save_on_start(mut self, save_on_start: bool) -> Self {
        self.save_on_start = save_on_start;
        self
    }

    pub fn with_checkpoint_period(mut self, period: Duration) -> Self {
        self.checkpoint_period = period;
        self
    }

    pub fn with_checkpoint_size_bytes(mut self, size: u64) -> Self {
        self.checkpoint_size_bytes = size;
        self
    }

    /// Validate field combinations and that a named compression codec is
    /// actually registered.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.compress {
            let name = self
                .compression_codec
                .as_deref()
                .ok_or(ConfigError::MissingCompressionCodec)?;
            let registry = CodecRegistry::with_default_codecs();
            registry
                .get(name)
                .map_err(|_| ConfigError::UnknownCodec(name.to_string()))?;
        } else if self.compression_codec.is_some() {
            return Err(ConfigError::CodecWithoutCompression);
        }

        if self.checkpoint_size_bytes == 0 {
            return Err(ConfigError::ZeroCheckpointSize);
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("dfs.image.compress is set but no compression codec was named")]
    MissingCompressionCodec,

    #[error("a compression codec is configured but dfs.image.compress is false")]
    CodecWithoutCompression,

    #[error("unknown compression codec: {0}")]
    UnknownCodec(String),

    #[error("fs.checkpoint.size must be nonzero")]
    ZeroCheckpointSize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = CheckpointConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.compress);
        assert_eq!(config.checkpoint_period, Duration::from_secs(3600));
    }

    #[test]
    fn for_testing_uses_short_period_and_size() {
        let config = CheckpointConfig::for_testing();
        assert!(config.validate().is_ok());
        assert!(config.checkpoint_period < Duration::from_secs(1));
        assert!(config.checkpoint_size_bytes < 4 * 1024 * 1024);
    }

    #[test]
    fn compress_without_codec_is_rejected() {
        let mut config = CheckpointConfig::default();
        config.compress = true;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingCompressionCodec)
        ));
    }

    #[test]
    fn codec_without_compress_is_rejected() {
        let config = CheckpointConfig::default().with_compression("zstd").with_save_on_start(false);
        let mut config = config;
        config.compress = false;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::CodecWithoutCompression)
        ));
    }

    #[test]
    fn unknown_codec_name_is_rejected() {
        let config = CheckpointConfig::default().with_compression("made-up");
        assert!(matches!(config.validate(), Err(ConfigError::UnknownCodec(_))));
    }

    #[test]
    fn known_codec_name_validates() {
        let config = CheckpointConfig::default().with_compression("zstd");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_checkpoint_size_is_rejected() {
        let config = CheckpointConfig::default().with_checkpoint_size_bytes(0);
        assert!(matches!(config.validate(), Err(ConfigError::ZeroCheckpointSize)));
    }
}
