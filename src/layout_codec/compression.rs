//! Compression codec registry (spec §6, §9 "Runtime reflection / dynamic
//! codec lookup"). Replaces dynamic class lookup with an explicit registry
//! mapping `codecName -> Codec`, populated at startup; an unknown codec on
//! load is a hard error.

use std::collections::HashMap;
use std::io::{self, Read, Write};

/// A registered (de)compression codec, named the way it is recorded in the
/// image prefix's `codecName` field.
pub trait Codec: Send + Sync {
    fn name(&self) -> &'static str;
    fn wrap_writer<'a>(&self, w: Box<dyn Write + 'a>) -> Box<dyn Write + 'a>;
    fn wrap_reader<'a>(&self, r: Box<dyn Read + 'a>) -> Box<dyn Read + 'a>;
}

/// `zstd`, the only compression codec this crate registers (spec §6
/// `dfs.image.compression.codec`; ambient: the teacher's own archive
/// writer reaches for `zstd` wherever it compresses on-disk artifacts).
pub struct ZstdCodec {
    pub level: i32,
}

impl Default for ZstdCodec {
    fn default() -> Self {
        ZstdCodec { level: 3 }
    }
}

impl Codec for ZstdCodec {
    fn name(&self) -> &'static str {
        "zstd"
    }

    fn wrap_writer<'a>(&self, w: Box<dyn Write + 'a>) -> Box<dyn Write + 'a> {
        Box::new(zstd::stream::write::Encoder::new(w, self.level).expect("zstd encoder init").auto_finish())
    }

    fn wrap_reader<'a>(&self, r: Box<dyn Read + 'a>) -> Box<dyn Read + 'a> {
        Box::new(zstd::stream::read::Decoder::new(r).expect("zstd decoder init"))
    }
}

/// The codec registry populated at startup (spec §9: explicit registry,
/// not runtime reflection).
pub struct CodecRegistry {
    codecs: HashMap<&'static str, Box<dyn Codec>>,
}

impl CodecRegistry {
    pub fn with_default_codecs() -> Self {
        let mut registry = CodecRegistry {
            codecs: HashMap::new(),
        };
        registry.register(Box::new(ZstdCodec::default()));
        registry
    }

    pub fn empty() -> Self {
        CodecRegistry {
            codecs: HashMap::new(),
        }
    }

    pub fn register(&mut self, codec: Box<dyn Codec>) {
        self.codecs.insert(codec.name(), codec);
    }

    pub fn get(&self, name: &str) -> io::Result<&dyn Codec> {
        self.codecs
            .get(name)
            .map(|c| c.as_ref())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, format!("unknown codec: {name}")))
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::with_default_codecs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zstd_round_trips() {
        let registry = CodecRegistry::with_default_codecs();
        let codec = registry.get("zstd").unwrap();

        let mut compressed = Vec::new();
        {
            let mut w = codec.wrap_writer(Box::new(&mut compressed));
            w.write_all(b"hello compressed namespace image").unwrap();
        }

        let mut decompressed = Vec::new();
        {
            let mut r = codec.wrap_reader(Box::new(&compressed[..]));
            r.read_to_end(&mut decompressed).unwrap();
        }
        assert_eq!(decompressed, b"hello compressed namespace image");
    }

    #[test]
    fn unknown_codec_is_an_error() {
        let registry = CodecRegistry::with_default_codecs();
        assert!(registry.get("made-up-codec").is_err());
    }
}
