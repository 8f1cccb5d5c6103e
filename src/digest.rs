//! Streaming 128-bit digest over image bytes (spec §4.4 DigestPipeline).
//!
//! The pipeline never buffers a whole image in memory: [`DigestWriter`] and
//! [`DigestReader`] accumulate the hash incrementally as bytes pass through,
//! the same way the teacher streams CRC32 through `crc32fast::Hasher` in its
//! own snapshot writer rather than hashing a fully materialized buffer.

use std::fmt;
use std::io::{self, Read, Write};

use md5::{Digest, Md5};

/// A 128-bit MD5 digest of an image's body bytes (below the version header).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageDigest([u8; 16]);

impl ImageDigest {
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        ImageDigest(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    pub fn from_hex(hex: &str) -> Result<Self, DigestError> {
        if hex.len() != 32 {
            return Err(DigestError::MalformedHex);
        }
        let mut out = [0u8; 16];
        for i in 0..16 {
            out[i] = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|_| DigestError::MalformedHex)?;
        }
        Ok(ImageDigest(out))
    }
}

impl fmt::Debug for ImageDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ImageDigest({})", self.to_hex())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    #[error("malformed digest hex string")]
    MalformedHex,

    /// Spec §3 ImageDigest / §4.4: the digest loaded from `VERSION` does not
    /// match the hash of the bytes actually read.
    #[error("digest mismatch reading {path}: expected {expected}, computed {computed}")]
    Mismatch {
        path: std::path::PathBuf,
        expected: String,
        computed: String,
    },
}

/// Wraps a `Write` sink, hashing every byte written through it.
///
/// Call [`DigestWriter::finish`] once the sink is fully flushed to obtain
/// the final digest, per `setImageDigest(finalHash)` in spec §4.4.
pub struct DigestWriter<W> {
    inner: W,
    hasher: Md5,
}

impl<W: Write> DigestWriter<W> {
    pub fn new(inner: W) -> Self {
        DigestWriter {
            inner,
            hasher: Md5::new(),
        }
    }

    pub fn finish(self) -> (W, ImageDigest) {
        let bytes: [u8; 16] = self.hasher.finalize().into();
        (self.inner, ImageDigest::from_bytes(bytes))
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Wraps a `Read` source, hashing every byte read through it.
///
/// On load, the accumulated hash is compared against the digest recorded in
/// `VERSION` by [`verify_against`](DigestReader::verify_against). When no
/// prior digest exists (first read after upgrade, spec §4.4), the caller
/// adopts the computed hash instead of verifying.
pub struct DigestReader<R> {
    inner: R,
    hasher: Md5,
}

impl<R: Read> DigestReader<R> {
    pub fn new(inner: R) -> Self {
        DigestReader {
            inner,
            hasher: Md5::new(),
        }
    }

    pub fn digest_so_far(&self) -> ImageDigest {
        ImageDigest::from_bytes(self.hasher.clone().finalize().into())
    }

    pub fn finish(self) -> (R, ImageDigest) {
        let bytes: [u8; 16] = self.hasher.finalize().into();
        (self.inner, ImageDigest::from_bytes(bytes))
    }

    /// Compare the accumulated digest to `expected`, naming `path` in the
    /// error. Consumes self the same way `finish` does.
    pub fn verify_against(
        self,
        expected: ImageDigest,
        path: impl Into<std::path::PathBuf>,
    ) -> Result<R, DigestError> {
        let (inner, computed) = self.finish();
        if computed == expected {
            Ok(inner)
        } else {
            Err(DigestError::Mismatch {
                path: path.into(),
                expected: expected.to_hex(),
                computed: computed.to_hex(),
            })
        }
    }
}

impl<R: Read> Read for DigestReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_then_reader_agree_on_digest() {
        let mut buf = Vec::new();
        {
            let mut w = DigestWriter::new(&mut buf);
            w.write_all(b"hello namespace image").unwrap();
            let (_, digest) = w.finish();
            let mut r = DigestReader::new(&buf[..]);
            let mut sink = Vec::new();
            r.read_to_end(&mut sink).unwrap();
            let verified = r.verify_against(digest, "test-path");
            assert!(verified.is_ok());
        }
    }

    #[test]
    fn mismatch_is_rejected() {
        let data = b"some image bytes";
        let mut r = DigestReader::new(&data[..]);
        let mut sink = Vec::new();
        r.read_to_end(&mut sink).unwrap();
        let wrong = ImageDigest::from_bytes([0u8; 16]);
        let err = r.verify_against(wrong, "fsimage").unwrap_err();
        assert!(matches!(err, DigestError::Mismatch { .. }));
    }

    #[test]
    fn hex_round_trips() {
        let digest = ImageDigest::from_bytes([0xab; 16]);
        let hex = digest.to_hex();
        assert_eq!(hex.len(), 32);
        assert_eq!(ImageDigest::from_hex(&hex).unwrap(), digest);
    }

    #[test]
    fn malformed_hex_rejected() {
        assert!(matches!(
            ImageDigest::from_hex("not-hex"),
            Err(DigestError::MalformedHex)
        ));
    }
}
