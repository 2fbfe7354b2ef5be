use crate::SchemaError;
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::io::{self, Read};
use std::path::PathBuf;

pub const SHA256: &str = "sha256";
pub const SHA512: &str = "sha512";

/// A content digest in `algorithm:hex` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    algorithm: String,
    encoded: String,
}

impl Digest {
    pub fn parse(s: &str) -> Result<Self, SchemaError> {
        let (algorithm, encoded) = s
            .split_once(':')
            .ok_or_else(|| SchemaError::InvalidDigest(s.to_owned()))?;

        let expected_len = match algorithm {
            SHA256 => 64,
            SHA512 => 128,
            other => return Err(SchemaError::UnsupportedAlgorithm(other.to_owned())),
        };
        if encoded.len() != expected_len
            || !encoded
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(SchemaError::InvalidDigest(s.to_owned()));
        }

        Ok(Self {
            algorithm: algorithm.to_owned(),
            encoded: encoded.to_owned(),
        })
    }

    /// sha256 digest of `data`.
    pub fn sha256(data: &[u8]) -> Self {
        Self {
            algorithm: SHA256.to_owned(),
            encoded: hex::encode(Sha256::digest(data)),
        }
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    /// Relative path of this digest inside an OCI layout: `blobs/<algorithm>/<hex>`.
    pub fn blob_path(&self) -> PathBuf {
        PathBuf::from("blobs")
            .join(&self.algorithm)
            .join(&self.encoded)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.encoded)
    }
}

/// Reader adapter that computes the sha256 digest and length of everything read through it.
pub struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
    bytes: u64,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes: 0,
        }
    }

    /// Consume the reader and return the digest of the bytes seen so far.
    pub fn finish(self) -> (Digest, u64) {
        let digest = Digest {
            algorithm: SHA256.to_owned(),
            encoded: hex::encode(self.hasher.finalize()),
        };
        (digest, self.bytes)
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str =
        "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn sha256_of_empty_input() {
        assert_eq!(Digest::sha256(b"").to_string(), EMPTY_SHA256);
    }

    #[test]
    fn parse_roundtrips_display() {
        let d = Digest::parse(EMPTY_SHA256).unwrap();
        assert_eq!(d.algorithm(), "sha256");
        assert_eq!(d.to_string(), EMPTY_SHA256);
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!(matches!(
            Digest::parse("e3b0c442"),
            Err(SchemaError::InvalidDigest(_))
        ));
        assert!(matches!(
            Digest::parse("md5:abcd"),
            Err(SchemaError::UnsupportedAlgorithm(_))
        ));
        assert!(Digest::parse("sha256:ABCDEF").is_err());
        assert!(Digest::parse(&format!("sha256:{}", "g".repeat(64))).is_err());
        assert!(Digest::parse(&format!("sha256:{}/../x", "a".repeat(58))).is_err());
    }

    #[test]
    fn blob_path_splits_algorithm_and_hex() {
        let d = Digest::parse(EMPTY_SHA256).unwrap();
        assert_eq!(
            d.blob_path(),
            PathBuf::from("blobs/sha256").join(&EMPTY_SHA256[7..])
        );
    }

    #[test]
    fn hashing_reader_matches_one_shot_digest() {
        let data = vec![7u8; 10_000];
        let mut reader = HashingReader::new(data.as_slice());
        let mut sink = Vec::new();
        reader.read_to_end(&mut sink).unwrap();
        let (digest, len) = reader.finish();
        assert_eq!(len, 10_000);
        assert_eq!(digest, Digest::sha256(&data));
    }
}
