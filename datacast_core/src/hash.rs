//! Content digests using BLAKE3 or MD5.

use crate::error::{Error, Result};
use std::fmt;
use std::io::Read;
use std::path::Path;

/// Default read/write block size (4 MiB).
pub const DEFAULT_BLOCK_SIZE: usize = 4 * 1024 * 1024;

/// Supported digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Algorithm {
    /// BLAKE3 with 256-bit output.
    #[default]
    Blake3,
    /// MD5 with 128-bit output. Integrity only, not for security.
    Md5,
}

impl Algorithm {
    /// Returns the string representation of the algorithm (for settings files).
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Blake3 => "blake3",
            Algorithm::Md5 => "md5",
        }
    }

    /// Parse algorithm from string.
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "blake3" | "blake3-256" => Ok(Algorithm::Blake3),
            "md5" => Ok(Algorithm::Md5),
            _ => Err(Error::unsupported_algorithm(s)),
        }
    }

    /// Digest size in bytes.
    pub fn digest_len(&self) -> usize {
        match self {
            Algorithm::Blake3 => 32,
            Algorithm::Md5 => 16,
        }
    }

    /// Start an incremental digest computation.
    pub fn start(&self) -> DigestState {
        match self {
            Algorithm::Blake3 => DigestState::Blake3(Box::new(blake3::Hasher::new())),
            Algorithm::Md5 => DigestState::Md5(md5::Context::new()),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Running digest state, fed block by block.
pub enum DigestState {
    Blake3(Box<blake3::Hasher>),
    Md5(md5::Context),
}

impl DigestState {
    /// Feed more bytes into the digest.
    pub fn update(&mut self, data: &[u8]) {
        match self {
            DigestState::Blake3(hasher) => {
                hasher.update(data);
            }
            DigestState::Md5(context) => context.consume(data),
        }
    }

    /// Finish the computation.
    pub fn finalize(self) -> Digest {
        match self {
            DigestState::Blake3(hasher) => Digest {
                algorithm: Algorithm::Blake3,
                bytes: hasher.finalize().as_bytes().to_vec(),
            },
            DigestState::Md5(context) => Digest {
                algorithm: Algorithm::Md5,
                bytes: context.compute().0.to_vec(),
            },
        }
    }
}

/// A content digest tagged with the algorithm that produced it.
///
/// Digests produced by different algorithms never compare equal.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    algorithm: Algorithm,
    bytes: Vec<u8>,
}

impl Digest {
    /// Create a Digest from a hex string.
    pub fn from_hex(algorithm: Algorithm, hex_str: &str) -> Result<Self> {
        let expected = algorithm.digest_len() * 2;
        if hex_str.len() != expected {
            return Err(Error::invalid_digest(format!(
                "Expected {} hex characters for {}, got {}",
                expected,
                algorithm,
                hex_str.len()
            )));
        }

        let bytes = hex::decode(hex_str)
            .map_err(|e| Error::invalid_digest(format!("Invalid hex: {}", e)))?;

        Ok(Digest { algorithm, bytes })
    }

    /// Convert to lowercase hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    /// The algorithm that produced this digest.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Digest raw bytes.
    pub fn of_bytes(algorithm: Algorithm, data: &[u8]) -> Self {
        let mut state = algorithm.start();
        state.update(data);
        state.finalize()
    }

    /// Digest everything a reader yields, `block_size` bytes at a time.
    pub fn of_reader<R: Read>(
        algorithm: Algorithm,
        mut reader: R,
        block_size: usize,
    ) -> std::io::Result<Self> {
        let mut state = algorithm.start();
        let mut buffer = vec![0u8; block_size.max(1)];
        loop {
            let read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            state.update(&buffer[..read]);
        }
        Ok(state.finalize())
    }

    /// Digest a file without any caching or retrying.
    pub fn of_file(algorithm: Algorithm, path: &Path, block_size: usize) -> std::io::Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::of_reader(algorithm, file, block_size)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({}:{})", self.algorithm, self.to_hex())
    }
}

impl serde::Serialize for Digest {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}
