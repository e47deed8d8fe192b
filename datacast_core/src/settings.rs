//! Tunables for hashing, copying and staging.

use crate::error::{Error, Result};
use crate::hash::{Algorithm, DEFAULT_BLOCK_SIZE};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default number of attempts for a flaky copy or digest.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default delay between attempts; multiplied by the attempt number.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Default number of digests kept in the in-memory cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 100;

/// Settings shared by the hasher, the transfer engine and the caster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Digest used for every verification.
    pub algorithm: Algorithm,
    /// Bytes read or written per block.
    pub block_size: usize,
    /// Attempts for copies and digests before giving up.
    pub retry_attempts: u32,
    /// Base backoff between attempts.
    pub retry_delay: Duration,
    /// Capacity of the digest cache.
    pub cache_capacity: usize,
    /// Where per-run staging directories are created. `None` means the
    /// system temporary directory.
    pub staging_base: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::default(),
            block_size: DEFAULT_BLOCK_SIZE,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            staging_base: None,
        }
    }
}

impl Settings {
    /// Read settings from a `key=value` file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::invalid_settings(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// Parse settings from `key=value` lines.
    ///
    /// Blank lines and lines starting with `#` are skipped. Keys not listed
    /// here are rejected so typos don't silently fall back to defaults:
    ///
    /// - `algorithm` = `blake3` | `md5`
    /// - `block_size` (bytes, > 0)
    /// - `retry_attempts` (>= 1)
    /// - `retry_delay_ms`
    /// - `cache_capacity`
    /// - `staging_dir`
    pub fn parse(content: &str) -> Result<Self> {
        let mut settings = Settings::default();

        for (number, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(Error::invalid_settings(format!(
                    "line {}: expected key=value, got '{}'",
                    number + 1,
                    line
                )));
            };
            let value = value.trim();

            match key.trim() {
                "algorithm" => settings.algorithm = Algorithm::parse(value)?,
                "block_size" => settings.block_size = parse_number(key, value)?,
                "retry_attempts" => settings.retry_attempts = parse_number(key, value)?,
                "retry_delay_ms" => {
                    settings.retry_delay = Duration::from_millis(parse_number(key, value)?)
                }
                "cache_capacity" => settings.cache_capacity = parse_number(key, value)?,
                "staging_dir" => settings.staging_base = Some(PathBuf::from(value)),
                other => {
                    return Err(Error::invalid_settings(format!(
                        "line {}: unknown key '{}'",
                        number + 1,
                        other
                    )));
                }
            }
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Reject values that would make hashing or retrying meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(Error::invalid_settings("block_size must be positive"));
        }
        if self.retry_attempts == 0 {
            return Err(Error::invalid_settings("retry_attempts must be at least 1"));
        }
        Ok(())
    }

    /// No backoff, small blocks.
    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self {
            block_size: 64,
            retry_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse::<T>().map_err(|_| {
        Error::invalid_settings(format!("{} expects a number, got '{}'", key.trim(), value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.algorithm, Algorithm::Blake3);
        assert_eq!(settings.block_size, 4 * 1024 * 1024);
        assert_eq!(settings.retry_attempts, 3);
        assert_eq!(settings.cache_capacity, 100);
    }

    #[test]
    fn test_parse_all_keys() {
        let content = "\
# transfer tuning
algorithm = md5
block_size=1024

retry_attempts=5
retry_delay_ms=250
cache_capacity=7
staging_dir=/scratch/staging
";
        let settings = Settings::parse(content).unwrap();
        assert_eq!(settings.algorithm, Algorithm::Md5);
        assert_eq!(settings.block_size, 1024);
        assert_eq!(settings.retry_attempts, 5);
        assert_eq!(settings.retry_delay, Duration::from_millis(250));
        assert_eq!(settings.cache_capacity, 7);
        assert_eq!(settings.staging_base, Some(PathBuf::from("/scratch/staging")));
    }

    #[test]
    fn test_parse_rejects_unknown_key() {
        let err = Settings::parse("blocksize=12").unwrap_err();
        assert!(err.to_string().contains("unknown key 'blocksize'"));
    }

    #[test]
    fn test_parse_rejects_bad_values() {
        assert!(Settings::parse("block_size=lots").is_err());
        assert!(Settings::parse("block_size=0").is_err());
        assert!(Settings::parse("retry_attempts=0").is_err());
        assert!(Settings::parse("algorithm=sha1").is_err());
        assert!(Settings::parse("just a line").is_err());
    }

    #[test]
    fn test_from_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("datacast.conf");
        fs::write(&path, "algorithm=md5\n").unwrap();
        let settings = Settings::from_file(&path).unwrap();
        assert_eq!(settings.algorithm, Algorithm::Md5);

        assert!(Settings::from_file(&temp_dir.path().join("missing")).is_err());
    }
}
