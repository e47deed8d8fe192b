//! Verified placement of files at their target location.
//!
//! [`Transfer::commit`] is the only way anything is written below a target
//! root. A commit either leaves a target that is byte-identical to its
//! source or no target at all.

use crate::error::{Error, Result};
use crate::hash::Digest;
use crate::hasher::Hasher;
use crate::settings::Settings;
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::thread;
use tracing::{debug, warn};

/// Knobs for a single commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOptions {
    /// Compare digests when the target already exists. When false, an
    /// existing target of the right size is trusted as is.
    pub check_existing: bool,
    /// Delete the source after a successful commit.
    pub delete_staged: bool,
    /// Digest of the source, if the caller already knows it.
    pub known_digest: Option<Digest>,
}

impl Default for CommitOptions {
    fn default() -> Self {
        Self {
            check_existing: true,
            delete_staged: false,
            known_digest: None,
        }
    }
}

impl CommitOptions {
    pub fn check_existing(mut self, check: bool) -> Self {
        self.check_existing = check;
        self
    }

    pub fn delete_staged(mut self, delete: bool) -> Self {
        self.delete_staged = delete;
        self
    }

    pub fn known_digest(mut self, digest: Digest) -> Self {
        self.known_digest = Some(digest);
        self
    }
}

/// Counters accumulated over the commits of one engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransferStats {
    /// Targets written fresh.
    pub copied: u64,
    /// Existing targets found already correct.
    pub unchanged: u64,
    /// Existing targets deleted because their content differed.
    pub replaced: u64,
    /// Commits that failed verification.
    pub failed: u64,
    pub bytes_copied: u64,
}

/// Collision-safe, verified file placement.
#[derive(Debug)]
pub struct Transfer {
    hasher: Hasher,
    stats: TransferStats,
}

impl Transfer {
    pub fn new(settings: &Settings) -> Self {
        Self {
            hasher: Hasher::new(settings),
            stats: TransferStats::default(),
        }
    }

    pub fn stats(&self) -> TransferStats {
        self.stats
    }

    /// Return the counters and start again from zero.
    pub fn take_stats(&mut self) -> TransferStats {
        std::mem::take(&mut self.stats)
    }

    pub fn hasher(&self) -> &Hasher {
        &self.hasher
    }

    /// Place `staged` at `target`.
    ///
    /// Returns `Ok(true)` if `target` now holds the same bytes as `staged`
    /// and `Ok(false)` if verification failed; in the latter case `target`
    /// has been removed again. I/O errors that outlast the retry policy are
    /// returned as `Err`.
    pub fn commit(&mut self, staged: &Path, target: &Path, opts: CommitOptions) -> Result<bool> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        if let Some(known) = &opts.known_digest
            && known.algorithm() != self.hasher.algorithm()
        {
            return Err(Error::invalid_digest(format!(
                "expected a {} digest, got {}",
                self.hasher.algorithm(),
                known.algorithm()
            )));
        }

        // A size mismatch means a partial or foreign file; no need to hash it.
        if let Ok(existing) = fs::metadata(target) {
            let staged_len = fs::metadata(staged)?.len();
            if existing.len() != staged_len {
                warn!(
                    target = %target.display(),
                    expected = staged_len,
                    found = existing.len(),
                    "removing target with wrong size"
                );
                fs::remove_file(target)?;
                self.stats.replaced += 1;
            }
        }

        let committed = if target.exists() {
            if !opts.check_existing {
                debug!(target = %target.display(), "target exists, not checked");
                self.stats.unchanged += 1;
                true
            } else {
                let source_digest = match opts.known_digest.clone() {
                    Some(digest) => digest,
                    None => self.hasher.digest(staged)?,
                };
                let target_digest = self.hasher.digest(target)?;

                if source_digest == target_digest {
                    debug!(target = %target.display(), "target already up to date");
                    self.stats.unchanged += 1;
                    true
                } else {
                    warn!(target = %target.display(), "target content differs, replacing");
                    fs::remove_file(target)?;
                    self.stats.replaced += 1;
                    let forced = CommitOptions {
                        check_existing: false,
                        delete_staged: false,
                        known_digest: Some(source_digest),
                    };
                    self.commit(staged, target, forced)?
                }
            }
        } else {
            self.copy_verified(staged, target, opts.known_digest.as_ref())?
        };

        if committed && opts.delete_staged {
            fs::remove_file(staged)?;
        }
        Ok(committed)
    }

    /// Copy and confirm with an independent read-back of the target.
    ///
    /// Without a known digest the source is re-read as well, concurrently
    /// with the target.
    fn copy_verified(&mut self, staged: &Path, target: &Path, known: Option<&Digest>) -> Result<bool> {
        let copy_digest = self.hasher.copy_and_digest(staged, target)?;

        let hasher = &self.hasher;
        let readback = match known {
            Some(known) => hasher
                .digest_uncached(target)
                .map(|target_digest| (known.clone(), target_digest)),
            None => thread::scope(|scope| {
                let source = scope.spawn(|| hasher.digest_uncached(staged));
                let target_digest = hasher.digest_uncached(target);
                let source_digest = source.join().unwrap_or_else(|_| {
                    Err(Error::Io {
                        source: std::io::Error::other("source digest thread panicked"),
                    })
                });
                Ok((source_digest?, target_digest?))
            }),
        };

        let (source_digest, target_digest) = match readback {
            Ok(digests) => digests,
            Err(e) => {
                let _ = fs::remove_file(target);
                return Err(e);
            }
        };

        if copy_digest == source_digest && copy_digest == target_digest {
            self.stats.copied += 1;
            self.stats.bytes_copied += fs::metadata(target).map(|m| m.len()).unwrap_or(0);
            debug!(target = %target.display(), digest = %target_digest, "copied and verified");
            self.hasher.remember(target, target_digest);
            Ok(true)
        } else {
            warn!(
                source = %staged.display(),
                target = %target.display(),
                copied = %copy_digest,
                source_digest = %source_digest,
                target_digest = %target_digest,
                "verification failed, removing target"
            );
            fs::remove_file(target)?;
            self.stats.failed += 1;
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Algorithm;
    use tempfile::TempDir;

    fn md5_engine() -> Transfer {
        Transfer::new(&Settings {
            algorithm: Algorithm::Md5,
            ..Settings::for_tests()
        })
    }

    fn write(path: &Path, content: &str) {
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_commit_creates_parents() {
        let temp_dir = TempDir::new().unwrap();
        let staged = temp_dir.path().join("test.txt");
        let target = temp_dir.path().join("a/b/c/out.txt");
        write(&staged, "peter");

        let mut engine = md5_engine();
        assert!(engine.commit(&staged, &target, CommitOptions::default()).unwrap());
        assert_eq!(fs::read_to_string(&target).unwrap(), "peter");
        assert!(staged.exists());
        assert_eq!(engine.stats().copied, 1);
        assert_eq!(engine.stats().bytes_copied, 5);
    }

    #[test]
    fn test_commit_existing_identical_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let staged = temp_dir.path().join("test.txt");
        let target = temp_dir.path().join("out.txt");
        write(&staged, "peter");
        write(&target, "peter");

        let mut engine = md5_engine();
        assert!(engine.commit(&staged, &target, CommitOptions::default()).unwrap());
        assert_eq!(engine.stats().copied, 0);
        assert_eq!(engine.stats().unchanged, 1);
    }

    #[test]
    fn test_commit_size_mismatch_evicts_target() {
        let temp_dir = TempDir::new().unwrap();
        let staged = temp_dir.path().join("test.txt");
        let target = temp_dir.path().join("out.txt");
        write(&staged, "peter");
        write(&target, "hans");

        let mut engine = md5_engine();
        let opts = CommitOptions::default().check_existing(false);
        assert!(engine.commit(&staged, &target, opts).unwrap());
        assert_eq!(fs::read_to_string(&target).unwrap(), "peter");
        assert_eq!(engine.stats().replaced, 1);
    }

    #[test]
    fn test_commit_same_size_different_content_replaced() {
        let temp_dir = TempDir::new().unwrap();
        let staged = temp_dir.path().join("test.txt");
        let target = temp_dir.path().join("out.txt");
        write(&staged, "peter");
        write(&target, "hanse");

        let mut engine = md5_engine();
        assert!(engine.commit(&staged, &target, CommitOptions::default()).unwrap());
        assert_eq!(fs::read_to_string(&target).unwrap(), "peter");
        assert_eq!(engine.stats().replaced, 1);
        assert_eq!(engine.stats().copied, 1);
    }

    #[test]
    fn test_commit_unchecked_same_size_left_untouched() {
        let temp_dir = TempDir::new().unwrap();
        let staged = temp_dir.path().join("test.txt");
        let target = temp_dir.path().join("out.txt");
        write(&staged, "peter");
        write(&target, "hanse");

        let mut engine = md5_engine();
        let opts = CommitOptions::default().check_existing(false);
        assert!(engine.commit(&staged, &target, opts).unwrap());
        assert_eq!(fs::read_to_string(&target).unwrap(), "hanse");
    }

    #[test]
    fn test_commit_delete_staged() {
        let temp_dir = TempDir::new().unwrap();
        let staged = temp_dir.path().join("test.txt");
        let target = temp_dir.path().join("out.txt");
        write(&staged, "peter");

        let mut engine = md5_engine();
        let opts = CommitOptions::default().delete_staged(true);
        assert!(engine.commit(&staged, &target, opts).unwrap());
        assert!(!staged.exists());
        assert_eq!(fs::read_to_string(&target).unwrap(), "peter");
    }

    #[test]
    fn test_commit_known_digest_correct() {
        let temp_dir = TempDir::new().unwrap();
        let staged = temp_dir.path().join("test.txt");
        let target = temp_dir.path().join("out.txt");
        write(&staged, "peter");

        let known = Digest::from_hex(Algorithm::Md5, "51dc30ddc473d43a6011e9ebba6ca770").unwrap();
        let mut engine = md5_engine();
        let opts = CommitOptions::default().known_digest(known);
        assert!(engine.commit(&staged, &target, opts).unwrap());
        assert_eq!(fs::read_to_string(&target).unwrap(), "peter");
    }

    #[test]
    fn test_commit_wrong_known_digest_fails_without_target() {
        let temp_dir = TempDir::new().unwrap();
        let staged = temp_dir.path().join("test.txt");
        let target = temp_dir.path().join("out.txt");
        write(&staged, "peter");

        // md5("hans")
        let wrong = Digest::from_hex(Algorithm::Md5, "f2a0ffe83ec8d44f2be4b624b0f47dde").unwrap();
        let mut engine = md5_engine();
        let opts = CommitOptions::default().known_digest(wrong).delete_staged(true);
        assert!(!engine.commit(&staged, &target, opts).unwrap());

        assert!(!target.exists());
        assert_eq!(fs::read_to_string(&staged).unwrap(), "peter");
        assert_eq!(engine.stats().failed, 1);
    }

    #[test]
    fn test_commit_rejects_foreign_algorithm() {
        let temp_dir = TempDir::new().unwrap();
        let staged = temp_dir.path().join("test.txt");
        write(&staged, "peter");

        let blake = Digest::of_bytes(Algorithm::Blake3, b"peter");
        let mut engine = md5_engine();
        let opts = CommitOptions::default().known_digest(blake);
        let err = engine
            .commit(&staged, &temp_dir.path().join("out.txt"), opts)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDigest { .. }));
    }

    #[test]
    fn test_commit_missing_staged_is_transfer_failure() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("out.txt");

        let mut engine = md5_engine();
        let err = engine
            .commit(&temp_dir.path().join("gone.txt"), &target, CommitOptions::default())
            .unwrap_err();
        assert!(err.is_transfer_failure());
        assert!(!target.exists());
    }

    #[test]
    fn test_take_stats_resets() {
        let temp_dir = TempDir::new().unwrap();
        let staged = temp_dir.path().join("test.txt");
        write(&staged, "peter");

        let mut engine = md5_engine();
        engine
            .commit(&staged, &temp_dir.path().join("out.txt"), CommitOptions::default())
            .unwrap();
        assert_eq!(engine.take_stats().copied, 1);
        assert_eq!(engine.stats(), TransferStats::default());
    }
}
