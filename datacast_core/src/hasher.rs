//! Cached file digests and copy-while-digesting.
//!
//! Source media (USB drives, network shares) is assumed to be unreliable, so
//! every read or copy goes through a bounded [`RetryPolicy`].

use crate::error::{Error, Result};
use crate::hash::{Algorithm, Digest};
use crate::settings::Settings;
use std::collections::{HashMap, VecDeque};
use std::fs::{self, File, FileTimes};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, UNIX_EPOCH};
use tracing::{debug, warn};

/// Bounded retry with linear backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub attempts: u32,
    /// Delay after the first failure; the n-th failure waits `n * delay`.
    pub delay: Duration,
}

impl RetryPolicy {
    /// Build a policy from settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            attempts: settings.retry_attempts.max(1),
            delay: settings.retry_delay,
        }
    }

    /// Run `attempt` until it succeeds or the attempts are used up.
    ///
    /// A missing file is not transient and fails immediately.
    pub fn run<T>(
        &self,
        operation: &'static str,
        path: &Path,
        mut attempt: impl FnMut() -> io::Result<T>,
    ) -> Result<T> {
        let mut last_error = None;

        for n in 1..=self.attempts {
            match attempt() {
                Ok(value) => return Ok(value),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(Error::RetriesExhausted {
                        operation,
                        path: path.to_path_buf(),
                        attempts: n,
                        source: e,
                    });
                }
                Err(e) => {
                    warn!(
                        operation,
                        path = %path.display(),
                        attempt = n,
                        attempts = self.attempts,
                        error = %e,
                        "I/O failure"
                    );
                    last_error = Some(e);
                    if n < self.attempts {
                        thread::sleep(self.delay * n);
                    }
                }
            }
        }

        Err(Error::RetriesExhausted {
            operation,
            path: path.to_path_buf(),
            attempts: self.attempts,
            source: last_error.unwrap_or_else(|| io::Error::other("no attempt was made")),
        })
    }
}

/// Identity of a file's content as far as the cache is concerned.
///
/// Any change to the file's size or modification time yields a new key, so
/// stale digests are never served.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    path: PathBuf,
    mtime_ns: u128,
    size: u64,
}

impl CacheKey {
    fn for_path(path: &Path) -> io::Result<Self> {
        let path = fs::canonicalize(path)?;
        let metadata = fs::metadata(&path)?;
        let mtime_ns = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        Ok(Self {
            path,
            mtime_ns,
            size: metadata.len(),
        })
    }
}

/// Least-recently-used digest cache.
#[derive(Debug)]
struct DigestCache {
    capacity: usize,
    entries: HashMap<CacheKey, Digest>,
    order: VecDeque<CacheKey>,
}

impl DigestCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&mut self, key: &CacheKey) -> Option<Digest> {
        let digest = self.entries.get(key)?.clone();
        self.touch(key);
        Some(digest)
    }

    fn insert(&mut self, key: CacheKey, digest: Digest) {
        if self.capacity == 0 {
            return;
        }

        if self.entries.insert(key.clone(), digest).is_some() {
            self.touch(&key);
            return;
        }
        self.order.push_back(key);

        while self.entries.len() > self.capacity {
            match self.order.pop_front() {
                Some(evict) => {
                    self.entries.remove(&evict);
                }
                None => break,
            }
        }
    }

    fn touch(&mut self, key: &CacheKey) {
        if let Some(pos) = self.order.iter().position(|k| k == key)
            && let Some(k) = self.order.remove(pos)
        {
            self.order.push_back(k);
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Computes file digests, caching by (path, mtime, size).
#[derive(Debug)]
pub struct Hasher {
    algorithm: Algorithm,
    block_size: usize,
    retry: RetryPolicy,
    cache: DigestCache,
}

impl Hasher {
    /// Create a hasher from settings.
    pub fn new(settings: &Settings) -> Self {
        Self {
            algorithm: settings.algorithm,
            block_size: settings.block_size.max(1),
            retry: RetryPolicy::from_settings(settings),
            cache: DigestCache::new(settings.cache_capacity),
        }
    }

    /// The algorithm every digest is computed with.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Number of digests currently cached.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Digest a file, reusing a cached value if the file is unchanged.
    pub fn digest(&mut self, path: &Path) -> Result<Digest> {
        let key = self.retry.run("stat", path, || CacheKey::for_path(path))?;
        if let Some(digest) = self.cache.get(&key) {
            debug!(path = %path.display(), "digest cache hit");
            return Ok(digest);
        }

        let digest = self.digest_uncached(path)?;
        self.cache.insert(key, digest.clone());
        Ok(digest)
    }

    /// Digest a file by reading it, ignoring the cache.
    ///
    /// Takes `&self` so two files can be digested from scoped threads.
    pub fn digest_uncached(&self, path: &Path) -> Result<Digest> {
        self.retry.run("digest", path, || {
            Digest::of_file(self.algorithm, path, self.block_size)
        })
    }

    /// Record a digest obtained elsewhere (e.g. from a read-back).
    pub fn remember(&mut self, path: &Path, digest: Digest) {
        if let Ok(key) = CacheKey::for_path(path) {
            self.cache.insert(key, digest);
        }
    }

    /// Copy `src` to `dst` while digesting the bytes in a single pass.
    ///
    /// A failed attempt deletes the partial `dst` before retrying. After a
    /// successful copy, modification time and permissions are copied on a
    /// best-effort basis.
    pub fn copy_and_digest(&self, src: &Path, dst: &Path) -> Result<Digest> {
        let digest = self.copy_from(src, dst, || File::open(src))?;
        copy_metadata(src, dst);
        Ok(digest)
    }

    /// Retry loop around [`copy_once`]. `open` is called once per attempt.
    fn copy_from<R: Read>(
        &self,
        src: &Path,
        dst: &Path,
        mut open: impl FnMut() -> io::Result<R>,
    ) -> Result<Digest> {
        self.retry.run("copy", src, || {
            let reader = open()?;
            copy_once(self.algorithm, self.block_size, reader, dst).inspect_err(|_| {
                let _ = fs::remove_file(dst);
            })
        })
    }
}

fn copy_once(
    algorithm: Algorithm,
    block_size: usize,
    mut reader: impl Read,
    dst: &Path,
) -> io::Result<Digest> {
    let mut writer = File::create(dst)?;
    let mut state = algorithm.start();
    let mut buffer = vec![0u8; block_size];

    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        state.update(&buffer[..read]);
        writer.write_all(&buffer[..read])?;
    }

    writer.flush()?;
    writer.sync_all()?;
    Ok(state.finalize())
}

/// Copy modification/access time and permissions. Failures are not important.
fn copy_metadata(src: &Path, dst: &Path) {
    let Ok(metadata) = fs::metadata(src) else {
        return;
    };

    if let Ok(modified) = metadata.modified() {
        let mut times = FileTimes::new().set_modified(modified);
        if let Ok(accessed) = metadata.accessed() {
            times = times.set_accessed(accessed);
        }
        let result = File::options()
            .write(true)
            .open(dst)
            .and_then(|file| file.set_times(times));
        if let Err(e) = result {
            debug!(path = %dst.display(), error = %e, "could not copy timestamps");
        }
    }

    if let Err(e) = fs::set_permissions(dst, metadata.permissions()) {
        debug!(path = %dst.display(), error = %e, "could not copy permissions");
    }
}
