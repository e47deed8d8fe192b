//! Background counting of what a cast would process.
//!
//! A [`TreeCounter`] repeatedly scans a raw tree on its own thread and
//! publishes how many objects (datasets plus pass-through files) and bytes
//! a cast would handle. Pointing it at another recipe or resetting it bumps
//! a generation number; scans of an older generation notice and stop, and
//! their results are never published.

use crate::error::Result;
use crate::recipe::Recipe;
use crate::walk::{self, ClaimedFiles};
use serde::Serialize;
use std::fs;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::debug;

/// Default pause between two scans of the same tree.
pub const DEFAULT_RESCAN_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterState {
    /// Nothing is being watched.
    Idle,
    /// The first scan of the current generation is running.
    Counting,
    /// The watched tree changed; counts are not valid yet.
    Stale,
    /// Counts are complete. Rescans keep them until they finish.
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CountSnapshot {
    pub state: CounterState,
    /// Datasets plus pass-through files.
    pub objects: u64,
    pub bytes: u64,
    pub generation: u64,
}

impl CountSnapshot {
    fn idle(generation: u64) -> Self {
        Self {
            state: CounterState::Idle,
            objects: 0,
            bytes: 0,
            generation,
        }
    }
}

#[derive(Debug)]
struct Shared {
    generation: AtomicU64,
    snapshot: Mutex<CountSnapshot>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, CountSnapshot> {
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Update the snapshot unless `generation` has been superseded.
    fn publish(&self, generation: u64, update: impl FnOnce(&mut CountSnapshot)) -> bool {
        let mut snapshot = self.lock();
        if !self.is_current(generation) {
            return false;
        }
        update(&mut snapshot);
        drop(snapshot);
        self.changed.notify_all();
        true
    }

    /// Start a new generation and reset the snapshot to `state`.
    fn advance(&self, state: CounterState) -> u64 {
        let mut snapshot = self.lock();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *snapshot = CountSnapshot {
            state,
            ..CountSnapshot::idle(generation)
        };
        drop(snapshot);
        self.changed.notify_all();
        generation
    }
}

/// Keeps a live count of a raw tree on a background thread.
#[derive(Debug)]
pub struct TreeCounter {
    shared: Arc<Shared>,
    rescan_interval: Duration,
}

impl Default for TreeCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeCounter {
    pub fn new() -> Self {
        Self::with_rescan_interval(DEFAULT_RESCAN_INTERVAL)
    }

    pub fn with_rescan_interval(rescan_interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                generation: AtomicU64::new(0),
                snapshot: Mutex::new(CountSnapshot::idle(0)),
                changed: Condvar::new(),
            }),
            rescan_interval,
        }
    }

    /// Start counting what `recipe` would cast. Any running scan is
    /// abandoned. Returns the new generation.
    pub fn watch(&self, recipe: Arc<dyn Recipe>) -> Result<u64> {
        let generation = self.shared.advance(CounterState::Stale);
        let shared = Arc::clone(&self.shared);
        let interval = self.rescan_interval;

        thread::Builder::new()
            .name(format!("datacast-counter-{}", generation))
            .spawn(move || scan_loop(&shared, recipe.as_ref(), generation, interval))?;
        Ok(generation)
    }

    /// Stop counting and return to `Idle`.
    pub fn reset(&self) -> u64 {
        self.shared.advance(CounterState::Idle)
    }

    pub fn snapshot(&self) -> CountSnapshot {
        *self.shared.lock()
    }

    /// Block until the current generation has a complete count, or until
    /// `timeout` passes.
    pub fn wait_done(&self, timeout: Duration) -> Option<CountSnapshot> {
        let guard = self.shared.lock();
        let (snapshot, _) = self
            .shared
            .changed
            .wait_timeout_while(guard, timeout, |s| {
                s.state != CounterState::Done && s.state != CounterState::Idle
            })
            .unwrap_or_else(PoisonError::into_inner);
        (snapshot.state == CounterState::Done).then_some(*snapshot)
    }
}

impl Drop for TreeCounter {
    fn drop(&mut self) {
        self.reset();
    }
}

fn scan_loop(shared: &Shared, recipe: &dyn Recipe, generation: u64, interval: Duration) {
    loop {
        shared.publish(generation, |s| {
            if s.state != CounterState::Done {
                s.state = CounterState::Counting;
            }
        });

        let Some((objects, bytes)) = count(shared, recipe, generation) else {
            break;
        };
        let published = shared.publish(generation, |s| {
            s.state = CounterState::Done;
            s.objects = objects;
            s.bytes = bytes;
        });
        if !published {
            break;
        }
        debug!(generation, objects, bytes, "tree counted");

        let guard = shared.lock();
        let (_guard, _) = shared
            .changed
            .wait_timeout_while(guard, interval, |_| shared.is_current(generation))
            .unwrap_or_else(PoisonError::into_inner);
        if !shared.is_current(generation) {
            break;
        }
    }
    debug!(generation, "counter stopped");
}

/// One full scan. Returns `None` if the generation was superseded.
fn count(shared: &Shared, recipe: &dyn Recipe, generation: u64) -> Option<(u64, u64)> {
    let mut claimed = ClaimedFiles::default();
    let mut objects = 0;
    let mut bytes = 0;

    for dataset in recipe.datasets() {
        if !shared.is_current(generation) {
            return None;
        }
        let Ok(dataset) = dataset else {
            continue;
        };
        objects += 1;
        for file in dataset.files() {
            bytes += fs::metadata(file).map(|m| m.len()).unwrap_or(0);
        }
        claimed.extend(dataset.files());
    }

    let ignored = recipe.ignored_file_names();
    for path in walk::walk_files(recipe.paths().raw_root()) {
        if !shared.is_current(generation) {
            return None;
        }
        let Ok(path) = path else {
            continue;
        };
        if claimed.contains(&path) || walk::is_ignored(&path, ignored) {
            continue;
        }
        let Ok(metadata) = fs::metadata(&path) else {
            continue;
        };
        objects += 1;
        bytes += metadata.len();
    }

    Some((objects, bytes))
}
