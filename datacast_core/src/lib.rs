//! # Datacast Core
//!
//! A recipe-driven engine for casting raw experiment data trees to a target
//! directory with byte-verified copies.
//!
//! A [`Recipe`] groups raw files into datasets and converts each dataset into
//! a single output file. The [`Caster`] converts every dataset through a
//! private staging area, commits the result with the [`Transfer`] engine, and
//! finally passes every unclaimed raw file through unchanged.
//!
//! ## Features
//!
//! - Verified commits: every target is re-read and compared by digest
//! - Idempotent re-runs: up-to-date targets are detected and left alone
//! - Bounded retries with backoff for unreliable source media
//! - Per-dataset failures are collected, not fatal
//! - Explicit recipe registry with best-fit guessing
//! - Background counting of a raw tree for progress estimation
//!
//! ## Example
//!
//! ```no_run
//! use datacast_core::{CastPaths, Caster, RecipeOptions, RecipeRegistry, Settings};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = RecipeRegistry::with_builtins();
//! let paths = CastPaths::new("./raw", "./target")?;
//!
//! // Pick a recipe by name (case-insensitive)
//! let recipe = registry.instantiate("catchall", &paths)?;
//! let options = RecipeOptions::parse(recipe.options(), "")?;
//!
//! // Cast and report per-dataset failures
//! let result = Caster::new(recipe.as_ref(), &Settings::default()).cast(&options)?;
//! for failure in &result.errors {
//!     eprintln!("{}: {}", failure.path.display(), failure.error);
//! }
//! # Ok(())
//! # }
//! ```

mod cast;
mod catchall;
mod counter;
mod error;
mod hash;
mod hasher;
mod options;
mod recipe;
mod registry;
mod settings;
mod staging;
mod transfer;
mod walk;

pub use cast::{CastFailure, CastPhase, CastResult, CastStats, Caster, format_error_chain};
pub use catchall::CatchAll;
pub use counter::{CountSnapshot, CounterState, DEFAULT_RESCAN_INTERVAL, TreeCounter};
pub use error::{ConversionError, Error, Result};
pub use hash::{Algorithm, DEFAULT_BLOCK_SIZE, Digest, DigestState};
pub use hasher::{Hasher, RetryPolicy};
pub use options::{OptionKind, OptionSpec, OptionValue, RecipeOptions};
pub use recipe::{CastPaths, Dataset, Datasets, Recipe};
pub use registry::{RecipeConstructor, RecipeEntry, RecipeRegistry, RecipeScore};
pub use settings::Settings;
pub use staging::{StagingArea, cleanup_stale_staging_dirs};
pub use transfer::{CommitOptions, Transfer, TransferStats};
pub use walk::{IGNORED_FILE_NAMES, is_ignored, lexical_key, mirror, relative_to, walk_files};
