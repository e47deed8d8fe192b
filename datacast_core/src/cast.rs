//! The casting orchestrator.
//!
//! A cast runs in two phases. First every dataset the recipe enumerates is
//! converted into the staging area and committed to its target. Then the
//! raw tree is swept once more and every file no dataset claimed is
//! committed verbatim to its mirrored location.
//!
//! A dataset that fails to convert is recorded and skipped. A commit that
//! fails verification aborts the whole cast with an error.

use crate::error::{Error, Result};
use crate::options::RecipeOptions;
use crate::recipe::{Dataset, Recipe};
use crate::settings::Settings;
use crate::staging::StagingArea;
use crate::transfer::{CommitOptions, Transfer};
use crate::walk::{self, ClaimedFiles};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Where a cast currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CastPhase {
    Idle,
    Enumerating,
    /// Converting the dataset with the given zero-based index.
    Converting(usize),
    Sweeping,
    Done,
    PartiallyFailed,
    /// The cast stopped with an error.
    Failed,
}

/// A raw file that could not be cast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CastFailure {
    pub path: PathBuf,
    /// The error and its causes, one per line.
    pub error: String,
}

impl CastFailure {
    fn new(path: &Path, err: &dyn std::error::Error) -> Self {
        Self {
            path: path.to_path_buf(),
            error: format_error_chain(err),
        }
    }
}

/// What a cast did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CastStats {
    pub datasets_converted: u64,
    pub files_passed_through: u64,
    /// Targets actually written, as opposed to found up to date.
    pub files_copied: u64,
    pub files_unchanged: u64,
    pub bytes_copied: u64,
}

/// Outcome of a cast that ran to the end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CastResult {
    /// True iff `errors` is empty.
    pub success: bool,
    pub errors: Vec<CastFailure>,
    pub stats: CastStats,
}

/// Runs casts of one recipe.
pub struct Caster<'r> {
    recipe: &'r dyn Recipe,
    transfer: Transfer,
    staging_base: Option<PathBuf>,
    phase: CastPhase,
    last_staging_dir: Option<PathBuf>,
}

impl<'r> Caster<'r> {
    pub fn new(recipe: &'r dyn Recipe, settings: &Settings) -> Self {
        Self {
            recipe,
            transfer: Transfer::new(settings),
            staging_base: settings.staging_base.clone(),
            phase: CastPhase::Idle,
            last_staging_dir: None,
        }
    }

    pub fn phase(&self) -> CastPhase {
        self.phase
    }

    /// Staging directory of the most recent cast. It no longer exists once
    /// the cast has returned.
    pub fn last_staging_dir(&self) -> Option<&Path> {
        self.last_staging_dir.as_deref()
    }

    /// Cast without progress reporting.
    pub fn cast(&mut self, options: &RecipeOptions) -> Result<CastResult> {
        self.cast_with_progress(options, |_| {})
    }

    /// Cast the recipe's raw tree into its target tree.
    ///
    /// `progress` is called with the files of each dataset before it is
    /// converted, and with each pass-through file before it is committed.
    ///
    /// Returns `Err` for configuration problems (nothing has been converted
    /// yet) and for failed commits (the cast stops at that file). The phase
    /// is then [`CastPhase::Failed`].
    pub fn cast_with_progress(
        &mut self,
        options: &RecipeOptions,
        progress: impl FnMut(&[PathBuf]),
    ) -> Result<CastResult> {
        let result = self.run(options, progress);
        if result.is_err() {
            self.phase = CastPhase::Failed;
        }
        result
    }

    fn run(
        &mut self,
        options: &RecipeOptions,
        mut progress: impl FnMut(&[PathBuf]),
    ) -> Result<CastResult> {
        let recipe = self.recipe;
        options.check_against(recipe.options())?;
        recipe.paths().prepare_target()?;

        // Dropping the staging area removes it, also on early return.
        let staging = StagingArea::create(self.staging_base.as_deref())?;
        self.last_staging_dir = Some(staging.path().to_path_buf());
        self.transfer.take_stats();

        let mut known = ClaimedFiles::default();
        let mut errors = Vec::new();
        let mut stats = CastStats::default();

        info!(
            raw = %recipe.paths().raw_root().display(),
            target = %recipe.paths().target_root().display(),
            "casting datasets"
        );
        self.phase = CastPhase::Enumerating;

        for (index, item) in recipe.datasets().enumerate() {
            let dataset = match item {
                Ok(dataset) => dataset,
                Err(e) => {
                    warn!(error = %e, "dataset enumeration failed");
                    errors.push(CastFailure::new(recipe.paths().raw_root(), &e));
                    continue;
                }
            };

            known.extend(dataset.files());
            progress(dataset.files());

            self.phase = CastPhase::Converting(index);
            match self.cast_dataset(&staging, &dataset, options)? {
                Some(failure) => errors.push(failure),
                None => stats.datasets_converted += 1,
            }
            self.phase = CastPhase::Enumerating;
        }

        info!(datasets = stats.datasets_converted, "sweeping remaining files");
        self.phase = CastPhase::Sweeping;
        let ignored = recipe.ignored_file_names();

        for item in walk::walk_files(recipe.paths().raw_root()) {
            let path = match item {
                Ok(path) => path,
                Err(e) => {
                    warn!(error = %e, "walk failed");
                    errors.push(CastFailure::new(recipe.paths().raw_root(), &e));
                    continue;
                }
            };
            if known.contains(&path) || walk::is_ignored(&path, ignored) {
                continue;
            }

            let target = recipe.paths().mirror(&path)?;
            progress(std::slice::from_ref(&path));
            if !self.transfer.commit(&path, &target, CommitOptions::default())? {
                error!(path = %path.display(), target = %target.display(), "pass-through verification failed");
                return Err(Error::transfer_failed(&path, &target));
            }
            stats.files_passed_through += 1;
        }

        let transfer = self.transfer.take_stats();
        stats.files_copied = transfer.copied;
        stats.files_unchanged = transfer.unchanged;
        stats.bytes_copied = transfer.bytes_copied;

        if let Err(e) = staging.close() {
            warn!(error = %e, "could not remove staging area");
        }

        self.phase = if errors.is_empty() {
            CastPhase::Done
        } else {
            CastPhase::PartiallyFailed
        };
        info!(
            converted = stats.datasets_converted,
            passed_through = stats.files_passed_through,
            copied = stats.files_copied,
            unchanged = stats.files_unchanged,
            failed = errors.len(),
            "cast finished"
        );

        Ok(CastResult {
            success: errors.is_empty(),
            errors,
            stats,
        })
    }

    /// Convert and commit one dataset.
    ///
    /// Returns the failure if the dataset could not be converted; commit
    /// failures are returned as `Err`.
    fn cast_dataset(
        &mut self,
        staging: &StagingArea,
        dataset: &Dataset,
        options: &RecipeOptions,
    ) -> Result<Option<CastFailure>> {
        let primary = dataset.primary();

        let target = match self.recipe.target_path(dataset) {
            Ok(target) => target,
            Err(e) => {
                warn!(path = %primary.display(), error = %e, "no target path for dataset");
                return Ok(Some(CastFailure::new(primary, &e)));
            }
        };
        let staged = staging.staged_path(dataset, &target);

        debug!(path = %primary.display(), staged = %staged.display(), "converting");
        let converted = self.recipe.convert(dataset, &staged, options).and_then(|()| {
            if staged.is_file() {
                Ok(())
            } else {
                Err(crate::error::ConversionError::malformed(
                    primary,
                    "conversion did not produce an output file",
                ))
            }
        });

        if let Err(e) = converted {
            warn!(path = %primary.display(), error = %e, "conversion failed");
            let _ = fs::remove_file(&staged);
            return Ok(Some(CastFailure::new(primary, &e)));
        }

        let opts = CommitOptions::default().delete_staged(true);
        if !self.transfer.commit(&staged, &target, opts)? {
            error!(path = %primary.display(), target = %target.display(), "dataset verification failed");
            return Err(Error::transfer_failed(primary, &target));
        }
        Ok(None)
    }
}

/// Render an error followed by each distinct cause on its own line.
pub fn format_error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !out.contains(&text) {
            let _ = write!(out, "\ncaused by: {}", text);
        }
        source = cause.source();
    }
    out
}
