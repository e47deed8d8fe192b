//! The fallback recipe: every file is its own dataset and is copied as is.

use crate::error::{ConversionError, Result};
use crate::hash::{Algorithm, DEFAULT_BLOCK_SIZE, Digest};
use crate::options::RecipeOptions;
use crate::recipe::{CastPaths, Dataset, Datasets, Recipe};
use crate::walk;
use std::fs;
use std::path::Path;

/// Copy all files, except known junk files.
#[derive(Debug, Clone)]
pub struct CatchAll {
    paths: CastPaths,
}

impl CatchAll {
    pub const NAME: &'static str = "CatchAll";
    pub const DESCRIPTION: &'static str = "Copy all files, except known junk files";

    pub fn new(paths: &CastPaths) -> Self {
        Self {
            paths: paths.clone(),
        }
    }

    /// Registry constructor.
    pub fn construct(paths: &CastPaths) -> Result<Box<dyn Recipe>> {
        Ok(Box::new(Self::new(paths)))
    }
}

impl Recipe for CatchAll {
    fn paths(&self) -> &CastPaths {
        &self.paths
    }

    fn datasets(&self) -> Datasets<'_> {
        Box::new(
            walk::walk_files(self.paths.raw_root())
                .filter(|item| !matches!(item, Ok(path) if walk::is_ignored(path, &[])))
                .map(|item| item.map(Dataset::single)),
        )
    }

    fn convert(
        &self,
        dataset: &Dataset,
        staged: &Path,
        _options: &RecipeOptions,
    ) -> std::result::Result<(), ConversionError> {
        let source = dataset.primary();
        fs::copy(source, staged)?;

        // Preliminary check that staging itself went fine; the commit
        // verifies the final copy again.
        let expected = Digest::of_file(Algorithm::Blake3, source, DEFAULT_BLOCK_SIZE)?;
        let staged_digest = Digest::of_file(Algorithm::Blake3, staged, DEFAULT_BLOCK_SIZE)?;
        if expected != staged_digest {
            return Err(ConversionError::malformed(
                source,
                "initial digest verification of staged copy failed",
            ));
        }
        Ok(())
    }
}
