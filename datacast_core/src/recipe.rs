//! The recipe contract implemented by format plugins.
//!
//! A recipe knows three things about one data format: how to find datasets
//! (groups of raw files that belong together) below the raw root, how to
//! convert one dataset into a single staged output file, and where that
//! output goes below the target root. The caster only ever talks to recipes
//! through the [`Recipe`] trait.

use crate::error::{ConversionError, Error, Result};
use crate::options::{OptionSpec, RecipeOptions};
use crate::walk;
use std::fs;
use std::path::{Path, PathBuf};

/// Validated raw and target roots of a cast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CastPaths {
    raw_root: PathBuf,
    target_root: PathBuf,
}

impl CastPaths {
    /// Validate the roots.
    ///
    /// The raw root must be an existing directory and is canonicalized. The
    /// target root is made absolute but need not exist yet; it must not be an
    /// existing file and must not lie inside the raw root (the pass-through
    /// sweep would pick up its own output).
    pub fn new(raw_root: impl AsRef<Path>, target_root: impl AsRef<Path>) -> Result<Self> {
        let raw_root = raw_root.as_ref();
        let target_root = target_root.as_ref();

        if !raw_root.exists() {
            return Err(Error::invalid_path(raw_root, "raw data path doesn't exist"));
        }
        if !raw_root.is_dir() {
            return Err(Error::invalid_path(raw_root, "raw data path is not a directory"));
        }
        if target_root.exists() && !target_root.is_dir() {
            return Err(Error::invalid_path(target_root, "target path is not a directory"));
        }

        let raw_root = fs::canonicalize(raw_root)?;
        let target_root = match fs::canonicalize(target_root) {
            Ok(resolved) => resolved,
            Err(_) => std::path::absolute(target_root)?,
        };

        if target_root.starts_with(&raw_root) {
            return Err(Error::invalid_path(
                &target_root,
                format!("target path lies inside raw data path {}", raw_root.display()),
            ));
        }

        Ok(Self {
            raw_root,
            target_root,
        })
    }

    pub fn raw_root(&self) -> &Path {
        &self.raw_root
    }

    pub fn target_root(&self) -> &Path {
        &self.target_root
    }

    /// Create the target root and check that files can be written into it.
    pub fn prepare_target(&self) -> Result<()> {
        fs::create_dir_all(&self.target_root).map_err(|e| {
            Error::invalid_path(&self.target_root, format!("cannot create target path: {e}"))
        })?;
        tempfile::Builder::new()
            .prefix(".datacast-write-check")
            .tempfile_in(&self.target_root)
            .map_err(|e| {
                Error::invalid_path(&self.target_root, format!("target path is not writable: {e}"))
            })?;
        Ok(())
    }

    /// Target location of a raw file: same relative path, below the target root.
    pub fn mirror(&self, raw_path: &Path) -> Result<PathBuf> {
        walk::mirror(&self.raw_root, &self.target_root, raw_path)
    }
}

/// Raw files that are converted together. Never empty.
///
/// The first file is the primary one; its path determines the target name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Dataset {
    files: Vec<PathBuf>,
}

impl Dataset {
    /// Group files into a dataset. Returns `None` for an empty list.
    pub fn new(files: Vec<PathBuf>) -> Option<Self> {
        (!files.is_empty()).then_some(Self { files })
    }

    /// A dataset consisting of one file.
    pub fn single(path: impl Into<PathBuf>) -> Self {
        Self {
            files: vec![path.into()],
        }
    }

    pub fn primary(&self) -> &Path {
        &self.files[0]
    }

    /// Files after the primary one (metadata sidecars and the like).
    pub fn companions(&self) -> &[PathBuf] {
        &self.files[1..]
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }
}

/// Lazy sequence of datasets.
pub type Datasets<'a> = Box<dyn Iterator<Item = Result<Dataset>> + 'a>;

/// A dataset conversion strategy for one data format.
pub trait Recipe: Send + Sync {
    /// Roots this recipe was constructed for.
    fn paths(&self) -> &CastPaths;

    /// Enumerate datasets below the raw root.
    ///
    /// Each call starts a fresh walk. The order must be stable within one
    /// process so target-name collisions resolve the same way every time.
    fn datasets(&self) -> Datasets<'_>;

    /// Convert `dataset` into a single file at `staged`.
    ///
    /// Must not write anywhere except `staged`.
    fn convert(
        &self,
        dataset: &Dataset,
        staged: &Path,
        options: &RecipeOptions,
    ) -> std::result::Result<(), ConversionError>;

    /// Where the converted dataset ends up.
    ///
    /// Defaults to the primary file's mirrored path. Recipes that change the
    /// file format override this to change the extension.
    fn target_path(&self, dataset: &Dataset) -> Result<PathBuf> {
        self.paths().mirror(dataset.primary())
    }

    /// File names never transferred, in addition to
    /// [`IGNORED_FILE_NAMES`](crate::walk::IGNORED_FILE_NAMES).
    fn ignored_file_names(&self) -> &[&str] {
        &[]
    }

    /// Options accepted by [`convert`](Recipe::convert).
    fn options(&self) -> &[OptionSpec] {
        &[]
    }
}
