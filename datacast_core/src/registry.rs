//! Name-based lookup of recipe implementations.

use crate::catchall::CatchAll;
use crate::error::{Error, Result};
use crate::recipe::{CastPaths, Recipe};
use serde::Serialize;
use std::cmp::Ordering;
use tracing::debug;

/// Builds a recipe for the given roots.
pub type RecipeConstructor = fn(&CastPaths) -> Result<Box<dyn Recipe>>;

/// A registered recipe.
#[derive(Clone, Copy)]
pub struct RecipeEntry {
    pub name: &'static str,
    /// One-line description for listings.
    pub description: &'static str,
    pub constructor: RecipeConstructor,
}

impl RecipeEntry {
    /// Construct the recipe for `paths`.
    pub fn instantiate(&self, paths: &CastPaths) -> Result<Box<dyn Recipe>> {
        (self.constructor)(paths)
    }
}

impl std::fmt::Debug for RecipeEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecipeEntry")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// How many datasets a recipe finds in a raw tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecipeScore {
    pub name: &'static str,
    pub datasets: usize,
}

/// Explicit table of available recipes.
///
/// Build one at startup and hand it to whatever needs to select recipes.
#[derive(Debug, Clone, Default)]
pub struct RecipeRegistry {
    entries: Vec<RecipeEntry>,
}

impl RecipeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry containing the recipes shipped with this crate.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.entries.push(RecipeEntry {
            name: CatchAll::NAME,
            description: CatchAll::DESCRIPTION,
            constructor: CatchAll::construct,
        });
        registry
    }

    /// Add a recipe. Names are unique ignoring case.
    pub fn register(
        &mut self,
        name: &'static str,
        description: &'static str,
        constructor: RecipeConstructor,
    ) -> Result<()> {
        if name.trim().is_empty() {
            return Err(Error::invalid_recipe_name(name, "name cannot be empty"));
        }
        if self.find(name).is_some() {
            return Err(Error::duplicate_recipe(name));
        }
        self.entries.push(RecipeEntry {
            name,
            description,
            constructor,
        });
        Ok(())
    }

    /// Registered entries, in registration order.
    pub fn entries(&self) -> &[RecipeEntry] {
        &self.entries
    }

    /// Registered names, in registration order.
    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.name).collect()
    }

    /// Look up a recipe by case-insensitive name.
    pub fn get(&self, name: &str) -> Result<&RecipeEntry> {
        self.find(name).ok_or_else(|| {
            Error::unknown_recipe(name, self.names().into_iter().map(String::from).collect())
        })
    }

    /// Look up and construct a recipe.
    pub fn instantiate(&self, name: &str, paths: &CastPaths) -> Result<Box<dyn Recipe>> {
        self.get(name)?.instantiate(paths)
    }

    /// Dataset counts of every recipe for `paths`, best first.
    ///
    /// Recipes that cannot be constructed score zero; enumeration errors
    /// are not counted. Equal counts are ordered by lower-cased name.
    pub fn scores(&self, paths: &CastPaths) -> Vec<RecipeScore> {
        let mut scores: Vec<RecipeScore> = self
            .entries
            .iter()
            .map(|entry| {
                let datasets = match entry.instantiate(paths) {
                    Ok(recipe) => recipe.datasets().filter(Result::is_ok).count(),
                    Err(e) => {
                        debug!(recipe = entry.name, error = %e, "recipe not applicable");
                        0
                    }
                };
                RecipeScore {
                    name: entry.name,
                    datasets,
                }
            })
            .collect();

        scores.sort_by(|a, b| match b.datasets.cmp(&a.datasets) {
            Ordering::Equal => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
            other => other,
        });
        scores
    }

    /// The recipe that finds the most datasets in `paths`.
    pub fn guess(&self, paths: &CastPaths) -> Option<&RecipeEntry> {
        let best = self.scores(paths).into_iter().next()?;
        self.find(best.name)
    }

    fn find(&self, name: &str) -> Option<&RecipeEntry> {
        self.entries
            .iter()
            .find(|entry| entry.name.eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConversionError;
    use crate::options::RecipeOptions;
    use crate::recipe::{Dataset, Datasets};
    use crate::walk;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    /// One dataset per `.txt` file.
    struct TextOnly {
        paths: CastPaths,
    }

    impl Recipe for TextOnly {
        fn paths(&self) -> &CastPaths {
            &self.paths
        }

        fn datasets(&self) -> Datasets<'_> {
            Box::new(
                walk::walk_files(self.paths.raw_root())
                    .filter(|p| {
                        p.as_ref()
                            .map(|p| p.extension().is_some_and(|e| e == "txt"))
                            .unwrap_or(true)
                    })
                    .map(|p| p.map(Dataset::single)),
            )
        }

        fn convert(
            &self,
            _dataset: &Dataset,
            _staged: &Path,
            _options: &RecipeOptions,
        ) -> std::result::Result<(), ConversionError> {
            Ok(())
        }
    }

    fn text_only(paths: &CastPaths) -> Result<Box<dyn Recipe>> {
        Ok(Box::new(TextOnly {
            paths: paths.clone(),
        }))
    }

    fn never(_paths: &CastPaths) -> Result<Box<dyn Recipe>> {
        Err(Error::invalid_option("not applicable"))
    }

    fn raw_tree(files: &[&str]) -> (TempDir, CastPaths) {
        let temp_dir = TempDir::new().unwrap();
        let raw = temp_dir.path().join("raw");
        fs::create_dir(&raw).unwrap();
        for name in files {
            fs::write(raw.join(name), name.as_bytes()).unwrap();
        }
        let paths = CastPaths::new(&raw, temp_dir.path().join("target")).unwrap();
        (temp_dir, paths)
    }

    #[test]
    fn test_builtins() {
        let registry = RecipeRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["CatchAll"]);
        assert_eq!(
            registry.get("catchall").unwrap().description,
            "Copy all files, except known junk files"
        );
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = RecipeRegistry::with_builtins();
        assert_eq!(registry.get("CATCHALL").unwrap().name, "CatchAll");
    }

    #[test]
    fn test_unknown_name() {
        let registry = RecipeRegistry::with_builtins();
        match registry.get("rtdc").unwrap_err() {
            Error::UnknownRecipe { name, available } => {
                assert_eq!(name, "rtdc");
                assert_eq!(available, vec!["CatchAll".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut registry = RecipeRegistry::with_builtins();
        assert!(matches!(
            registry.register("CATCHALL", "again", text_only),
            Err(Error::DuplicateRecipe { .. })
        ));
        registry.register("TextOnly", "Text files", text_only).unwrap();
        assert_eq!(registry.names(), vec!["CatchAll", "TextOnly"]);
        assert!(matches!(
            registry.register(" ", "nameless", text_only),
            Err(Error::InvalidRecipeName { .. })
        ));
    }

    #[test]
    fn test_guess_prefers_most_datasets() {
        let (_temp_dir, paths) = raw_tree(&["a.txt", "b.txt", "c.bin"]);
        let mut registry = RecipeRegistry::with_builtins();
        registry.register("TextOnly", "Text files", text_only).unwrap();

        let scores = registry.scores(&paths);
        assert_eq!(
            scores,
            vec![
                RecipeScore {
                    name: "CatchAll",
                    datasets: 3
                },
                RecipeScore {
                    name: "TextOnly",
                    datasets: 2
                },
            ]
        );
        assert_eq!(registry.guess(&paths).unwrap().name, "CatchAll");
    }

    #[test]
    fn test_guess_tie_breaks_by_name() {
        let (_temp_dir, paths) = raw_tree(&["a.txt", "b.txt"]);
        let mut registry = RecipeRegistry::new();
        registry.register("Zeta", "Text files", text_only).unwrap();
        registry.register("alpha", "Text files", text_only).unwrap();
        registry.register("Broken", "Never applies", never).unwrap();

        assert_eq!(registry.guess(&paths).unwrap().name, "alpha");
        assert_eq!(registry.scores(&paths)[2].datasets, 0);
    }

    #[test]
    fn test_guess_empty_registry() {
        let (_temp_dir, paths) = raw_tree(&["a.txt"]);
        assert!(RecipeRegistry::new().guess(&paths).is_none());
    }

    #[test]
    fn test_instantiate() {
        let (_temp_dir, paths) = raw_tree(&["a.txt"]);
        let registry = RecipeRegistry::with_builtins();
        let recipe = registry.instantiate("catchall", &paths).unwrap();
        assert_eq!(recipe.datasets().count(), 1);
        assert!(registry.instantiate("nope", &paths).is_err());
    }
}
