//! Error types for datacast_core.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using datacast_core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while configuring or running a cast.
///
/// Everything in here is fatal for the invocation that produced it. Failures
/// that only affect a single dataset are reported as [`ConversionError`] and
/// collected into the cast result instead.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error occurred during file operations.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// A raw or target root is missing or has the wrong file type.
    #[error("Invalid path {path}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    /// No recipe registered under the requested name.
    #[error("Unknown recipe '{name}'; available recipes: {}", available.join(", "))]
    UnknownRecipe {
        name: String,
        available: Vec<String>,
    },

    /// A recipe with the same (case-insensitive) name is already registered.
    #[error("Recipe '{name}' is already registered")]
    DuplicateRecipe { name: String },

    /// A recipe cannot be registered under this name.
    #[error("Invalid recipe name '{name}': {reason}")]
    InvalidRecipeName { name: String, reason: String },

    /// An option string could not be parsed or coerced.
    #[error("Invalid option: {reason}")]
    InvalidOption { reason: String },

    /// The recipe does not declare the requested option.
    #[error("Recipe does not implement option '{key}'; available options: [{}]", valid.join(", "))]
    UnknownOption { key: String, valid: Vec<String> },

    /// Invalid digest format or encoding.
    #[error("Invalid digest: {reason}")]
    InvalidDigest { reason: String },

    /// Unsupported digest algorithm.
    #[error("Unsupported algorithm: {algorithm}")]
    UnsupportedAlgorithm { algorithm: String },

    /// A settings file or value could not be understood.
    #[error("Invalid settings: {reason}")]
    InvalidSettings { reason: String },

    /// An I/O operation kept failing after every retry.
    #[error("{operation} of {path} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: &'static str,
        path: PathBuf,
        attempts: u32,
        source: std::io::Error,
    },

    /// A committed file could not be verified against its source.
    #[error("Verified transfer of {source_path} to {target} failed")]
    TransferFailed { source_path: PathBuf, target: PathBuf },

    /// Directory traversal failed.
    #[error("Walk error: {reason}")]
    Walk { reason: String },
}

impl Error {
    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an UnknownRecipe error.
    pub fn unknown_recipe(name: impl Into<String>, available: Vec<String>) -> Self {
        Error::UnknownRecipe {
            name: name.into(),
            available,
        }
    }

    /// Create a DuplicateRecipe error.
    pub fn duplicate_recipe(name: impl Into<String>) -> Self {
        Error::DuplicateRecipe { name: name.into() }
    }

    /// Create an InvalidRecipeName error.
    pub fn invalid_recipe_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidRecipeName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create an InvalidOption error.
    pub fn invalid_option(reason: impl Into<String>) -> Self {
        Error::InvalidOption {
            reason: reason.into(),
        }
    }

    /// Create an UnknownOption error. The valid keys are reported sorted.
    pub fn unknown_option(key: impl Into<String>, mut valid: Vec<String>) -> Self {
        valid.sort();
        Error::UnknownOption {
            key: key.into(),
            valid,
        }
    }

    /// Create an InvalidDigest error.
    pub fn invalid_digest(reason: impl Into<String>) -> Self {
        Error::InvalidDigest {
            reason: reason.into(),
        }
    }

    /// Create an UnsupportedAlgorithm error.
    pub fn unsupported_algorithm(algorithm: impl Into<String>) -> Self {
        Error::UnsupportedAlgorithm {
            algorithm: algorithm.into(),
        }
    }

    /// Create an InvalidSettings error.
    pub fn invalid_settings(reason: impl Into<String>) -> Self {
        Error::InvalidSettings {
            reason: reason.into(),
        }
    }

    /// Create a TransferFailed error.
    pub fn transfer_failed(source_path: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Error::TransferFailed {
            source_path: source_path.into(),
            target: target.into(),
        }
    }

    /// Whether this error breaks the verified-copy guarantee, as opposed to
    /// being a configuration problem detected before anything was copied.
    pub fn is_transfer_failure(&self) -> bool {
        matches!(
            self,
            Error::TransferFailed { .. } | Error::RetriesExhausted { .. }
        )
    }
}

/// Failure to convert a single dataset.
///
/// The orchestrator records these per dataset and keeps going.
#[derive(Error, Debug)]
pub enum ConversionError {
    /// Reading the raw files or writing the staged file failed.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// The recipe needs an option value that was not supplied.
    #[error("Missing required option '{name}'")]
    MissingOption { name: String },

    /// The raw data does not look like what the recipe expects.
    #[error("Malformed input {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    /// A core operation (e.g. digesting) failed inside the recipe.
    #[error(transparent)]
    Core(#[from] Error),
}

impl ConversionError {
    /// Create a Malformed error.
    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        ConversionError::Malformed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a MissingOption error.
    pub fn missing_option(name: impl Into<String>) -> Self {
        ConversionError::MissingOption { name: name.into() }
    }
}

// Additional From implementations for external error types

impl From<ignore::Error> for Error {
    fn from(err: ignore::Error) -> Self {
        // ignore::Error can wrap an io::Error or be a path/loop error
        match err.io_error() {
            Some(io_err) => Error::Io {
                source: std::io::Error::new(io_err.kind(), err.to_string()),
            },
            None => Error::Walk {
                reason: err.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_option_lists_sorted_keys() {
        let err = Error::unknown_option(
            "colour",
            vec!["wavelength".to_string(), "medium_index".to_string()],
        );
        assert_eq!(
            err.to_string(),
            "Recipe does not implement option 'colour'; available options: [medium_index, wavelength]"
        );
    }

    #[test]
    fn test_unknown_recipe_lists_available() {
        let err = Error::unknown_recipe("nope", vec!["CatchAll".to_string()]);
        assert!(err.to_string().contains("CatchAll"));
    }

    #[test]
    fn test_transfer_failure_classification() {
        assert!(Error::transfer_failed("/a", "/b").is_transfer_failure());
        assert!(!Error::invalid_option("x").is_transfer_failure());
    }
}
