//! Filesystem walking and raw-to-target path mirroring.

use crate::error::{Error, Result};
use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

/// Operating-system noise that is never transferred.
pub const IGNORED_FILE_NAMES: &[&str] = &[".DS_Store", "._.DS_Store", "Thumbs.db"];

/// Whether `path` is named like one of the universal noise files or one of
/// the `extra` names.
pub fn is_ignored(path: &Path, extra: &[&str]) -> bool {
    let Some(name) = path.file_name().and_then(OsStr::to_str) else {
        return false;
    };
    IGNORED_FILE_NAMES.contains(&name) || extra.contains(&name)
}

/// Lazily walk every regular file below `root`, depth first, sorted by name.
///
/// Hidden files are included and no ignore files are honoured: raw data
/// trees are transferred as they are. Symlinks are not followed, but a
/// symlink that points at a regular file is yielded like one.
pub fn walk_files(root: &Path) -> impl Iterator<Item = Result<PathBuf>> + use<> {
    ignore::WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .build()
        .filter_map(|entry| match entry {
            Ok(entry) => {
                let is_dir = entry.file_type().is_none_or(|t| t.is_dir());
                (!is_dir && entry.path().is_file()).then(|| Ok(entry.into_path()))
            }
            Err(e) => Some(Err(Error::from(e))),
        })
}

/// Absolute form of `path` with `.` and `..` resolved lexically.
///
/// Symlinks are left alone: a link and the file it points at are different
/// raw entries and get different keys.
pub fn lexical_key(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut key = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                key.pop();
            }
            other => key.push(other),
        }
    }
    key
}

/// Raw files claimed by datasets, keyed by [`lexical_key`].
#[derive(Debug, Default)]
pub(crate) struct ClaimedFiles {
    keys: HashSet<PathBuf>,
}

impl ClaimedFiles {
    pub(crate) fn extend(&mut self, files: &[PathBuf]) {
        self.keys.extend(files.iter().map(|p| lexical_key(p)));
    }

    pub(crate) fn contains(&self, path: &Path) -> bool {
        self.keys.contains(&lexical_key(path))
    }
}

/// Path of `path` relative to `root`.
pub fn relative_to(root: &Path, path: &Path) -> Result<PathBuf> {
    path.strip_prefix(root)
        .map(Path::to_path_buf)
        .map_err(|_| Error::invalid_path(path, format!("not below {}", root.display())))
}

/// Re-root `path` from below `from` to below `to`.
pub fn mirror(from: &Path, to: &Path, path: &Path) -> Result<PathBuf> {
    Ok(to.join(relative_to(from, path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn collect(root: &Path) -> Vec<PathBuf> {
        walk_files(root)
            .map(|p| relative_to(root, &p.unwrap()).unwrap())
            .collect()
    }

    #[test]
    fn test_walk_nested_sorted() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("hans/peter")).unwrap();
        fs::create_dir_all(root.join("fliege")).unwrap();
        fs::write(root.join("hans/peter/b.txt"), b"world!").unwrap();
        fs::write(root.join("hans/peter/a.txt"), b"hello ").unwrap();
        fs::write(root.join("fliege/1.txt"), b"lorem ").unwrap();
        fs::write(root.join("top.txt"), b"top").unwrap();

        assert_eq!(
            collect(root),
            vec![
                PathBuf::from("fliege/1.txt"),
                PathBuf::from("hans/peter/a.txt"),
                PathBuf::from("hans/peter/b.txt"),
                PathBuf::from("top.txt"),
            ]
        );
    }

    #[test]
    fn test_walk_includes_hidden_and_gitignored() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join(".hidden"), b"h").unwrap();
        fs::write(root.join(".gitignore"), b"*.log\n").unwrap();
        fs::write(root.join("run.log"), b"log").unwrap();

        let files = collect(root);
        assert!(files.contains(&PathBuf::from(".hidden")));
        assert!(files.contains(&PathBuf::from("run.log")));
        assert!(files.contains(&PathBuf::from(".gitignore")));
    }

    #[test]
    fn test_walk_skips_empty_directories() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("a/b/c")).unwrap();
        assert!(collect(temp_dir.path()).is_empty());
    }

    #[test]
    fn test_is_ignored() {
        assert!(is_ignored(Path::new("/raw/x/.DS_Store"), &[]));
        assert!(is_ignored(Path::new("Thumbs.db"), &[]));
        assert!(!is_ignored(Path::new("/raw/data.txt"), &[]));
        assert!(is_ignored(Path::new("/raw/settings.bak"), &["settings.bak"]));
        // Only exact names match.
        assert!(!is_ignored(Path::new("/raw/my.DS_Store"), &[]));
    }

    #[test]
    fn test_mirror() {
        let target = mirror(
            Path::new("/raw"),
            Path::new("/target"),
            Path::new("/raw/hans/peter/a.txt"),
        )
        .unwrap();
        assert_eq!(target, PathBuf::from("/target/hans/peter/a.txt"));

        assert!(mirror(Path::new("/raw"), Path::new("/t"), Path::new("/elsewhere/a")).is_err());
    }

    #[test]
    fn test_lexical_key_resolves_dots() {
        assert_eq!(
            lexical_key(Path::new("/raw/./hans/../fliege/1.txt")),
            PathBuf::from("/raw/fliege/1.txt")
        );
        assert!(lexical_key(Path::new("relative.txt")).is_absolute());
    }

    #[cfg(unix)]
    #[test]
    fn test_claimed_files_do_not_follow_symlinks() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("a.txt"), b"a").unwrap();
        std::os::unix::fs::symlink(root.join("a.txt"), root.join("alias.dat")).unwrap();

        let mut claimed = ClaimedFiles::default();
        claimed.extend(&[root.join("sub/../a.txt")]);
        assert!(claimed.contains(&root.join("a.txt")));
        assert!(!claimed.contains(&root.join("alias.dat")));
    }

    // Property-based tests
    use proptest::prelude::*;

    proptest! {
        /// Mirroring preserves the relative directory structure.
        #[test]
        fn prop_mirror_preserves_relative_path(
            parts in prop::collection::vec("[a-zA-Z0-9_]{1,12}", 1..6)
        ) {
            let relative: PathBuf = parts.iter().collect();
            let raw = Path::new("/data/raw");
            let target = Path::new("/mnt/target");
            let mirrored = mirror(raw, target, &raw.join(&relative))?;
            prop_assert_eq!(relative_to(target, &mirrored)?, relative);
        }
    }
}
