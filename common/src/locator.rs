//! Upward search for the nearest enclosing configuration file.

use std::path::{Path, PathBuf};

/// File name searched for when no config file is given explicitly
pub const DEFAULT_CONFIG_FILE_NAME: &str = ".config";

/// Returns `dir/.config` if it is a regular file
pub fn config_file_in(dir: &Path) -> Option<PathBuf> {
    let candidate = dir.join(DEFAULT_CONFIG_FILE_NAME);
    candidate.is_file().then_some(candidate)
}

/// Walks from `start` towards the filesystem root and returns the first
/// `.config` file found.
pub fn find_config_file(start: &Path) -> Option<PathBuf> {
    for dir in start.ancestors() {
        if let Some(found) = config_file_in(dir) {
            tracing::debug!("Found config file at {:?}", found);
            return Some(found);
        }
    }
    tracing::debug!("No {} found above {:?}", DEFAULT_CONFIG_FILE_NAME, start);
    None
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn finds_nearest_enclosing_config_file() {
        let root = tempfile::tempdir().unwrap();
        let a = root.path().join("a");
        let deepest = a.join("b/c");
        fs::create_dir_all(&deepest).unwrap();
        fs::write(a.join(DEFAULT_CONFIG_FILE_NAME), "host = example\n").unwrap();

        assert_eq!(
            find_config_file(&deepest),
            Some(a.join(DEFAULT_CONFIG_FILE_NAME))
        );
        assert_eq!(find_config_file(&a), Some(a.join(DEFAULT_CONFIG_FILE_NAME)));
    }

    #[test]
    fn nearer_file_shadows_farther_one() {
        let root = tempfile::tempdir().unwrap();
        let a = root.path().join("a");
        let b = a.join("b");
        fs::create_dir_all(b.join("c")).unwrap();
        fs::write(a.join(DEFAULT_CONFIG_FILE_NAME), "").unwrap();
        fs::write(b.join(DEFAULT_CONFIG_FILE_NAME), "").unwrap();

        assert_eq!(
            find_config_file(&b.join("c")),
            Some(b.join(DEFAULT_CONFIG_FILE_NAME))
        );
    }

    #[test]
    fn directory_named_like_the_config_file_is_skipped() {
        let root = tempfile::tempdir().unwrap();
        let a = root.path().join("a");
        let deepest = a.join("b");
        fs::create_dir_all(deepest.join(DEFAULT_CONFIG_FILE_NAME)).unwrap();
        fs::write(a.join(DEFAULT_CONFIG_FILE_NAME), "").unwrap();

        assert_eq!(
            find_config_file(&deepest),
            Some(a.join(DEFAULT_CONFIG_FILE_NAME))
        );
    }

    #[test]
    fn tree_without_config_file_yields_none() {
        let root = tempfile::tempdir().unwrap();
        let deepest = root.path().join("x/y/z");
        fs::create_dir_all(&deepest).unwrap();

        // Only the temporary subtree is under our control; an ancestor of the
        // temp dir could hold a stray `.config` file.
        let found = find_config_file(&deepest);
        assert!(found.map_or(true, |p| !p.starts_with(root.path())));
    }
}
