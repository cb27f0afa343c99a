//! Path resolution against an explicit base directory.
//!
//! Relative paths from the command line are anchored at the working directory,
//! while relative paths inside a configuration file are anchored at the
//! directory holding that file. Both go through [`PathResolver::resolve`], which
//! never touches the process working directory.

use std::path::{Component, Path, PathBuf};

use crate::error::PathResolutionError;

/// Expands `~` and anchors relative paths at a caller-supplied base
#[derive(Debug, Clone)]
pub struct PathResolver {
    home: Option<PathBuf>,
}

impl Default for PathResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl PathResolver {
    /// Creates a resolver using the current user's home directory
    pub fn new() -> Self {
        Self {
            home: dirs::home_dir(),
        }
    }

    /// Creates a resolver with an explicit home directory
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self {
            home: Some(home.into()),
        }
    }

    pub fn home(&self) -> Option<&Path> {
        self.home.as_deref()
    }

    /// Resolves `path` to an absolute, normalized path.
    ///
    /// `base` must be an existing directory even when `path` is absolute or
    /// home-relative, so that a bad base is reported consistently.
    pub fn resolve(&self, path: &str, base: &Path) -> Result<PathBuf, PathResolutionError> {
        if path.is_empty() {
            return Err(PathResolutionError::EmptyPath);
        }
        if !base.is_absolute() || !base.is_dir() {
            return Err(PathResolutionError::InvalidBase {
                path: path.to_string(),
                base: base.to_path_buf(),
            });
        }

        if let Some(rest) = home_relative(path) {
            let home = self
                .home
                .as_deref()
                .ok_or_else(|| PathResolutionError::HomeUnavailable {
                    path: path.to_string(),
                })?;
            return Ok(normalize(&home.join(rest)));
        }

        let candidate = Path::new(path);
        if candidate.is_absolute() {
            return Ok(normalize(candidate));
        }
        Ok(normalize(&base.join(candidate)))
    }
}

/// Returns the remainder after `~` for `~` and `~/...`; `~user` is not expanded
fn home_relative(path: &str) -> Option<&str> {
    let rest = path.strip_prefix('~')?;
    if rest.is_empty() {
        return Some("");
    }
    rest.strip_prefix(std::path::is_separator)
        .map(|r| r.trim_start_matches(std::path::is_separator))
}

/// Lexically removes `.` and `..` components of an absolute path
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            // `pop` on the root is a no-op, so `/..` stays `/`
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}
