//! Merging defaults, a configuration file and command-line flags.
//!
//! Precedence is flag over file over default. Path options from flags are
//! resolved against the working directory captured when the merger was
//! created; path options from a file are resolved against that file's
//! directory. The result is an immutable [`ConfigStore`].

use std::{
    env, fmt,
    path::{Path, PathBuf},
};

use crate::{
    config_file::ConfigFile,
    error::ConfigError,
    locator::find_config_file,
    options::{self, ConfigStore, OptionKind, ValueSource},
    paths::PathResolver,
};

/// Something worth telling the user that did not stop the merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeWarning {
    /// No `.config` file was found between the working directory and the root
    NoConfigFile { searched_from: PathBuf },
    /// `--config` named a file that does not exist; the upward search ran
    /// instead
    ExplicitConfigMissing { path: PathBuf },
    /// The config file set a key that is not a registered option
    UnknownKey { path: PathBuf, line: usize, key: String },
}

impl fmt::Display for MergeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeWarning::NoConfigFile { searched_from } => write!(
                f,
                "no config file found above {searched_from:?}; using defaults and flags only"
            ),
            MergeWarning::ExplicitConfigMissing { path } => write!(
                f,
                "config file {path:?} does not exist; searching upward from the working directory"
            ),
            MergeWarning::UnknownKey { path, line, key } => {
                write!(f, "{path:?} line {line}: ignoring unknown option `{key}`")
            }
        }
    }
}

/// Resolved configuration plus the warnings raised while building it
#[derive(Debug)]
pub struct MergeOutcome {
    pub store:    ConfigStore,
    pub warnings: Vec<MergeWarning>,
}

/// Builds a [`ConfigStore`] for one invocation
#[derive(Debug, Clone)]
pub struct ConfigMerger {
    cwd:      PathBuf,
    resolver: PathResolver,
}

impl ConfigMerger {
    /// `cwd` anchors relative flag values and the config file search
    pub fn new(cwd: impl Into<PathBuf>, resolver: PathResolver) -> Self {
        Self {
            cwd: cwd.into(),
            resolver,
        }
    }

    /// A merger anchored at the process working directory
    pub fn from_current_dir() -> Result<Self, ConfigError> {
        let cwd = env::current_dir().map_err(ConfigError::WorkingDirectory)?;
        Ok(Self::new(cwd, PathResolver::new()))
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// Resolves a directory argument (as given to `config init`) against the
    /// working directory
    pub fn resolve_dir(&self, dir: &str) -> Result<PathBuf, ConfigError> {
        Ok(self.resolver.resolve(dir, &self.cwd)?)
    }

    /// Merges `flags` (option name, raw value) over the config file and the
    /// defaults.
    ///
    /// `explicit_config` is the `--config` value, if one was given.
    pub fn merge<'a, I>(&self, flags: I, explicit_config: Option<&str>) -> Result<MergeOutcome, ConfigError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut store = ConfigStore::with_defaults();
        let mut warnings = Vec::new();

        for (name, raw) in flags {
            let spec = options::spec(name).ok_or_else(|| ConfigError::UnknownOption {
                name: name.to_string(),
            })?;
            if raw.is_empty() {
                return Err(ConfigError::EmptyFlag {
                    name: name.to_string(),
                });
            }
            let value = match spec.kind {
                OptionKind::Path => self.resolver.resolve(raw, &self.cwd)?.display().to_string(),
                OptionKind::Scalar => raw.to_string(),
            };
            tracing::debug!("{} = {:?} (flag)", spec.name, value);
            store.offer(spec.name, value, ValueSource::Flag);
        }

        let config_path = self.locate(explicit_config, &mut warnings)?;
        match &config_path {
            Some(path) => {
                tracing::info!("Using config file {:?}", path);
                let file = ConfigFile::load(path)?;
                self.apply_file(&file, &mut store, &mut warnings)?;
            }
            None => warnings.push(MergeWarning::NoConfigFile {
                searched_from: self.cwd.clone(),
            }),
        }
        store.set_config_file(config_path);

        for warning in &warnings {
            tracing::warn!("{}", warning);
        }
        Ok(MergeOutcome { store, warnings })
    }

    fn locate(
        &self,
        explicit: Option<&str>,
        warnings: &mut Vec<MergeWarning>,
    ) -> Result<Option<PathBuf>, ConfigError> {
        if let Some(raw) = explicit.filter(|raw| !raw.is_empty()) {
            let path = self.resolver.resolve(raw, &self.cwd)?;
            if path.is_file() {
                return Ok(Some(path));
            }
            warnings.push(MergeWarning::ExplicitConfigMissing { path });
        }
        Ok(find_config_file(&self.cwd))
    }

    fn apply_file(
        &self,
        file: &ConfigFile,
        store: &mut ConfigStore,
        warnings: &mut Vec<MergeWarning>,
    ) -> Result<(), ConfigError> {
        let base = file.base_dir();
        for entry in file.entries() {
            let Some(spec) = options::spec(&entry.key) else {
                warnings.push(MergeWarning::UnknownKey {
                    path: file.path().to_path_buf(),
                    line: entry.line,
                    key:  entry.key.clone(),
                });
                continue;
            };
            if entry.value.is_empty() {
                continue;
            }
            if store.source(spec.name) == Some(ValueSource::Flag) {
                tracing::debug!("{} from {:?} overridden by flag", spec.name, file.path());
                continue;
            }
            let value = match spec.kind {
                OptionKind::Path => self.resolver.resolve(&entry.value, base)?.display().to_string(),
                OptionKind::Scalar => entry.value.clone(),
            };
            tracing::debug!("{} = {:?} (file)", spec.name, value);
            store.offer(spec.name, value, ValueSource::File);
        }
        Ok(())
    }
}
