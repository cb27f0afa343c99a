//! Reading and writing flat `key = value` configuration files.
//!
//! Only one option per line is supported. Comments (`#` or `;`) and blank
//! lines are kept verbatim when a file is rewritten.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use crate::{
    error::ConfigError,
    identity::Role,
    locator::{config_file_in, DEFAULT_CONFIG_FILE_NAME},
    options::{self, ConfigStore, ValueSource},
};

/// A `key = value` entry and the line it was read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key:   String,
    pub value: String,
    pub line:  usize,
}

#[derive(Debug, Clone)]
enum Line {
    Entry(Entry),
    Verbatim(String),
}

/// An on-disk configuration file
#[derive(Debug, Clone)]
pub struct ConfigFile {
    path:  PathBuf,
    lines: Vec<Line>,
}

impl ConfigFile {
    /// Reads and parses the file at `path`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &text)
    }

    /// Parses `text` as the contents of `path`
    pub fn parse(path: &Path, text: &str) -> Result<Self, ConfigError> {
        let malformed = |line: usize, reason: String| ConfigError::Malformed {
            path: path.to_path_buf(),
            line,
            reason,
        };

        let mut lines = Vec::new();
        let mut seen: HashMap<String, usize> = HashMap::new();

        for (index, raw) in text.lines().enumerate() {
            let number = index + 1;
            let trimmed = raw.trim();

            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
                lines.push(Line::Verbatim(raw.to_string()));
                continue;
            }
            if trimmed.starts_with('[') {
                return Err(malformed(number, format!("sections are not supported: {trimmed}")));
            }

            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(malformed(number, format!("expected `key = value`, found {trimmed:?}")));
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(malformed(number, "missing key before `=`".to_string()));
            }
            if let Some(first) = seen.insert(key.to_string(), number) {
                return Err(malformed(
                    number,
                    format!("duplicate key `{key}` (first set on line {first})"),
                ));
            }

            lines.push(Line::Entry(Entry {
                key:   key.to_string(),
                value: unquote(value.trim()).to_string(),
                line:  number,
            }));
        }

        Ok(Self {
            path: path.to_path_buf(),
            lines,
        })
    }

    /// Opens `dir/.config` for updating, or starts an empty one there.
    ///
    /// `dir` must be an absolute path to an existing directory.
    pub fn create_or_open(dir: &Path) -> Result<Self, ConfigError> {
        if !dir.is_dir() {
            return Err(ConfigError::MissingDirectory {
                dir: dir.to_path_buf(),
            });
        }
        match config_file_in(dir) {
            Some(existing) => {
                tracing::info!("Config file {:?} exists, updating in place", existing);
                Self::load(&existing)
            }
            None => Ok(Self {
                path:  dir.join(DEFAULT_CONFIG_FILE_NAME),
                lines: Vec::new(),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory relative paths in this file are anchored at
    pub fn base_dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("/"))
    }

    pub fn entries(&self) -> impl Iterator<Item = &Entry> + '_ {
        self.lines.iter().filter_map(|line| match line {
            Line::Entry(entry) => Some(entry),
            Line::Verbatim(_) => None,
        })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries()
            .find(|entry| entry.key == key)
            .map(|entry| entry.value.as_str())
    }

    /// Sets `key`, replacing an existing entry in place or appending a new one
    pub fn set(&mut self, key: &str, value: &str) {
        for line in &mut self.lines {
            if let Line::Entry(entry) = line {
                if entry.key == key {
                    entry.value = value.to_string();
                    return;
                }
            }
        }
        let line = self.lines.len() + 1;
        self.lines.push(Line::Entry(Entry {
            key: key.to_string(),
            value: value.to_string(),
            line,
        }));
    }

    /// Copies every option `role` uses that did not come from a default.
    ///
    /// Path options are already absolute in the store, so the written file
    /// does not depend on where it is later read from. Values with control
    /// characters cannot be represented on one line and are refused before
    /// anything is changed.
    pub fn update_from(&mut self, store: &ConfigStore, role: Role) -> Result<Vec<&'static str>, ConfigError> {
        let selected: Vec<_> = store
            .iter()
            .filter(|option| {
                options::spec(option.name).is_some_and(|spec| spec.used_by(role))
                    && option.source != ValueSource::Default
                    && option.is_set()
            })
            .collect();

        if let Some(option) = selected.iter().find(|option| option.value.chars().any(char::is_control)) {
            return Err(ConfigError::InvalidValue {
                name:   option.name,
                value:  option.value.clone(),
                reason: "control characters cannot be written to a config file".into(),
            });
        }

        let mut written = Vec::with_capacity(selected.len());
        for option in selected {
            self.set(option.name, &option.value);
            written.push(option.name);
        }
        Ok(written)
    }

    /// File contents as they will be written
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                Line::Entry(entry) => {
                    out.push_str(&entry.key);
                    out.push_str(" = ");
                    out.push_str(&quote(&entry.value));
                }
                Line::Verbatim(text) => out.push_str(text),
            }
            out.push('\n');
        }
        out
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        fs::write(&self.path, self.render()).map_err(|source| ConfigError::Write {
            path: self.path.clone(),
            source,
        })?;
        tracing::info!("Config written to {:?}", self.path);
        Ok(())
    }
}

fn unquote(value: &str) -> &str {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

fn quote(value: &str) -> String {
    let needs_quotes = value != value.trim() || value.starts_with('"');
    if needs_quotes {
        format!("\"{value}\"")
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<ConfigFile, ConfigError> {
        ConfigFile::parse(Path::new("/etc/tollgate/.config"), text)
    }

    #[test]
    fn parses_entries_comments_and_quotes() {
        let file = parse(
            "# tollgate\n\
             ; legacy comment\n\
             \n\
             host = tls.example.com\n\
             port=4443\n\
             root-cert = \"  spaced.pem \"\n\
             root-name =\n",
        )
        .unwrap();

        let entries: Vec<_> = file.entries().map(|e| (e.key.as_str(), e.value.as_str(), e.line)).collect();
        assert_eq!(
            entries,
            vec![
                ("host", "tls.example.com", 4),
                ("port", "4443", 5),
                ("root-cert", "  spaced.pem ", 6),
                ("root-name", "", 7),
            ]
        );
        assert_eq!(file.base_dir(), Path::new("/etc/tollgate"));
    }

    #[test]
    fn rejects_lines_without_equals() {
        let err = parse("host = a\njust some words\n").unwrap_err();
        match err {
            ConfigError::Malformed { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejects_sections_empty_keys_and_duplicates() {
        assert!(matches!(parse("[server]\nhost = a\n"), Err(ConfigError::Malformed { line: 1, .. })));
        assert!(matches!(parse(" = value\n"), Err(ConfigError::Malformed { line: 1, .. })));
        assert!(matches!(
            parse("host = a\nport = 1\nhost = b\n"),
            Err(ConfigError::Malformed { line: 3, .. })
        ));
    }

    #[test]
    fn value_may_contain_equals_and_hash() {
        let file = parse("root-name = CN=Root #1\n").unwrap();
        assert_eq!(file.get("root-name"), Some("CN=Root #1"));
    }

    #[test]
    fn set_replaces_in_place_and_keeps_comments() {
        let mut file = parse("# keep me\nhost = old\n").unwrap();
        file.set("host", "new");
        file.set("port", "9000");
        file.set("root-name", " padded ");
        assert_eq!(
            file.render(),
            "# keep me\nhost = new\nport = 9000\nroot-name = \" padded \"\n"
        );

        let reparsed = parse(&file.render()).unwrap();
        assert_eq!(reparsed.get("root-name"), Some(" padded "));
    }

    #[test]
    fn update_from_refuses_multiline_values() {
        let mut store = ConfigStore::with_defaults();
        store.offer("host", "tls.example".into(), ValueSource::Flag);
        store.offer("root-name", "a\nb".into(), ValueSource::Flag);

        let mut file = parse("# keep me\n").unwrap();
        let err = file.update_from(&store, Role::Client).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { name: "root-name", .. }));
        assert_eq!(file.render(), "# keep me\n");

        let mut store = ConfigStore::with_defaults();
        store.offer("host", "tls.example".into(), ValueSource::Flag);
        store.offer("root-name", "CN=Root".into(), ValueSource::File);
        assert_eq!(file.update_from(&store, Role::Client).unwrap(), vec!["host", "root-name"]);
        assert_eq!(file.render(), "# keep me\nhost = tls.example\nroot-name = CN=Root\n");
    }

    #[test]
    fn create_or_open_requires_existing_directory() {
        let root = tempfile::tempdir().unwrap();
        let missing = root.path().join("nope");
        assert!(matches!(
            ConfigFile::create_or_open(&missing),
            Err(ConfigError::MissingDirectory { .. })
        ));

        let fresh = ConfigFile::create_or_open(root.path()).unwrap();
        assert_eq!(fresh.path(), root.path().join(DEFAULT_CONFIG_FILE_NAME));
        assert_eq!(fresh.entries().count(), 0);

        fs::write(fresh.path(), "port = 1234\n").unwrap();
        let existing = ConfigFile::create_or_open(root.path()).unwrap();
        assert_eq!(existing.get("port"), Some("1234"));
    }
}
