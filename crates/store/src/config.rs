//! Repository configuration.

use std::path::PathBuf;

use serde::Deserialize;

/// Behaviour switches shared by every repository kind.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Name used in logs.
    pub name: String,
    /// Commit after every session `add`/`remove`.
    pub autocommit: bool,
    /// Assign pending ids before reads.
    pub autoflush: bool,
    /// Root directory of the file-backed repository.
    pub directory: PathBuf,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            autocommit: false,
            autoflush: true,
            directory: PathBuf::from("."),
        }
    }
}

impl RepositoryConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Defaults overridden by `QUARRY_REPOSITORY_NAME`, `QUARRY_AUTOCOMMIT`,
    /// `QUARRY_AUTOFLUSH` and `QUARRY_DATA_DIR`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(name) = lookup("QUARRY_REPOSITORY_NAME") {
            config.name = name;
        }
        if let Some(flag) = lookup("QUARRY_AUTOCOMMIT") {
            config.autocommit = parse_flag("QUARRY_AUTOCOMMIT", &flag, config.autocommit);
        }
        if let Some(flag) = lookup("QUARRY_AUTOFLUSH") {
            config.autoflush = parse_flag("QUARRY_AUTOFLUSH", &flag, config.autoflush);
        }
        if let Some(dir) = lookup("QUARRY_DATA_DIR") {
            config.directory = PathBuf::from(dir);
        }
        config
    }

    pub fn with_autocommit(mut self, autocommit: bool) -> Self {
        self.autocommit = autocommit;
        self
    }

    pub fn with_autoflush(mut self, autoflush: bool) -> Self {
        self.autoflush = autoflush;
        self
    }

    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = directory.into();
        self
    }
}

fn parse_flag(key: &str, raw: &str, default: bool) -> bool {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => {
            tracing::warn!(key, value = raw, default, "unparsable flag, using default");
            default
        }
    }
}
