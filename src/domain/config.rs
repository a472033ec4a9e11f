use std::path::Path;

use non_empty_string::NonEmptyString;
use serde::{Deserialize, Serialize};

/// Configuration of a traceability analysis.
///
/// Lists the requirement sources, the provider that parses each of them, and
/// which sources each one covers. Source order is preserved and determines
/// report order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Versions", into = "Versions")]
pub struct Config {
    sources: Vec<SourceConfig>,
}

/// Configuration of a single requirement source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Unique display name of the source.
    pub name: NonEmptyString,

    /// Identifier of the provider that parses this source (e.g. `markdown`).
    pub provider: String,

    /// Names of the sources this source covers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub covers: Vec<String>,

    /// Provider-specific settings.
    #[serde(default, skip_serializing_if = "toml::Table::is_empty")]
    pub settings: toml::Table,
}

impl SourceConfig {
    /// Creates a source entry with no covers and no settings.
    #[must_use]
    pub fn new(name: NonEmptyString, provider: impl Into<String>) -> Self {
        Self {
            name,
            provider: provider.into(),
            covers: Vec::new(),
            settings: toml::Table::new(),
        }
    }

    /// The name of the source.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }
}

/// Errors that can occur when reading or writing a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read or written.
    #[error("failed to access config file: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid configuration.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    /// The configuration could not be serialised.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

impl Config {
    /// Loads the configuration from a TOML file at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or if the TOML content is
    /// invalid.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Saves the configuration to a TOML file at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be serialized to TOML or if
    /// the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// The configured sources, in order.
    #[must_use]
    pub fn sources(&self) -> &[SourceConfig] {
        &self.sources
    }

    /// Looks up a source entry by name.
    #[must_use]
    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|source| source.name() == name)
    }

    /// Mutable lookup of a source entry by name.
    pub fn source_mut(&mut self, name: &str) -> Option<&mut SourceConfig> {
        self.sources.iter_mut().find(|source| source.name() == name)
    }

    /// Appends a source entry.
    ///
    /// Names must be unique. Returns `false`, leaving the configuration
    /// unchanged, if a source with the same name already exists.
    pub fn add_source(&mut self, source: SourceConfig) -> bool {
        if self.source(source.name()).is_some() {
            false
        } else {
            self.sources.push(source);
            true
        }
    }

    /// Removes a source entry, and every cover declaration naming it.
    ///
    /// Returns `true` if the source existed.
    pub fn remove_source(&mut self, name: &str) -> bool {
        let before = self.sources.len();
        self.sources.retain(|source| source.name() != name);
        if self.sources.len() == before {
            return false;
        }
        for source in &mut self.sources {
            source.covers.retain(|covered| covered != name);
        }
        true
    }
}

/// The serialized versions of the configuration.
/// This allows for future changes to the configuration format and to the domain
/// type without breaking compatibility.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "_version")]
enum Versions {
    #[serde(rename = "1")]
    V1 {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        sources: Vec<SourceConfig>,
    },
}

impl From<Versions> for Config {
    fn from(versions: Versions) -> Self {
        match versions {
            Versions::V1 { sources } => Self { sources },
        }
    }
}

impl From<Config> for Versions {
    fn from(config: Config) -> Self {
        Self::V1 {
            sources: config.sources,
        }
    }
}
