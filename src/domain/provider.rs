//! The seam between the analysis engine and the document parsers.
//!
//! A [`Provider`] turns one document (or directory, or database, ...) into the
//! requirements of a [`RequirementSource`]. Providers are created from
//! configuration through a [`ProviderRegistry`].

use std::{collections::BTreeMap, fmt, path::Path, path::PathBuf, sync::Arc};

use crate::{domain::RequirementSource, storage::LoadError};

/// Fills a [`RequirementSource`] with requirements and stub references.
///
/// Providers are shared between threads: the engine parses every source on
/// the rayon pool.
pub trait Provider: Send + Sync {
    /// Identifier of the provider, as used in configuration files.
    fn name(&self) -> &str;

    /// Parse the underlying document into `source`.
    ///
    /// The source is cleared before this is called. Providers add
    /// requirements with [`RequirementSource::add_requirement`] and references
    /// with [`Requirement::add_reference`](crate::Requirement::add_reference).
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be read or is malformed.
    fn parse(&self, source: &mut RequirementSource) -> Result<(), ProviderError>;
}

/// A provider that adds nothing.
///
/// Useful for sources that are filled by hand.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProvider;

impl Provider for NullProvider {
    fn name(&self) -> &str {
        "null"
    }

    fn parse(&self, _source: &mut RequirementSource) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// A provider backed by a closure.
pub struct FnProvider<F> {
    name: String,
    parse: F,
}

impl<F> FnProvider<F>
where
    F: Fn(&mut RequirementSource) -> Result<(), ProviderError> + Send + Sync,
{
    /// Wraps `parse` as a provider called `name`.
    pub fn new(name: impl Into<String>, parse: F) -> Self {
        Self {
            name: name.into(),
            parse,
        }
    }
}

impl<F> Provider for FnProvider<F>
where
    F: Fn(&mut RequirementSource) -> Result<(), ProviderError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn parse(&self, source: &mut RequirementSource) -> Result<(), ProviderError> {
        (self.parse)(source)
    }
}

impl<F> fmt::Debug for FnProvider<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnProvider")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Errors raised by providers.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The provider's configuration is unusable.
    #[error("invalid settings for provider '{provider}': {message}")]
    Settings {
        /// The provider identifier.
        provider: String,
        /// What is wrong with the settings.
        message: String,
    },
    /// The document root does not exist or cannot be read.
    #[error("cannot read {}", path.display())]
    Io {
        /// The path that could not be read.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
    /// A single requirement file is malformed.
    #[error("failed to load requirement from {}", path.display())]
    Load {
        /// The offending file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: LoadError,
    },
    /// Any other failure.
    #[error("{0}")]
    Other(String),
}

/// Builds a provider from its settings table.
///
/// The second argument is the directory relative paths in the settings are
/// resolved against (usually the directory of the configuration file).
pub type ProviderFactory =
    Box<dyn Fn(&toml::Table, &Path) -> Result<Arc<dyn Provider>, ProviderError> + Send + Sync>;

/// Maps provider identifiers to factories.
///
/// The default registry knows the `markdown` provider.
pub struct ProviderRegistry {
    factories: BTreeMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    /// A registry with no providers.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Register a factory under `name`.
    ///
    /// Returns `true` if an existing factory was replaced.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> bool
    where
        F: Fn(&toml::Table, &Path) -> Result<Arc<dyn Provider>, ProviderError>
            + Send
            + Sync
            + 'static,
    {
        self.factories
            .insert(name.into(), Box::new(factory))
            .is_some()
    }

    /// Whether a provider called `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// The registered provider identifiers, in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Instantiate the provider called `name`.
    ///
    /// Returns `None` if no such provider is registered.
    #[must_use]
    pub fn create(
        &self,
        name: &str,
        settings: &toml::Table,
        base: &Path,
    ) -> Option<Result<Arc<dyn Provider>, ProviderError>> {
        self.factories
            .get(name)
            .map(|factory| factory(settings, base))
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(
            crate::storage::MarkdownProvider::NAME,
            |settings: &toml::Table, base: &Path| {
                let provider = crate::storage::MarkdownProvider::from_settings(settings, base)?;
                Ok(Arc::new(provider) as Arc<dyn Provider>)
            },
        );
        registry
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_knows_markdown() {
        let registry = ProviderRegistry::default();
        assert!(registry.contains("markdown"));
        assert!(!registry.contains("excel"));
    }

    #[test]
    fn unknown_provider_is_none() {
        let registry = ProviderRegistry::empty();
        assert!(
            registry
                .create("markdown", &toml::Table::new(), Path::new("."))
                .is_none()
        );
    }

    #[test]
    fn registered_factory_is_used() {
        let mut registry = ProviderRegistry::empty();
        assert!(!registry.register("null", |_: &toml::Table, _: &Path| {
            Ok(Arc::new(NullProvider) as Arc<dyn Provider>)
        }));

        let provider = registry
            .create("null", &toml::Table::new(), Path::new("."))
            .unwrap()
            .unwrap();

        assert_eq!(provider.name(), "null");
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["null"]);
    }
}
