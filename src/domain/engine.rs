//! The analysis engine.
//!
//! The [`Engine`] owns the ordered list of configured sources. It parses them
//! in parallel, resolves the stub references of each covering source against
//! the sources it covers, and records coverage on the covered side.

use std::{
    collections::BTreeSet,
    fmt,
    path::Path,
    sync::{Arc, Mutex, PoisonError},
};

use non_empty_string::NonEmptyString;
use nonempty::NonEmpty;
use rayon::iter::{IntoParallelRefIterator, IntoParallelRefMutIterator, ParallelIterator};
use tracing::instrument;

use crate::domain::{
    Config, Coverage, Provider, ProviderError, ProviderRegistry, Reference, Requirement,
    RequirementKey, RequirementLink, RequirementSource, SourceId,
};

/// Orchestrates parsing and analysis of a set of requirement sources.
///
/// Lifecycle: construct, configure sources and their `covers` declarations,
/// [`parse`](Self::parse), [`analyse`](Self::analyse), then read the
/// results.
#[derive(Debug, Default)]
pub struct Engine {
    sources: Vec<RequirementSource>,
    next_id: u32,
}

/// A stub reference of `requirement` that resolved into `target`.
#[derive(Debug)]
struct Upgrade {
    requirement: RequirementKey,
    reference: RequirementKey,
    target: SourceId,
}

impl Engine {
    /// Creates an engine with no sources.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an engine from a configuration.
    ///
    /// Provider settings are resolved relative to `base`. Sources with an
    /// unknown provider, or whose provider cannot be created, are logged and
    /// skipped. Cover declarations naming a missing source are logged and
    /// dropped.
    #[instrument(skip_all)]
    pub fn from_config(config: &Config, registry: &ProviderRegistry, base: &Path) -> Self {
        let mut engine = Self::new();

        // Covers are only honoured for the entries that became sources.
        let mut added = Vec::new();
        for entry in config.sources() {
            if engine.find(entry.name()).is_some() {
                tracing::warn!("Duplicate source '{}' ignored", entry.name());
                continue;
            }
            let provider = match registry.create(&entry.provider, &entry.settings, base) {
                Some(Ok(provider)) => provider,
                Some(Err(e)) => {
                    tracing::warn!("Skipping source '{}': {e}", entry.name());
                    continue;
                }
                None => {
                    tracing::warn!(
                        "Skipping source '{}': unknown provider '{}'",
                        entry.name(),
                        entry.provider
                    );
                    continue;
                }
            };
            added.push((engine.add_source(entry.name.clone(), provider), entry));
        }

        for (coverer, entry) in added {
            for covered in &entry.covers {
                match engine.find(covered).map(RequirementSource::id) {
                    Some(target) => {
                        engine.add_cover(coverer, target);
                    }
                    None => tracing::warn!(
                        "Source '{}' covers unknown source '{covered}', ignoring",
                        entry.name()
                    ),
                }
            }
        }

        engine
    }

    /// Appends a new, empty source and returns its handle.
    pub fn add_source(&mut self, name: NonEmptyString, provider: Arc<dyn Provider>) -> SourceId {
        let id = SourceId::new(self.next_id);
        self.next_id += 1;
        self.sources
            .push(RequirementSource::new(id, name, provider));
        id
    }

    /// Removes a source, along with every declaration covering it.
    ///
    /// Returns the removed source, or `None` if the handle is unknown.
    pub fn remove_source(&mut self, id: SourceId) -> Option<RequirementSource> {
        let index = self.index_of(id)?;
        let removed = self.sources.remove(index);
        for source in &mut self.sources {
            source.remove_cover(id);
        }
        Some(removed)
    }

    /// Moves a source to `position` in the source list.
    ///
    /// Positions past the end move the source to the end. Returns `false` if
    /// the handle is unknown.
    pub fn move_source(&mut self, id: SourceId, position: usize) -> bool {
        let Some(index) = self.index_of(id) else {
            return false;
        };
        let source = self.sources.remove(index);
        let position = position.min(self.sources.len());
        self.sources.insert(position, source);
        true
    }

    /// Declare that `coverer` covers `target`.
    ///
    /// Returns `false` if either handle is unknown or the declaration already
    /// exists.
    pub fn add_cover(&mut self, coverer: SourceId, target: SourceId) -> bool {
        if self.index_of(target).is_none() {
            return false;
        }
        self.source_mut(coverer)
            .is_some_and(|source| source.add_cover(target))
    }

    /// Withdraw a cover declaration.
    pub fn remove_cover(&mut self, coverer: SourceId, target: SourceId) -> bool {
        self.source_mut(coverer)
            .is_some_and(|source| source.remove_cover(target))
    }

    /// The configured sources, in order.
    #[must_use]
    pub fn sources(&self) -> &[RequirementSource] {
        &self.sources
    }

    /// Looks up a source by handle.
    #[must_use]
    pub fn source(&self, id: SourceId) -> Option<&RequirementSource> {
        self.sources.iter().find(|source| source.id() == id)
    }

    /// Mutable lookup of a source by handle.
    pub fn source_mut(&mut self, id: SourceId) -> Option<&mut RequirementSource> {
        self.sources.iter_mut().find(|source| source.id() == id)
    }

    /// Looks up a source by name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&RequirementSource> {
        self.sources.iter().find(|source| source.name() == name)
    }

    /// The requirement a resolved reference points at.
    ///
    /// Returns `None` for stub references.
    #[must_use]
    pub fn target_of(&self, reference: &Reference) -> Option<&Requirement> {
        self.source(reference.target()?)?
            .requirement(reference.key())
    }

    /// The requirement a back-reference link points at.
    #[must_use]
    pub fn requirement(&self, link: &RequirementLink) -> Option<&Requirement> {
        self.source(link.source)?.requirement(&link.key)
    }

    fn index_of(&self, id: SourceId) -> Option<usize> {
        self.sources.iter().position(|source| source.id() == id)
    }

    /// Parse every source with its provider.
    ///
    /// # Errors
    ///
    /// See [`Self::parse_with_progress`].
    pub fn parse(&mut self) -> Result<(), ParseError> {
        self.parse_with_progress(|_| {})
    }

    /// Parse every source with its provider, in parallel.
    ///
    /// Each source is cleared first. `on_progress` is called once per
    /// finished source with the completed fraction, which increases
    /// monotonically and reaches `1.0` when the last source finishes.
    ///
    /// # Errors
    ///
    /// A failing source does not stop the others. Once every source has been
    /// parsed, the failures are returned together, each tagged with the
    /// source's name.
    #[instrument(skip_all, fields(sources = self.sources.len()))]
    pub fn parse_with_progress<F>(&mut self, on_progress: F) -> Result<(), ParseError>
    where
        F: Fn(f64) + Sync,
    {
        let total = self.sources.len();
        let completed = Mutex::new(0_usize);

        let failures: Vec<SourceFailure> = self
            .sources
            .par_iter_mut()
            .filter_map(|source| {
                source.clear();
                let provider = Arc::clone(source.provider());
                let result = provider.parse(source);

                match &result {
                    Ok(()) => tracing::debug!(
                        "Parsed {} requirements from '{}'",
                        source.len(),
                        source.name()
                    ),
                    Err(e) => tracing::debug!("Failed to parse '{}': {e}", source.name()),
                }

                {
                    let mut completed = completed.lock().unwrap_or_else(PoisonError::into_inner);
                    *completed += 1;
                    on_progress(fraction(*completed, total));
                }

                result.err().map(|error| SourceFailure {
                    name: source.name().to_string(),
                    error,
                })
            })
            .collect();

        NonEmpty::from_vec(failures).map_or(Ok(()), |failures| Err(ParseError { failures }))
    }

    /// Resolve references and compute coverage for every declared pair.
    ///
    /// Sources are processed in parallel, one task per covering source.
    /// Results of a previous pass are discarded first, so calling this twice
    /// yields identical results.
    ///
    /// A key found in several covered sources is recorded as a back-reference
    /// in each of them, while the reference itself targets only the last one
    /// in `covers` order.
    #[instrument(skip_all, fields(sources = self.sources.len()))]
    pub fn analyse(&mut self) {
        for source in &mut self.sources {
            source.reset_analysis();
        }

        let sources = &self.sources;
        let upgrades: Vec<(SourceId, Vec<Upgrade>)> = sources
            .par_iter()
            .map(|source| {
                let upgrades = source
                    .covers()
                    .iter()
                    .filter_map(|&target| lookup(sources, target))
                    .flat_map(|target| resolve(source, target))
                    .collect();
                (source.id(), upgrades)
            })
            .collect();

        // Each requirement's own references are upgraded here, with exclusive
        // access, in source order and then covers order.
        for (id, upgrades) in upgrades {
            let Some(source) = self.source_mut(id) else {
                continue;
            };
            for upgrade in upgrades {
                if let Some(requirement) = source.requirement_mut(&upgrade.requirement) {
                    requirement.resolve_reference(&upgrade.reference, upgrade.target);
                }
            }
        }
    }
}

fn lookup(sources: &[RequirementSource], id: SourceId) -> Option<&RequirementSource> {
    sources.iter().find(|source| source.id() == id)
}

/// Resolve the stub references of `source` against `target`.
///
/// Back-references are recorded on `target`'s requirements immediately (under
/// their own locks), and the coverage is stored on `target`. The upgrades to
/// `source`'s own references are returned to the caller.
fn resolve(source: &RequirementSource, target: &RequirementSource) -> Vec<Upgrade> {
    let mut uncovered: BTreeSet<&RequirementKey> =
        target.requirements().map(Requirement::key).collect();
    let mut upgrades = Vec::new();

    for requirement in source.requirements() {
        let mut found: BTreeSet<&RequirementKey> = BTreeSet::new();

        for reference in requirement.references() {
            let Some(found_requirement) = target.requirement(reference.key()) else {
                continue;
            };
            uncovered.remove(found_requirement.key());
            if found.insert(found_requirement.key()) {
                found_requirement.add_referred_by(RequirementLink::new(
                    source.id(),
                    requirement.key().clone(),
                ));
            }
        }

        upgrades.extend(found.into_iter().map(|key| Upgrade {
            requirement: requirement.key().clone(),
            reference: key.clone(),
            target: target.id(),
        }));
    }

    let coverage = Coverage::new(target.len() - uncovered.len(), target.len());
    tracing::debug!(
        "'{}' covers {coverage} of '{}'",
        source.name(),
        target.name()
    );
    if coverage.ratio().is_none() {
        tracing::warn!(
            "'{}' covers '{}', which has no requirements; coverage is undefined",
            source.name(),
            target.name()
        );
    }
    target.record_coverage(source.id(), coverage);

    upgrades
}

#[allow(clippy::cast_precision_loss)]
fn fraction(completed: usize, total: usize) -> f64 {
    if total == 0 {
        1.0
    } else {
        completed as f64 / total as f64
    }
}

/// A provider failure, tagged with the source it happened in.
#[derive(Debug, thiserror::Error)]
#[error("failed to parse source '{name}'")]
pub struct SourceFailure {
    /// The name of the source that failed.
    pub name: String,
    /// The provider's error.
    #[source]
    pub error: ProviderError,
}

/// One or more sources failed to parse.
#[derive(Debug, thiserror::Error)]
pub struct ParseError {
    failures: NonEmpty<SourceFailure>,
}

impl ParseError {
    /// The individual failures, in source order.
    #[must_use]
    pub const fn failures(&self) -> &NonEmpty<SourceFailure> {
        &self.failures
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const MAX_DISPLAY: usize = 5;

        write!(f, "failed to parse sources: ")?;

        let total = self.failures.len();

        let msg = self
            .failures
            .iter()
            .take(MAX_DISPLAY)
            .map(|failure| format!("{} ({})", failure.name, failure.error))
            .collect::<Vec<_>>()
            .join(", ");

        if total <= MAX_DISPLAY {
            write!(f, "{msg}")
        } else {
            write!(f, "{msg}... (and {} more)", total - MAX_DISPLAY)
        }
    }
}
