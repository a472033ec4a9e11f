use std::{
    cmp::Ordering,
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::{Mutex, MutexGuard, PoisonError},
};

use crate::domain::SourceId;

/// The composite identity of a requirement.
///
/// Keys are ordered lexicographically by `id`, then by `version`. An empty
/// `id` or `version` sorts before any non-empty one. Requirement sets are
/// ordered maps keyed by this type, so the ordering doubles as the lookup
/// index used during resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequirementKey {
    id: String,
    version: String,
}

impl RequirementKey {
    /// Creates a key from an id and a version.
    ///
    /// Use an empty string for an unversioned requirement.
    #[must_use]
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
        }
    }

    /// Creates a key with an empty version.
    #[must_use]
    pub fn unversioned(id: impl Into<String>) -> Self {
        Self::new(id, String::new())
    }

    /// The requirement identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The requirement version. Empty when unversioned.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }
}

impl fmt::Display for RequirementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.version.is_empty() {
            write!(f, "{}", self.id)
        } else {
            write!(f, "{}@{}", self.id, self.version)
        }
    }
}

/// A link to a requirement in a particular source.
///
/// Back-references are recorded as links, since the referring requirement is
/// owned by its own source.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequirementLink {
    /// The source owning the linked requirement.
    pub source: SourceId,
    /// The key of the linked requirement.
    pub key: RequirementKey,
}

impl RequirementLink {
    /// Creates a link to `key` in `source`.
    #[must_use]
    pub const fn new(source: SourceId, key: RequirementKey) -> Self {
        Self { source, key }
    }
}

/// An outgoing reference declared by a requirement.
///
/// A reference starts as a stub: a key plus whatever the provider captured.
/// Resolution sets [`Reference::target`] to the source in which the key was
/// found. A reference that never resolves stays a stub and is reported as an
/// unknown reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    key: RequirementKey,
    text: String,
    attributes: BTreeMap<String, String>,
    target: Option<SourceId>,
}

impl Reference {
    /// Creates an unresolved reference.
    #[must_use]
    pub const fn stub(
        key: RequirementKey,
        text: String,
        attributes: BTreeMap<String, String>,
    ) -> Self {
        Self {
            key,
            text,
            attributes,
            target: None,
        }
    }

    /// The key of the referenced requirement.
    #[must_use]
    pub const fn key(&self) -> &RequirementKey {
        &self.key
    }

    /// The summary captured alongside the reference, if any.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Extra attributes captured alongside the reference.
    #[must_use]
    pub const fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// The source the reference resolved into, or `None` for a stub.
    #[must_use]
    pub const fn target(&self) -> Option<SourceId> {
        self.target
    }

    /// Whether this reference has been resolved.
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        self.target.is_some()
    }
}

/// A traceable item parsed from a requirement source.
///
/// Equality and ordering consider only the [`RequirementKey`]; two
/// requirements with the same id and version are the same logical entity.
#[derive(Debug)]
pub struct Requirement {
    key: RequirementKey,
    source: SourceId,
    text: String,
    content: String,
    attributes: BTreeMap<String, String>,
    references: BTreeMap<RequirementKey, Reference>,
    referred_by: Mutex<BTreeSet<RequirementLink>>,
}

impl Requirement {
    pub(crate) const fn new(
        key: RequirementKey,
        source: SourceId,
        text: String,
        content: String,
        attributes: BTreeMap<String, String>,
    ) -> Self {
        Self {
            key,
            source,
            text,
            content,
            attributes,
            references: BTreeMap::new(),
            referred_by: Mutex::new(BTreeSet::new()),
        }
    }

    /// The composite key of this requirement.
    #[must_use]
    pub const fn key(&self) -> &RequirementKey {
        &self.key
    }

    /// The requirement identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        self.key.id()
    }

    /// The requirement version. Empty when unversioned.
    #[must_use]
    pub fn version(&self) -> &str {
        self.key.version()
    }

    /// The source that owns this requirement.
    #[must_use]
    pub const fn source(&self) -> SourceId {
        self.source
    }

    /// Short summary of the requirement.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Long body of the requirement.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Extra attributes beyond id, version and text.
    #[must_use]
    pub const fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// Looks up a single attribute.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Declare an outgoing reference.
    ///
    /// An existing reference with the same key is replaced, so the most
    /// recent declaration wins. Returns `false` if the key had already been
    /// declared for this requirement, letting the caller warn about the
    /// duplicate.
    pub fn add_reference(
        &mut self,
        text: impl Into<String>,
        id: impl Into<String>,
        version: impl Into<String>,
        attributes: BTreeMap<String, String>,
    ) -> bool {
        let key = RequirementKey::new(id, version);
        let reference = Reference::stub(key.clone(), text.into(), attributes);
        self.references.insert(key, reference).is_none()
    }

    /// Marks the reference with the given key as resolved into `target`.
    ///
    /// Later resolutions overwrite earlier ones. Returns `false` if the
    /// requirement declares no reference with that key.
    pub(crate) fn resolve_reference(&mut self, key: &RequirementKey, target: SourceId) -> bool {
        let Some(reference) = self.references.get_mut(key) else {
            return false;
        };
        reference.target = Some(target);
        true
    }

    /// Records an incoming link.
    ///
    /// May be called concurrently from several analysis tasks; writers are
    /// serialised on the requirement's own lock. Returns `true` if the link
    /// was not yet recorded.
    pub(crate) fn add_referred_by(&self, link: RequirementLink) -> bool {
        self.lock_referred_by().replace(link).is_none()
    }

    /// Drops all resolution results, returning every reference to a stub.
    pub(crate) fn reset_resolution(&mut self) {
        for reference in self.references.values_mut() {
            reference.target = None;
        }
        self.referred_by
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// All outgoing references in key order.
    pub fn references(&self) -> impl Iterator<Item = &Reference> {
        self.references.values()
    }

    /// Looks up an outgoing reference by key.
    #[must_use]
    pub fn reference(&self, key: &RequirementKey) -> Option<&Reference> {
        self.references.get(key)
    }

    /// Outgoing references whose target is `source`.
    ///
    /// Passing `None` selects the references that never resolved.
    #[must_use]
    pub fn references_for(&self, source: Option<SourceId>) -> Vec<&Reference> {
        self.references
            .values()
            .filter(|reference| reference.target == source)
            .collect()
    }

    /// Snapshot of every requirement referring to this one.
    #[must_use]
    pub fn referred_by(&self) -> Vec<RequirementLink> {
        self.lock_referred_by().iter().cloned().collect()
    }

    /// Snapshot of the requirements in `source` referring to this one.
    #[must_use]
    pub fn referred_by_for(&self, source: SourceId) -> Vec<RequirementLink> {
        self.lock_referred_by()
            .iter()
            .filter(|link| link.source == source)
            .cloned()
            .collect()
    }

    /// The distinct sources referring to this requirement, in order.
    #[must_use]
    pub fn referred_by_sources(&self) -> Vec<SourceId> {
        let mut sources: Vec<_> = self
            .lock_referred_by()
            .iter()
            .map(|link| link.source)
            .collect();
        // links are ordered by source first
        sources.dedup();
        sources
    }

    fn lock_referred_by(&self) -> MutexGuard<'_, BTreeSet<RequirementLink>> {
        self.referred_by
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl PartialEq for Requirement {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Requirement {}

impl PartialOrd for Requirement {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Requirement {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}
