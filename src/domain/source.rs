use std::{
    collections::{BTreeMap, BTreeSet, btree_map::Entry},
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use non_empty_string::NonEmptyString;
use serde::Serialize;

use crate::domain::{Provider, Reference, Requirement, RequirementKey};

/// Stable handle of a [`RequirementSource`] within an
/// [`Engine`](crate::Engine).
///
/// Handles survive reordering and removal of other sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceId(u32);

impl SourceId {
    pub(crate) const fn new(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How many of a source's requirements a covering source references.
///
/// The ratio is undefined when the covered source has no requirements, in
/// which case [`Coverage::ratio`] returns `None` rather than guessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Coverage {
    covered: usize,
    total: usize,
}

impl Coverage {
    /// Creates a coverage figure of `covered` out of `total` requirements.
    #[must_use]
    pub const fn new(covered: usize, total: usize) -> Self {
        Self { covered, total }
    }

    /// Number of requirements referenced at least once.
    #[must_use]
    pub const fn covered(&self) -> usize {
        self.covered
    }

    /// Number of requirements in the covered source.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.total
    }

    /// The covered fraction in `[0, 1]`, or `None` for an empty source.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn ratio(&self) -> Option<f64> {
        (self.total != 0).then(|| self.covered as f64 / self.total as f64)
    }
}

impl fmt::Display for Coverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ratio() {
            Some(ratio) => write!(
                f,
                "{}/{} ({:.1}%)",
                self.covered,
                self.total,
                ratio * 100.0
            ),
            None => write!(f, "0/0 (n/a)"),
        }
    }
}

/// Classification of a single requirement against the sources covering it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverageStatus {
    /// No source declares that it covers the requirement's source.
    NotTracked,
    /// None of the covering sources reference the requirement.
    Uncovered,
    /// Some, but not all, covering sources reference the requirement.
    Partial,
    /// Every covering source references the requirement.
    Full,
}

/// A named set of requirements parsed from one document.
///
/// A source is created empty by configuration, filled by its
/// [`Provider`] during a parse pass, and read by the analysis and the
/// reporters afterwards.
pub struct RequirementSource {
    id: SourceId,
    name: NonEmptyString,
    provider: Arc<dyn Provider>,
    requirements: BTreeMap<RequirementKey, Requirement>,
    covers: Vec<SourceId>,
    covered_by: Mutex<BTreeMap<SourceId, Coverage>>,
    attribute_names: BTreeSet<String>,
}

impl RequirementSource {
    pub(crate) fn new(id: SourceId, name: NonEmptyString, provider: Arc<dyn Provider>) -> Self {
        Self {
            id,
            name,
            provider,
            requirements: BTreeMap::new(),
            covers: Vec::new(),
            covered_by: Mutex::new(BTreeMap::new()),
            attribute_names: BTreeSet::new(),
        }
    }

    /// The handle of this source.
    #[must_use]
    pub const fn id(&self) -> SourceId {
        self.id
    }

    /// The display name of this source.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// The provider that fills this source.
    #[must_use]
    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    /// Add a requirement to the source.
    ///
    /// Returns `None` if a requirement with the same id and version already
    /// exists; the existing requirement is left untouched.
    pub fn add_requirement(
        &mut self,
        text: impl Into<String>,
        id: impl Into<String>,
        version: impl Into<String>,
        content: impl Into<String>,
        attributes: BTreeMap<String, String>,
    ) -> Option<&mut Requirement> {
        match self.requirements.entry(RequirementKey::new(id, version)) {
            Entry::Occupied(_) => None,
            Entry::Vacant(entry) => {
                self.attribute_names.extend(attributes.keys().cloned());
                let requirement = Requirement::new(
                    entry.key().clone(),
                    self.id,
                    text.into(),
                    content.into(),
                    attributes,
                );
                Some(entry.insert(requirement))
            }
        }
    }

    /// Drops all parsed requirements and every analysis result.
    ///
    /// Called before each parse pass, so analysis can be re-run after the
    /// underlying documents change.
    pub fn clear(&mut self) {
        self.requirements.clear();
        self.lock_covered_by_mut().clear();
        self.attribute_names.clear();
    }

    /// Requirements in `(id, version)` order.
    pub fn requirements(&self) -> impl Iterator<Item = &Requirement> {
        self.requirements.values()
    }

    /// Looks up the requirement with exactly this key.
    #[must_use]
    pub fn requirement(&self, key: &RequirementKey) -> Option<&Requirement> {
        self.requirements.get(key)
    }

    /// Mutable lookup, for providers attaching references after the fact.
    pub fn requirement_mut(&mut self, key: &RequirementKey) -> Option<&mut Requirement> {
        self.requirements.get_mut(key)
    }

    /// Number of requirements in the source.
    #[must_use]
    pub fn len(&self) -> usize {
        self.requirements.len()
    }

    /// Whether the source holds no requirements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// Names of every extra attribute seen on this source's requirements.
    #[must_use]
    pub const fn attribute_names(&self) -> &BTreeSet<String> {
        &self.attribute_names
    }

    /// Names of every extra attribute seen on this source's references.
    #[must_use]
    pub fn reference_attribute_names(&self) -> BTreeSet<&str> {
        self.all_references()
            .flat_map(|(_, reference)| reference.attributes().keys())
            .map(String::as_str)
            .collect()
    }

    /// Every outgoing reference, paired with the requirement declaring it.
    pub fn all_references(&self) -> impl Iterator<Item = (&Requirement, &Reference)> {
        self.requirements()
            .flat_map(|requirement| requirement.references().map(move |r| (requirement, r)))
    }

    /// References that did not resolve against any covered source.
    pub fn all_unknown_references(&self) -> impl Iterator<Item = (&Requirement, &Reference)> {
        self.all_references()
            .filter(|(_, reference)| !reference.is_resolved())
    }

    /// The sources this source declares it covers, in declaration order.
    #[must_use]
    pub fn covers(&self) -> &[SourceId] {
        &self.covers
    }

    pub(crate) fn add_cover(&mut self, target: SourceId) -> bool {
        if self.covers.contains(&target) {
            false
        } else {
            self.covers.push(target);
            true
        }
    }

    pub(crate) fn remove_cover(&mut self, target: SourceId) -> bool {
        let before = self.covers.len();
        self.covers.retain(|&id| id != target);
        self.covers.len() != before
    }

    /// Snapshot of the coverage this source receives, keyed by coverer.
    #[must_use]
    pub fn covered_by(&self) -> BTreeMap<SourceId, Coverage> {
        self.lock_covered_by().clone()
    }

    /// The coverage this source receives from `coverer`, if analysed.
    #[must_use]
    pub fn coverage_from(&self, coverer: SourceId) -> Option<Coverage> {
        self.lock_covered_by().get(&coverer).copied()
    }

    /// Classify one of this source's requirements by how many of the
    /// covering sources reference it.
    #[must_use]
    pub fn coverage_status(&self, requirement: &Requirement) -> CoverageStatus {
        let covered_by = self.lock_covered_by();
        if covered_by.is_empty() {
            return CoverageStatus::NotTracked;
        }
        let referring = requirement
            .referred_by_sources()
            .into_iter()
            .filter(|source| covered_by.contains_key(source))
            .count();
        match referring {
            0 => CoverageStatus::Uncovered,
            n if n < covered_by.len() => CoverageStatus::Partial,
            _ => CoverageStatus::Full,
        }
    }

    /// Records the coverage computed for `coverer`.
    ///
    /// Called concurrently by analysis tasks of different covering sources.
    pub(crate) fn record_coverage(&self, coverer: SourceId, coverage: Coverage) {
        self.lock_covered_by().insert(coverer, coverage);
    }

    /// Discards the results of a previous analysis pass.
    pub(crate) fn reset_analysis(&mut self) {
        self.lock_covered_by_mut().clear();
        for requirement in self.requirements.values_mut() {
            requirement.reset_resolution();
        }
    }

    fn lock_covered_by(&self) -> MutexGuard<'_, BTreeMap<SourceId, Coverage>> {
        self.covered_by
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_covered_by_mut(&mut self) -> &mut BTreeMap<SourceId, Coverage> {
        self.covered_by
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for RequirementSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequirementSource")
            .field("id", &self.id)
            .field("name", &self.name.as_str())
            .field("provider", &self.provider.name())
            .field("requirements", &self.requirements.len())
            .field("covers", &self.covers)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use test_case::test_case;

    use super::*;
    use crate::domain::{RequirementLink, provider::NullProvider};

    fn source(id: u32, name: &str) -> RequirementSource {
        RequirementSource::new(
            SourceId::new(id),
            NonEmptyString::new(name.to_string()).unwrap(),
            Arc::new(NullProvider),
        )
    }

    #[test]
    fn duplicate_requirement_is_rejected() {
        let mut source = source(0, "Spec");

        assert!(
            source
                .add_requirement("first", "R1", "", "", BTreeMap::new())
                .is_some()
        );
        assert!(
            source
                .add_requirement("second", "R1", "", "", BTreeMap::new())
                .is_none()
        );
        assert!(
            source
                .add_requirement("other version", "R1", "2", "", BTreeMap::new())
                .is_some()
        );

        assert_eq!(source.len(), 2);
        let original = source
            .requirement(&RequirementKey::unversioned("R1"))
            .unwrap();
        assert_eq!(original.text(), "first");
    }

    #[test]
    fn requirements_iterate_in_key_order() {
        let mut source = source(0, "Spec");
        for (id, version) in [("R2", ""), ("R1", "b"), ("", ""), ("R1", ""), ("R1", "a")] {
            source.add_requirement("", id, version, "", BTreeMap::new());
        }

        let keys: Vec<_> = source.requirements().map(|r| r.key().clone()).collect();

        assert!(keys.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(keys.first().unwrap().id(), "");
        assert_eq!(
            keys.iter().map(ToString::to_string).collect::<Vec<_>>(),
            vec!["", "R1", "R1@a", "R1@b", "R2"]
        );
    }

    #[test]
    fn tracks_attribute_names() {
        let mut source = source(0, "Spec");
        let attributes = BTreeMap::from([("priority".to_string(), "high".to_string())]);
        let requirement = source
            .add_requirement("", "R1", "", "", attributes)
            .unwrap();
        requirement.add_reference(
            "",
            "T1",
            "",
            BTreeMap::from([("relation".to_string(), "satisfies".to_string())]),
        );

        assert!(source.attribute_names().contains("priority"));
        assert!(source.reference_attribute_names().contains("relation"));

        source.clear();

        assert!(source.is_empty());
        assert!(source.attribute_names().is_empty());
        assert!(source.reference_attribute_names().is_empty());
    }

    #[test]
    fn clear_drops_coverage() {
        let mut source = source(0, "Impl");
        source.record_coverage(SourceId::new(1), Coverage::new(1, 2));

        source.clear();

        assert!(source.covered_by().is_empty());
    }

    #[test]
    fn covers_are_unique_and_ordered() {
        let mut source = source(0, "Spec");

        assert!(source.add_cover(SourceId::new(2)));
        assert!(source.add_cover(SourceId::new(1)));
        assert!(!source.add_cover(SourceId::new(2)));
        assert_eq!(source.covers(), &[SourceId::new(2), SourceId::new(1)]);

        assert!(source.remove_cover(SourceId::new(2)));
        assert!(!source.remove_cover(SourceId::new(2)));
        assert_eq!(source.covers(), &[SourceId::new(1)]);
    }

    #[test]
    fn unknown_references_are_the_unresolved_ones() {
        let mut source = source(0, "Spec");
        let requirement = source
            .add_requirement("", "R1", "", "", BTreeMap::new())
            .unwrap();
        requirement.add_reference("", "T1", "", BTreeMap::new());
        requirement.add_reference("", "T2", "", BTreeMap::new());
        requirement.resolve_reference(&RequirementKey::unversioned("T1"), SourceId::new(1));

        let unknown: Vec<_> = source
            .all_unknown_references()
            .map(|(requirement, reference)| {
                (requirement.id().to_string(), reference.key().to_string())
            })
            .collect();

        assert_eq!(source.all_references().count(), 2);
        assert_eq!(unknown, vec![("R1".to_string(), "T2".to_string())]);
    }

    #[test_case(0, 0, None; "empty source is undefined")]
    #[test_case(2, 4, Some(0.5); "half")]
    #[test_case(3, 3, Some(1.0); "complete")]
    #[test_case(0, 3, Some(0.0); "none")]
    fn coverage_ratio(covered: usize, total: usize, expected: Option<f64>) {
        assert_eq!(Coverage::new(covered, total).ratio(), expected);
    }

    #[test]
    fn coverage_display() {
        assert_eq!(Coverage::new(2, 3).to_string(), "2/3 (66.7%)");
        assert_eq!(Coverage::new(0, 0).to_string(), "0/0 (n/a)");
    }

    #[test]
    fn coverage_status_compares_referring_sources_with_coverers() {
        let mut target = source(0, "Impl");
        for id in ["I1", "I2", "I3"] {
            target.add_requirement("", id, "", "", BTreeMap::new());
        }
        let link = |source: u32, key: &str| {
            RequirementLink::new(SourceId::new(source), RequirementKey::unversioned(key))
        };
        let key = RequirementKey::unversioned;

        let untracked = target.requirement(&key("I1")).unwrap();
        assert_eq!(target.coverage_status(untracked), CoverageStatus::NotTracked);

        target.record_coverage(SourceId::new(1), Coverage::new(2, 3));
        target.record_coverage(SourceId::new(2), Coverage::new(1, 3));

        let i1 = target.requirement(&key("I1")).unwrap();
        i1.add_referred_by(link(1, "S1"));
        i1.add_referred_by(link(2, "T1"));
        let i2 = target.requirement(&key("I2")).unwrap();
        i2.add_referred_by(link(1, "S2"));
        i2.add_referred_by(link(1, "S3"));
        let i3 = target.requirement(&key("I3")).unwrap();

        assert_eq!(target.coverage_status(i1), CoverageStatus::Full);
        assert_eq!(target.coverage_status(i2), CoverageStatus::Partial);
        assert_eq!(target.coverage_status(i3), CoverageStatus::Uncovered);
    }
}
