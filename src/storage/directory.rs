//! The `markdown` provider.
//!
//! A [`MarkdownProvider`] reads a directory of markdown requirement files
//! (see [`MarkdownRequirement`]) into a requirement source.

use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
};

use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use tracing::instrument;
use walkdir::WalkDir;

use crate::{
    domain::{Provider, ProviderError, RequirementSource},
    storage::MarkdownRequirement,
};

/// Parses every `*.md` file below a directory as one requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkdownProvider {
    /// The directory requirements are stored in.
    root: PathBuf,
    /// Whether subdirectories are searched too.
    recursive: bool,
}

impl MarkdownProvider {
    /// The provider identifier used in configuration files.
    pub const NAME: &'static str = "markdown";

    /// Creates a provider reading all requirements below `root`.
    #[must_use]
    pub const fn new(root: PathBuf) -> Self {
        Self {
            root,
            recursive: true,
        }
    }

    /// Restrict the provider to files directly inside the root.
    #[must_use]
    pub const fn non_recursive(mut self) -> Self {
        self.recursive = false;
        self
    }

    /// Builds a provider from its configuration settings.
    ///
    /// Recognised settings are `path` (required, relative to `base`) and
    /// `recursive` (optional, defaults to `true`).
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Settings`] if `path` is missing or either
    /// setting has the wrong type.
    pub fn from_settings(settings: &toml::Table, base: &Path) -> Result<Self, ProviderError> {
        let invalid = |message: &str| ProviderError::Settings {
            provider: Self::NAME.to_string(),
            message: message.to_string(),
        };

        let path = settings
            .get("path")
            .ok_or_else(|| invalid("missing 'path'"))?
            .as_str()
            .ok_or_else(|| invalid("'path' must be a string"))?;

        let recursive = match settings.get("recursive") {
            None => true,
            Some(value) => value
                .as_bool()
                .ok_or_else(|| invalid("'recursive' must be a boolean"))?,
        };

        Ok(Self {
            root: base.join(path),
            recursive,
        })
    }

    /// The directory requirements are read from.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collect_markdown_paths(&self) -> Vec<PathBuf> {
        let walker = WalkDir::new(&self.root).sort_by_file_name();
        let walker = if self.recursive {
            walker
        } else {
            walker.max_depth(1)
        };

        walker
            .into_iter()
            // Skip hidden directories and files
            .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.file_name()))
            .filter_map(|entry| {
                entry
                    .map_err(|e| tracing::warn!("Skipping unreadable entry: {e}"))
                    .ok()
            })
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| entry.path().extension() == Some(OsStr::new("md")))
            .map(walkdir::DirEntry::into_path)
            .collect()
    }
}

fn is_hidden(name: &OsStr) -> bool {
    name.to_str().is_some_and(|name| name.starts_with('.'))
}

impl Provider for MarkdownProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    #[instrument(skip_all, fields(root = %self.root.display()))]
    fn parse(&self, source: &mut RequirementSource) -> Result<(), ProviderError> {
        let metadata = std::fs::metadata(&self.root).map_err(|e| ProviderError::Io {
            path: self.root.clone(),
            source: e,
        })?;
        if !metadata.is_dir() {
            return Err(ProviderError::Other(format!(
                "{} is not a directory",
                self.root.display()
            )));
        }

        let paths = self.collect_markdown_paths();

        let requirements = paths
            .par_iter()
            .map(|path| {
                MarkdownRequirement::load(path)
                    .map(|requirement| (path, requirement))
                    .map_err(|e| ProviderError::Load {
                        path: path.clone(),
                        source: e,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        for (path, markdown) in requirements {
            let Some(requirement) = source.add_requirement(
                markdown.text(),
                markdown.id(),
                markdown.version(),
                markdown.content(),
                markdown.attributes(),
            ) else {
                tracing::warn!(
                    "Duplicate requirement {}{} in {}, skipping",
                    markdown.id(),
                    version_suffix(markdown.version()),
                    path.display()
                );
                continue;
            };

            for reference in markdown.references() {
                let is_new = requirement.add_reference(
                    reference.text,
                    reference.id.clone(),
                    reference.version.clone(),
                    reference.attributes,
                );
                if !is_new {
                    tracing::warn!(
                        "Duplicate reference to {}{} in {}, keeping the last one",
                        reference.id,
                        version_suffix(&reference.version),
                        path.display()
                    );
                }
            }
        }

        Ok(())
    }
}

fn version_suffix(version: &str) -> String {
    if version.is_empty() {
        String::new()
    } else {
        format!("@{version}")
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, sync::Arc};

    use non_empty_string::NonEmptyString;
    use tempfile::TempDir;

    use super::*;
    use crate::{Engine, RequirementKey};

    fn write(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn parse(provider: MarkdownProvider) -> Result<Engine, ProviderError> {
        let mut engine = Engine::new();
        let id = engine.add_source(
            NonEmptyString::new("Docs".to_string()).unwrap(),
            Arc::new(provider.clone()),
        );
        provider.parse(engine.source_mut(id).unwrap())?;
        Ok(engine)
    }

    #[test]
    fn reads_requirements_recursively() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "R2.md", "---\nid: R2\n---\n# Second\n");
        write(
            tmp.path(),
            "nested/R1.md",
            "---\nid: R1\nreferences: [T1, T2]\n---\n# First\n\nBody\n",
        );
        write(tmp.path(), "notes.txt", "not a requirement");
        write(tmp.path(), ".hidden/R3.md", "---\nid: R3\n---\n");

        let engine = parse(MarkdownProvider::new(tmp.path().to_path_buf())).unwrap();

        let source = engine.find("Docs").unwrap();
        let ids: Vec<_> = source.requirements().map(|r| r.id().to_string()).collect();
        assert_eq!(ids, vec!["R1", "R2"]);
        let r1 = source
            .requirement(&RequirementKey::unversioned("R1"))
            .unwrap();
        assert_eq!(r1.text(), "First");
        assert_eq!(r1.content(), "Body");
        assert_eq!(r1.references().count(), 2);
    }

    #[test]
    fn non_recursive_ignores_subdirectories() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "R1.md", "---\nid: R1\n---\n");
        write(tmp.path(), "nested/R2.md", "---\nid: R2\n---\n");

        let engine = parse(MarkdownProvider::new(tmp.path().to_path_buf()).non_recursive()).unwrap();

        assert_eq!(engine.find("Docs").unwrap().len(), 1);
    }

    #[test]
    fn duplicates_are_skipped() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "a.md", "---\nid: R1\n---\n# From a\n");
        write(tmp.path(), "b.md", "---\nid: R1\n---\n# From b\n");
        write(tmp.path(), "c.md", "---\nid: R1\nversion: 2\n---\n# Version 2\n");

        let engine = parse(MarkdownProvider::new(tmp.path().to_path_buf())).unwrap();

        let source = engine.find("Docs").unwrap();
        assert_eq!(source.len(), 2);
        let r1 = source
            .requirement(&RequirementKey::unversioned("R1"))
            .unwrap();
        assert_eq!(r1.text(), "From a");
    }

    #[test]
    fn malformed_file_is_reported_with_its_path() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "good.md", "---\nid: R1\n---\n");
        write(tmp.path(), "bad.md", "no frontmatter here\n");

        let error = parse(MarkdownProvider::new(tmp.path().to_path_buf())).unwrap_err();

        match error {
            ProviderError::Load { path, .. } => assert!(path.ends_with("bad.md")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_root_is_an_io_error() {
        let tmp = TempDir::new().unwrap();

        let error = parse(MarkdownProvider::new(tmp.path().join("missing"))).unwrap_err();

        assert!(matches!(error, ProviderError::Io { .. }));
    }

    #[test]
    fn settings_are_resolved_against_base() {
        let settings: toml::Table = toml::from_str("path = \"docs\"\nrecursive = false").unwrap();

        let provider = MarkdownProvider::from_settings(&settings, Path::new("/project")).unwrap();

        assert_eq!(provider.root(), Path::new("/project/docs"));
        assert!(!provider.recursive);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        for settings in ["", "path = 3", "path = \"docs\"\nrecursive = \"yes\""] {
            let settings: toml::Table = toml::from_str(settings).unwrap();
            assert!(matches!(
                MarkdownProvider::from_settings(&settings, Path::new(".")),
                Err(ProviderError::Settings { .. })
            ));
        }
    }
}
