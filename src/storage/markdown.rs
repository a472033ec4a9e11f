use std::{
    collections::BTreeMap,
    fs::File,
    io::{self, BufRead, BufReader},
    path::Path,
};

use serde::{Deserialize, Deserializer};

/// A requirement serialized in markdown format with YAML frontmatter.
///
/// ```markdown
/// ---
/// id: SYS-001
/// version: 2
/// attributes:
///   priority: high
/// references:
///   - USR-001
///   - id: USR-002
///     version: 1
///     text: Login
/// ---
/// # The system shall authenticate users
///
/// Body text.
/// ```
///
/// The first heading becomes the requirement's text; everything after it is
/// the content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkdownRequirement {
    frontmatter: FrontMatter,
    text: String,
    content: String,
}

/// A reference as declared in the frontmatter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkdownReference {
    /// Identifier of the referenced requirement.
    pub id: String,
    /// Version of the referenced requirement; empty when unversioned.
    pub version: String,
    /// Free-text summary of the reference.
    pub text: String,
    /// Extra attributes of the reference.
    pub attributes: BTreeMap<String, String>,
}

impl MarkdownRequirement {
    pub(crate) fn read<R: BufRead>(reader: &mut R) -> Result<Self, LoadError> {
        let mut lines = reader.lines();

        // Ensure frontmatter starts correctly
        let first_line = lines.next().ok_or(LoadError::MissingFrontmatter)??;

        if first_line.trim() != "---" {
            return Err(LoadError::MissingFrontmatter);
        }

        // Collect lines until next '---'
        let frontmatter = lines
            .by_ref()
            .map_while(|line| match line {
                Ok(content) if content.trim() == "---" => None,
                Ok(content) => Some(Ok(content)),
                Err(e) => Some(Err(e)),
            })
            .collect::<Result<Vec<_>, _>>()?
            .join("\n");

        // The rest of the lines are Markdown content
        let body = lines.collect::<Result<Vec<_>, _>>()?.join("\n");

        let frontmatter: FrontMatter = serde_yaml::from_str(&frontmatter)?;
        let (text, content) = parse_content(&body);

        Ok(Self {
            frontmatter,
            text,
            content,
        })
    }

    /// Reads a requirement from a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        Self::read(&mut reader)
    }

    /// The requirement identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.frontmatter.id.0
    }

    /// The requirement version; empty when unversioned.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.frontmatter.version.0
    }

    /// The text of the first heading.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The markdown following the first heading.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Extra attributes from the frontmatter.
    #[must_use]
    pub fn attributes(&self) -> BTreeMap<String, String> {
        scalars_to_strings(&self.frontmatter.attributes)
    }

    /// The declared references, in declaration order.
    pub fn references(&self) -> impl Iterator<Item = MarkdownReference> + '_ {
        self.frontmatter
            .references
            .iter()
            .map(|reference| match reference {
                ReferenceEntry::Id(id) => MarkdownReference {
                    id: id.0.clone(),
                    version: String::new(),
                    text: String::new(),
                    attributes: BTreeMap::new(),
                },
                ReferenceEntry::Full {
                    id,
                    version,
                    text,
                    attributes,
                } => MarkdownReference {
                    id: id.0.clone(),
                    version: version.0.clone(),
                    text: text.clone(),
                    attributes: scalars_to_strings(attributes),
                },
            })
    }
}

/// Splits markdown into the first heading and the remaining body.
///
/// Without a heading the text is empty and the whole input is the body.
fn parse_content(content: &str) -> (String, String) {
    let Some((heading_line_idx, line)) = content
        .lines()
        .enumerate()
        .find(|(_, line)| line.trim().starts_with('#'))
    else {
        return (String::new(), content.trim().to_string());
    };

    let text = line.trim().trim_start_matches('#').trim().to_string();

    // The body is everything after the heading line
    let body = content
        .lines()
        .skip(heading_line_idx + 1)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string();

    (text, body)
}

fn scalars_to_strings(map: &BTreeMap<String, Scalar>) -> BTreeMap<String, String> {
    map.iter()
        .map(|(key, value)| (key.clone(), value.0.clone()))
        .collect()
}

/// Errors that can occur when loading a requirement from markdown.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The file does not start with a `---` frontmatter block.
    #[error("expected frontmatter starting with '---'")]
    MissingFrontmatter,
    /// An I/O error occurred.
    #[error("failed to read file")]
    Io(#[from] io::Error),
    /// The YAML frontmatter could not be parsed.
    #[error("invalid frontmatter")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
struct FrontMatter {
    id: Scalar,
    #[serde(default)]
    version: Scalar,
    #[serde(default)]
    attributes: BTreeMap<String, Scalar>,
    #[serde(default)]
    references: Vec<ReferenceEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
enum ReferenceEntry {
    Id(Scalar),
    Full {
        id: Scalar,
        #[serde(default)]
        version: Scalar,
        #[serde(default)]
        text: String,
        #[serde(default)]
        attributes: BTreeMap<String, Scalar>,
    },
}

/// A YAML scalar read as a string.
///
/// Authors write `version: 2` as often as `version: "2"`; both mean the same
/// thing here. `null` reads as the empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Scalar(String);

impl<'de> Deserialize<'de> for Scalar {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;

        match serde_yaml::Value::deserialize(deserializer)? {
            serde_yaml::Value::Null => Ok(Self(String::new())),
            serde_yaml::Value::Bool(value) => Ok(Self(value.to_string())),
            serde_yaml::Value::Number(value) => Ok(Self(value.to_string())),
            serde_yaml::Value::String(value) => Ok(Self(value)),
            other => Err(D::Error::custom(format!(
                "expected a scalar value, found {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(input: &str) -> Result<MarkdownRequirement, LoadError> {
        MarkdownRequirement::read(&mut input.as_bytes())
    }

    #[test]
    fn reads_full_requirement() {
        let requirement = read(
            r"---
id: SYS-001
version: 2
attributes:
  priority: high
  safety: true
references:
  - USR-001
  - id: USR-002
    version: '1'
    text: Login
    attributes:
      relation: refines
---
# The system shall authenticate users

Users log in with a password.

More detail.
",
        )
        .unwrap();

        assert_eq!(requirement.id(), "SYS-001");
        assert_eq!(requirement.version(), "2");
        assert_eq!(requirement.text(), "The system shall authenticate users");
        assert_eq!(
            requirement.content(),
            "Users log in with a password.\n\nMore detail."
        );
        assert_eq!(
            requirement.attributes(),
            BTreeMap::from([
                ("priority".to_string(), "high".to_string()),
                ("safety".to_string(), "true".to_string()),
            ])
        );

        let references: Vec<_> = requirement.references().collect();
        assert_eq!(references.len(), 2);
        assert_eq!(references[0].id, "USR-001");
        assert_eq!(references[0].version, "");
        assert_eq!(references[1].id, "USR-002");
        assert_eq!(references[1].version, "1");
        assert_eq!(references[1].text, "Login");
        assert_eq!(
            references[1].attributes.get("relation").map(String::as_str),
            Some("refines")
        );
    }

    #[test]
    fn minimal_requirement() {
        let requirement = read("---\nid: R1\n---\nJust a body.\n").unwrap();

        assert_eq!(requirement.id(), "R1");
        assert_eq!(requirement.version(), "");
        assert_eq!(requirement.text(), "");
        assert_eq!(requirement.content(), "Just a body.");
        assert_eq!(requirement.references().count(), 0);
    }

    #[test]
    fn missing_frontmatter_is_an_error() {
        assert!(matches!(
            read("# Heading\n"),
            Err(LoadError::MissingFrontmatter)
        ));
        assert!(matches!(read(""), Err(LoadError::MissingFrontmatter)));
    }

    #[test]
    fn missing_id_is_an_error() {
        assert!(matches!(
            read("---\nversion: 1\n---\n# Title\n"),
            Err(LoadError::Yaml(_))
        ));
    }

    #[test]
    fn nested_attribute_is_an_error() {
        assert!(matches!(
            read("---\nid: R1\nattributes:\n  owner:\n    name: x\n---\n"),
            Err(LoadError::Yaml(_))
        ));
    }
}
