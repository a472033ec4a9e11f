use std::path::Path;

use clap::Parser;
use retrace::{Engine, Reference, Requirement, RequirementSource};
use tracing::instrument;

use super::{OutputFormat, analyse, terminal::Colorize};

#[derive(Debug, Parser)]
#[command(about = "List references that did not resolve against any covered source")]
pub struct Unknown {
    /// Only list references declared in this source
    #[arg(long, value_name = "NAME")]
    source: Option<String>,

    /// Output format (table, json)
    #[arg(long, value_name = "FORMAT", default_value = "table")]
    output: OutputFormat,
}

impl Unknown {
    #[instrument(level = "debug", skip(self))]
    pub fn run(self, config: &Path) -> anyhow::Result<()> {
        let engine = analyse(config, matches!(self.output, OutputFormat::Json))?;

        let unknown = unknown_references(&engine, self.source.as_deref())?;

        match self.output {
            OutputFormat::Json => {
                use serde_json::json;

                let entries: Vec<_> = unknown
                    .iter()
                    .flat_map(|(source, references)| {
                        references.iter().map(move |(requirement, reference)| {
                            json!({
                                "source": source.name(),
                                "requirement": requirement.key().to_string(),
                                "reference": {
                                    "id": reference.key().id(),
                                    "version": reference.key().version(),
                                    "text": reference.text(),
                                    "attributes": reference.attributes(),
                                },
                            })
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&entries)?);
            }
            OutputFormat::Table => {
                for (source, references) in &unknown {
                    println!("{} ({})", source.name(), references.len().to_string().warning());
                    for (requirement, reference) in references {
                        if reference.text().is_empty() {
                            println!("  {} → {}", requirement.key(), reference.key());
                        } else {
                            println!(
                                "  {} → {} {}",
                                requirement.key(),
                                reference.key(),
                                reference.text().dim()
                            );
                        }
                    }
                }
                if unknown.is_empty() {
                    println!("No unknown references ✅");
                }
            }
        }

        Ok(())
    }
}

/// Unknown references grouped by the source declaring them.
///
/// Sources without unknown references are left out. With `only`, the listing
/// is restricted to the named source, which must exist.
pub(super) fn unknown_references<'a>(
    engine: &'a Engine,
    only: Option<&str>,
) -> anyhow::Result<Vec<(&'a RequirementSource, Vec<(&'a Requirement, &'a Reference)>)>> {
    if let Some(name) = only {
        if engine.find(name).is_none() {
            anyhow::bail!("no source named '{name}'");
        }
    }

    Ok(engine
        .sources()
        .iter()
        .filter(|source| only.is_none_or(|name| source.name() == name))
        .map(|source| (source, source.all_unknown_references().collect::<Vec<_>>()))
        .filter(|(_, references)| !references.is_empty())
        .collect())
}
