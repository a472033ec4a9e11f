use std::path::Path;

use clap::Parser;
use retrace::RequirementKey;
use tracing::instrument;

use super::{analyse, status_label, terminal::Colorize};

#[derive(Debug, Parser)]
#[command(about = "Show a requirement with its references and back-references")]
pub struct Show {
    /// Name of the source containing the requirement
    source: String,

    /// Requirement identifier
    id: String,

    /// Requirement version, if versioned
    #[arg(long, default_value = "")]
    version: String,
}

impl Show {
    #[instrument(level = "debug", skip(self))]
    pub fn run(self, config: &Path) -> anyhow::Result<()> {
        let engine = analyse(config, false)?;

        let source = engine
            .find(&self.source)
            .ok_or_else(|| anyhow::anyhow!("no source named '{}'", self.source))?;
        let key = RequirementKey::new(self.id, self.version);
        let requirement = source
            .requirement(&key)
            .ok_or_else(|| anyhow::anyhow!("no requirement {key} in '{}'", source.name()))?;

        println!("{} {}", requirement.key(), requirement.text());
        println!("{}", format!("source: {}", source.name()).dim());
        for (name, value) in requirement.attributes() {
            println!("{}", format!("{name}: {value}").dim());
        }
        println!("status: {}", status_label(source.coverage_status(requirement)));

        if !requirement.content().is_empty() {
            println!();
            println!("{}", requirement.content());
        }

        let references: Vec<_> = requirement.references().collect();
        if !references.is_empty() {
            println!();
            println!("References");
            for reference in references {
                match engine.target_of(reference) {
                    Some(target) => {
                        let target_source = engine
                            .source(target.source())
                            .map_or("?", |source| source.name());
                        println!(
                            "  → {target_source}: {} {}",
                            target.key(),
                            target.text().dim()
                        );
                    }
                    None => println!("  → {} {}", reference.key(), "(unknown)".warning()),
                }
            }
        }

        let referred_by = requirement.referred_by();
        if !referred_by.is_empty() {
            println!();
            println!("Referred by");
            for link in referred_by {
                let referrer_source = engine
                    .source(link.source)
                    .map_or("?", |source| source.name());
                let text = engine
                    .requirement(&link)
                    .map_or("", |requirement| requirement.text());
                println!("  ← {referrer_source}: {} {}", link.key, text.dim());
            }
        }

        Ok(())
    }
}
