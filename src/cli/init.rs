use std::path::Path;

use clap::Parser;
use non_empty_string::NonEmptyString;
use retrace::{Config, MarkdownProvider, domain::SourceConfig};
use tracing::instrument;

#[derive(Debug, Parser)]
#[command(about = "Write a starter configuration file")]
pub struct Init {
    /// Overwrite an existing configuration file
    #[arg(long)]
    force: bool,
}

impl Init {
    #[instrument(level = "debug", skip(self))]
    pub fn run(self, config_path: &Path) -> anyhow::Result<()> {
        if config_path.exists() && !self.force {
            anyhow::bail!(
                "{} already exists (use --force to overwrite)",
                config_path.display()
            );
        }

        let config = starter_config()?;
        config
            .save(config_path)
            .map_err(|e| anyhow::anyhow!("Failed to write {}: {e}", config_path.display()))?;

        println!("Created {}", config_path.display());
        println!();
        println!("Next steps:");
        println!("  - put one markdown file per requirement in docs/spec and docs/impl");
        println!("  - run 'retrace status'");

        Ok(())
    }
}

fn starter_config() -> anyhow::Result<Config> {
    let mut config = Config::default();

    let mut spec = source("Spec", "docs/spec")?;
    spec.covers.push("Impl".to_string());
    config.add_source(spec);
    config.add_source(source("Impl", "docs/impl")?);

    Ok(config)
}

fn source(name: &str, path: &str) -> anyhow::Result<SourceConfig> {
    let name = NonEmptyString::new(name.to_string())
        .map_err(|_| anyhow::anyhow!("source name must not be empty"))?;
    let mut source = SourceConfig::new(name, MarkdownProvider::NAME);
    source
        .settings
        .insert("path".to_string(), toml::Value::from(path));
    Ok(source)
}
