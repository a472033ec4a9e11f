use std::{path::Path, process};

use clap::Parser;
use retrace::{Coverage, Engine};
use serde::Serialize;
use tracing::instrument;

use super::{
    OutputFormat, analyse,
    terminal::{Colorize, Tone, is_narrow},
};

#[derive(Debug, Parser, Default)]
#[command(about = "Show the coverage each source receives from the sources covering it")]
pub struct Status {
    /// Output format (table, json)
    #[arg(long, value_name = "FORMAT", default_value = "table")]
    output: OutputFormat,

    /// Suppress headers and progress, and format for scripting
    #[arg(long)]
    quiet: bool,
}

/// One covering/covered pair.
#[derive(Debug, Serialize)]
pub(super) struct Row<'a> {
    pub(super) coverer: &'a str,
    pub(super) covered: &'a str,
    pub(super) coverage: Option<Coverage>,
    pub(super) ratio: Option<f64>,
}

impl Status {
    #[instrument(level = "debug", skip(self))]
    pub fn run(self, config: &Path) -> anyhow::Result<()> {
        let engine = analyse(config, self.quiet)?;

        let rows = rows(&engine);
        let unknown_count: usize = engine
            .sources()
            .iter()
            .map(|source| source.all_unknown_references().count())
            .sum();

        if engine.sources().is_empty() {
            println!("No sources configured yet. Add one to {}.", config.display());
            return Ok(());
        }

        match self.output {
            OutputFormat::Json => Self::output_json(&engine, &rows, unknown_count)?,
            OutputFormat::Table => {
                if self.quiet {
                    Self::output_quiet(&rows, unknown_count);
                } else {
                    Self::output_table(&rows, unknown_count);
                }
            }
        }

        match exit_code(unknown_count) {
            0 => Ok(()),
            code => process::exit(code),
        }
    }

    fn output_json(engine: &Engine, rows: &[Row<'_>], unknown_count: usize) -> anyhow::Result<()> {
        use serde_json::json;

        let sources: Vec<_> = engine
            .sources()
            .iter()
            .map(|source| {
                json!({
                    "name": source.name(),
                    "provider": source.provider().name(),
                    "requirements": source.len(),
                    "unknown_references": source.all_unknown_references().count(),
                })
            })
            .collect();

        let output = json!({
            "sources": sources,
            "coverage": rows,
            "unknown_references": unknown_count,
        });

        println!("{}", serde_json::to_string_pretty(&output)?);
        Ok(())
    }

    fn output_quiet(rows: &[Row<'_>], unknown_count: usize) {
        for row in rows {
            let ratio = row
                .ratio
                .map_or_else(|| "n/a".to_string(), |ratio| format!("{ratio:.3}"));
            println!("{}\t{}\t{ratio}", row.coverer, row.covered);
        }
        println!("unknown={unknown_count}");
    }

    fn output_table(rows: &[Row<'_>], unknown_count: usize) {
        println!("Coverage");
        println!("{}", "────────".dim());

        if rows.is_empty() {
            println!("{}", "No source declares that it covers another.".dim());
        } else if is_narrow() {
            // Stacked output for narrow terminals
            for row in rows {
                println!("{} → {}: {}", row.coverer, row.covered, coverage_cell(row.coverage));
            }
        } else {
            let coverer_width = column_width("Covering", rows.iter().map(|row| row.coverer));
            let covered_width = column_width("Covered", rows.iter().map(|row| row.covered));

            println!(
                "{:<coverer_width$}  {:<covered_width$}  Coverage",
                "Covering", "Covered"
            );
            for row in rows {
                println!(
                    "{:<coverer_width$}  {:<covered_width$}  {}",
                    row.coverer,
                    row.covered,
                    coverage_cell(row.coverage)
                );
            }
        }

        println!();

        if unknown_count == 0 {
            println!("Unknown references: {} ✅", "0".success());
        } else {
            println!(
                "Unknown references: {} ⚠️",
                unknown_count.to_string().warning()
            );
            println!("{}", "Run 'retrace unknown' to list them.".dim());
        }
    }
}

/// The process exit code for a finished analysis.
///
/// Dangling references fail the run with code 2.
pub(super) const fn exit_code(unknown_count: usize) -> i32 {
    if unknown_count > 0 { 2 } else { 0 }
}

pub(super) fn rows(engine: &Engine) -> Vec<Row<'_>> {
    engine
        .sources()
        .iter()
        .flat_map(|coverer| {
            coverer.covers().iter().filter_map(move |&id| {
                let covered = engine.source(id)?;
                let coverage = covered.coverage_from(coverer.id());
                Some(Row {
                    coverer: coverer.name(),
                    covered: covered.name(),
                    coverage,
                    ratio: coverage.and_then(|c| c.ratio()),
                })
            })
        })
        .collect()
}

pub(super) fn column_width<'a>(header: &str, values: impl Iterator<Item = &'a str>) -> usize {
    values
        .map(|value| value.chars().count())
        .chain(std::iter::once(header.len()))
        .max()
        .unwrap_or_default()
}

fn coverage_cell(coverage: Option<Coverage>) -> String {
    match coverage {
        None => "not analysed".dim(),
        Some(coverage) => Tone::of_coverage(coverage).paint(coverage),
    }
}
