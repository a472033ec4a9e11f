use std::path::{Path, PathBuf};

mod init;
mod show;
mod status;
mod terminal;
mod unknown;

use anyhow::Context;
use clap::ArgAction;
use indicatif::{ProgressBar, ProgressStyle};
use init::Init;
use retrace::{Config, CoverageStatus, Engine, ProviderRegistry};
use show::Show;
use status::Status;
use unknown::Unknown;

use self::terminal::Colorize;

#[derive(Debug, clap::Parser)]
#[command(version, about)]
pub struct Cli {
    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// The path to the analysis configuration file
    #[arg(short, long, default_value = "retrace.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

impl Cli {
    pub fn run(self) -> anyhow::Result<()> {
        Self::setup_logging(self.verbose);

        self.command
            .unwrap_or_else(|| Command::Status(Status::default()))
            .run(&self.config)
    }

    fn setup_logging(verbosity: u8) {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let level = match verbosity {
            0 => tracing::Level::WARN,
            1 => tracing::Level::INFO,
            2 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        };

        let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_names(false)
            .with_line_number(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .init();
    }
}

#[derive(Debug, clap::Parser)]
pub enum Command {
    /// Show coverage between sources (default)
    Status(Status),

    /// List references that did not resolve
    Unknown(Unknown),

    /// Show a requirement with its references and back-references
    Show(Show),

    /// Write a starter configuration file
    Init(Init),
}

impl Command {
    fn run(self, config: &Path) -> anyhow::Result<()> {
        match self {
            Self::Status(command) => command.run(config)?,
            Self::Unknown(command) => command.run(config)?,
            Self::Show(command) => command.run(config)?,
            Self::Init(command) => command.run(config)?,
        }
        Ok(())
    }
}

/// Load the configuration, parse every source and run the analysis.
///
/// Parsing progress is drawn on stderr unless `quiet` is set.
fn analyse(config_path: &Path, quiet: bool) -> anyhow::Result<Engine> {
    let config = Config::load(config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    let base = config_path.parent().unwrap_or_else(|| Path::new("."));

    let mut engine = Engine::from_config(&config, &ProviderRegistry::default(), base);

    let progress = if quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(100)
    };
    progress.set_style(ProgressStyle::with_template(
        "{spinner} parsing sources {wide_bar} {percent:>3}%",
    )?);

    let parsed = engine.parse_with_progress(|fraction| {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        progress.set_position((fraction * 100.0).round() as u64);
    });
    progress.finish_and_clear();
    parsed?;

    engine.analyse();
    Ok(engine)
}

fn status_label(status: CoverageStatus) -> String {
    match status {
        CoverageStatus::NotTracked => "not tracked".dim(),
        CoverageStatus::Uncovered => "uncovered".error(),
        CoverageStatus::Partial => "partially covered".warning(),
        CoverageStatus::Full => "covered".success(),
    }
}

#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[cfg(test)]
mod tests {
    use std::fs;

    use clap::Parser;
    use retrace::Coverage;
    use tempfile::{TempDir, tempdir};

    use super::*;

    const CONFIG: &str = r#"_version = "1"

[[sources]]
name = "Spec"
provider = "markdown"
covers = ["Impl"]

[sources.settings]
path = "spec"

[[sources]]
name = "Impl"
provider = "markdown"

[sources.settings]
path = "impl"

[[sources]]
name = "Tests"
provider = "markdown"
covers = ["Spec"]

[sources.settings]
path = "tests"
"#;

    fn write(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    /// A project where `Spec` covers `Impl` and `Tests` covers `Spec`, with
    /// one dangling reference in each covering source.
    fn project() -> TempDir {
        let tmp = tempdir().unwrap();
        let root = tmp.path();
        write(root, "retrace.toml", CONFIG);
        write(
            root,
            "spec/S1.md",
            "---\nid: S1\nreferences: [I1, I9]\n---\n# Login\n",
        );
        write(root, "impl/I1.md", "---\nid: I1\n---\n# Login form\n");
        write(root, "impl/I2.md", "---\nid: I2\n---\n# Logout button\n");
        write(
            root,
            "tests/T1.md",
            "---\nid: T1\nreferences: [S1, S9]\n---\n# Login test\n",
        );
        tmp
    }

    fn run(args: &[&str]) -> anyhow::Result<()> {
        let cli = Cli::try_parse_from(std::iter::once("retrace").chain(args.iter().copied()))
            .expect("arguments should parse");
        cli.command
            .unwrap_or_else(|| Command::Status(Status::default()))
            .run(&cli.config)
    }

    #[test]
    fn status_fails_when_references_dangle() {
        let tmp = project();
        let engine = analyse(&tmp.path().join("retrace.toml"), true).unwrap();

        let unknown: usize = engine
            .sources()
            .iter()
            .map(|source| source.all_unknown_references().count())
            .sum();

        assert_eq!(unknown, 2);
        assert_eq!(status::exit_code(unknown), 2);
        assert_eq!(status::exit_code(0), 0);
    }

    #[test]
    fn status_rows_follow_source_and_covers_order() {
        let tmp = project();
        let engine = analyse(&tmp.path().join("retrace.toml"), true).unwrap();

        let rows = status::rows(&engine);

        let pairs: Vec<_> = rows.iter().map(|row| (row.coverer, row.covered)).collect();
        assert_eq!(pairs, vec![("Spec", "Impl"), ("Tests", "Spec")]);
        assert_eq!(rows[0].coverage, Some(Coverage::new(1, 2)));
        assert!(rows[0].ratio.is_some_and(|ratio| (ratio - 0.5).abs() < f64::EPSILON));
        assert_eq!(rows[1].coverage, Some(Coverage::new(1, 1)));
        assert!(rows[1].ratio.is_some_and(|ratio| (ratio - 1.0).abs() < f64::EPSILON));
    }

    #[test]
    fn column_width_fits_header_and_values() {
        assert_eq!(status::column_width("Covering", ["A", "B"].into_iter()), 8);
        assert_eq!(
            status::column_width("Covering", ["Software design"].into_iter()),
            15
        );
        assert_eq!(status::column_width("Covered", ["Ünïcödé-Spëc"].into_iter()), 12);
        assert_eq!(status::column_width("Covered", std::iter::empty()), 7);
    }

    #[test]
    fn init_writes_starter_config() {
        let tmp = tempdir().unwrap();
        let config_path = tmp.path().join("retrace.toml");

        run(&["--config", config_path.to_str().unwrap(), "init"]).unwrap();

        let config = Config::load(&config_path).unwrap();
        let spec = config.source("Spec").unwrap();
        assert_eq!(spec.covers, vec!["Impl".to_string()]);
        assert!(config.source("Impl").is_some());
    }

    #[test]
    fn init_refuses_to_overwrite_without_force() {
        let tmp = tempdir().unwrap();
        let config_path = tmp.path().join("retrace.toml");
        fs::write(&config_path, "# hand written\n").unwrap();
        let path = config_path.to_str().unwrap();

        let error = run(&["--config", path, "init"]).unwrap_err();

        assert!(error.to_string().contains("already exists"));
        assert_eq!(fs::read_to_string(&config_path).unwrap(), "# hand written\n");

        run(&["--config", path, "init", "--force"]).unwrap();

        assert_eq!(Config::load(&config_path).unwrap().sources().len(), 2);
    }

    #[test]
    fn unknown_lists_dangling_references_per_source() {
        let tmp = project();
        let engine = analyse(&tmp.path().join("retrace.toml"), true).unwrap();

        let all = unknown::unknown_references(&engine, None).unwrap();

        let listed: Vec<_> = all
            .iter()
            .map(|(source, references)| {
                let keys: Vec<_> = references
                    .iter()
                    .map(|(requirement, reference)| {
                        format!("{} -> {}", requirement.key(), reference.key())
                    })
                    .collect();
                (source.name(), keys)
            })
            .collect();
        assert_eq!(
            listed,
            vec![
                ("Spec", vec!["S1 -> I9".to_string()]),
                ("Tests", vec!["T1 -> S9".to_string()]),
            ]
        );
    }

    #[test]
    fn unknown_filters_to_one_source() {
        let tmp = project();
        let engine = analyse(&tmp.path().join("retrace.toml"), true).unwrap();

        let only_tests = unknown::unknown_references(&engine, Some("Tests")).unwrap();
        assert_eq!(only_tests.len(), 1);
        assert_eq!(only_tests[0].0.name(), "Tests");

        let only_impl = unknown::unknown_references(&engine, Some("Impl")).unwrap();
        assert!(only_impl.is_empty());
    }

    #[test]
    fn unknown_rejects_missing_source() {
        let tmp = project();
        let config_path = tmp.path().join("retrace.toml");
        let engine = analyse(&config_path, true).unwrap();

        assert!(unknown::unknown_references(&engine, Some("Nope")).is_err());

        let error = run(&[
            "--config",
            config_path.to_str().unwrap(),
            "unknown",
            "--source",
            "Nope",
        ])
        .unwrap_err();
        assert!(error.to_string().contains("no source named 'Nope'"));
    }
}
