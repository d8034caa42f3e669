mod commands;

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use modelsync::config::{Config, DEFAULT_CONFIG_FILE};
use modelsync::{parse_date_time, telemetry, DateRange, RebuildOptions};
use std::path::PathBuf;
use std::process::ExitCode;

use commands::{Context, Target};

#[derive(Parser, Debug)]
#[command(name = "modelsync")]
#[command(about = "modelsync - keep search indices in step with relational records")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, env = "MODELSYNC_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Delete the mappings, and every indexed document, of the selected schemas
    Clear {
        #[command(flatten)]
        target: Target,

        /// Do not ask for confirmation
        #[arg(long)]
        noinput: bool,
    },

    /// Put mappings and index records, optionally only those modified in a window
    Update {
        #[command(flatten)]
        target: Target,

        /// Index records modified at or after this time.
        /// yyyy-mm-dd[-hh:mm] or [#d][#h][#m][#s]
        #[arg(long)]
        start: Option<String>,

        /// Index records modified before this time.
        /// yyyy-mm-dd[-hh:mm] or [#d][#h][#m][#s]
        #[arg(long)]
        end: Option<String>,

        /// Documents per bulk request
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Clear, then reindex every record of the selected schemas
    Rebuild {
        #[command(flatten)]
        target: Target,

        /// Do not ask for confirmation
        #[arg(long)]
        noinput: bool,

        /// Write declared analysis settings to the live index when they differ
        #[arg(long)]
        apply_analysis: bool,

        /// Abort when live analysis settings or mappings differ from the declared ones
        #[arg(long, conflicts_with = "apply_analysis")]
        fail_on_drift: bool,

        /// Documents per bulk request
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = Config::load_or_default(&cli.config)?;
    telemetry::init_tracing(&config.logging)?;

    let report = match cli.command {
        Commands::Clear { target, noinput } => {
            let context = Context::load(&config, None).await?;
            commands::clear::run_clear(&context, &target, noinput).await?
        }
        Commands::Update {
            target,
            start,
            end,
            batch_size,
        } => {
            let range = parse_range(start.as_deref(), end.as_deref())?;
            let context = Context::load(&config, batch_size).await?;
            commands::update::run_update(&context, &target, range).await?
        }
        Commands::Rebuild {
            target,
            noinput,
            apply_analysis,
            fail_on_drift,
            batch_size,
        } => {
            let options = RebuildOptions {
                apply_analysis,
                fail_on_drift,
            };
            let context = Context::load(&config, batch_size).await?;
            commands::rebuild::run_rebuild(&context, &target, options, noinput).await?
        }
    };

    commands::print_report(&report);
    Ok(ExitCode::from(report.exit_code() as u8))
}

fn parse_range(start: Option<&str>, end: Option<&str>) -> Result<DateRange> {
    let now = Utc::now();
    let start = start.map(|s| parse_date_time(s, now)).transpose()?;
    let end = end.map(|s| parse_date_time(s, now)).transpose()?;
    Ok(DateRange::new(start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_update_args() {
        let cli = Cli::try_parse_from([
            "modelsync", "update", "library", "shop.order", "--using", "default", "--using",
            "archive", "--start", "2d", "--batch-size", "100",
        ])
        .unwrap();
        match cli.command {
            Commands::Update {
                target,
                start,
                end,
                batch_size,
            } => {
                assert_eq!(target.models, vec!["library", "shop.order"]);
                assert_eq!(target.using, vec!["default", "archive"]);
                assert_eq!(start.as_deref(), Some("2d"));
                assert_eq!(end, None);
                assert_eq!(batch_size, Some(100));
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
    }

    #[test]
    fn test_drift_flags_conflict() {
        assert!(Cli::try_parse_from(["modelsync", "rebuild", "--apply-analysis", "--fail-on-drift"]).is_err());
        assert!(Cli::try_parse_from(["modelsync", "rebuild", "--noinput", "--fail-on-drift"]).is_ok());
    }

    #[test]
    fn test_parse_range() {
        let range = parse_range(Some("2020-01-01"), Some("2020-02-01 12:30")).unwrap();
        assert_eq!(range.start.unwrap().to_rfc3339(), "2020-01-01T00:00:00+00:00");
        assert_eq!(range.end.unwrap().to_rfc3339(), "2020-02-01T12:30:00+00:00");
        assert!(!parse_range(None, None).unwrap().is_bounded());
        assert!(parse_range(Some("yesterday"), None).is_err());
    }
}
