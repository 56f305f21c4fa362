// givegrid CLI - batch donor resolution runs

mod exit_codes;
mod run;

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use exit_codes::EXIT_SUCCESS;
use givegrid_resolve::DonorId;

#[derive(Parser)]
#[command(name = "ggrid")]
#[command(about = "Donor identity resolution and recurring-donor classification")]
#[command(long_version = long_version())]
#[command(version)]
struct Cli {
    /// Debug logging on stderr (RUST_LOG takes precedence)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve duplicate donors and classify recurring donors
    #[command(after_help = "\
Examples:
  ggrid run run.toml
  ggrid run run.toml --output-dir out/
  ggrid run run.toml --json > result.json
  ggrid run run.toml --reference '2026-06-30 12:00:00' --output result.json")]
    Run {
        /// Path to the run .toml config file
        config: PathBuf,

        /// Directory for donors.csv, donations.csv, tax_units.csv, donor_map.csv
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Output JSON to stdout
        #[arg(long)]
        json: bool,

        /// Write JSON output to file
        #[arg(long)]
        output: Option<PathBuf>,

        /// Reference instant for recurring classification (overrides config)
        #[arg(long, value_parser = run::parse_timestamp_arg)]
        reference: Option<NaiveDateTime>,
    },

    /// Validate a run config without running
    #[command(after_help = "\
Examples:
  ggrid validate run.toml")]
    Validate {
        /// Path to the run .toml config file
        config: PathBuf,
    },

    /// Re-run the recurring classifier at another instant
    #[command(after_help = "\
Examples:
  ggrid classify run.toml --at 2026-01-31
  ggrid classify run.toml --at '2026-01-31 23:59:59' --donor 1042 --donor 7 --json")]
    Classify {
        /// Path to the run .toml config file
        config: PathBuf,

        /// Reference instant to classify at
        #[arg(long, value_parser = run::parse_timestamp_arg)]
        at: NaiveDateTime,

        /// Donor ids to report (merged ids are followed); all donors if omitted
        #[arg(long = "donor")]
        donors: Vec<DonorId>,

        /// Output JSON to stdout
        #[arg(long)]
        json: bool,
    },
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("GIVEGRID_COMMIT"), ")",
        "\nengine:  givegrid-resolve ", env!("CARGO_PKG_VERSION"),
        "\ntarget:  ", env!("GIVEGRID_TARGET"),
    )
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "givegrid=debug,ggrid=debug"
    } else {
        "givegrid=info,ggrid=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Run {
            config,
            output_dir,
            json,
            output,
            reference,
        } => run::cmd_run(config, output_dir, json, output, reference),
        Commands::Validate { config } => run::cmd_validate(config),
        Commands::Classify {
            config,
            at,
            donors,
            json,
        } => run::cmd_classify(config, at, donors, json),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}
