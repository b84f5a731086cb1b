pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use orderly_core::config::{AppConfig, ConfigOverrides, LoadOptions, LogFormat, LoggingConfig};
use orderly_core::ApplicationError;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::commands::calibrate::CalibrateArgs;
use crate::commands::{CommandResult, WorkbookInput, EXIT_CONFIG};

#[derive(Debug, Parser)]
#[command(
    name = "orderly",
    about = "Spreadsheet order extraction and reviewer consensus",
    long_about = "Extract purchase orders from spreadsheets, build evidence packs for ambiguous \
                  columns, aggregate reviewer votes, and manage calibrated reviewer weights.",
    after_help = "Examples:\n  orderly extract po.xlsx\n  orderly pack po.xlsx > pack.json\n  orderly consensus --pack pack.json --votes votes.json\n  orderly config"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Config file (default: orderly.toml or config/orderly.toml)")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Override logging.level")]
    log_level: Option<String>,
    #[arg(long, global = true, value_parser = parse_log_format, help = "Override logging.format")]
    log_format: Option<LogFormat>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct WorkbookArgs {
    #[arg(help = "Workbook to read (.xlsx, .xls, .ods)")]
    file: PathBuf,
    #[arg(long, help = "Case id (default: file stem)")]
    case_id: Option<String>,
    #[arg(long, help = "Language hint for header matching, e.g. de")]
    language: Option<String>,
}

impl From<WorkbookArgs> for WorkbookInput {
    fn from(args: WorkbookArgs) -> Self {
        Self { file: args.file, case_id: args.case_id, language: args.language }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Extract a canonical order with evidence and issues")]
    Extract(WorkbookArgs),
    #[command(about = "Build the evidence pack for fields the extractor could not settle")]
    Pack(WorkbookArgs),
    #[command(about = "Run the configured reviewer committee and route the case")]
    Review(WorkbookArgs),
    #[command(about = "Apply an operator correction to an extracted order as a new version")]
    Correct {
        #[arg(long, help = "Canonical order JSON, as printed by extract")]
        order: PathBuf,
        #[arg(long, help = "Correction JSON: corrected_by, customer, line_edits")]
        correction: PathBuf,
    },
    #[command(about = "Aggregate recorded reviewer responses for an evidence pack")]
    Consensus {
        #[arg(long, help = "Evidence pack JSON")]
        pack: PathBuf,
        #[arg(long, help = "Recorded reviewer responses JSON")]
        votes: PathBuf,
        #[arg(long, help = "Approved weight table (default: weights.active_path)")]
        weights: Option<PathBuf>,
    },
    #[command(about = "Produce a candidate weight table from a labelled corpus")]
    Calibrate {
        #[arg(long, help = "Calibration corpus JSON")]
        corpus: PathBuf,
        #[arg(long, help = "Directory of reviewer transcript JSON files")]
        transcripts: PathBuf,
        #[arg(long, help = "Version label for the candidate table")]
        version: String,
        #[arg(long, help = "Where to write the candidate table")]
        out: PathBuf,
    },
    #[command(about = "Approve a candidate weight table and make it active")]
    ApproveWeights {
        #[arg(help = "Candidate weight table JSON")]
        candidate: PathBuf,
        #[arg(long, help = "Name recorded as approver")]
        approver: String,
        #[arg(long, help = "Destination (default: weights.active_path)")]
        out: Option<PathBuf>,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::Extract(_) => "extract",
            Self::Pack(_) => "pack",
            Self::Review(_) => "review",
            Self::Correct { .. } => "correct",
            Self::Consensus { .. } => "consensus",
            Self::Calibrate { .. } => "calibrate",
            Self::ApproveWeights { .. } => "approve-weights",
            Self::Config => "config",
        }
    }
}

fn parse_log_format(value: &str) -> Result<LogFormat, String> {
    value.parse::<LogFormat>().map_err(|error| error.to_string())
}

/// Logs go to stderr so stdout stays a single JSON document.
pub fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_new(&logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder =
        tracing_subscriber::fmt().with_target(false).with_env_filter(filter).with_writer(std::io::stderr);
    let installed = match logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let result = execute(cli);
    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

pub fn execute(cli: Cli) -> CommandResult {
    let options = LoadOptions {
        config_path: cli.config.clone(),
        require_file: cli.config.is_some(),
        overrides: ConfigOverrides {
            log_level: cli.log_level,
            log_format: cli.log_format,
            ..ConfigOverrides::default()
        },
    };
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            let run_id = format!("run-{}", Uuid::new_v4());
            return CommandResult::rejected(
                cli.command.name(),
                "config_validation",
                ApplicationError::from(error),
                &run_id,
                EXIT_CONFIG,
            );
        }
    };
    init_logging(&config.logging);

    match cli.command {
        Command::Extract(args) => commands::extract::run(&config, &args.into()),
        Command::Pack(args) => commands::pack::run(&config, &args.into()),
        Command::Review(args) => commands::review::run(&config, &args.into()),
        Command::Correct { order, correction } => {
            commands::correct::run(&config, &order, &correction)
        }
        Command::Consensus { pack, votes, weights } => {
            commands::consensus::run(&config, &pack, &votes, weights.as_deref())
        }
        Command::Calibrate { corpus, transcripts, version, out } => commands::calibrate::run(
            &config,
            &CalibrateArgs {
                corpus: &corpus,
                transcripts: &transcripts,
                version: &version,
                out: &out,
            },
        ),
        Command::ApproveWeights { candidate, approver, out } => {
            commands::approve::run(&config, &candidate, &approver, out.as_deref())
        }
        Command::Config => CommandResult {
            exit_code: 0,
            output: commands::config::run(&config, cli.config.as_deref()),
        },
    }
}
