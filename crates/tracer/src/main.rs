use std::process;

use clap::{Parser, Subcommand};
use tracer_core::error::exit_status;
use tracer_utils::logging::LOG_FORMAT_ENV;
use tracer_utils::{init_logging, init_logging_with_level, LogFormat, LogLevel, LoggingError};

mod batch;
mod run;

use batch::BatchArgs;
use run::RunArgs;

/// Dynamic execution tracer: records which instructions, basic blocks or
/// function entries of a program run, in execution order.
#[derive(Parser, Debug)]
#[command(name = "tracer")]
#[command(version)]
#[command(about = "Record instruction, basic-block or function-entry traces of a program", long_about = None)]
struct Cli
{
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace). Overrides RUST_LOG
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Log format (pretty or json). Overrides TRACER_LOG_FORMAT
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Launch a program and trace it
    Run(RunArgs),
    /// Trace one program over every file of an input directory
    Batch(BatchArgs),
}

fn main()
{
    let cli = Cli::parse();

    if let Err(e) = setup_logging(&cli) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(exit_status::LOGGING);
    }

    let code = match cli.command {
        Commands::Run(args) => run::execute(args),
        Commands::Batch(args) => batch::execute(args),
    };
    process::exit(code);
}

/// Explicit flags win; otherwise `RUST_LOG`, `TRACER_LOG_FORMAT` and
/// `TRACER_LOG_FILE` decide.
fn setup_logging(cli: &Cli) -> Result<(), LoggingError>
{
    if cli.log_level.is_none() && cli.log_format.is_none() {
        return init_logging();
    }

    let format = cli.log_format.unwrap_or_else(|| {
        std::env::var(LOG_FORMAT_ENV)
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(LogFormat::Pretty)
    });
    init_logging_with_level(cli.log_level.unwrap_or(LogLevel::Info), format)
}
