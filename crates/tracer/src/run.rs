//! `tracer run`: one target, one session.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use clap::Args;
use tracer_core::error::{exit_status, TracerResult};
use tracer_core::session::{SessionOptions, TraceSession};
use tracer_core::symbols::SymbolStyle;
use tracer_core::types::TargetExit;
use tracer_utils::{error, info};

/// Options of the `run` subcommand
#[derive(Args, Debug)]
pub struct RunArgs
{
    /// Data output file, one address per line (truncated)
    #[arg(short = 'o', long)]
    pub data: PathBuf,

    /// Symbol output file, one line per data line (omit to skip symbols)
    #[arg(short = 's', long)]
    pub symbols: Option<PathBuf>,

    /// `;`-separated routine name fragments to leave untraced (case-insensitive)
    #[arg(short = 'b', long, default_value = "")]
    pub blocked: String,

    /// Trace granularity: ins, bbl or cal
    #[arg(short = 'g', long, default_value = "bbl")]
    pub granularity: String,

    /// Write only the routine name in the symbol stream
    #[arg(long, default_value_t = false)]
    pub bare_symbols: bool,

    /// Exit with the target's status instead of 0
    #[arg(long, default_value_t = false)]
    pub forward_exit_status: bool,

    /// Program to trace
    pub program: PathBuf,

    /// Arguments passed to the program
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<OsString>,
}

impl RunArgs
{
    fn session_options(&self) -> SessionOptions
    {
        SessionOptions {
            data_path: self.data.clone(),
            symbol_path: self.symbols.clone(),
            blocked_names: self.blocked.clone(),
            granularity: self.granularity.clone(),
            symbol_style: if self.bare_symbols {
                SymbolStyle::Bare
            } else {
                SymbolStyle::Qualified
            },
        }
    }
}

/// Run one traced session and return the process exit status.
pub fn execute(args: RunArgs) -> i32
{
    let mut session = match args.session_options().open() {
        Ok(session) => session,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            eprintln!("Error: {}", e);
            return e.exit_code();
        }
    };

    info!(
        program = %args.program.display(),
        granularity = %session.granularity(),
        symbols = session.tracks_symbols(),
        "tracing"
    );

    let traced = trace(&args.program, &args.args, &mut session);

    // Flush whatever was recorded, even when the engine failed
    let finished = session.finish();

    let exit = match traced {
        Ok(exit) => exit,
        Err(e) => {
            error!(error = %e, "tracing failed");
            eprintln!("Error: {}", e);
            return e.exit_code();
        }
    };
    if let Err(e) = finished {
        eprintln!("Error: {}", e);
        return e.exit_code();
    }

    info!(%exit, "target finished");
    if args.forward_exit_status {
        exit.shell_status()
    } else {
        exit_status::SUCCESS
    }
}

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
fn trace(program: &Path, args: &[OsString], session: &mut TraceSession) -> TracerResult<TargetExit>
{
    use tracer_core::platform::linux::PtraceEngine;

    let engine = PtraceEngine::launch(program, args)?;
    engine.trace(session)
}

#[cfg(not(all(target_os = "linux", target_arch = "x86_64")))]
fn trace(program: &Path, _args: &[OsString], _session: &mut TraceSession) -> TracerResult<TargetExit>
{
    Err(tracer_core::error::TracerError::Unsupported(format!(
        "cannot trace {} on {}-{}: only linux-x86_64 has a host engine",
        program.display(),
        std::env::consts::OS,
        std::env::consts::ARCH
    )))
}
