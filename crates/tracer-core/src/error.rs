//! # Error Types
//!
//! General error handling for the tracer.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages.
//!
//! Configuration problems get their own enum, [`ConfigError`], because each of
//! them must end the process with a distinct exit status before anything is
//! instrumented. Everything else is a [`TracerError`].

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Process exit statuses used by the `tracer` binary.
///
/// Configuration failures each get their own status so a calling script can
/// tell which option was wrong without parsing stderr.
pub mod exit_status
{
    /// Session completed and both streams were flushed.
    pub const SUCCESS: i32 = 0;
    /// Logging could not be initialised.
    pub const LOGGING: i32 = 1;
    /// The host engine could not start or drive the target.
    pub const ENGINE: i32 = 10;
    /// The host engine could not load symbols for the main image.
    pub const SYMBOL_LOAD: i32 = 11;
    /// Unrecognised granularity value.
    pub const GRANULARITY: i32 = 100;
    /// Malformed blocked-name list.
    pub const BLOCK_LIST: i32 = 101;
    /// Data output path could not be opened.
    pub const DATA_PATH: i32 = 102;
    /// Symbol output path could not be opened.
    pub const SYMBOL_PATH: i32 = 103;
    /// A trace stream stopped accepting writes during the session.
    pub const STREAM_WRITE: i32 = 104;
}

/// A configuration option failed validation
///
/// Every variant aborts the session before any hook is registered.
#[derive(Error, Debug)]
pub enum ConfigError
{
    /// The data output path could not be opened for truncate-write
    ///
    /// Typical causes: the parent directory does not exist, or the process
    /// lacks write permission.
    #[error("cannot open data output {}: {source}", path.display())]
    DataPath
    {
        /// Path given on the command line
        path: PathBuf,
        /// Underlying open error
        #[source]
        source: io::Error,
    },

    /// The symbol output path was given but could not be opened
    #[error("cannot open symbol output {}: {source}", path.display())]
    SymbolPath
    {
        /// Path given on the command line
        path: PathBuf,
        /// Underlying open error
        #[source]
        source: io::Error,
    },

    /// The granularity value is not one of the recognised names
    #[error("unrecognised granularity {0:?} (expected 'ins', 'bbl' or 'cal')")]
    Granularity(String),

    /// An entry of the blocked-name list cannot match any routine name
    #[error("invalid blocked-name entry {0:?}: entries must not contain control characters")]
    BlockList(String),
}

impl ConfigError
{
    /// Exit status reported for this failure.
    #[must_use]
    pub fn exit_code(&self) -> i32
    {
        match self {
            Self::DataPath { .. } => exit_status::DATA_PATH,
            Self::SymbolPath { .. } => exit_status::SYMBOL_PATH,
            Self::Granularity(_) => exit_status::GRANULARITY,
            Self::BlockList(_) => exit_status::BLOCK_LIST,
        }
    }
}

/// Main error type for tracing sessions
///
/// ## Error Categories
///
/// 1. **Configuration errors**: `Config` (fatal, before instrumentation)
/// 2. **Host errors**: `Launch`, `Ptrace`, `SymbolLoad`, `Unsupported`
/// 3. **Output errors**: `StreamWrite` (detected during the session, reported at teardown)
/// 4. **I/O errors**: `Io`
///
/// Resolution misses (an address with no image or routine) are not errors at
/// all; the site is simply out of scope.
#[derive(Error, Debug)]
pub enum TracerError
{
    /// Session configuration was rejected
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The target program could not be started under the host engine
    #[error("failed to launch {program}: {source}")]
    Launch
    {
        /// Program path or name
        program: String,
        /// Underlying spawn error
        #[source]
        source: io::Error,
    },

    /// A `ptrace` request failed
    ///
    /// The operation names the request (e.g. `PTRACE_GETREGS`) and the thread
    /// it was issued against.
    #[error("ptrace {operation} failed for tid {tid}: {source}")]
    Ptrace
    {
        /// Name of the failing request
        operation: &'static str,
        /// Kernel thread id the request targeted
        tid: i32,
        /// Errno reported by the kernel
        #[source]
        source: io::Error,
    },

    /// Symbols of the main executable could not be loaded
    #[error("failed to load symbols: {0}")]
    SymbolLoad(String),

    /// The host engine cannot run on this platform or configuration
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A trace stream rejected a write; events after the failure were dropped
    #[error("trace stream write failed after {written} events: {source}")]
    StreamWrite
    {
        /// Events successfully written before the failure
        written: u64,
        /// The first write error
        #[source]
        source: io::Error,
    },

    /// I/O error (for file operations, etc.)
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl TracerError
{
    /// Exit status reported for this failure.
    #[must_use]
    pub fn exit_code(&self) -> i32
    {
        match self {
            Self::Config(config) => config.exit_code(),
            Self::Launch { .. } | Self::Ptrace { .. } | Self::Unsupported(_) | Self::Io(_) => exit_status::ENGINE,
            Self::SymbolLoad(_) => exit_status::SYMBOL_LOAD,
            Self::StreamWrite { .. } => exit_status::STREAM_WRITE,
        }
    }
}

/// Convenience type alias for `Result<T, TracerError>`
///
/// ```rust
/// use tracer_core::error::TracerResult;
/// fn foo() -> TracerResult<()>
/// {
///     Ok(())
/// }
/// ```
pub type TracerResult<T> = std::result::Result<T, TracerError>;
