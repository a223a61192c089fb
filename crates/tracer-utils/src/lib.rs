//! # Tracer Utilities
//!
//! Shared utilities and logging for the execution tracer.
//!
//! This crate provides common functionality used across the workspace,
//! including the logging setup built on `tracing`. Log output always goes to
//! stderr or a file, never stdout, because stdout belongs to the traced target.

pub mod logging;

// Re-export commonly used logging functions for convenience
pub use logging::{LogFormat, LogLevel, LoggingError, init_logging, init_logging_with_level, worker_log_paths};
pub use tracing::{debug, error, info, trace, warn};
