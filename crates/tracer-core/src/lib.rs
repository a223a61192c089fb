//! # tracer-core
//!
//! Instrumentation pipeline for the execution tracer.
//!
//! A host engine offers candidate sites (instructions, basic blocks or
//! routines) of a running program. For each one this crate decides whether
//! it belongs to the program under test, whether its routine is blocked by
//! name, and which hook to attach. Hooks then append one record per executed
//! site to a data stream and, optionally, a correlated symbol stream.
//!
//! - [`filter`]: case-insensitive blocked-name list
//! - [`scope`]: main-image membership
//! - [`symbols`]: symbol text, interning, ELF routine tables
//! - [`dispatch`]: per-site decisions and hook selection
//! - [`writer`]: serialised, failure-latching output streams
//! - [`session`]: option validation and the session lifecycle
//! - [`engine`]: the host interface, plus a synthetic host
//! - [`platform`]: a `ptrace` host for Linux x86-64
//!
//! ## Why unsafe code is needed
//!
//! The `ptrace` host calls `ptrace(2)`, `waitpid(2)` and `kill(2)` through
//! `libc`. Every call is wrapped in a safe function under
//! `platform::linux`; nothing else in the crate is unsafe.

#![allow(unsafe_code)] // Required for ptrace and waitpid

pub mod dispatch;
pub mod engine;
pub mod error;
pub mod filter;
pub mod platform;
pub mod prelude;
pub mod scope;
pub mod session;
pub mod symbols;
pub mod types;
pub mod writer;

pub use error::{ConfigError, TracerError, TracerResult};
pub use session::{SessionOptions, SessionSummary, TraceSession};
