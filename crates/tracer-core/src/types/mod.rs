//! # Types
//!
//! Host-agnostic types used throughout the tracer.
//!
//! These types abstract away which host engine produced a value, so the
//! filtering, dispatch and writing logic works the same whether sites come
//! from `ptrace`, a synthetic program model, or some other host.

pub mod address;
pub mod granularity;
pub mod process;

// Re-export all public types
pub use address::Address;
pub use granularity::TraceGranularity;
pub use process::{TargetExit, ThreadId};
