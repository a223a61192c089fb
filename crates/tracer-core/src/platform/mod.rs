//! # Platform-Specific Host Engines
//!
//! Host engines that run a real target program.
//!
//! - **Linux x86-64**: `ptrace` with single-stepping, branch-stepping and
//!   software breakpoints
//!   - See: [ptrace(2) man page](https://man7.org/linux/man-pages/man2/ptrace.2.html)
//!
//! Other platforms only get the [synthetic engine](crate::engine::synthetic).

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
pub mod linux;
