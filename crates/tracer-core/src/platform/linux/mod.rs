//! # Linux Host Engine
//!
//! Runs the target under `ptrace` and turns it into a [`HostEngine`].
//!
//! How each granularity is observed:
//!
//! | Granularity    | Resume request        | Sites discovered              |
//! |----------------|-----------------------|-------------------------------|
//! | `Instruction`  | `PTRACE_SINGLESTEP`   | lazily, on first execution    |
//! | `BasicBlock`   | `PTRACE_SINGLESTEP`   | lazily, at decoded boundaries |
//! | `FunctionCall` | `PTRACE_CONT`         | up front, from the symbols    |
//!
//! Every single-step stop is one execution. In basic-block mode the stop is
//! reported only when it begins a block: the previous instruction of the
//! thread (decoded with `iced-x86`) could transfer control, or the thread did
//! not land right after it.
//!
//! Function-call hooks are `int3` breakpoints at routine entries. When one
//! is hit the hook fires, the original byte is put back, the thread steps one
//! instruction, and the breakpoint is re-armed.
//!
//! ## Threads and children
//!
//! New threads are followed (`PTRACE_O_TRACECLONE`) and numbered in the order
//! they appear. Forked children are detached as soon as they stop, after their
//! copy of the breakpoints has been removed.
//!
//! [`HostEngine`]: crate::engine::HostEngine

mod blocks;
mod engine;
mod maps;
mod ptrace;

pub use engine::PtraceEngine;
