//! Linux integration tests for the ptrace host engine
//!
//! These tests launch real processes under `ptrace`, which containers and CI
//! sandboxes often forbid.
//!
//! Run with: `cargo test --test linux_integration -- --ignored`

#![cfg(all(target_os = "linux", target_arch = "x86_64"))]

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracer_core::error::TracerError;
use tracer_core::platform::linux::PtraceEngine;
use tracer_core::session::SessionOptions;
use tracer_core::types::TargetExit;

/// `spin` runs one `loop` instruction five times and `countdown` runs a
/// two-instruction block five times; both reach their loop through a `jmp`.
const TARGET_SOURCE: &str = r#"
#include <stdlib.h>

void spin(void);
void countdown(void);

__asm__(
    ".text\n"
    ".globl spin\n"
    ".type spin, @function\n"
    "spin:\n"
    "    mov $5, %ecx\n"
    "    jmp 1f\n"
    "1:  loop 1b\n"
    "    ret\n"
    ".size spin, .-spin\n"
    ".globl countdown\n"
    ".type countdown, @function\n"
    "countdown:\n"
    "    mov $5, %ecx\n"
    "    jmp 2f\n"
    "2:  dec %ecx\n"
    "    jnz 2b\n"
    "    ret\n"
    ".size countdown, .-countdown\n");

__attribute__((noinline)) int compute(int x) { return x * 3 + 1; }
__attribute__((noinline)) int skipped(int x) { return x - 1; }

int main(int argc, char **argv)
{
    int calls = argc > 1 ? atoi(argv[1]) : 1;
    int total = 0;
    for (int i = 0; i < calls; i++) {
        total += compute(i);
        total += skipped(i);
    }
    spin();
    countdown();
    return total < 0;
}
"#;

/// Compile the loop target with the system C compiler.
fn build_target(dir: &Path) -> PathBuf
{
    let source = dir.join("target.c");
    let program = dir.join("target");
    fs::write(&source, TARGET_SOURCE).unwrap();

    let status = Command::new("cc")
        .arg("-O0")
        .arg("-o")
        .arg(&program)
        .arg(&source)
        .status()
        .expect("failed to run cc");
    assert!(status.success(), "cc failed: {status}");
    program
}

/// Data and symbol lines of one traced run of the loop target.
struct Traced
{
    data: Vec<String>,
    symbols: Vec<String>,
}

impl Traced
{
    fn run(dir: &Path, granularity: &str, blocked: &str, calls: u32) -> Self
    {
        let program = build_target(dir);
        let opts = SessionOptions {
            blocked_names: blocked.into(),
            ..options(dir, granularity, true)
        };
        let mut session = opts.open().unwrap();

        let args = [OsString::from(calls.to_string())];
        let engine = PtraceEngine::launch(&program, &args).unwrap();
        let exit = engine.trace(&mut session).unwrap();
        session.finish().unwrap();
        assert_eq!(exit, TargetExit::Code(0));

        let read_lines = |path: &Path| -> Vec<String> {
            fs::read_to_string(path).unwrap().lines().map(str::to_string).collect()
        };
        Self {
            data: read_lines(&opts.data_path),
            symbols: read_lines(&dir.join("trace.sym")),
        }
    }

    /// Recorded addresses whose symbol line names `routine`, in order.
    fn addresses_in(&self, routine: &str) -> Vec<u64>
    {
        let suffix = format!(":{routine}");
        self.data
            .iter()
            .zip(&self.symbols)
            .filter(|(_, symbol)| symbol.ends_with(&suffix))
            .map(|(data, _)| u64::from_str_radix(data.trim_start_matches("0x"), 16).unwrap())
            .collect()
    }

    fn counts_in(&self, routine: &str) -> HashMap<u64, usize>
    {
        let mut counts = HashMap::new();
        for address in self.addresses_in(routine) {
            *counts.entry(address).or_insert(0) += 1;
        }
        counts
    }
}

fn options(dir: &Path, granularity: &str, symbols: bool) -> SessionOptions
{
    SessionOptions {
        data_path: dir.join("trace.dat"),
        symbol_path: symbols.then(|| dir.join("trace.sym")),
        granularity: granularity.into(),
        ..SessionOptions::default()
    }
}

#[test]
#[ignore = "requires ptrace permission"]
fn test_trace_true_by_basic_block()
{
    let dir = tempfile::tempdir().unwrap();
    let opts = options(dir.path(), "bbl", true);
    let mut session = opts.open().unwrap();

    let engine = PtraceEngine::launch(Path::new("/bin/true"), &[]).unwrap();
    let exit = engine.trace(&mut session).unwrap();
    let summary = session.finish().unwrap();

    assert_eq!(exit, TargetExit::Code(0));
    assert!(summary.events_written > 0);

    let data = fs::read_to_string(&opts.data_path).unwrap();
    let symbols = fs::read_to_string(dir.path().join("trace.sym")).unwrap();
    assert_eq!(data.lines().count(), symbols.lines().count());
    assert!(data.lines().all(|line| line.starts_with("0x")));
}

#[test]
#[ignore = "requires ptrace permission"]
fn test_exit_status_is_reported()
{
    let dir = tempfile::tempdir().unwrap();
    let mut session = options(dir.path(), "cal", false).open().unwrap();

    let args = [OsString::from("-c"), OsString::from("exit 7")];
    let engine = PtraceEngine::launch(Path::new("/bin/sh"), &args).unwrap();
    let exit = engine.trace(&mut session).unwrap();
    session.finish().unwrap();

    assert_eq!(exit, TargetExit::Code(7));
}

#[test]
#[ignore = "requires ptrace permission and a C compiler"]
fn test_instruction_trace_counts_every_loop_iteration()
{
    let dir = tempfile::tempdir().unwrap();
    let traced = Traced::run(dir.path(), "ins", "", 1);

    // mov, jmp, five times loop, ret
    let spin = traced.counts_in("spin");
    assert_eq!(traced.addresses_in("spin").len(), 8);
    assert_eq!(spin.len(), 4);
    assert_eq!(spin.values().max(), Some(&5));

    // mov, jmp, five times dec and jnz, ret
    let countdown = traced.counts_in("countdown");
    assert_eq!(traced.addresses_in("countdown").len(), 13);
    assert_eq!(countdown.values().filter(|&&count| count == 5).count(), 2);
}

#[test]
#[ignore = "requires ptrace permission and a C compiler"]
fn test_block_trace_counts_every_loop_iteration()
{
    let dir = tempfile::tempdir().unwrap();
    let traced = Traced::run(dir.path(), "bbl", "", 1);

    // Entry, the loop block five times, then the block after it
    let spin = traced.counts_in("spin");
    assert_eq!(traced.addresses_in("spin").len(), 7);
    assert_eq!(spin.len(), 3);
    assert_eq!(spin.values().max(), Some(&5));

    let countdown = traced.counts_in("countdown");
    assert_eq!(traced.addresses_in("countdown").len(), 7);
    let looped: Vec<u64> = countdown
        .iter()
        .filter(|(_, &count)| count == 5)
        .map(|(&address, _)| address)
        .collect();
    assert_eq!(looped.len(), 1);
    // `dec %ecx` is two bytes; the `jnz` after it is inside the block
    assert!(!countdown.contains_key(&(looped[0] + 2)));
}

#[test]
#[ignore = "requires ptrace permission and a C compiler"]
fn test_call_trace_records_each_entry_and_skips_blocked()
{
    let dir = tempfile::tempdir().unwrap();
    let traced = Traced::run(dir.path(), "cal", "SKIP", 4);

    let compute = traced.addresses_in("compute");
    assert_eq!(compute.len(), 4);
    assert!(compute.iter().all(|&address| address == compute[0]));
    assert!(traced.addresses_in("skipped").is_empty());
    assert_eq!(traced.addresses_in("spin").len(), 1);
    assert_eq!(traced.addresses_in("main").len(), 1);
}

#[test]
#[ignore = "requires ptrace permission and a C compiler"]
fn test_symbol_lines_pair_with_data_lines()
{
    let dir = tempfile::tempdir().unwrap();
    let traced = Traced::run(dir.path(), "cal", "", 2);

    assert_eq!(traced.data.len(), traced.symbols.len());
    assert!(traced.data.iter().all(|line| line.starts_with("0x")));
    assert!(traced.symbols.iter().all(|line| line.starts_with("0x0,")));

    let compute: Vec<&String> = traced.symbols.iter().filter(|line| line.ends_with(":compute")).collect();
    assert_eq!(compute.len(), 2);
    for line in compute {
        let (thread, rest) = line.split_once(',').unwrap();
        let (location, _) = rest.split_once(':').unwrap();
        let offset = location.strip_prefix(".text+0x").unwrap();
        assert_eq!(thread, "0x0");
        assert!(u64::from_str_radix(offset, 16).is_ok(), "{line}");
    }
}

#[test]
fn test_missing_program_fails_to_launch()
{
    let err = PtraceEngine::launch(Path::new("/definitely/not/here"), &[]).err().unwrap();
    assert!(matches!(err, TracerError::Launch { .. }));
    assert_eq!(err.exit_code(), 10);
}
