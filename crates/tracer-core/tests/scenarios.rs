//! End-to-end sessions against the synthetic host engine

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tracer_core::engine::synthetic::{SyntheticEngine, SyntheticImage, SyntheticRoutine, SyntheticSection};
use tracer_core::engine::CandidateSite;
use tracer_core::error::{exit_status, ConfigError, TracerError};
use tracer_core::filter::BlockList;
use tracer_core::session::{SessionOptions, TraceSession};
use tracer_core::symbols::SymbolStyle;
use tracer_core::types::{Address, TraceGranularity};
use tracer_core::writer::TraceWriter;

/// `target` with `main`, `compute` and `malloc`, plus `libc.so.6` with its
/// own `malloc` and `printf`.
fn program() -> SyntheticEngine
{
    SyntheticEngine::new(vec![
        SyntheticImage::main("target").with_section(
            SyntheticSection::new(".text", 0x1000, 0x1000)
                .with_routine(
                    SyntheticRoutine::new("main")
                        .with_block([0x1000, 0x1004, 0x1008])
                        .with_block([0x100c, 0x1010]),
                )
                .with_routine(SyntheticRoutine::new("compute").with_block([0x1100, 0x1103, 0x1107]))
                .with_routine(SyntheticRoutine::new("malloc").with_block([0x1200, 0x1204])),
        ),
        SyntheticImage::library("libc.so.6").with_section(
            SyntheticSection::new(".text", 0x7000_0000, 0x1000)
                .with_routine(SyntheticRoutine::new("malloc").with_block([0x7000_0000, 0x7000_0004]))
                .with_routine(SyntheticRoutine::new("printf").with_block([0x7000_0100])),
        ),
    ])
}

fn addresses(raw: &[u64]) -> Vec<Address>
{
    raw.iter().copied().map(Address::new).collect()
}

fn lines(path: &Path) -> Vec<String>
{
    fs::read_to_string(path).unwrap().lines().map(str::to_string).collect()
}

fn options(dir: &Path, granularity: &str, blocked: &str, symbols: bool) -> SessionOptions
{
    SessionOptions {
        data_path: dir.join("trace.dat"),
        symbol_path: symbols.then(|| dir.join("trace.sym")),
        blocked_names: blocked.into(),
        granularity: granularity.into(),
        symbol_style: SymbolStyle::Qualified,
    }
}

#[test]
fn test_blocked_routine_is_not_recorded()
{
    let dir = tempfile::tempdir().unwrap();
    let opts = options(dir.path(), "cal", "MALLOC", false);
    let mut session = opts.open().unwrap();
    let mut engine = program();

    engine.instrument(&mut session);
    // compute, then the program's own malloc, then libc's malloc
    engine.run(&[addresses(&[0x1100, 0x1103, 0x1107, 0x1200, 0x1204, 0x7000_0000])]);
    session.finish().unwrap();

    assert_eq!(lines(&opts.data_path), ["0x1100"]);
}

#[test]
fn test_instruction_trace_without_symbol_stream()
{
    let dir = tempfile::tempdir().unwrap();
    let opts = options(dir.path(), "ins", "", false);
    let mut session = opts.open().unwrap();
    let mut engine = program();

    // Every instruction of the main image, none from libc
    assert_eq!(engine.instrument(&mut session), 10);
    let executed = [0x1000, 0x1004, 0x1008, 0x7000_0100, 0x1100, 0x1103, 0x1107, 0x100c, 0x1010];
    let fired = engine.run(&[addresses(&executed)]);
    let summary = session.finish().unwrap();

    assert_eq!(fired, 8);
    assert_eq!(summary.events_written, 8);
    assert_eq!(
        lines(&opts.data_path),
        ["0x1000", "0x1004", "0x1008", "0x1100", "0x1103", "0x1107", "0x100c", "0x1010"]
    );
    assert!(!dir.path().join("trace.sym").exists());
    assert_eq!(summary.symbols_interned, 0);
}

#[test]
fn test_basic_block_executed_twice()
{
    let dir = tempfile::tempdir().unwrap();
    let opts = options(dir.path(), "bbl", "", false);
    let mut session = opts.open().unwrap();
    let mut engine = program();

    engine.instrument(&mut session);
    engine.run(&[addresses(&[0x1100, 0x1103, 0x1107, 0x1100, 0x1103, 0x1107])]);
    session.finish().unwrap();

    assert_eq!(lines(&opts.data_path), ["0x1100", "0x1100"]);
}

#[test]
fn test_bad_output_directory_aborts_before_instrumentation()
{
    let dir = tempfile::tempdir().unwrap();
    let mut opts = options(dir.path(), "bbl", "", false);
    opts.data_path = dir.path().join("missing").join("trace.dat");

    let data_err = opts.open().err().unwrap();
    assert!(matches!(data_err, ConfigError::DataPath { .. }));
    assert_eq!(data_err.exit_code(), exit_status::DATA_PATH);

    let bad_granularity = options(dir.path(), "everything", "", false).open().err().unwrap();
    assert_eq!(bad_granularity.exit_code(), exit_status::GRANULARITY);
    assert_ne!(data_err.exit_code(), bad_granularity.exit_code());
}

#[test]
fn test_symbol_stream_is_line_correlated()
{
    let dir = tempfile::tempdir().unwrap();
    let opts = options(dir.path(), "bbl", "", true);
    let mut session = opts.open().unwrap();
    let mut engine = program();

    engine.instrument(&mut session);
    engine.run(&[addresses(&[0x1000, 0x1100, 0x1200, 0x100c, 0x7000_0000])]);
    let summary = session.finish().unwrap();

    let data = lines(&opts.data_path);
    let symbols = lines(dir.path().join("trace.sym").as_path());
    assert_eq!(data, ["0x1000", "0x1100", "0x1200", "0x100c"]);
    assert_eq!(
        symbols,
        [
            "0x0,.text+0x0:main",
            "0x0,.text+0x100:compute",
            "0x0,.text+0x200:malloc",
            "0x0,.text+0x0:main",
        ]
    );
    assert_eq!(summary.symbols_interned, 3);
}

#[test]
fn test_bare_symbol_style()
{
    let dir = tempfile::tempdir().unwrap();
    let mut opts = options(dir.path(), "cal", "", true);
    opts.symbol_style = SymbolStyle::Bare;
    let mut session = opts.open().unwrap();
    let mut engine = program();

    engine.instrument(&mut session);
    engine.run(&[addresses(&[0x1000, 0x1100])]);
    session.finish().unwrap();

    assert_eq!(lines(dir.path().join("trace.sym").as_path()), ["0x0,main", "0x0,compute"]);
}

#[test]
fn test_site_without_routine_is_traced_with_empty_symbol()
{
    let dir = tempfile::tempdir().unwrap();
    let opts = options(dir.path(), "ins", "main", true);
    let mut session = opts.open().unwrap();
    let mut engine = program();

    // Inside .text, but no routine owns it: the filter cannot block it
    let orphan = Address::new(0x1800);
    session.instrument(&CandidateSite::Instruction(orphan), &mut engine);
    engine.run(&[vec![orphan]]);
    session.finish().unwrap();

    assert_eq!(lines(&opts.data_path), ["0x1800"]);
    assert_eq!(lines(dir.path().join("trace.sym").as_path()), ["0x0,"]);
}

#[test]
fn test_concurrent_threads_keep_records_whole()
{
    const THREADS: usize = 8;
    const ROUNDS: usize = 500;

    let dir = tempfile::tempdir().unwrap();
    let opts = options(dir.path(), "bbl", "", true);
    let mut session = opts.open().unwrap();
    let mut engine = program();
    engine.instrument(&mut session);

    // Thread i alternates between main and compute, starting on a different one
    let schedules: Vec<Vec<Address>> = (0..THREADS)
        .map(|i| {
            (0..ROUNDS)
                .map(|round| Address::new(if (i + round) % 2 == 0 { 0x1000 } else { 0x1100 }))
                .collect()
        })
        .collect();
    let fired = engine.run(&schedules);
    let summary = session.finish().unwrap();

    let total = (THREADS * ROUNDS) as u64;
    assert_eq!(fired, total);
    assert_eq!(summary.events_written, total);

    let data = lines(&opts.data_path);
    let symbols = lines(dir.path().join("trace.sym").as_path());
    assert_eq!(data.len(), THREADS * ROUNDS);
    assert_eq!(symbols.len(), THREADS * ROUNDS);

    // Every pair is one whole event, and each thread's events are in order
    let mut per_thread: Vec<Vec<String>> = vec![Vec::new(); THREADS];
    for (address, symbol) in data.iter().zip(&symbols) {
        let (thread, text) = symbol.split_once(',').unwrap();
        let expected = match address.as_str() {
            "0x1000" => ".text+0x0:main",
            "0x1100" => ".text+0x100:compute",
            other => panic!("unexpected address {other}"),
        };
        assert_eq!(text, expected);

        let index = usize::from_str_radix(thread.trim_start_matches("0x"), 16).unwrap();
        per_thread[index].push(address.clone());
    }
    for (i, recorded) in per_thread.iter().enumerate() {
        let expected: Vec<String> = schedules[i].iter().map(ToString::to_string).collect();
        assert_eq!(recorded, &expected, "thread {i}");
    }
}

/// Sink that starts failing after `budget` bytes.
struct FullDisk
{
    budget: usize,
}

impl Write for FullDisk
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>
    {
        if buf.len() > self.budget {
            return Err(io::Error::new(io::ErrorKind::StorageFull, "no space left on device"));
        }
        self.budget -= buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()>
    {
        Ok(())
    }
}

#[test]
fn test_write_failure_surfaces_at_teardown()
{
    let writer = TraceWriter::new(FullDisk { budget: 14 }, None);
    let mut session = TraceSession::new(TraceGranularity::BasicBlock, BlockList::empty(), SymbolStyle::Qualified, writer);
    let mut engine = program();
    engine.instrument(&mut session);

    // Two "0x1000\n" lines fit, the third does not
    engine.run(&[addresses(&[0x1000, 0x1000, 0x1000, 0x1000])]);

    let err = session.finish().unwrap_err();
    assert!(matches!(err, TracerError::StreamWrite { written: 2, .. }));
    assert_eq!(err.exit_code(), exit_status::STREAM_WRITE);
}

#[test]
fn test_library_code_is_never_hooked()
{
    let dir = tempfile::tempdir().unwrap();
    for granularity in ["ins", "bbl", "cal"] {
        let opts = options(dir.path(), granularity, "", false);
        let mut session = opts.open().unwrap();
        let mut engine = program();
        engine.instrument(&mut session);

        engine.run(&[addresses(&[0x7000_0000, 0x7000_0004, 0x7000_0100])]);
        let summary = session.finish().unwrap();

        assert_eq!(summary.events_written, 0, "{granularity}");
        assert!(summary.dispatch.out_of_scope > 0, "{granularity}");
        assert!(lines(&opts.data_path).is_empty());
    }
}
