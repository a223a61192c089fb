//! # Trace Writer
//!
//! The only code that touches the output streams.
//!
//! Hooks fire from every thread of the target at once. Each event takes the
//! writer's mutex, appends one line to the data stream (and, when symbols are
//! tracked, one line to the symbol stream), and releases it. That keeps each
//! event indivisible and keeps line *k* of both streams describing the same
//! event.
//!
//! ## Stream formats
//!
//! ```text
//! data:    0x401136
//! symbols: 0x0,.text+0x36:compute
//! ```
//!
//! ## Write failures
//!
//! Every append is checked. The first failure is logged, remembered, and all
//! later events are dropped; [`TraceWriter::finish`] then reports it as
//! [`TracerError::StreamWrite`]. Nothing is retried.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, error};

use crate::error::{ConfigError, TracerError, TracerResult};
use crate::symbols::SymbolHandle;
use crate::types::{Address, ThreadId};

type Sink = Box<dyn Write + Send>;

/// One observed event, alive only for the duration of a write.
#[derive(Debug, Clone, Copy)]
pub struct TraceEvent<'a>
{
    /// Address reached.
    pub address: Address,
    /// Thread that reached it; only written with a symbol.
    pub thread: Option<ThreadId>,
    /// Symbol of the owning routine.
    pub symbol: Option<&'a SymbolHandle>,
}

struct Streams
{
    data: Option<Sink>,
    symbols: Option<Sink>,
    written: u64,
    failure: Option<io::Error>,
}

impl Streams
{
    fn append(&mut self, event: &TraceEvent<'_>) -> io::Result<()>
    {
        if let Some(data) = self.data.as_mut() {
            writeln!(data, "{}", event.address)?;
        }
        if let (Some(symbols), Some(symbol)) = (self.symbols.as_mut(), event.symbol) {
            let thread = event.thread.unwrap_or(ThreadId::MAIN);
            writeln!(symbols, "{thread},{symbol}")?;
        }
        Ok(())
    }
}

/// Serialises trace events from concurrent hooks into the output streams
///
/// Shared behind an `Arc` by every hook of a session.
///
/// ## Example
///
/// ```rust
/// use tracer_core::writer::TraceWriter;
/// use tracer_core::types::Address;
///
/// let writer = TraceWriter::new(Vec::new(), None);
/// writer.record_address(Address::new(0x401000));
/// assert_eq!(writer.finish()?, 1);
/// # Ok::<(), tracer_core::error::TracerError>(())
/// ```
pub struct TraceWriter
{
    streams: Mutex<Streams>,
    tracks_symbols: bool,
}

impl TraceWriter
{
    /// Wrap already-open sinks.
    pub fn new<D>(data: D, symbols: Option<Box<dyn Write + Send>>) -> Self
    where
        D: Write + Send + 'static,
    {
        let tracks_symbols = symbols.is_some();
        Self {
            streams: Mutex::new(Streams {
                data: Some(Box::new(data)),
                symbols,
                written: 0,
                failure: None,
            }),
            tracks_symbols,
        }
    }

    /// Open (truncating) the data file and, if given, the symbol file.
    ///
    /// An empty symbol path counts as "no symbol output".
    ///
    /// ## Errors
    ///
    /// - [`ConfigError::DataPath`] if the data file cannot be opened
    /// - [`ConfigError::SymbolPath`] if the symbol file cannot be opened
    pub fn create(data_path: &Path, symbol_path: Option<&Path>) -> Result<Self, ConfigError>
    {
        let data = open_truncate(data_path).map_err(|source| ConfigError::DataPath {
            path: data_path.to_path_buf(),
            source,
        })?;

        let symbols = match symbol_path.filter(|path| !path.as_os_str().is_empty()) {
            Some(path) => {
                let file = open_truncate(path).map_err(|source| ConfigError::SymbolPath {
                    path: path.to_path_buf(),
                    source,
                })?;
                Some(Box::new(BufWriter::new(file)) as Sink)
            }
            None => None,
        };

        debug!(
            data = %data_path.display(),
            symbols = symbols.is_some(),
            "opened trace streams"
        );
        Ok(Self::new(BufWriter::new(data), symbols))
    }

    /// Whether a symbol stream is open for this session.
    #[must_use]
    pub fn tracks_symbols(&self) -> bool
    {
        self.tracks_symbols
    }

    /// Record an address-only event.
    pub fn record_address(&self, address: Address)
    {
        self.record(&TraceEvent {
            address,
            thread: None,
            symbol: None,
        });
    }

    /// Record an event with its thread and owning-routine symbol.
    pub fn record_address_with_symbol(&self, address: Address, thread: ThreadId, symbol: &SymbolHandle)
    {
        self.record(&TraceEvent {
            address,
            thread: Some(thread),
            symbol: Some(symbol),
        });
    }

    /// Append one event to the stream(s) as a single unit.
    pub fn record(&self, event: &TraceEvent<'_>)
    {
        let mut streams = self.lock();
        if streams.failure.is_some() || streams.data.is_none() {
            return;
        }

        match streams.append(event) {
            Ok(()) => streams.written += 1,
            Err(err) => {
                error!(
                    written = streams.written,
                    address = %event.address,
                    "trace stream write failed, dropping further events: {err}"
                );
                streams.failure = Some(err);
            }
        }
    }

    /// Events fully written so far.
    #[must_use]
    pub fn events_written(&self) -> u64
    {
        self.lock().written
    }

    /// Flush and close both streams.
    ///
    /// Only the first call does anything; later calls (and later events) find
    /// the streams already closed. Returns the number of events written.
    ///
    /// ## Errors
    ///
    /// [`TracerError::StreamWrite`] if any append failed during the session
    /// or the final flush fails.
    pub fn finish(&self) -> TracerResult<u64>
    {
        let mut streams = self.lock();
        let data = streams.data.take();
        let symbols = streams.symbols.take();
        let written = streams.written;

        let mut flush_result = Ok(());
        for mut sink in data.into_iter().chain(symbols) {
            if let Err(err) = sink.flush() {
                flush_result = flush_result.and(Err(err));
            }
        }

        if let Some(source) = streams.failure.take() {
            return Err(TracerError::StreamWrite { written, source });
        }
        flush_result.map_err(|source| TracerError::StreamWrite { written, source })?;
        Ok(written)
    }

    fn lock(&self) -> MutexGuard<'_, Streams>
    {
        // A panic while holding the lock leaves the streams usable
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn open_truncate(path: &Path) -> io::Result<File>
{
    OpenOptions::new().write(true).create(true).truncate(true).open(path)
}

#[cfg(test)]
mod tests
{
    use std::sync::Arc;

    use super::*;
    use crate::symbols::SymbolInterner;

    /// Cloneable in-memory sink so tests can read back what was written.
    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer
    {
        fn contents(&self) -> String
        {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuffer
    {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize>
        {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()>
        {
            Ok(())
        }
    }

    /// Accepts `budget` bytes, then fails every write.
    struct FailingSink
    {
        budget: usize,
    }

    impl Write for FailingSink
    {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize>
        {
            if self.budget == 0 {
                return Err(io::Error::new(io::ErrorKind::StorageFull, "disk full"));
            }
            let n = buf.len().min(self.budget);
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()>
        {
            Ok(())
        }
    }

    #[test]
    fn test_address_records_are_hex_lines()
    {
        let data = SharedBuffer::default();
        let writer = TraceWriter::new(data.clone(), None);
        writer.record_address(Address::new(0x401000));
        writer.record_address(Address::new(0x10));

        assert!(!writer.tracks_symbols());
        assert_eq!(writer.finish().unwrap(), 2);
        assert_eq!(data.contents(), "0x401000\n0x10\n");
    }

    #[test]
    fn test_symbol_records_are_correlated()
    {
        let data = SharedBuffer::default();
        let symbols = SharedBuffer::default();
        let writer = TraceWriter::new(data.clone(), Some(Box::new(symbols.clone())));
        let mut interner = SymbolInterner::new();
        let compute = interner.intern(".text+0x36:compute");

        writer.record_address_with_symbol(Address::new(0x401136), ThreadId(0), &compute);
        writer.record_address_with_symbol(Address::new(0x40113a), ThreadId(11), &compute);
        writer.finish().unwrap();

        assert_eq!(data.contents(), "0x401136\n0x40113a\n");
        assert_eq!(symbols.contents(), "0x0,.text+0x36:compute\n0xb,.text+0x36:compute\n");
    }

    #[test]
    fn test_finish_closes_once()
    {
        let data = SharedBuffer::default();
        let writer = TraceWriter::new(data.clone(), None);
        writer.record_address(Address::new(1));
        assert_eq!(writer.finish().unwrap(), 1);

        // Streams are gone: later events and finishes are no-ops
        writer.record_address(Address::new(2));
        assert_eq!(writer.finish().unwrap(), 1);
        assert_eq!(data.contents(), "0x1\n");
    }

    #[test]
    fn test_write_failure_is_latched_and_reported()
    {
        // Room for exactly one "0x1\n" line
        let writer = TraceWriter::new(FailingSink { budget: 4 }, None);
        writer.record_address(Address::new(1));
        writer.record_address(Address::new(2));
        writer.record_address(Address::new(3));

        assert_eq!(writer.events_written(), 1);
        match writer.finish() {
            Err(TracerError::StreamWrite { written, source }) => {
                assert_eq!(written, 1);
                assert_eq!(source.kind(), io::ErrorKind::StorageFull);
            }
            other => panic!("expected StreamWrite, got {other:?}"),
        }
    }

    #[test]
    fn test_create_rejects_missing_directory()
    {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no-such-dir").join("trace.dat");

        let err = TraceWriter::create(&missing, None).err().unwrap();
        assert!(matches!(err, ConfigError::DataPath { .. }));

        let data = dir.path().join("trace.dat");
        let err = TraceWriter::create(&data, Some(&missing)).err().unwrap();
        assert!(matches!(err, ConfigError::SymbolPath { .. }));
    }

    #[test]
    fn test_create_treats_empty_symbol_path_as_disabled()
    {
        let dir = tempfile::tempdir().unwrap();
        let writer = TraceWriter::create(&dir.path().join("trace.dat"), Some(Path::new(""))).unwrap();
        assert!(!writer.tracks_symbols());
    }
}
