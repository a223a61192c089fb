//! # Trace Session
//!
//! One run of the tracer against one target: validated configuration, the
//! dispatcher, and the writer, from setup to teardown.
//!
//! ## Lifecycle
//!
//! 1. [`SessionOptions::open`] validates every option and opens the streams.
//!    Any failure ends the session before a single hook exists.
//! 2. The host engine offers sites through [`TraceSession::instrument`].
//! 3. The host runs the target; hooks write through the shared writer.
//! 4. [`TraceSession::finish`] flushes and closes both streams once and
//!    reports what happened.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info};

use crate::dispatch::{DispatchStats, GranularityDispatcher, SiteDecision};
use crate::engine::{CandidateSite, HostEngine};
use crate::error::{ConfigError, TracerResult};
use crate::filter::BlockList;
use crate::symbols::{InternStats, SymbolStyle};
use crate::types::TraceGranularity;
use crate::writer::TraceWriter;

/// Raw session configuration, as given on the command line
///
/// Strings are kept unparsed so that [`SessionOptions::open`] can validate
/// them in a fixed order and map each failure to its own exit status.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions
{
    /// Data stream path. Truncated on open.
    pub data_path: PathBuf,
    /// Symbol stream path. `None` or empty disables symbol output.
    pub symbol_path: Option<PathBuf>,
    /// `;`-separated blocked-name fragments.
    pub blocked_names: String,
    /// Granularity name (`ins`, `bbl`, `cal` or a long form).
    pub granularity: String,
    /// How routines are rendered in the symbol stream.
    pub symbol_style: SymbolStyle,
}

impl SessionOptions
{
    /// Validate the options and open the streams.
    ///
    /// Checks run in this order, and the first failure wins: data path,
    /// symbol path, granularity, blocked-name list.
    ///
    /// ## Errors
    ///
    /// The [`ConfigError`] for the first option that failed.
    pub fn open(&self) -> Result<TraceSession, ConfigError>
    {
        let writer = TraceWriter::create(&self.data_path, self.symbol_path.as_deref())?;
        let granularity: TraceGranularity = self.granularity.parse()?;
        let block_list = BlockList::parse(&self.blocked_names)?;

        debug!(
            %granularity,
            blocked = block_list.len(),
            symbols = writer.tracks_symbols(),
            "session configured"
        );
        Ok(TraceSession::new(granularity, block_list, self.symbol_style, writer))
    }
}

/// What a finished session did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary
{
    /// Granularity traced.
    pub granularity: TraceGranularity,
    /// Setup decisions.
    pub dispatch: DispatchStats,
    /// Distinct symbol texts.
    pub symbols_interned: usize,
    /// Symbol interner lookups.
    pub intern: InternStats,
    /// Events written to the streams.
    pub events_written: u64,
}

/// A configured tracing session
pub struct TraceSession
{
    dispatcher: GranularityDispatcher,
    writer: Arc<TraceWriter>,
}

impl TraceSession
{
    /// Assemble a session from already-validated parts.
    #[must_use]
    pub fn new(granularity: TraceGranularity, block_list: BlockList, style: SymbolStyle, writer: TraceWriter) -> Self
    {
        let writer = Arc::new(writer);
        let dispatcher = GranularityDispatcher::new(granularity, block_list, style, Arc::clone(&writer));
        Self { dispatcher, writer }
    }

    /// Granularity of this session.
    #[must_use]
    pub fn granularity(&self) -> TraceGranularity
    {
        self.dispatcher.granularity()
    }

    /// Whether a symbol stream is open.
    #[must_use]
    pub fn tracks_symbols(&self) -> bool
    {
        self.writer.tracks_symbols()
    }

    /// Offer one candidate site to the dispatcher.
    pub fn instrument<H>(&mut self, site: &CandidateSite, host: &mut H) -> SiteDecision
    where
        H: HostEngine + ?Sized,
    {
        self.dispatcher.instrument(site, host)
    }

    /// The session's dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &GranularityDispatcher
    {
        &self.dispatcher
    }

    /// The shared writer.
    #[must_use]
    pub fn writer(&self) -> &Arc<TraceWriter>
    {
        &self.writer
    }

    /// Flush and close the streams.
    ///
    /// ## Errors
    ///
    /// [`TracerError::StreamWrite`](crate::error::TracerError::StreamWrite) if
    /// any event could not be written.
    pub fn finish(self) -> TracerResult<SessionSummary>
    {
        let events_written = self.writer.finish()?;
        let interner = self.dispatcher.interner();
        let summary = SessionSummary {
            granularity: self.dispatcher.granularity(),
            dispatch: self.dispatcher.stats(),
            symbols_interned: interner.len(),
            intern: interner.stats(),
            events_written,
        };

        info!(
            granularity = %summary.granularity,
            hooks = summary.dispatch.instrumented,
            out_of_scope = summary.dispatch.out_of_scope,
            blocked = summary.dispatch.blocked,
            symbols = summary.symbols_interned,
            events = summary.events_written,
            "trace session finished"
        );
        Ok(summary)
    }
}
