//! # Granularity Dispatcher
//!
//! Decides, once per candidate site, whether and how to hook it.
//!
//! For every site the host offers during setup:
//!
//! 1. Sites of a kind other than the session's granularity are ignored.
//! 2. The [scope check](crate::scope) runs first. Library code never reaches
//!    the filter.
//! 3. The [name filter](crate::filter) runs on the owning routine's name.
//! 4. A hook is registered. If the writer has a symbol stream, the hook
//!    carries the interned symbol of the owning routine and writes both lines;
//!    otherwise it writes only the address.
//!
//! The variant is fixed per hook at setup time, so during execution a hook
//! never has to ask whether symbols are enabled.

use std::sync::Arc;

use tracing::trace;

use crate::engine::{CandidateSite, Hook, HookPayload, HostEngine, RoutineInfo};
use crate::filter::BlockList;
use crate::scope::{address_in_scope, routine_in_scope};
use crate::symbols::{symbol_text, SymbolInterner, SymbolStyle};
use crate::types::{Address, TraceGranularity};
use crate::writer::TraceWriter;

/// Outcome of offering one site to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteDecision
{
    /// A hook was registered.
    Instrumented,
    /// The site is outside the main executable.
    OutOfScope,
    /// The owning routine's name is on the block list.
    Blocked,
    /// The site kind does not match the session's granularity.
    Ignored,
}

/// Per-decision counters, reported in the session summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats
{
    /// Hooks registered.
    pub instrumented: u64,
    /// Sites rejected by the scope check.
    pub out_of_scope: u64,
    /// Sites rejected by the name filter.
    pub blocked: u64,
    /// Sites of the wrong kind.
    pub ignored: u64,
}

impl DispatchStats
{
    fn count(&mut self, decision: SiteDecision)
    {
        let counter = match decision {
            SiteDecision::Instrumented => &mut self.instrumented,
            SiteDecision::OutOfScope => &mut self.out_of_scope,
            SiteDecision::Blocked => &mut self.blocked,
            SiteDecision::Ignored => &mut self.ignored,
        };
        *counter += 1;
    }
}

/// Routes candidate sites to the right hook variant
///
/// Owns the block list and the symbol interner for the session, and shares
/// the writer with every hook it creates.
pub struct GranularityDispatcher
{
    granularity: TraceGranularity,
    block_list: BlockList,
    style: SymbolStyle,
    interner: SymbolInterner,
    writer: Arc<TraceWriter>,
    stats: DispatchStats,
}

impl GranularityDispatcher
{
    /// Create a dispatcher for one session.
    #[must_use]
    pub fn new(granularity: TraceGranularity, block_list: BlockList, style: SymbolStyle, writer: Arc<TraceWriter>) -> Self
    {
        Self {
            granularity,
            block_list,
            style,
            interner: SymbolInterner::new(),
            writer,
            stats: DispatchStats::default(),
        }
    }

    /// Granularity this dispatcher accepts.
    #[must_use]
    pub fn granularity(&self) -> TraceGranularity
    {
        self.granularity
    }

    /// Whether hooks carry symbols.
    #[must_use]
    pub fn tracks_symbols(&self) -> bool
    {
        self.writer.tracks_symbols()
    }

    /// Decision counters so far.
    #[must_use]
    pub fn stats(&self) -> DispatchStats
    {
        self.stats
    }

    /// The session's symbol table.
    #[must_use]
    pub fn interner(&self) -> &SymbolInterner
    {
        &self.interner
    }

    /// Offer one candidate site.
    ///
    /// Registers at most one hook with `host`. Never fails: a site that cannot
    /// be resolved is simply not traced.
    pub fn instrument<H>(&mut self, site: &CandidateSite, host: &mut H) -> SiteDecision
    where
        H: HostEngine + ?Sized,
    {
        let decision = match (self.granularity, site) {
            (TraceGranularity::Instruction, CandidateSite::Instruction(address))
            | (TraceGranularity::BasicBlock, CandidateSite::BasicBlock(address)) => {
                self.instrument_address(*address, host)
            }
            (TraceGranularity::FunctionCall, CandidateSite::Routine(routine)) => self.instrument_routine(routine, host),
            _ => SiteDecision::Ignored,
        };

        trace!(address = %site.address(), ?decision, "site offered");
        self.stats.count(decision);
        decision
    }

    fn instrument_address<H>(&mut self, address: Address, host: &mut H) -> SiteDecision
    where
        H: HostEngine + ?Sized,
    {
        if !address_in_scope(host, address) {
            return SiteDecision::OutOfScope;
        }

        // The routine is only needed for filtering or symbols
        let routine = if self.block_list.is_empty() && !self.tracks_symbols() {
            None
        } else {
            host.routine_at(address)
        };

        let name = routine.as_ref().map_or("", |routine| routine.name.as_str());
        if self.block_list.blocked(name) {
            return SiteDecision::Blocked;
        }

        let payload = self.payload_for(routine.as_ref());
        host.register_hook(Hook::new(address, payload, Arc::clone(&self.writer)));
        SiteDecision::Instrumented
    }

    fn instrument_routine<H>(&mut self, routine: &RoutineInfo, host: &mut H) -> SiteDecision
    where
        H: HostEngine + ?Sized,
    {
        if !routine_in_scope(routine) {
            return SiteDecision::OutOfScope;
        }
        if self.block_list.blocked(&routine.name) {
            return SiteDecision::Blocked;
        }

        let payload = self.payload_for(Some(routine));
        host.register_hook(Hook::new(routine.address, payload, Arc::clone(&self.writer)));
        SiteDecision::Instrumented
    }

    fn payload_for(&mut self, routine: Option<&RoutineInfo>) -> HookPayload
    {
        if !self.tracks_symbols() {
            return HookPayload::Address;
        }
        let text = symbol_text(routine, self.style);
        HookPayload::AddressWithSymbol(self.interner.intern(&text))
    }
}
