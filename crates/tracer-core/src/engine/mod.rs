//! # Host Engine Interface
//!
//! The capabilities the tracer needs from whatever actually runs the target.
//!
//! The tracer never touches the target itself. A host engine (a `ptrace`
//! loop, a dynamic binary instrumentation framework, a synthetic model in
//! tests) walks candidate sites, asks the [`GranularityDispatcher`] about
//! each one, and later fires the hooks it was handed.
//!
//! ## Phases
//!
//! - **Setup**: the host calls [`GranularityDispatcher::instrument`] once per
//!   candidate site. The dispatcher calls back into [`HostEngine::image_at`],
//!   [`HostEngine::routine_at`] and, for accepted sites,
//!   [`HostEngine::register_hook`]. Hosts must serialise these calls.
//! - **Execution**: the host calls [`Hook::fire`] immediately before the
//!   target executes a hooked site, passing the current thread. This may
//!   happen from any number of threads at once.
//!
//! [`GranularityDispatcher`]: crate::dispatch::GranularityDispatcher
//! [`GranularityDispatcher::instrument`]: crate::dispatch::GranularityDispatcher::instrument

pub mod synthetic;

use std::fmt;
use std::sync::Arc;

use crate::symbols::SymbolHandle;
use crate::types::{Address, ThreadId};
use crate::writer::TraceWriter;

/// A loaded image (executable or shared library) as the host sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo
{
    /// Path or name of the image.
    pub name: String,
    /// Whether this is the program under test rather than a library.
    pub is_main: bool,
}

/// The section a routine lives in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionInfo
{
    /// Section name, e.g. `.text`.
    pub name: String,
    /// Runtime start address of the section.
    pub address: Address,
}

/// A routine (function symbol) known to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutineInfo
{
    /// Routine name as it should appear in filters and the symbol stream.
    pub name: String,
    /// Runtime entry address.
    pub address: Address,
    /// Owning section, if the host knows it.
    pub section: Option<SectionInfo>,
    /// Owning image, if the host knows it.
    pub image: Option<ImageInfo>,
}

/// A location eligible for a hook, offered by the host during setup
///
/// The variant must match the session's granularity; the dispatcher ignores
/// the other kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateSite
{
    /// One instruction.
    Instruction(Address),
    /// The first instruction of a basic block.
    BasicBlock(Address),
    /// A routine, hooked at its entry.
    Routine(RoutineInfo),
}

impl CandidateSite
{
    /// Address the hook would be attached to.
    #[must_use]
    pub fn address(&self) -> Address
    {
        match self {
            Self::Instruction(address) | Self::BasicBlock(address) => *address,
            Self::Routine(routine) => routine.address,
        }
    }
}

/// Capabilities a host engine supplies during setup
///
/// Resolution misses are answered with `None` and are never errors: the
/// tracer treats an address without an image as out of scope.
pub trait HostEngine
{
    /// The image containing `address`, if any.
    fn image_at(&self, address: Address) -> Option<ImageInfo>;

    /// The routine containing `address`, if any.
    fn routine_at(&self, address: Address) -> Option<RoutineInfo>;

    /// Attach `hook` so it fires before every execution of `hook.address()`.
    fn register_hook(&mut self, hook: Hook);
}

/// What a hook writes when it fires.
#[derive(Clone, PartialEq, Eq)]
pub enum HookPayload
{
    /// Address only; the session has no symbol stream.
    Address,
    /// Address plus thread and symbol; the session has a symbol stream.
    AddressWithSymbol(SymbolHandle),
}

/// An observation hook produced by the dispatcher
///
/// Cheap to clone: the writer and symbol are shared.
#[derive(Clone)]
pub struct Hook
{
    address: Address,
    payload: HookPayload,
    writer: Arc<TraceWriter>,
}

impl Hook
{
    pub(crate) fn new(address: Address, payload: HookPayload, writer: Arc<TraceWriter>) -> Self
    {
        Self {
            address,
            payload,
            writer,
        }
    }

    /// Address this hook observes.
    #[must_use]
    pub fn address(&self) -> Address
    {
        self.address
    }

    /// Symbol carried by the hook, if the session tracks symbols.
    #[must_use]
    pub fn symbol(&self) -> Option<&SymbolHandle>
    {
        match &self.payload {
            HookPayload::Address => None,
            HookPayload::AddressWithSymbol(symbol) => Some(symbol),
        }
    }

    /// Record one event for `thread`.
    ///
    /// Called by the host right before the target executes the site. Never
    /// fails: write errors are latched by the writer and reported at teardown.
    pub fn fire(&self, thread: ThreadId)
    {
        match &self.payload {
            HookPayload::Address => self.writer.record_address(self.address),
            HookPayload::AddressWithSymbol(symbol) => {
                self.writer.record_address_with_symbol(self.address, thread, symbol);
            }
        }
    }
}

impl fmt::Debug for Hook
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("Hook")
            .field("address", &self.address)
            .field("symbol", &self.symbol().map(SymbolHandle::as_str))
            .finish_non_exhaustive()
    }
}
