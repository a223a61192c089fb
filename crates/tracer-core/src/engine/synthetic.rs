//! # Synthetic Host Engine
//!
//! An in-memory host that "runs" a described program.
//!
//! The program is a tree of images, sections, routines and basic blocks,
//! each block a list of instruction addresses. Execution is a list of address
//! sequences, one per thread; every thread walks its sequence on its own OS
//! thread and fires whatever hook sits at each address. This exercises the
//! whole pipeline (scope, filter, interning, concurrent writes) without a
//! real target.
//!
//! ## Example
//!
//! ```rust
//! use tracer_core::engine::synthetic::{SyntheticEngine, SyntheticImage, SyntheticRoutine, SyntheticSection};
//! use tracer_core::filter::BlockList;
//! use tracer_core::session::TraceSession;
//! use tracer_core::symbols::SymbolStyle;
//! use tracer_core::types::{Address, TraceGranularity};
//! use tracer_core::writer::TraceWriter;
//!
//! let mut engine = SyntheticEngine::new(vec![
//!     SyntheticImage::main("target").with_section(
//!         SyntheticSection::new(".text", 0x1000, 0x100)
//!             .with_routine(SyntheticRoutine::new("main").with_block([0x1000, 0x1004]).with_block([0x1008])),
//!     ),
//! ]);
//!
//! let writer = TraceWriter::new(Vec::new(), None);
//! let mut session = TraceSession::new(TraceGranularity::BasicBlock, BlockList::empty(), SymbolStyle::Qualified, writer);
//! assert_eq!(engine.instrument(&mut session), 2);
//!
//! let fired = engine.run(&[vec![Address::new(0x1000), Address::new(0x1004), Address::new(0x1008)]]);
//! assert_eq!(fired, 2);
//! assert_eq!(session.finish()?.events_written, 2);
//! # Ok::<(), tracer_core::error::TracerError>(())
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use tracing::debug;

use super::{CandidateSite, Hook, HostEngine, ImageInfo, RoutineInfo, SectionInfo};
use crate::session::TraceSession;
use crate::types::{Address, ThreadId, TraceGranularity};

/// A routine: an ordered list of basic blocks.
#[derive(Debug, Clone, Default)]
pub struct SyntheticRoutine
{
    name: String,
    blocks: Vec<Vec<Address>>,
}

impl SyntheticRoutine
{
    /// Start an empty routine.
    pub fn new(name: impl Into<String>) -> Self
    {
        Self {
            name: name.into(),
            blocks: Vec::new(),
        }
    }

    /// Append a basic block given by its instruction addresses.
    #[must_use]
    pub fn with_block<I>(mut self, instructions: I) -> Self
    where
        I: IntoIterator<Item = u64>,
    {
        let block: Vec<Address> = instructions.into_iter().map(Address::new).collect();
        if !block.is_empty() {
            self.blocks.push(block);
        }
        self
    }

    /// Entry address: the first instruction of the first block.
    fn entry(&self) -> Option<Address>
    {
        self.blocks.first().and_then(|block| block.first()).copied()
    }

    fn contains(&self, address: Address) -> bool
    {
        self.blocks.iter().flatten().any(|&instruction| instruction == address)
    }
}

/// A section with a fixed address range.
#[derive(Debug, Clone)]
pub struct SyntheticSection
{
    name: String,
    address: Address,
    size: u64,
    routines: Vec<SyntheticRoutine>,
}

impl SyntheticSection
{
    /// A section covering `[address, address + size)`.
    pub fn new(name: impl Into<String>, address: u64, size: u64) -> Self
    {
        Self {
            name: name.into(),
            address: Address::new(address),
            size,
            routines: Vec::new(),
        }
    }

    /// Add a routine to this section.
    #[must_use]
    pub fn with_routine(mut self, routine: SyntheticRoutine) -> Self
    {
        self.routines.push(routine);
        self
    }

    fn contains(&self, address: Address) -> bool
    {
        address
            .offset_from(self.address)
            .is_some_and(|offset| offset < self.size)
    }

    fn info(&self) -> SectionInfo
    {
        SectionInfo {
            name: self.name.clone(),
            address: self.address,
        }
    }
}

/// An executable or shared library.
#[derive(Debug, Clone)]
pub struct SyntheticImage
{
    info: ImageInfo,
    sections: Vec<SyntheticSection>,
}

impl SyntheticImage
{
    /// The program under test.
    pub fn main(name: impl Into<String>) -> Self
    {
        Self::with_info(name.into(), true)
    }

    /// A shared library.
    pub fn library(name: impl Into<String>) -> Self
    {
        Self::with_info(name.into(), false)
    }

    fn with_info(name: String, is_main: bool) -> Self
    {
        Self {
            info: ImageInfo { name, is_main },
            sections: Vec::new(),
        }
    }

    /// Add a section to this image.
    #[must_use]
    pub fn with_section(mut self, section: SyntheticSection) -> Self
    {
        self.sections.push(section);
        self
    }
}

/// Host engine over a [`SyntheticImage`] list
pub struct SyntheticEngine
{
    images: Vec<SyntheticImage>,
    hooks: HashMap<Address, Hook>,
}

impl SyntheticEngine
{
    /// Load a program.
    #[must_use]
    pub fn new(images: Vec<SyntheticImage>) -> Self
    {
        Self {
            images,
            hooks: HashMap::new(),
        }
    }

    /// Every site of the given kind, in program order.
    ///
    /// Library code is included: rejecting it is the dispatcher's job.
    #[must_use]
    pub fn candidate_sites(&self, granularity: TraceGranularity) -> Vec<CandidateSite>
    {
        let mut sites = Vec::new();
        for image in &self.images {
            for section in &image.sections {
                for routine in &section.routines {
                    match granularity {
                        TraceGranularity::Instruction => {
                            sites.extend(routine.blocks.iter().flatten().copied().map(CandidateSite::Instruction));
                        }
                        TraceGranularity::BasicBlock => {
                            sites.extend(
                                routine
                                    .blocks
                                    .iter()
                                    .filter_map(|block| block.first().copied())
                                    .map(CandidateSite::BasicBlock),
                            );
                        }
                        TraceGranularity::FunctionCall => {
                            sites.extend(
                                routine_info(image, section, routine).map(CandidateSite::Routine),
                            );
                        }
                    }
                }
            }
        }
        sites
    }

    /// Offer every site of the session's granularity. Returns the number of
    /// hooks now registered.
    pub fn instrument(&mut self, session: &mut TraceSession) -> usize
    {
        let sites = self.candidate_sites(session.granularity());
        for site in &sites {
            session.instrument(site, self);
        }
        debug!(sites = sites.len(), hooks = self.hooks.len(), "synthetic program instrumented");
        self.hooks.len()
    }

    /// Number of registered hooks.
    #[must_use]
    pub fn hook_count(&self) -> usize
    {
        self.hooks.len()
    }

    /// Execute one address sequence per thread, concurrently.
    ///
    /// Thread `i` reports itself as `ThreadId(i)`. Returns how many hooks
    /// fired in total.
    pub fn run(&self, threads: &[Vec<Address>]) -> u64
    {
        let fired = AtomicU64::new(0);
        thread::scope(|scope| {
            for (index, schedule) in threads.iter().enumerate() {
                let fired = &fired;
                let thread = ThreadId(index as u64);
                scope.spawn(move || {
                    for address in schedule {
                        if let Some(hook) = self.hooks.get(address) {
                            hook.fire(thread);
                            fired.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                });
            }
        });
        fired.into_inner()
    }
}

impl HostEngine for SyntheticEngine
{
    fn image_at(&self, address: Address) -> Option<ImageInfo>
    {
        self.images
            .iter()
            .find(|image| image.sections.iter().any(|section| section.contains(address)))
            .map(|image| image.info.clone())
    }

    fn routine_at(&self, address: Address) -> Option<RoutineInfo>
    {
        self.images.iter().find_map(|image| {
            image.sections.iter().find_map(|section| {
                section
                    .routines
                    .iter()
                    .find(|routine| routine.contains(address))
                    .and_then(|routine| routine_info(image, section, routine))
            })
        })
    }

    fn register_hook(&mut self, hook: Hook)
    {
        self.hooks.insert(hook.address(), hook);
    }
}

fn routine_info(image: &SyntheticImage, section: &SyntheticSection, routine: &SyntheticRoutine) -> Option<RoutineInfo>
{
    Some(RoutineInfo {
        name: routine.name.clone(),
        address: routine.entry()?,
        section: Some(section.info()),
        image: Some(image.info.clone()),
    })
}
