//! The `ptrace` host engine.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::fs;
use std::ops::Range;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Command;

use tracing::{debug, info, trace, warn};

use super::blocks::{self, Stepped};
use super::maps::{self, Mapping};
use super::ptrace::{self, Resume, Tid, WaitStatus};
use crate::engine::{CandidateSite, Hook, HostEngine, ImageInfo, RoutineInfo};
use crate::error::{TracerError, TracerResult};
use crate::session::TraceSession;
use crate::symbols::ExecutableImage;
use crate::types::{Address, TargetExit, ThreadId, TraceGranularity};

const INT3: u8 = 0xcc;

#[derive(Debug)]
struct Tracee
{
    id: ThreadId,
    /// Seen its first stop.
    started: bool,
    /// Instruction of the last step stop, in basic-block mode.
    stepped: Option<Stepped>,
    /// Breakpoint this thread is stepping over.
    stepping_over: Option<u64>,
}

impl Tracee
{
    fn new(id: ThreadId) -> Self
    {
        Self {
            id,
            started: false,
            stepped: None,
            stepping_over: None,
        }
    }
}

/// How a traced child process was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChildKind
{
    /// Own copy of memory, breakpoints included.
    Fork,
    /// Shares memory with the parent until it execs.
    Vfork,
}

/// Host engine that runs a Linux x86-64 program under `ptrace`
///
/// ## Example
///
/// ```rust,no_run
/// use std::path::PathBuf;
///
/// use tracer_core::platform::linux::PtraceEngine;
/// use tracer_core::session::SessionOptions;
///
/// let options = SessionOptions {
///     data_path: PathBuf::from("trace.dat"),
///     granularity: "cal".into(),
///     ..SessionOptions::default()
/// };
/// let mut session = options.open()?;
/// let engine = PtraceEngine::launch("/bin/true".as_ref(), &[])?;
/// let exit = engine.trace(&mut session)?;
/// session.finish()?;
/// println!("target finished with {exit}");
/// # Ok::<(), tracer_core::error::TracerError>(())
/// ```
pub struct PtraceEngine
{
    pid: Tid,
    image: ExecutableImage,
    main: ImageInfo,
    main_ranges: Vec<Range<u64>>,
    mappings: RefCell<Vec<Mapping>>,
    hooks: HashMap<Address, Hook>,
    granularity: TraceGranularity,
    resume_mode: Resume,
    /// Original byte under every planted breakpoint.
    breakpoints: HashMap<u64, u8>,
    breakpoints_armed: bool,
    seen: HashSet<u64>,
    threads: HashMap<Tid, Tracee>,
    next_thread: u64,
    /// Stopped tids no event has announced yet.
    unclaimed: HashSet<Tid>,
    /// Announced children waiting for their first stop.
    children: HashMap<Tid, ChildKind>,
    exit: Option<TargetExit>,
}

impl PtraceEngine
{
    /// Start `program` stopped at its first instruction.
    ///
    /// The program inherits stdin, stdout and stderr.
    ///
    /// ## Errors
    ///
    /// - [`TracerError::Launch`] if the program cannot be executed
    /// - [`TracerError::Ptrace`] if the first stop or option setup fails
    /// - [`TracerError::SymbolLoad`] if the main executable cannot be read
    pub fn launch(program: &Path, args: &[OsString]) -> TracerResult<Self>
    {
        info!("Launching {} with args {:?}", program.display(), args);

        let mut command = Command::new(program);
        command.args(args);
        // SAFETY: PTRACE_TRACEME is async-signal-safe
        unsafe {
            command.pre_exec(ptrace::trace_me);
        }
        let child = command.spawn().map_err(|source| TracerError::Launch {
            program: program.display().to_string(),
            source,
        })?;
        let pid = Tid::try_from(child.id())
            .map_err(|_| TracerError::Unsupported(format!("pid {} out of range", child.id())))?;

        // Stopped by SIGTRAP right after exec
        match ptrace::wait_for(pid)? {
            Some(WaitStatus::Stopped(libc::SIGTRAP)) => {}
            other => {
                return Err(TracerError::Unsupported(format!(
                    "unexpected first stop of {pid}: {other:?}"
                )))
            }
        }
        ptrace::set_options(pid, ptrace::TRACE_OPTIONS)?;
        debug!(pid, "target stopped at exec");

        Self::inspect(pid)
    }

    fn inspect(pid: Tid) -> TracerResult<Self>
    {
        let exe = fs::read_link(format!("/proc/{pid}/exe"))
            .map_err(|err| TracerError::SymbolLoad(format!("cannot resolve executable of {pid}: {err}")))?;
        let mappings = maps::read(pid)
            .map_err(|err| TracerError::SymbolLoad(format!("cannot read mappings of {pid}: {err}")))?;

        let image = ExecutableImage::open(&exe)?;
        let bias = maps::load_bias(&mappings, &exe, image.lowest_vaddr())
            .ok_or_else(|| TracerError::SymbolLoad(format!("{} is not mapped", exe.display())))?;
        let image = image.relocated(bias);

        let main_ranges: Vec<Range<u64>> = mappings
            .iter()
            .filter(|mapping| mapping.path.as_deref() == Some(exe.as_path()))
            .map(|mapping| mapping.start..mapping.end)
            .collect();

        info!(
            exe = %exe.display(),
            bias = %Address::new(bias),
            routines = image.routines().len(),
            "main image loaded"
        );

        let mut threads = HashMap::new();
        threads.insert(
            pid,
            Tracee {
                started: true,
                ..Tracee::new(ThreadId::MAIN)
            },
        );

        Ok(Self {
            pid,
            main: ImageInfo {
                name: path_name(&exe),
                is_main: true,
            },
            image,
            main_ranges,
            mappings: RefCell::new(mappings),
            hooks: HashMap::new(),
            granularity: TraceGranularity::FunctionCall,
            resume_mode: Resume::Continue,
            breakpoints: HashMap::new(),
            breakpoints_armed: false,
            seen: HashSet::new(),
            threads,
            next_thread: 1,
            unclaimed: HashSet::new(),
            children: HashMap::new(),
            exit: None,
        })
    }

    /// Process id of the target.
    #[must_use]
    pub fn pid(&self) -> i32
    {
        self.pid
    }

    /// Trace the target until it exits, then report how it ended.
    ///
    /// ## Errors
    ///
    /// [`TracerError::Ptrace`] if the target cannot be controlled.
    pub fn trace(mut self, session: &mut TraceSession) -> TracerResult<TargetExit>
    {
        let granularity = session.granularity();
        self.granularity = granularity;
        self.resume_mode = match granularity {
            TraceGranularity::Instruction | TraceGranularity::BasicBlock => Resume::Step,
            TraceGranularity::FunctionCall => Resume::Continue,
        };

        if granularity == TraceGranularity::FunctionCall {
            self.instrument_routines(session);
            self.plant_breakpoints()?;
        } else {
            self.observe(session, self.pid)?;
        }
        self.resume_thread(self.pid, 0)?;

        while let Some((tid, status)) = ptrace::wait_any()? {
            trace!(tid, ?status, "stop");
            match self.handle(session, tid, status) {
                Err(err) if ptrace::is_gone(&err) => debug!(tid, "thread vanished while stopped"),
                other => other?,
            }
        }

        let exit = self
            .exit
            .ok_or_else(|| TracerError::Unsupported("target exit status was never reported".into()))?;
        info!(pid = self.pid, %exit, threads = self.next_thread, "target finished");
        Ok(exit)
    }

    fn handle(&mut self, session: &mut TraceSession, tid: Tid, status: WaitStatus) -> TracerResult<()>
    {
        match status {
            WaitStatus::Exited(code) => {
                self.thread_gone(tid, TargetExit::Code(code));
                Ok(())
            }
            WaitStatus::Signaled(signal) => {
                self.thread_gone(tid, TargetExit::Signal(signal));
                Ok(())
            }
            WaitStatus::Event(event) => self.on_event(session, tid, event),
            WaitStatus::Stopped(signal) => self.on_stop(session, tid, signal),
        }
    }

    fn thread_gone(&mut self, tid: Tid, exit: TargetExit)
    {
        if let Some(tracee) = self.threads.remove(&tid) {
            debug!(tid, thread = %tracee.id, %exit, "thread exited");
        }
        if tid == self.pid {
            self.exit = Some(exit);
        }
    }

    fn on_event(&mut self, session: &mut TraceSession, tid: Tid, event: i32) -> TracerResult<()>
    {
        match event {
            libc::PTRACE_EVENT_CLONE => {
                let new = new_tid(ptrace::event_message(tid)?)?;
                self.adopt_thread(new);
                if self.unclaimed.remove(&new) {
                    self.start_thread(session, new)?;
                }
            }
            libc::PTRACE_EVENT_FORK | libc::PTRACE_EVENT_VFORK => {
                let child = new_tid(ptrace::event_message(tid)?)?;
                let kind = if event == libc::PTRACE_EVENT_VFORK {
                    ChildKind::Vfork
                } else {
                    ChildKind::Fork
                };
                if kind == ChildKind::Vfork {
                    // The child runs in our memory until it execs
                    self.set_breakpoints_armed(tid, false)?;
                }
                if self.unclaimed.remove(&child) {
                    self.release_child(child, kind)?;
                } else {
                    self.children.insert(child, kind);
                }
            }
            libc::PTRACE_EVENT_VFORK_DONE => self.set_breakpoints_armed(tid, true)?,
            libc::PTRACE_EVENT_EXEC => {
                warn!(tid, "target called execve; symbols and breakpoints no longer apply");
                self.breakpoints.clear();
                self.breakpoints_armed = false;
            }
            _ => {}
        }
        self.resume_thread(tid, 0)
    }

    fn on_stop(&mut self, session: &mut TraceSession, tid: Tid, signal: i32) -> TracerResult<()>
    {
        let Some(tracee) = self.threads.get(&tid) else {
            if let Some(kind) = self.children.remove(&tid) {
                return self.release_child(tid, kind);
            }
            // Wait for the clone or fork event that explains this tid
            self.unclaimed.insert(tid);
            return Ok(());
        };

        if !tracee.started && signal == libc::SIGSTOP {
            return self.start_thread(session, tid);
        }
        if signal != libc::SIGTRAP {
            let stop_signal = matches!(signal, libc::SIGSTOP | libc::SIGTSTP | libc::SIGTTIN | libc::SIGTTOU);
            if stop_signal && ptrace::signal_code(tid).is_err() {
                // Group stop: the signal was already delivered
                return self.resume_thread(tid, 0);
            }
            return self.resume_thread(tid, signal);
        }

        let stepped = ptrace::is_step_trap(ptrace::signal_code(tid)?);
        if self.resume_mode == Resume::Continue {
            self.on_breakpoint_trap(tid, stepped)
        } else if stepped {
            self.observe(session, tid)?;
            self.resume_thread(tid, 0)
        } else {
            self.resume_thread(tid, libc::SIGTRAP)
        }
    }

    fn adopt_thread(&mut self, tid: Tid)
    {
        if self.threads.contains_key(&tid) {
            return;
        }
        let id = ThreadId(self.next_thread);
        self.next_thread += 1;
        debug!(tid, thread = %id, "new thread");
        self.threads.insert(tid, Tracee::new(id));
    }

    fn start_thread(&mut self, session: &mut TraceSession, tid: Tid) -> TracerResult<()>
    {
        if let Some(tracee) = self.threads.get_mut(&tid) {
            tracee.started = true;
        }
        if self.resume_mode != Resume::Continue {
            self.observe(session, tid)?;
        }
        self.resume_thread(tid, 0)
    }

    fn release_child(&self, child: Tid, kind: ChildKind) -> TracerResult<()>
    {
        if kind == ChildKind::Fork && self.breakpoints_armed {
            for (&site, &original) in &self.breakpoints {
                ptrace::swap_byte(child, site, original)?;
            }
        }
        debug!(child, ?kind, "detaching child process");
        ptrace::detach(child)
    }

    fn resume_thread(&self, tid: Tid, signal: i32) -> TracerResult<()>
    {
        let how = match self.threads.get(&tid) {
            Some(tracee) if tracee.stepping_over.is_some() => Resume::Step,
            _ => self.resume_mode,
        };
        ptrace::resume(tid, how, signal)
    }

    /// Report the instruction `tid` is about to execute, once per step stop.
    ///
    /// In basic-block mode only stops that begin a block are reported.
    fn observe(&mut self, session: &mut TraceSession, tid: Tid) -> TracerResult<()>
    {
        let rip = ptrace::instruction_pointer(tid)?;
        let by_block = self.granularity == TraceGranularity::BasicBlock;
        let current = if by_block {
            blocks::decode(rip, &ptrace::read_code(tid, rip)?)
        } else {
            None
        };
        let Some(tracee) = self.threads.get_mut(&tid) else {
            return Ok(());
        };
        let thread = tracee.id;

        let address = Address::new(rip);
        let site = if by_block {
            let starts = blocks::starts_block(tracee.stepped, rip);
            tracee.stepped = current;
            if !starts {
                return Ok(());
            }
            CandidateSite::BasicBlock(address)
        } else {
            CandidateSite::Instruction(address)
        };
        if self.seen.insert(rip) {
            session.instrument(&site, self);
        }
        if let Some(hook) = self.hooks.get(&address) {
            hook.fire(thread);
        }
        Ok(())
    }

    fn instrument_routines(&mut self, session: &mut TraceSession)
    {
        let sites: Vec<CandidateSite> = self
            .image
            .routines()
            .iter()
            .map(|routine| CandidateSite::Routine(self.image.routine_info(routine, &self.main)))
            .collect();
        for site in &sites {
            session.instrument(site, self);
        }
    }

    fn plant_breakpoints(&mut self) -> TracerResult<()>
    {
        for address in self.hooks.keys() {
            let original = ptrace::swap_byte(self.pid, address.value(), INT3)?;
            self.breakpoints.insert(address.value(), original);
        }
        self.breakpoints_armed = true;
        debug!(count = self.breakpoints.len(), "breakpoints planted");
        Ok(())
    }

    fn set_breakpoints_armed(&mut self, tid: Tid, armed: bool) -> TracerResult<()>
    {
        if self.breakpoints_armed == armed {
            return Ok(());
        }
        for (&site, &original) in &self.breakpoints {
            ptrace::swap_byte(tid, site, if armed { INT3 } else { original })?;
        }
        self.breakpoints_armed = armed;
        Ok(())
    }

    fn on_breakpoint_trap(&mut self, tid: Tid, stepped: bool) -> TracerResult<()>
    {
        let Some(tracee) = self.threads.get_mut(&tid) else {
            return Ok(());
        };
        let thread = tracee.id;

        if stepped {
            if let Some(site) = tracee.stepping_over.take() {
                if self.breakpoints_armed {
                    ptrace::swap_byte(tid, site, INT3)?;
                }
                return self.resume_thread(tid, 0);
            }
        }

        let site = ptrace::instruction_pointer(tid)?.wrapping_sub(1);
        let Some(&original) = self.breakpoints.get(&site) else {
            // Not ours
            return self.resume_thread(tid, libc::SIGTRAP);
        };

        if let Some(hook) = self.hooks.get(&Address::new(site)) {
            hook.fire(thread);
        }
        ptrace::swap_byte(tid, site, original)?;
        ptrace::set_instruction_pointer(tid, site)?;
        if let Some(tracee) = self.threads.get_mut(&tid) {
            tracee.stepping_over = Some(site);
        }
        self.resume_thread(tid, 0)
    }

    fn in_main_image(&self, address: Address) -> bool
    {
        self.main_ranges.iter().any(|range| range.contains(&address.value()))
    }
}

impl HostEngine for PtraceEngine
{
    fn image_at(&self, address: Address) -> Option<ImageInfo>
    {
        if self.in_main_image(address) {
            return Some(self.main.clone());
        }

        let mut mapping = maps::find(&self.mappings.borrow(), address.value()).cloned();
        if mapping.is_none() {
            // Libraries mapped since the last read
            if let Ok(fresh) = maps::read(self.pid) {
                *self.mappings.borrow_mut() = fresh;
            }
            mapping = maps::find(&self.mappings.borrow(), address.value()).cloned();
        }

        let mapping = mapping.filter(|mapping| mapping.executable)?;
        Some(ImageInfo {
            name: path_name(&mapping.path?),
            is_main: false,
        })
    }

    fn routine_at(&self, address: Address) -> Option<RoutineInfo>
    {
        if !self.in_main_image(address) {
            return None;
        }
        self.image
            .routine_at(address)
            .map(|routine| self.image.routine_info(routine, &self.main))
    }

    fn register_hook(&mut self, hook: Hook)
    {
        self.hooks.insert(hook.address(), hook);
    }
}

impl Drop for PtraceEngine
{
    fn drop(&mut self)
    {
        if self.exit.is_some() {
            return;
        }
        warn!(pid = self.pid, "killing unfinished target");
        // SAFETY: plain kill(2) on our own child
        unsafe {
            libc::kill(self.pid, libc::SIGKILL);
        }
        let _ = ptrace::wait_for(self.pid);
    }
}

fn new_tid(message: u64) -> TracerResult<Tid>
{
    Tid::try_from(message).map_err(|_| TracerError::Unsupported(format!("thread id {message} out of range")))
}

fn path_name(path: &Path) -> String
{
    path.display().to_string()
}
