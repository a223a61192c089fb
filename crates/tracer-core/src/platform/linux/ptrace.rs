//! Safe wrappers around the `ptrace` and `waitpid` requests the engine uses.
//!
//! Every failing request is reported as [`TracerError::Ptrace`] with the
//! request name and the thread it targeted.

use std::io;
use std::mem::MaybeUninit;
use std::ptr;

use libc::{c_int, c_long, c_void};

use crate::error::{TracerError, TracerResult};

/// Kernel thread (or process) id.
pub(super) type Tid = libc::pid_t;

/// Options set on the initial thread; inherited by every traced thread.
pub(super) const TRACE_OPTIONS: c_int = libc::PTRACE_O_TRACECLONE
    | libc::PTRACE_O_TRACEFORK
    | libc::PTRACE_O_TRACEVFORK
    | libc::PTRACE_O_TRACEVFORKDONE
    | libc::PTRACE_O_TRACEEXEC
    | libc::PTRACE_O_EXITKILL;

/// How to let a stopped thread run again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Resume
{
    /// Until the next signal or event.
    Continue,
    /// One instruction.
    Step,
}

/// Decoded `waitpid` status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum WaitStatus
{
    Exited(i32),
    Signaled(i32),
    /// Signal-delivery stop (including trap stops).
    Stopped(i32),
    /// `PTRACE_EVENT_*` stop.
    Event(i32),
}

fn request(operation: &'static str, request: u32, tid: Tid, addr: *mut c_void, data: *mut c_void) -> TracerResult<c_long>
{
    // SAFETY: every caller passes pointers valid for the given request
    let ret = unsafe { libc::ptrace(request as _, tid, addr, data) };
    if ret == -1 {
        return Err(TracerError::Ptrace {
            operation,
            tid,
            source: io::Error::last_os_error(),
        });
    }
    Ok(ret)
}

/// Make the calling process a tracee of its parent. Runs in the child
/// between `fork` and `exec`.
pub(super) fn trace_me() -> io::Result<()>
{
    // SAFETY: PTRACE_TRACEME ignores its other arguments
    let ret = unsafe {
        libc::ptrace(
            libc::PTRACE_TRACEME as _,
            0,
            ptr::null_mut::<c_void>(),
            ptr::null_mut::<c_void>(),
        )
    };
    if ret == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

pub(super) fn set_options(tid: Tid, options: c_int) -> TracerResult<()>
{
    request(
        "PTRACE_SETOPTIONS",
        libc::PTRACE_SETOPTIONS as u32,
        tid,
        ptr::null_mut(),
        options as usize as *mut c_void,
    )
    .map(drop)
}

/// Resume `tid`, delivering `signal` (0 for none).
pub(super) fn resume(tid: Tid, how: Resume, signal: c_int) -> TracerResult<()>
{
    let (operation, code) = match how {
        Resume::Continue => ("PTRACE_CONT", libc::PTRACE_CONT as u32),
        Resume::Step => ("PTRACE_SINGLESTEP", libc::PTRACE_SINGLESTEP as u32),
    };
    request(operation, code, tid, ptr::null_mut(), signal as usize as *mut c_void).map(drop)
}

pub(super) fn detach(tid: Tid) -> TracerResult<()>
{
    request("PTRACE_DETACH", libc::PTRACE_DETACH as u32, tid, ptr::null_mut(), ptr::null_mut()).map(drop)
}

/// The message attached to the last `PTRACE_EVENT_*` stop (e.g. a new tid).
pub(super) fn event_message(tid: Tid) -> TracerResult<u64>
{
    let mut message: libc::c_ulong = 0;
    request(
        "PTRACE_GETEVENTMSG",
        libc::PTRACE_GETEVENTMSG as u32,
        tid,
        ptr::null_mut(),
        ptr::addr_of_mut!(message).cast(),
    )?;
    Ok(u64::from(message))
}

/// `si_code` of the signal that stopped `tid`.
pub(super) fn signal_code(tid: Tid) -> TracerResult<i32>
{
    let mut info = MaybeUninit::<libc::siginfo_t>::zeroed();
    request(
        "PTRACE_GETSIGINFO",
        libc::PTRACE_GETSIGINFO as u32,
        tid,
        ptr::null_mut(),
        info.as_mut_ptr().cast(),
    )?;
    // SAFETY: the kernel filled the struct; zeroed memory is a valid siginfo_t anyway
    Ok(unsafe { info.assume_init() }.si_code)
}

/// Whether a `SIGTRAP` with this `si_code` came from single-stepping rather
/// than from `int3`, `kill` or `raise`.
pub(super) fn is_step_trap(si_code: i32) -> bool
{
    si_code > 0 && si_code != libc::SI_KERNEL
}

/// Read one word of the tracee's memory.
pub(super) fn read_word(tid: Tid, address: u64) -> TracerResult<u64>
{
    // PEEKTEXT returns the word itself, so -1 is only an error if errno is set
    // SAFETY: errno is thread-local
    unsafe { *libc::__errno_location() = 0 };
    // SAFETY: PEEKTEXT reads from the tracee, never from our memory
    let word = unsafe {
        libc::ptrace(
            libc::PTRACE_PEEKTEXT as _,
            tid,
            address as usize as *mut c_void,
            ptr::null_mut::<c_void>(),
        )
    };
    if word == -1 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(0) {
            return Err(TracerError::Ptrace {
                operation: "PTRACE_PEEKTEXT",
                tid,
                source: err,
            });
        }
    }
    Ok(word as u64)
}

/// Write one word of the tracee's memory.
pub(super) fn write_word(tid: Tid, address: u64, word: u64) -> TracerResult<()>
{
    request(
        "PTRACE_POKETEXT",
        libc::PTRACE_POKETEXT as u32,
        tid,
        address as usize as *mut c_void,
        word as usize as *mut c_void,
    )
    .map(drop)
}

/// Read the 16 bytes at `address`, or only 8 when the second word is not
/// mapped. Enough for any x86-64 instruction that starts there.
pub(super) fn read_code(tid: Tid, address: u64) -> TracerResult<Vec<u8>>
{
    let mut code = read_word(tid, address)?.to_le_bytes().to_vec();
    if let Ok(word) = read_word(tid, address.wrapping_add(8)) {
        code.extend_from_slice(&word.to_le_bytes());
    }
    Ok(code)
}

/// Replace the low byte of the word at `address`, returning the old byte.
pub(super) fn swap_byte(tid: Tid, address: u64, byte: u8) -> TracerResult<u8>
{
    let word = read_word(tid, address)?;
    write_word(tid, address, (word & !0xff) | u64::from(byte))?;
    Ok((word & 0xff) as u8)
}

fn registers(tid: Tid) -> TracerResult<libc::user_regs_struct>
{
    let mut regs = MaybeUninit::<libc::user_regs_struct>::zeroed();
    request(
        "PTRACE_GETREGS",
        libc::PTRACE_GETREGS as u32,
        tid,
        ptr::null_mut(),
        regs.as_mut_ptr().cast(),
    )?;
    // SAFETY: filled by the kernel; all-zero is valid for a struct of integers
    Ok(unsafe { regs.assume_init() })
}

pub(super) fn instruction_pointer(tid: Tid) -> TracerResult<u64>
{
    Ok(registers(tid)?.rip)
}

pub(super) fn set_instruction_pointer(tid: Tid, rip: u64) -> TracerResult<()>
{
    let mut regs = registers(tid)?;
    regs.rip = rip;
    request(
        "PTRACE_SETREGS",
        libc::PTRACE_SETREGS as u32,
        tid,
        ptr::null_mut(),
        ptr::addr_of_mut!(regs).cast(),
    )
    .map(drop)
}

/// Wait for the next state change of any traced thread.
///
/// `None` once there is nothing left to wait for.
pub(super) fn wait_any() -> TracerResult<Option<(Tid, WaitStatus)>>
{
    wait(-1)
}

/// Wait for the next state change of `tid`.
pub(super) fn wait_for(tid: Tid) -> TracerResult<Option<WaitStatus>>
{
    Ok(wait(tid)?.map(|(_, status)| status))
}

fn wait(target: Tid) -> TracerResult<Option<(Tid, WaitStatus)>>
{
    loop {
        let mut status: c_int = 0;
        // SAFETY: status is a valid out-pointer
        let tid = unsafe { libc::waitpid(target, &mut status, libc::__WALL) };
        if tid != -1 {
            return Ok(Some((tid, decode(status))));
        }

        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EINTR) => {}
            Some(libc::ECHILD) => return Ok(None),
            _ => {
                return Err(TracerError::Ptrace {
                    operation: "waitpid",
                    tid: target,
                    source: err,
                })
            }
        }
    }
}

fn decode(status: c_int) -> WaitStatus
{
    if libc::WIFEXITED(status) {
        WaitStatus::Exited(libc::WEXITSTATUS(status))
    } else if libc::WIFSIGNALED(status) {
        WaitStatus::Signaled(libc::WTERMSIG(status))
    } else {
        let signal = libc::WSTOPSIG(status);
        let event = (status >> 16) & 0xff;
        if signal == libc::SIGTRAP && event != 0 {
            WaitStatus::Event(event)
        } else {
            WaitStatus::Stopped(signal)
        }
    }
}

/// Whether `err` means the thread no longer exists.
pub(super) fn is_gone(err: &TracerError) -> bool
{
    matches!(err, TracerError::Ptrace { source, .. } if source.raw_os_error() == Some(libc::ESRCH))
}
