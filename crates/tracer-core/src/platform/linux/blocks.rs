//! Basic-block boundaries of a single-stepped thread.
//!
//! At every stop the instruction about to run is decoded. The next stop
//! begins a new block when that instruction may leave the straight line, or
//! when the thread did not land right after it (signal delivery, `sigreturn`).

use iced_x86::{Decoder, DecoderOptions, FlowControl};

/// The instruction a thread was stopped at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Stepped
{
    ip: u64,
    /// Address of the next instruction in memory.
    end: u64,
    /// Branch, call, return, `syscall` or interrupt.
    transfers: bool,
}

/// Decode the instruction at `ip` from `code`, the bytes found there.
///
/// `None` when the bytes do not hold a whole valid instruction.
pub(super) fn decode(ip: u64, code: &[u8]) -> Option<Stepped>
{
    let mut decoder = Decoder::with_ip(64, code, ip, DecoderOptions::NONE);
    let instruction = decoder.decode();
    if instruction.is_invalid() {
        return None;
    }
    Some(Stepped {
        ip,
        end: instruction.next_ip(),
        transfers: instruction.flow_control() != FlowControl::Next,
    })
}

/// Whether a thread now stopped at `ip` entered a new block, given the
/// instruction it was stopped at before.
pub(super) fn starts_block(previous: Option<Stepped>, ip: u64) -> bool
{
    match previous {
        None => true,
        Some(previous) if previous.transfers => true,
        // `rep` string instructions stop once per iteration
        Some(previous) => ip != previous.end && ip != previous.ip,
    }
}
