//! Thread identifier type.

use std::fmt;

/// Thread identifier as reported by the host engine
///
/// Hosts hand out small session-local numbers rather than kernel thread ids:
/// the first thread of the target is `0` and every later thread gets the next
/// number in creation order. The symbol stream prints it as `0x`-prefixed hex.
///
/// ## Example
///
/// ```rust
/// use tracer_core::types::ThreadId;
///
/// let thread = ThreadId::from(10);
/// assert_eq!(thread.raw(), 10);
/// assert_eq!(thread.to_string(), "0xa");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u64);

impl ThreadId
{
    /// The first thread of a traced process.
    pub const MAIN: Self = ThreadId(0);

    /// Get the raw `u64` representation of the thread identifier
    pub fn raw(&self) -> u64
    {
        self.0
    }
}

impl From<u64> for ThreadId
{
    fn from(value: u64) -> Self
    {
        Self(value)
    }
}

impl fmt::Display for ThreadId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{:#x}", self.0)
    }
}

/// How the traced program ended.
///
/// ## Example
///
/// ```rust
/// use tracer_core::types::TargetExit;
///
/// assert_eq!(TargetExit::Code(3).shell_status(), 3);
/// assert_eq!(TargetExit::Signal(9).shell_status(), 137);
/// assert!(TargetExit::Code(0).success());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetExit
{
    /// Normal exit with this status.
    Code(i32),
    /// Killed by this signal.
    Signal(i32),
}

impl TargetExit
{
    /// Whether the program exited with status 0.
    #[must_use]
    pub fn success(self) -> bool
    {
        self == Self::Code(0)
    }

    /// The status a shell would report: the exit code, or `128 + signal`.
    #[must_use]
    pub fn shell_status(self) -> i32
    {
        match self {
            Self::Code(code) => code,
            Self::Signal(signal) => 128 + signal,
        }
    }
}

impl fmt::Display for TargetExit
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Self::Code(code) => write!(f, "exit code {code}"),
            Self::Signal(signal) => write!(f, "signal {signal}"),
        }
    }
}
