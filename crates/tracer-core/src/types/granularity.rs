//! Trace granularity selection.

use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// Which kind of site receives an observation hook
///
/// Parsed from the short name or the long name, exactly as written: no other
/// spelling or letter case is accepted.
///
/// Chosen once when the session starts and never changed afterwards. The
/// choice decides which candidate sites the host offers and what one line of
/// the data stream means:
///
/// | Granularity    | One record per...                  | Short name |
/// |----------------|------------------------------------|------------|
/// | `Instruction`  | executed instruction               | `ins`      |
/// | `BasicBlock`   | executed basic block (its start)   | `bbl`      |
/// | `FunctionCall` | routine entry                      | `cal`      |
///
/// ## Example
///
/// ```rust
/// use tracer_core::types::TraceGranularity;
///
/// let granularity: TraceGranularity = "cal".parse()?;
/// assert_eq!(granularity, TraceGranularity::FunctionCall);
/// assert_eq!("basic-block".parse::<TraceGranularity>()?, TraceGranularity::BasicBlock);
/// assert!("line".parse::<TraceGranularity>().is_err());
/// # Ok::<(), tracer_core::error::ConfigError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TraceGranularity
{
    /// Hook every instruction.
    Instruction,
    /// Hook the first instruction of every basic block.
    #[default]
    BasicBlock,
    /// Hook every routine entry.
    FunctionCall,
}

impl TraceGranularity
{
    /// Short name accepted on the command line.
    #[must_use]
    pub const fn short_name(self) -> &'static str
    {
        match self {
            Self::Instruction => "ins",
            Self::BasicBlock => "bbl",
            Self::FunctionCall => "cal",
        }
    }
}

impl FromStr for TraceGranularity
{
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s {
            "ins" | "instruction" => Ok(Self::Instruction),
            "bbl" | "basic-block" => Ok(Self::BasicBlock),
            "cal" | "function-call" => Ok(Self::FunctionCall),
            _ => Err(ConfigError::Granularity(s.to_string())),
        }
    }
}

impl fmt::Display for TraceGranularity
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let name = match self {
            Self::Instruction => "instruction",
            Self::BasicBlock => "basic-block",
            Self::FunctionCall => "function-call",
        };
        f.write_str(name)
    }
}
