//! Common module for library exports

pub use crate::dispatch::{DispatchStats, GranularityDispatcher, SiteDecision};
pub use crate::engine::{CandidateSite, Hook, HostEngine, ImageInfo, RoutineInfo, SectionInfo};
pub use crate::error::{exit_status, ConfigError, TracerError, TracerResult};
pub use crate::filter::BlockList;
#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
pub use crate::platform::linux::PtraceEngine;
pub use crate::session::{SessionOptions, SessionSummary, TraceSession};
pub use crate::symbols::{SymbolHandle, SymbolInterner, SymbolStyle};
pub use crate::types::{Address, TargetExit, ThreadId, TraceGranularity};
pub use crate::writer::TraceWriter;
