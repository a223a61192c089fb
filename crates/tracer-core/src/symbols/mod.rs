//! # Symbols
//!
//! Turning addresses into the text written to the symbol stream.
//!
//! - [`symbol_text`] renders a routine as `section+offset:name` (or just the
//!   name, see [`SymbolStyle`])
//! - [`SymbolInterner`] keeps one shared copy of each distinct text
//! - [`image::ExecutableImage`] reads routines and sections out of an ELF file
//!   for hosts that need to resolve symbols themselves

pub mod demangle;
pub mod image;
pub mod interner;

pub use demangle::demangle_name;
pub use image::ExecutableImage;
pub use interner::{InternStats, SymbolHandle, SymbolInterner};

use crate::engine::RoutineInfo;

/// How a routine is rendered in the symbol stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SymbolStyle
{
    /// `<section>+<offset>:<name>`, e.g. `.text+0x1a0:compute`.
    #[default]
    Qualified,
    /// Only the routine name.
    Bare,
}

/// Render the symbol text for a routine.
///
/// The offset is the routine's distance from the start of its section, in
/// `0x`-prefixed hex. A routine without section information is rendered with
/// an empty section name and a zero offset so the line still parses the same
/// way.
///
/// `None` (no owning routine) renders as the empty string.
///
/// ## Example
///
/// ```rust
/// use tracer_core::engine::{RoutineInfo, SectionInfo};
/// use tracer_core::symbols::{symbol_text, SymbolStyle};
/// use tracer_core::types::Address;
///
/// let routine = RoutineInfo {
///     name: "compute".into(),
///     address: Address::new(0x11a0),
///     section: Some(SectionInfo { name: ".text".into(), address: Address::new(0x1000) }),
///     image: None,
/// };
/// assert_eq!(symbol_text(Some(&routine), SymbolStyle::Qualified), ".text+0x1a0:compute");
/// assert_eq!(symbol_text(Some(&routine), SymbolStyle::Bare), "compute");
/// assert_eq!(symbol_text(None, SymbolStyle::Qualified), "");
/// ```
#[must_use]
pub fn symbol_text(routine: Option<&RoutineInfo>, style: SymbolStyle) -> String
{
    let Some(routine) = routine else {
        return String::new();
    };

    match style {
        SymbolStyle::Bare => routine.name.clone(),
        SymbolStyle::Qualified => {
            let (section, offset) = match &routine.section {
                Some(section) => (section.name.as_str(), routine.address.offset_from(section.address).unwrap_or(0)),
                None => ("", 0),
            };
            format!("{section}+{offset:#x}:{}", routine.name)
        }
    }
}
