//! Symbol demangling.
//!
//! Routine names come straight from the symbol table, so Rust routines show
//! up mangled (`_ZN4core3fmt5write17h…E` or `_RNv…`). Those are demangled
//! without the trailing hash; every other name (C, C++) is kept verbatim so
//! that blocked-name entries keep matching what the toolchain emitted.

use rustc_demangle::try_demangle;

/// Demangle a Rust symbol name, or return the input unchanged.
///
/// ## Example
///
/// ```rust
/// use tracer_core::symbols::demangle_name;
///
/// assert_eq!(demangle_name("_ZN4test4main17h0123456789abcdefE"), "test::main");
/// assert_eq!(demangle_name("compute"), "compute");
/// ```
#[must_use]
pub fn demangle_name(raw: &str) -> String
{
    match try_demangle(raw) {
        // `{:#}` drops the `::h<hash>` suffix
        Ok(demangled) => format!("{demangled:#}"),
        Err(_) => raw.to_string(),
    }
}
