//! # Symbol Interner
//!
//! Deduplicates symbol texts so every hook that shares a routine shares one
//! allocation.
//!
//! At instruction granularity a single routine can own thousands of hooks, and
//! every one of them carries the routine's symbol text. The interner hands out
//! a [`SymbolHandle`] per distinct text; hooks keep a clone of the handle
//! (a reference count bump), never a copy of the string.
//!
//! ## Lookup order
//!
//! 1. The most recently returned handle. Consecutive sites almost always
//!    belong to the same routine, so this hits most of the time.
//! 2. A hash index over every text interned so far.
//! 3. On a miss the text is appended to the table.
//!
//! The table is append-only and lives as long as the session. Interning only
//! happens while sites are being instrumented, which the host serialises, so
//! the interner takes `&mut self` and has no lock of its own.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Stable identity of one interned symbol text
///
/// Two handles compare equal exactly when they came from the same table slot,
/// which (for one interner) is exactly when their texts are equal. Cloning a
/// handle is cheap and never copies the text.
#[derive(Debug, Clone)]
pub struct SymbolHandle
{
    index: u32,
    text: Arc<str>,
}

impl SymbolHandle
{
    /// Slot of this text in the interner's table.
    #[must_use]
    pub fn index(&self) -> u32
    {
        self.index
    }

    /// The interned text.
    #[must_use]
    pub fn as_str(&self) -> &str
    {
        &self.text
    }

    /// Whether two handles share the same allocation.
    #[must_use]
    pub fn same_allocation(&self, other: &SymbolHandle) -> bool
    {
        Arc::ptr_eq(&self.text, &other.text)
    }
}

impl PartialEq for SymbolHandle
{
    fn eq(&self, other: &Self) -> bool
    {
        self.index == other.index && self.same_allocation(other)
    }
}

impl Eq for SymbolHandle {}

impl AsRef<str> for SymbolHandle
{
    fn as_ref(&self) -> &str
    {
        &self.text
    }
}

impl fmt::Display for SymbolHandle
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(&self.text)
    }
}

/// Where each lookup was answered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InternStats
{
    /// Answered by the last-used slot.
    pub last_hits: u64,
    /// Answered by the table index.
    pub table_hits: u64,
    /// New entries appended.
    pub inserts: u64,
}

/// Append-only table of symbol texts
///
/// ## Example
///
/// ```rust
/// use tracer_core::symbols::SymbolInterner;
///
/// let mut interner = SymbolInterner::new();
/// let a = interner.intern(".text+0x0:main");
/// let b = interner.intern(".text+0x40:compute");
/// let c = interner.intern(".text+0x0:main");
///
/// assert_eq!(a, c);
/// assert_ne!(a, b);
/// assert_eq!(interner.len(), 2);
/// ```
#[derive(Debug, Default)]
pub struct SymbolInterner
{
    entries: Vec<SymbolHandle>,
    index: HashMap<Arc<str>, u32>,
    last: Option<SymbolHandle>,
    stats: InternStats,
}

impl SymbolInterner
{
    /// Create an empty interner.
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Return the handle for `content`, adding it to the table if needed.
    pub fn intern(&mut self, content: &str) -> SymbolHandle
    {
        if let Some(last) = &self.last {
            if last.as_str() == content {
                self.stats.last_hits += 1;
                return last.clone();
            }
        }

        if let Some(&index) = self.index.get(content) {
            self.stats.table_hits += 1;
            let handle = self.entries[index as usize].clone();
            self.last = Some(handle.clone());
            return handle;
        }

        // A session never comes close to 2^32 distinct routines
        let index = u32::try_from(self.entries.len()).unwrap_or(u32::MAX);
        let text: Arc<str> = Arc::from(content);
        let handle = SymbolHandle {
            index,
            text: Arc::clone(&text),
        };
        self.index.insert(text, index);
        self.entries.push(handle.clone());
        self.last = Some(handle.clone());
        self.stats.inserts += 1;
        handle
    }

    /// Look up an existing handle by table slot.
    #[must_use]
    pub fn get(&self, index: u32) -> Option<&SymbolHandle>
    {
        self.entries.get(index as usize)
    }

    /// Number of distinct texts interned.
    #[must_use]
    pub fn len(&self) -> usize
    {
        self.entries.len()
    }

    /// Whether nothing has been interned yet.
    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.entries.is_empty()
    }

    /// Lookup counters, for the end-of-session summary.
    #[must_use]
    pub fn stats(&self) -> InternStats
    {
        self.stats
    }
}
