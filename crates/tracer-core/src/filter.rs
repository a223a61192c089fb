//! # Name Filter
//!
//! Excludes routines from tracing by name.
//!
//! A [`BlockList`] holds uppercased substrings read once from configuration.
//! A routine is blocked when any entry occurs anywhere in its uppercased name,
//! so `malloc` blocks `malloc`, `__libc_malloc` and `MallocExtension`.
//!
//! The filter is fail-open: an empty name or an empty list never blocks.

use crate::error::ConfigError;

/// Separator between entries in the configured list.
pub const ENTRY_SEPARATOR: char = ';';

/// Ordered, immutable list of blocked name fragments
///
/// ## Example
///
/// ```rust
/// use tracer_core::filter::BlockList;
///
/// let list = BlockList::parse("malloc;free;")?;
/// assert!(list.blocked("__libc_malloc"));
/// assert!(list.blocked("FREE_list"));
/// assert!(!list.blocked("compute"));
/// assert!(!list.blocked(""));
/// # Ok::<(), tracer_core::error::ConfigError>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockList
{
    entries: Vec<String>,
}

impl BlockList
{
    /// A list that blocks nothing.
    #[must_use]
    pub fn empty() -> Self
    {
        Self::default()
    }

    /// Parse a `;`-separated list.
    ///
    /// Surrounding whitespace is trimmed from each entry and empty entries are
    /// skipped, so `"malloc;"`, `" malloc "` and `"malloc;;"` are the same list.
    ///
    /// ## Errors
    ///
    /// [`ConfigError::BlockList`] if an entry contains a control character.
    pub fn parse(list: &str) -> Result<Self, ConfigError>
    {
        Self::from_entries(list.split(ENTRY_SEPARATOR))
    }

    /// Build a list from individual entries.
    ///
    /// ## Errors
    ///
    /// [`ConfigError::BlockList`] if an entry contains a control character.
    pub fn from_entries<I, S>(entries: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parsed = Vec::new();
        for entry in entries {
            let entry = entry.as_ref().trim();
            if entry.is_empty() {
                continue;
            }
            if entry.chars().any(char::is_control) {
                return Err(ConfigError::BlockList(entry.to_string()));
            }
            parsed.push(entry.to_uppercase());
        }
        Ok(Self { entries: parsed })
    }

    /// Whether the list has no entries (filtering disabled).
    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.entries.is_empty()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize
    {
        self.entries.len()
    }

    /// Uppercased entries in configuration order.
    #[must_use]
    pub fn entries(&self) -> &[String]
    {
        &self.entries
    }

    /// Whether `name` must not be traced.
    ///
    /// `false` for an empty list or an empty name. Otherwise `true` as soon as
    /// one entry is a substring of the uppercased name.
    #[must_use]
    pub fn blocked(&self, name: &str) -> bool
    {
        if self.entries.is_empty() || name.is_empty() {
            return false;
        }

        let upper = name.to_uppercase();
        self.entries.iter().any(|entry| upper.contains(entry.as_str()))
    }
}
