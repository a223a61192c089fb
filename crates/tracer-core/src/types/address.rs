//! Memory address type.

use std::fmt;
use std::ops::{Add, Sub};

/// Strongly typed memory address in the target's address space
///
/// This wrapper around `u64` keeps addresses apart from offsets, sizes and
/// thread ids, all of which are also `u64` in this crate.
///
/// `Display` renders the form used in trace files: `0x`-prefixed lowercase
/// hex with no padding.
///
/// ## Example
///
/// ```rust
/// use tracer_core::types::Address;
///
/// let addr = Address::from(0x401000);
/// assert_eq!(addr.to_string(), "0x401000");
/// assert_eq!((addr + 0x10).value(), 0x401010);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(u64);

impl Address
{
    /// The null address (0x0)
    pub const ZERO: Self = Address(0);

    /// Create a new address from a `u64` value
    ///
    /// This is equivalent to `Address::from(value)` but can be used in const contexts.
    pub const fn new(value: u64) -> Self
    {
        Address(value)
    }

    /// Get the raw `u64` value of this address
    pub const fn value(self) -> u64
    {
        self.0
    }

    /// Add an offset to this address, checking for overflow
    ///
    /// ```rust
    /// use tracer_core::types::Address;
    ///
    /// let addr = Address::from(0x1000);
    /// assert_eq!(addr.checked_add(0x100), Some(Address::from(0x1100)));
    /// assert_eq!(addr.checked_add(u64::MAX), None);
    /// ```
    pub fn checked_add(self, offset: u64) -> Option<Self>
    {
        self.0.checked_add(offset).map(Address)
    }

    /// Distance from `base` to this address, or `None` if `base` lies above it
    ///
    /// Used to express a routine's position inside its section.
    ///
    /// ```rust
    /// use tracer_core::types::Address;
    ///
    /// assert_eq!(Address::from(0x1130).offset_from(Address::from(0x1000)), Some(0x130));
    /// assert_eq!(Address::from(0x0f00).offset_from(Address::from(0x1000)), None);
    /// ```
    pub fn offset_from(self, base: Address) -> Option<u64>
    {
        self.0.checked_sub(base.0)
    }
}

impl From<u64> for Address
{
    fn from(value: u64) -> Self
    {
        Address(value)
    }
}

impl From<Address> for u64
{
    fn from(address: Address) -> Self
    {
        address.0
    }
}

impl fmt::Display for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::LowerHex for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl Add<u64> for Address
{
    type Output = Address;

    fn add(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_add(rhs))
    }
}

impl Sub<u64> for Address
{
    type Output = Address;

    fn sub(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_sub(rhs))
    }
}
