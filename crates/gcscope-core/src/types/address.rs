//! Target address type.

use std::fmt;
use std::ops::{Add, Sub};

/// Strongly typed address in the target's address space
///
/// This wrapper around `u64` keeps target addresses apart from sizes, counts
/// and indices. Every address the engine hands out or accepts (object
/// addresses, type descriptors, module bases, root slots) uses this type,
/// regardless of the target's pointer width.
///
/// ## Tag bits
///
/// The runtime stores flags in the low bits of an object's descriptor
/// pointer. [`Address::masked`] clears them before the pointer is used as a
/// lookup key.
///
/// ## Example
///
/// ```rust
/// use gcscope_core::types::Address;
///
/// let addr = Address::from(0x1000);
/// let next_addr = addr + 0x100;
/// assert_eq!(next_addr.value(), 0x1100);
/// assert_eq!(Address::from(0x1003).masked(!0b11), addr);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(u64);

impl Address
{
    /// The null address (0x0)
    ///
    /// Used as the "unmapped" answer of lookups that return a raw address.
    pub const ZERO: Self = Address(0);

    /// Create a new address from a `u64` value
    ///
    /// Usable in const contexts, unlike `Address::from`.
    pub const fn new(value: u64) -> Self
    {
        Address(value)
    }

    /// Get the raw `u64` value of this address
    pub const fn value(self) -> u64
    {
        self.0
    }

    /// Returns `true` for the null address.
    pub const fn is_null(self) -> bool
    {
        self.0 == 0
    }

    /// Clear every bit not set in `mask`.
    ///
    /// ```rust
    /// use gcscope_core::types::Address;
    ///
    /// assert_eq!(Address::from(0x2002).masked(!0b11), Address::from(0x2000));
    /// ```
    #[must_use]
    pub const fn masked(self, mask: u64) -> Self
    {
        Address(self.0 & mask)
    }

    /// Round up to the next multiple of `align` (a power of two).
    ///
    /// Returns `None` on overflow.
    pub fn checked_align_up(self, align: u64) -> Option<Self>
    {
        debug_assert!(align.is_power_of_two());
        let mask = align - 1;
        self.0.checked_add(mask).map(|value| Address(value & !mask))
    }

    /// Add an offset to this address, checking for overflow
    ///
    /// ```rust
    /// use gcscope_core::types::Address;
    ///
    /// let addr = Address::from(0x1000);
    /// assert_eq!(addr.checked_add(0x100), Some(Address::from(0x1100)));
    /// assert_eq!(addr.checked_add(u64::MAX), None);
    /// ```
    pub fn checked_add(self, offset: u64) -> Option<Self>
    {
        self.0.checked_add(offset).map(Address)
    }

    /// Subtract an offset from this address, checking for underflow
    pub fn checked_sub(self, offset: u64) -> Option<Self>
    {
        self.0.checked_sub(offset).map(Address)
    }

    /// Add an offset to this address, saturating at the maximum value
    pub fn saturating_add(self, offset: u64) -> Self
    {
        Address(self.0.saturating_add(offset))
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
        write!(f, "0x{:016x}", self.0)
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

impl Sub<Address> for Address
{
    type Output = u64;

    fn sub(self, rhs: Address) -> Self::Output
    {
        self.0.wrapping_sub(rhs.0)
    }
}
