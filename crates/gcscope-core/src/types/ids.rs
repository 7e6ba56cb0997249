//! Identifier newtypes for threads, app-domains, modules and types.

use std::fmt;

use super::Address;

/// Operating-system thread identifier of a runtime thread
///
/// Roots found on a thread's stack carry this id in their label. The value
/// is whatever the runtime reports (a TID on Linux, a thread id on Windows).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId(pub u64);

impl ThreadId
{
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

/// Identity of an app-domain
///
/// App-domains and modules reference each other by value. A domain is keyed
/// by the address of its runtime record, which is unique within one
/// generation of the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DomainId(pub Address);

impl DomainId
{
    /// Address of the runtime's record for this domain.
    pub const fn address(self) -> Address
    {
        self.0
    }
}

impl From<Address> for DomainId
{
    fn from(address: Address) -> Self
    {
        Self(address)
    }
}

impl fmt::Display for DomainId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "domain@{}", self.0)
    }
}

/// Stable identifier for a module record.
///
/// Loaded modules use their image base; error modules get a synthetic,
/// monotonically increasing value that cannot collide with a real base
/// because the high bit is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleId(u64);

impl ModuleId
{
    const SYNTHETIC_BIT: u64 = 1 << 63;

    /// Identifier of a module loaded at `base`.
    pub const fn from_base(base: Address) -> Self
    {
        Self(base.value())
    }

    /// Synthetic identifier for the `sequence`-th error module.
    pub const fn synthetic(sequence: u64) -> Self
    {
        Self(Self::SYNTHETIC_BIT | sequence)
    }

    /// Returns `true` if this id was minted for an error module.
    pub const fn is_synthetic(self) -> bool
    {
        self.0 & Self::SYNTHETIC_BIT != 0
    }

    pub const fn raw(self) -> u64
    {
        self.0
    }
}

/// Position of a resolved type inside a heap's type table.
///
/// Indices are handed out sequentially and never reused or compacted, so an
/// index stays valid for as long as the heap that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeIndex(pub(crate) usize);

impl TypeIndex
{
    /// Raw position in the type table.
    pub const fn get(self) -> usize
    {
        self.0
    }
}

impl fmt::Display for TypeIndex
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "#{}", self.0)
    }
}
