//! # Revision Guard
//!
//! Every entity that caches data derived from one generation of the target
//! carries the [`Revision`] it was built against. Accessors that reach back
//! into the runtime (metadata import, domain-module mapping) compare that
//! stamp with the memory source's current revision before doing anything.
//!
//! Data that never cross-references the runtime (a resolved type's name or
//! size) stays valid forever and is not guarded.

use std::fmt;

use tracing::warn;

use crate::error::{GcScopeError, GcScopeResult};

/// Generation counter of a memory source.
///
/// Monotonically increasing; a change means the previous snapshot is invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Revision(pub u64);

impl Revision
{
    /// The next generation.
    #[must_use]
    pub const fn next(self) -> Self
    {
        Revision(self.0 + 1)
    }
}

impl fmt::Display for Revision
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// Revision stamp carried by a cached entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevisionGuard
{
    stamp: Revision,
}

impl RevisionGuard
{
    /// Stamp an entity with the revision it is being built against.
    pub const fn stamp(revision: Revision) -> Self
    {
        Self { stamp: revision }
    }

    /// The revision this guard was stamped with.
    pub const fn revision(&self) -> Revision
    {
        self.stamp
    }

    /// Whether `current` matches the stamp. Logs nothing.
    pub fn is_current(&self, current: Revision) -> bool
    {
        self.stamp == current
    }

    /// Fail with [`GcScopeError::StaleRevision`] unless `current` matches the stamp.
    pub fn check(&self, current: Revision) -> GcScopeResult<()>
    {
        if self.is_current(current) {
            return Ok(());
        }
        warn!(held = %self.stamp, current = %current, "rejecting access through stale handle");
        Err(GcScopeError::StaleRevision {
            held: self.stamp,
            current,
        })
    }
}
