//! # Error Types
//!
//! Error handling for the engine.
//!
//! Most lookups in this crate do not fail with an error at all: an object
//! whose descriptor cannot be read, or an address no module contains, is an
//! expected outcome when walking a partially captured heap and is reported as
//! `None`. The variants below are reserved for conditions the caller has to
//! act on.

use thiserror::Error;

use crate::revision::Revision;
use crate::types::Address;

/// Main error type for engine operations
///
/// ## Error Categories
///
/// 1. **Generation errors**: StaleRevision
/// 2. **Backend limitations**: Unsupported
/// 3. **Index errors**: ModuleOverlap, ModuleNotFound
/// 4. **Caller errors**: InvalidArgument
/// 5. **I/O errors**: Io
#[derive(Error, Debug)]
pub enum GcScopeError
{
    /// A cached handle belongs to an older generation of the target
    ///
    /// The target was resumed (or a new snapshot was loaded) after the entity
    /// was constructed. Data derived from it may describe memory that no
    /// longer exists.
    ///
    /// ## Solution
    ///
    /// Drop the heap and build a fresh one against the current generation.
    #[error("Stale revision: handle was created at revision {held}, target is at {current}")]
    StaleRevision
    {
        /// Revision stamped on the entity when it was constructed
        held: Revision,
        /// Revision the memory source currently reports
        current: Revision,
    },

    /// The backend cannot perform the requested operation
    ///
    /// This is a limitation of the data source (for example a degraded dump
    /// that carries no handle table), not a problem with the data itself.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Invalid argument passed to an engine function
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A module's address range intersects one that is already indexed
    #[error("Module at {base} overlaps the module at {existing}")]
    ModuleOverlap
    {
        /// Base of the module that was being inserted
        base: Address,
        /// Base of the indexed module it collides with
        existing: Address,
    },

    /// No indexed module starts at the given base address
    #[error("No module at base address {0}")]
    ModuleNotFound(Address),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GcScopeError
{
    /// Returns `true` if the error signals a generation mismatch.
    ///
    /// Callers that retry should re-fetch fresh handles in this case instead
    /// of repeating the same call.
    pub fn is_stale(&self) -> bool
    {
        matches!(self, GcScopeError::StaleRevision { .. })
    }

    /// Returns `true` if the error is a backend limitation.
    pub fn is_unsupported(&self) -> bool
    {
        matches!(self, GcScopeError::Unsupported(_))
    }
}

/// Convenience type alias for `Result<T, GcScopeError>`
///
/// ```rust
/// use gcscope_core::error::GcScopeResult;
/// fn foo() -> GcScopeResult<()>
/// {
///     Ok(())
/// }
/// ```
pub type GcScopeResult<T> = std::result::Result<T, GcScopeError>;
