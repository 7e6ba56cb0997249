//! # Memory Sources
//!
//! The engine never fetches bytes itself. Everything it knows about the
//! target comes through a [`MemorySource`]: a process snapshot, a live
//! attached process, or any other address-indexed byte provider.
//!
//! Two implementations live here:
//!
//! - [`SnapshotMemory`]: captured regions held in memory
//! - [`PageCache`]: a page-granular cache in front of another source, used by
//!   the heap as its local reader during object walks

pub mod cache;
pub mod snapshot;

pub use cache::PageCache;
pub use snapshot::SnapshotMemory;

use crate::revision::Revision;
use crate::types::Address;

/// Address-indexed read access to the target
///
/// Implementations are expected to serialize concurrent reads themselves; a
/// live debug connection typically allows a single in-flight operation.
///
/// Reads never fail with an error. Unmapped or uncaptured memory is normal
/// when inspecting dumps, so [`MemorySource::read_bytes`] reports how many
/// bytes it produced and the typed helpers return `None`.
pub trait MemorySource: Send + Sync
{
    /// Size of a target pointer in bytes (4 or 8).
    fn pointer_size(&self) -> u8
    {
        8
    }

    /// Read up to `buffer.len()` bytes at `address`.
    ///
    /// Returns the number of bytes copied into `buffer`, starting at its
    /// beginning. A short count means the rest of the range is unavailable.
    fn read_bytes(&self, address: Address, buffer: &mut [u8]) -> usize;

    /// Cheap hint: is `address` already held locally?
    ///
    /// A `false` answer does not mean the read would fail, only that it
    /// would go to the backing store.
    fn contains_address(&self, _address: Address) -> bool
    {
        false
    }

    /// Current generation of the target.
    fn current_revision(&self) -> Revision;

    /// `true` for dump files, `false` for live, fully paged-in processes.
    fn is_static_snapshot(&self) -> bool;

    /// Read exactly `buffer.len()` bytes, or report failure.
    fn read_exact(&self, address: Address, buffer: &mut [u8]) -> bool
    {
        self.read_bytes(address, buffer) == buffer.len()
    }

    /// Read a pointer-sized little-endian value.
    fn read_pointer(&self, address: Address) -> Option<Address>
    {
        if self.pointer_size() == 4 {
            return self.read_u32(address).map(|value| Address::from(u64::from(value)));
        }
        let mut bytes = [0u8; 8];
        self.read_exact(address, &mut bytes)
            .then(|| Address::from(u64::from_le_bytes(bytes)))
    }

    /// Read a little-endian `u32`.
    fn read_u32(&self, address: Address) -> Option<u32>
    {
        let mut bytes = [0u8; 4];
        self.read_exact(address, &mut bytes).then(|| u32::from_le_bytes(bytes))
    }
}
