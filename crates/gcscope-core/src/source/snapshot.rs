//! Captured memory regions held in process.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use super::MemorySource;
use crate::error::{GcScopeError, GcScopeResult};
use crate::revision::Revision;
use crate::types::Address;

/// A sparse map of captured regions
///
/// Regions are keyed by base address and must not overlap. Reads that run
/// off the end of one region continue into the next only if it starts
/// exactly where the previous one ends; any gap ends the read.
///
/// The revision only changes when [`SnapshotMemory::advance_revision`] is
/// called, which lets embedders model "target resumed and stopped again".
///
/// ## Example
///
/// ```rust
/// use gcscope_core::source::{MemorySource, SnapshotMemory};
/// use gcscope_core::types::Address;
///
/// let memory = SnapshotMemory::new(8, true);
/// memory.map(Address::from(0x1000), 0x100)?;
/// memory.write_pointer(Address::from(0x1008), Address::from(0xdead_0000))?;
/// assert_eq!(memory.read_pointer(Address::from(0x1008)), Some(Address::from(0xdead_0000)));
/// assert_eq!(memory.read_pointer(Address::from(0x2000)), None);
/// # Ok::<(), gcscope_core::error::GcScopeError>(())
/// ```
#[derive(Debug)]
pub struct SnapshotMemory
{
    pointer_size: u8,
    is_static: bool,
    revision: AtomicU64,
    regions: RwLock<BTreeMap<u64, Vec<u8>>>,
}

impl SnapshotMemory
{
    /// Create an empty snapshot.
    ///
    /// `is_static` selects dump-file semantics (`true`) or live-process
    /// semantics (`false`) for [`MemorySource::is_static_snapshot`].
    pub fn new(pointer_size: u8, is_static: bool) -> Self
    {
        Self {
            pointer_size,
            is_static,
            revision: AtomicU64::new(0),
            regions: RwLock::new(BTreeMap::new()),
        }
    }

    /// Add a captured region.
    ///
    /// ## Errors
    ///
    /// `InvalidArgument` if the region is empty or overlaps an existing one.
    pub fn add_region(&self, base: Address, bytes: Vec<u8>) -> GcScopeResult<()>
    {
        if bytes.is_empty() {
            return Err(GcScopeError::InvalidArgument(format!("empty region at {base}")));
        }
        let end = base
            .checked_add(bytes.len() as u64)
            .ok_or_else(|| GcScopeError::InvalidArgument(format!("region at {base} wraps the address space")))?;

        let mut regions = self.regions.write().unwrap_or_else(PoisonError::into_inner);
        let before = regions.range(..end.value()).next_back();
        if let Some((&start, data)) = before {
            if start + data.len() as u64 > base.value() {
                return Err(GcScopeError::InvalidArgument(format!(
                    "region at {base} overlaps region at {}",
                    Address::from(start)
                )));
            }
        }
        regions.insert(base.value(), bytes);
        Ok(())
    }

    /// Add a zero-filled region of `len` bytes.
    pub fn map(&self, base: Address, len: usize) -> GcScopeResult<()>
    {
        self.add_region(base, vec![0; len])
    }

    /// Overwrite bytes inside an existing region.
    ///
    /// ## Errors
    ///
    /// `InvalidArgument` if the range is not fully inside one region.
    pub fn write(&self, address: Address, bytes: &[u8]) -> GcScopeResult<()>
    {
        let mut regions = self.regions.write().unwrap_or_else(PoisonError::into_inner);
        let target = regions
            .range_mut(..=address.value())
            .next_back()
            .filter(|(start, data)| {
                let offset = address.value() - **start;
                offset + bytes.len() as u64 <= data.len() as u64
            });
        let Some((start, data)) = target else {
            return Err(GcScopeError::InvalidArgument(format!(
                "write of {} bytes at {address} is outside every region",
                bytes.len()
            )));
        };
        let offset = (address.value() - *start) as usize;
        data[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Write a pointer-sized little-endian value.
    pub fn write_pointer(&self, address: Address, value: Address) -> GcScopeResult<()>
    {
        let bytes = value.value().to_le_bytes();
        self.write(address, &bytes[..usize::from(self.pointer_size)])
    }

    /// Write a little-endian `u32`.
    pub fn write_u32(&self, address: Address, value: u32) -> GcScopeResult<()>
    {
        self.write(address, &value.to_le_bytes())
    }

    /// Drop a region that starts at `base`.
    pub fn unmap(&self, base: Address) -> bool
    {
        let mut regions = self.regions.write().unwrap_or_else(PoisonError::into_inner);
        regions.remove(&base.value()).is_some()
    }

    /// Invalidate the current generation.
    pub fn advance_revision(&self) -> Revision
    {
        Revision(self.revision.fetch_add(1, Ordering::AcqRel) + 1)
    }
}

impl MemorySource for SnapshotMemory
{
    fn pointer_size(&self) -> u8
    {
        self.pointer_size
    }

    fn read_bytes(&self, address: Address, buffer: &mut [u8]) -> usize
    {
        let regions = self.regions.read().unwrap_or_else(PoisonError::into_inner);
        let mut copied = 0;
        while copied < buffer.len() {
            let cursor = address.value() + copied as u64;
            let Some((&start, data)) = regions.range(..=cursor).next_back() else {
                break;
            };
            let offset = cursor - start;
            if offset >= data.len() as u64 {
                break;
            }
            let offset = offset as usize;
            let count = (data.len() - offset).min(buffer.len() - copied);
            buffer[copied..copied + count].copy_from_slice(&data[offset..offset + count]);
            copied += count;
        }
        copied
    }

    fn contains_address(&self, address: Address) -> bool
    {
        let regions = self.regions.read().unwrap_or_else(PoisonError::into_inner);
        regions
            .range(..=address.value())
            .next_back()
            .is_some_and(|(start, data)| address.value() - start < data.len() as u64)
    }

    fn current_revision(&self) -> Revision
    {
        Revision(self.revision.load(Ordering::Acquire))
    }

    fn is_static_snapshot(&self) -> bool
    {
        self.is_static
    }
}
