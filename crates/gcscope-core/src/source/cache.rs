//! Page-granular read cache in front of another memory source.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::trace;

use super::MemorySource;
use crate::revision::Revision;
use crate::types::Address;

/// Heap-local reader that keeps whole pages of the backing source
///
/// Heap walks read descriptor pointers from objects laid out back to back,
/// so most reads land on a page that was just fetched. Only pages that could
/// be read in full are cached; a partially readable page is served straight
/// from the backing source every time.
///
/// The cache empties itself when the backing source's revision changes.
pub struct PageCache
{
    inner: Arc<dyn MemorySource>,
    page_size: u64,
    revision: AtomicU64,
    pages: RwLock<HashMap<u64, Arc<[u8]>>>,
}

impl PageCache
{
    /// Cache pages of `page_size` bytes (a power of two) read from `inner`.
    pub fn new(inner: Arc<dyn MemorySource>, page_size: u64) -> Self
    {
        debug_assert!(page_size.is_power_of_two());
        let revision = inner.current_revision();
        Self {
            inner,
            page_size,
            revision: AtomicU64::new(revision.0),
            pages: RwLock::new(HashMap::new()),
        }
    }

    /// Number of resident pages.
    pub fn resident_pages(&self) -> usize
    {
        self.pages.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Drop every cached page.
    pub fn clear(&self)
    {
        self.pages.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn page_base(&self, address: u64) -> u64
    {
        address & !(self.page_size - 1)
    }

    fn sync_revision(&self)
    {
        let current = self.inner.current_revision().0;
        let seen = self.revision.swap(current, Ordering::AcqRel);
        if seen != current {
            trace!(from = seen, to = current, "revision changed, dropping cached pages");
            self.clear();
        }
    }

    fn page(&self, base: u64) -> Option<Arc<[u8]>>
    {
        if let Some(page) = self.pages.read().unwrap_or_else(PoisonError::into_inner).get(&base) {
            return Some(page.clone());
        }

        let mut bytes = vec![0u8; self.page_size as usize];
        if !self.inner.read_exact(Address::from(base), &mut bytes) {
            return None;
        }
        let page: Arc<[u8]> = bytes.into();
        self.pages
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(base, page.clone());
        Some(page)
    }
}

impl MemorySource for PageCache
{
    fn pointer_size(&self) -> u8
    {
        self.inner.pointer_size()
    }

    fn read_bytes(&self, address: Address, buffer: &mut [u8]) -> usize
    {
        self.sync_revision();

        let mut copied = 0;
        while copied < buffer.len() {
            let cursor = address.value() + copied as u64;
            let base = self.page_base(cursor);
            let Some(page) = self.page(base) else {
                return copied + self.inner.read_bytes(Address::from(cursor), &mut buffer[copied..]);
            };
            let offset = (cursor - base) as usize;
            let count = (page.len() - offset).min(buffer.len() - copied);
            buffer[copied..copied + count].copy_from_slice(&page[offset..offset + count]);
            copied += count;
        }
        copied
    }

    fn contains_address(&self, address: Address) -> bool
    {
        let base = self.page_base(address.value());
        self.pages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&base)
    }

    fn current_revision(&self) -> Revision
    {
        self.inner.current_revision()
    }

    fn is_static_snapshot(&self) -> bool
    {
        self.inner.is_static_snapshot()
    }
}
