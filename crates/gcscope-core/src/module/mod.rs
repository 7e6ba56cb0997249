//! # Modules
//!
//! One [`Module`] per loaded image, plus the [`ModuleIndex`] that maps
//! addresses back to them.
//!
//! A module is either a [`LoadedModule`] built from the runtime's module
//! record, or an [`ErrorModule`] standing in for a record that could not be
//! turned into one. Both answer the same questions (name, identity, address
//! range, metadata import); an error module simply has no range and no
//! metadata.
//!
//! ## Metadata acquisition
//!
//! How a module obtains its metadata is decided once, when it is built, and
//! stored as a [`MetadataStrategy`]:
//!
//! - **Lazy**: live process, or no metadata region; the importer is built on
//!   first use
//! - **Eager**: dump with the metadata region captured; the blob is copied
//!   out at construction
//! - **Prefetch**: dump without the metadata region; the backing binary is
//!   queued for a background download (see [`prefetch`]) and the importer
//!   is still built lazily

pub mod header;
pub mod index;
pub mod metadata;
pub mod prefetch;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use once_cell::sync::OnceCell;
use smallvec::SmallVec;
use tracing::{debug, warn};

pub use header::ImageHeader;
pub use index::ModuleIndex;
pub use metadata::{parse_debuggable_attribute, DebuggingModes, MetadataImport, DEBUGGABLE_ATTRIBUTE};
pub use prefetch::{BinaryStore, PrefetchRequest, Prefetcher};

use crate::config::file_stem;
use crate::revision::{Revision, RevisionGuard};
use crate::runtime::ModuleData;
use crate::source::MemorySource;
use crate::types::{Address, DomainId, ModuleId};

/// Display name of every error module.
pub const ERROR_MODULE_NAME: &str = "<error>";

/// Largest metadata blob copied out eagerly.
const MAX_EAGER_METADATA: u64 = 256 * 1024 * 1024;

/// How a module obtains its metadata; chosen once at construction.
#[derive(Clone)]
pub enum MetadataStrategy
{
    /// Build the importer on first use
    Lazy,
    /// Metadata blob copied from the snapshot at construction
    Eager(Arc<[u8]>),
    /// Metadata missing from the snapshot; the binary was queued for download
    Prefetch,
}

impl MetadataStrategy
{
    /// Pick a strategy for a module described by `data`.
    fn select(data: &ModuleData, source: &dyn MemorySource) -> Self
    {
        if data.metadata_address.is_null() || data.metadata_length == 0 || !source.is_static_snapshot() {
            return MetadataStrategy::Lazy;
        }
        if data.metadata_length > MAX_EAGER_METADATA {
            warn!(
                module = %data.file_name,
                length = data.metadata_length,
                "metadata region too large to copy, deferring"
            );
            return MetadataStrategy::Lazy;
        }

        let mut blob = vec![0u8; data.metadata_length as usize];
        if source.read_exact(data.metadata_address, &mut blob) {
            MetadataStrategy::Eager(blob.into())
        } else {
            MetadataStrategy::Prefetch
        }
    }

    pub fn name(&self) -> &'static str
    {
        match self {
            MetadataStrategy::Lazy => "lazy",
            MetadataStrategy::Eager(_) => "eager",
            MetadataStrategy::Prefetch => "prefetch",
        }
    }
}

impl fmt::Debug for MetadataStrategy
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            MetadataStrategy::Eager(blob) => write!(f, "Eager({} bytes)", blob.len()),
            other => f.write_str(other.name()),
        }
    }
}

/// An image the runtime reported as loaded.
pub struct LoadedModule
{
    base: Address,
    size: AtomicU64,
    file_name: String,
    is_file_backed: bool,
    is_dynamic: bool,
    metadata_address: Address,
    metadata_length: u64,
    strategy: MetadataStrategy,
    guard: RevisionGuard,
    domains: RwLock<SmallVec<[(DomainId, Address); 2]>>,
    importer: OnceCell<Arc<dyn MetadataImport>>,
    debugging_modes: OnceCell<DebuggingModes>,
}

impl LoadedModule
{
    /// Build a module from the runtime's record.
    ///
    /// Stamps the module with the source's current revision and selects its
    /// metadata strategy. A zero size is corrected from the image header when
    /// the header is readable. In the prefetch case the backing binary is
    /// queued on `prefetcher` (file-backed, non-dynamic images only); the
    /// call returns without waiting for it.
    pub fn new(data: ModuleData, source: &dyn MemorySource, prefetcher: Option<&Prefetcher>) -> Self
    {
        let guard = RevisionGuard::stamp(source.current_revision());
        let strategy = MetadataStrategy::select(&data, source);

        let prefetcher = prefetcher.filter(|_| {
            matches!(strategy, MetadataStrategy::Prefetch) && data.is_file_backed && !data.is_dynamic
        });
        let header = if data.size == 0 || prefetcher.is_some() {
            ImageHeader::probe(source, data.image_base)
        } else {
            None
        };

        let size = match (data.size, header) {
            (0, Some(header)) => {
                debug!(module = %data.file_name, size = header.size_of_image, "image size taken from header");
                u64::from(header.size_of_image)
            }
            (size, _) => size,
        };

        if let Some(prefetcher) = prefetcher {
            match header {
                Some(header) => prefetcher.enqueue(PrefetchRequest {
                    file_name: file_name_only(&data.file_name).to_string(),
                    time_date_stamp: header.time_date_stamp,
                    image_size: header.size_of_image,
                }),
                None => debug!(module = %data.file_name, "image header not captured, cannot prefetch"),
            }
        }

        debug!(
            module = %data.file_name,
            base = %data.image_base,
            size,
            strategy = strategy.name(),
            "constructed module"
        );

        Self {
            base: data.image_base,
            size: AtomicU64::new(size),
            file_name: data.file_name,
            is_file_backed: data.is_file_backed,
            is_dynamic: data.is_dynamic,
            metadata_address: data.metadata_address,
            metadata_length: data.metadata_length,
            strategy,
            guard,
            domains: RwLock::new(SmallVec::new()),
            importer: OnceCell::new(),
            debugging_modes: OnceCell::new(),
        }
    }

    pub fn base(&self) -> Address
    {
        self.base
    }

    pub fn size(&self) -> u64
    {
        self.size.load(Ordering::Acquire)
    }

    /// One past the last byte of the image.
    pub fn end(&self) -> Address
    {
        self.base.saturating_add(self.size())
    }

    /// Path or name the runtime reported for the image.
    pub fn file_name(&self) -> &str
    {
        &self.file_name
    }

    pub fn is_file_backed(&self) -> bool
    {
        self.is_file_backed
    }

    pub fn is_dynamic(&self) -> bool
    {
        self.is_dynamic
    }

    /// Location of the embedded metadata blob as `(address, length)`.
    pub fn metadata_region(&self) -> (Address, u64)
    {
        (self.metadata_address, self.metadata_length)
    }

    pub fn metadata_strategy(&self) -> &MetadataStrategy
    {
        &self.strategy
    }

    /// The metadata blob, if it was copied eagerly.
    pub fn metadata_blob(&self) -> Option<&[u8]>
    {
        match &self.strategy {
            MetadataStrategy::Eager(blob) => Some(blob.as_ref()),
            _ => None,
        }
    }

    pub fn revision(&self) -> Revision
    {
        self.guard.revision()
    }

    pub(crate) fn guard(&self) -> &RevisionGuard
    {
        &self.guard
    }

    pub fn contains(&self, address: Address) -> bool
    {
        address >= self.base && address < self.end()
    }

    pub(crate) fn set_size(&self, size: u64)
    {
        self.size.store(size, Ordering::Release);
    }

    /// Record that `domain` loaded this image's module record at `address`.
    ///
    /// A second mapping for the same domain replaces the first.
    pub(crate) fn add_domain_mapping(&self, domain: DomainId, address: Address)
    {
        let mut domains = self.domains.write().unwrap_or_else(PoisonError::into_inner);
        match domains.iter_mut().find(|(existing, _)| *existing == domain) {
            Some(entry) => entry.1 = address,
            None => domains.push((domain, address)),
        }
    }

    /// Domain-specific load address recorded so far.
    ///
    /// With `domain == None` the answer comes from whichever mapping is found
    /// first. Which one that is for an image loaded into several domains is
    /// unspecified; pass a domain when it matters.
    pub(crate) fn domain_address(&self, domain: Option<DomainId>) -> Option<Address>
    {
        let domains = self.domains.read().unwrap_or_else(PoisonError::into_inner);
        match domain {
            Some(domain) => domains.iter().find(|(id, _)| *id == domain).map(|(_, address)| *address),
            None => domains.first().map(|(_, address)| *address),
        }
    }

    /// Domains this module has been mapped into.
    pub fn domains(&self) -> Vec<DomainId>
    {
        let domains = self.domains.read().unwrap_or_else(PoisonError::into_inner);
        domains.iter().map(|(id, _)| *id).collect()
    }

    pub(crate) fn importer_cell(&self) -> &OnceCell<Arc<dyn MetadataImport>>
    {
        &self.importer
    }

    pub(crate) fn debugging_modes_cell(&self) -> &OnceCell<DebuggingModes>
    {
        &self.debugging_modes
    }
}

impl fmt::Debug for LoadedModule
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("LoadedModule")
            .field("file_name", &self.file_name)
            .field("base", &self.base)
            .field("size", &self.size())
            .field("strategy", &self.strategy)
            .field("revision", &self.revision())
            .finish_non_exhaustive()
    }
}

/// Stand-in for a module record that could not be constructed.
#[derive(Debug, Clone)]
pub struct ErrorModule
{
    id: ModuleId,
    /// Base the runtime reported, if any
    base: Address,
    reason: String,
}

impl ErrorModule
{
    pub fn new(id: ModuleId, base: Address, reason: impl Into<String>) -> Self
    {
        Self {
            id,
            base,
            reason: reason.into(),
        }
    }

    /// Why construction failed.
    pub fn reason(&self) -> &str
    {
        &self.reason
    }

    /// Base address from the failed record (may be null).
    pub fn reported_base(&self) -> Address
    {
        self.base
    }
}

/// A loaded image, or the error placeholder for one
#[derive(Debug)]
pub enum Module
{
    Loaded(LoadedModule),
    Error(ErrorModule),
}

impl Module
{
    pub fn id(&self) -> ModuleId
    {
        match self {
            Module::Loaded(module) => ModuleId::from_base(module.base),
            Module::Error(module) => module.id,
        }
    }

    /// Short display name: the file name without directories.
    pub fn name(&self) -> &str
    {
        match self {
            Module::Loaded(module) => file_name_only(&module.file_name),
            Module::Error(_) => ERROR_MODULE_NAME,
        }
    }

    /// File name without directories or extension.
    pub fn stem(&self) -> &str
    {
        file_stem(self.name())
    }

    /// Base address; null for error modules.
    pub fn base(&self) -> Address
    {
        match self {
            Module::Loaded(module) => module.base,
            Module::Error(_) => Address::ZERO,
        }
    }

    /// Image size; zero for error modules.
    pub fn size(&self) -> u64
    {
        match self {
            Module::Loaded(module) => module.size(),
            Module::Error(_) => 0,
        }
    }

    pub fn contains(&self, address: Address) -> bool
    {
        match self {
            Module::Loaded(module) => module.contains(address),
            Module::Error(_) => false,
        }
    }

    pub fn is_error(&self) -> bool
    {
        matches!(self, Module::Error(_))
    }

    /// Domains this module has been mapped into, in discovery order.
    ///
    /// Only populated once the owning index has walked the app-domains.
    pub fn domains(&self) -> Vec<DomainId>
    {
        self.as_loaded().map(LoadedModule::domains).unwrap_or_default()
    }

    pub fn as_loaded(&self) -> Option<&LoadedModule>
    {
        match self {
            Module::Loaded(module) => Some(module),
            Module::Error(_) => None,
        }
    }
}

impl fmt::Display for Module
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Module::Loaded(module) => write!(f, "{} [{}, {})", self.name(), module.base, module.end()),
            Module::Error(module) => write!(f, "{ERROR_MODULE_NAME} ({})", module.reason),
        }
    }
}

fn file_name_only(path: &str) -> &str
{
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}
