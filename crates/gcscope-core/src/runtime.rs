//! # Runtime Collaborator
//!
//! The engine reads the target's raw memory through a
//! [`MemorySource`](crate::source::MemorySource), but the runtime-internal
//! structures it needs (method tables, module lists, domain tables, thread
//! stacks, handle tables) are decoded by a [`Runtime`] implementation. That
//! split keeps version-specific layout knowledge out of the heap and the
//! module index.
//!
//! The record types in this module are what a `Runtime` hands back: plain
//! data, no references into the engine.

use std::sync::Arc;

use crate::error::{GcScopeError, GcScopeResult};
use crate::module::MetadataImport;
use crate::types::{Address, DomainId, ThreadId};

/// Structural data read from a type descriptor (method table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MethodTableData
{
    /// Descriptor of the element type; non-zero only for arrays
    pub element_type_handle: Address,
    /// Descriptor the runtime treats as the real identity of this type
    pub canonical_handle: Address,
    /// Size of an instance (for arrays: the size with zero elements)
    pub base_size: u32,
    /// Size of one array element, zero for non-arrays
    pub component_size: u32,
    /// Whether the type is a boxed primitive value
    pub is_primitive: bool,
}

/// One loaded image as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModuleData
{
    /// Base address of the image in the target
    pub image_base: Address,
    /// Image size; zero if the runtime does not know it
    pub size: u64,
    /// On-disk path (or name) of the image
    pub file_name: String,
    /// Image is mapped from a file (as opposed to loaded from a byte array)
    pub is_file_backed: bool,
    /// Image was generated at run time (reflection emit)
    pub is_dynamic: bool,
    /// Address of the embedded metadata blob
    pub metadata_address: Address,
    /// Length of the embedded metadata blob
    pub metadata_length: u64,
}

/// One app-domain, in the runtime's enumeration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppDomainData
{
    pub id: DomainId,
    pub name: String,
}

/// A module instantiation inside one domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainModuleData
{
    /// Base address of the image this instantiation belongs to
    pub image_base: Address,
    /// Address of the domain-specific module record
    pub domain_module: Address,
}

/// A managed thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadData
{
    /// Address of the runtime's thread record
    pub address: Address,
    pub os_id: ThreadId,
    /// Domain the thread is currently executing in, if known
    pub domain: Option<DomainId>,
}

/// A live reference found while scanning a thread's stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackSlot
{
    /// Stack (or register spill) location holding the reference
    pub address: Address,
    /// Object the slot refers to
    pub object: Address,
    /// Name of the frame the slot belongs to, if it could be determined
    pub frame: Option<String>,
}

/// A static field holding an object reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticSlot
{
    pub address: Address,
    pub object: Address,
    pub domain: Option<DomainId>,
    /// Declaring type name
    pub type_name: String,
    pub field_name: String,
}

/// Handle flavours the runtime keeps in its handle table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind
{
    Strong,
    Pinned,
    AsyncPinned,
    WeakShort,
    WeakLong,
    RefCounted,
    Dependent,
}

impl HandleKind
{
    /// Short label used in root descriptions.
    pub const fn label(self) -> &'static str
    {
        match self {
            HandleKind::Strong => "strong",
            HandleKind::Pinned => "pinned",
            HandleKind::AsyncPinned => "async pinned",
            HandleKind::WeakShort => "weak short",
            HandleKind::WeakLong => "weak long",
            HandleKind::RefCounted => "ref counted",
            HandleKind::Dependent => "dependent",
        }
    }
}

/// One entry of the handle table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleData
{
    /// Address of the handle itself
    pub address: Address,
    pub object: Address,
    pub kind: HandleKind,
    pub domain: Option<DomainId>,
}

/// Generation a heap segment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentKind
{
    Ephemeral,
    Generation2,
    Large,
    Pinned,
}

/// Address range of one GC heap segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentData
{
    /// First object in the segment
    pub start: Address,
    /// End of allocated memory (exclusive)
    pub end: Address,
    pub kind: SegmentKind,
}

/// Decoder for the target runtime's internal structures
///
/// Methods that can be unavailable on a degraded backend return
/// `GcScopeError::Unsupported`; lookups that simply miss return `None`.
pub trait Runtime: Send + Sync
{
    /// Structural data of the descriptor at `descriptor`, if readable.
    fn method_table_data(&self, descriptor: Address) -> Option<MethodTableData>;

    /// Descriptor of the runtime's free-space marker type.
    fn free_type_descriptor(&self) -> Address;

    /// Raw symbol attached to a descriptor, if symbols are available.
    ///
    /// The heap derives display names from this; see
    /// [`derive_type_name`](crate::heap::derive_type_name).
    fn descriptor_symbol(&self, _descriptor: Address) -> Option<String>
    {
        None
    }

    /// Every loaded image.
    fn modules(&self) -> GcScopeResult<Vec<ModuleData>>;

    /// App-domains in enumeration order; the first is the primary domain.
    fn app_domains(&self) -> GcScopeResult<Vec<AppDomainData>>;

    /// Modules instantiated in `domain`.
    fn domain_modules(&self, domain: DomainId) -> GcScopeResult<Vec<DomainModuleData>>;

    /// Build a metadata importer for the module record at `domain_module`.
    fn construct_metadata_importer(&self, domain_module: Address) -> Option<Arc<dyn MetadataImport>>;

    /// Managed threads.
    fn threads(&self) -> GcScopeResult<Vec<ThreadData>>;

    /// Live references on `thread`'s stack.
    fn stack_roots(&self, thread: &ThreadData) -> GcScopeResult<Vec<StackSlot>>;

    /// Static reference fields across all loaded types.
    ///
    /// Returns nothing when `include_statics` is false.
    fn static_roots(&self, include_statics: bool) -> GcScopeResult<Vec<StaticSlot>>;

    /// The handle table.
    fn handles(&self) -> GcScopeResult<Vec<HandleData>>;

    /// Objects waiting for finalization in `domain`.
    fn finalizer_queue(&self, domain: DomainId) -> GcScopeResult<Vec<Address>>;

    /// GC heap segments.
    fn heap_segments(&self) -> GcScopeResult<Vec<SegmentData>>
    {
        Err(GcScopeError::Unsupported("heap segment enumeration".to_string()))
    }
}
