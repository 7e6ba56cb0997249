//! # Heap
//!
//! One generation's view of the GC heap: resolves object addresses to
//! [`GcType`]s, walks segments, and enumerates roots.
//!
//! ## Type resolution
//!
//! The first pointer-sized slot of every object is its type descriptor,
//! possibly carrying flag bits in its low two bits. Resolution masks those
//! off and maps the descriptor to a type:
//!
//! 1. A one-slot `(object, type)` cache answers repeated queries for the same
//!    object (sequential heap walks ask about each object several times)
//! 2. The alias map answers descriptors seen before
//! 3. Otherwise the runtime is asked for the descriptor's structural data
//!    and a type is built under its canonical descriptor
//!
//! Generic instantiations and thunked descriptors report a shared canonical
//! handle; they all land on the type built for that handle. Arrays are keyed
//! by their element descriptor and instance layout.
//!
//! Every type is attributed to a module. When no module contains either the
//! descriptor or its canonical handle, the runtime's core module takes it;
//! failing that, a heap-owned error module does.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use gcscope_core::heap::HeapBuilder;
//! use gcscope_core::runtime::Runtime;
//! use gcscope_core::source::MemorySource;
//! use gcscope_core::types::Address;
//!
//! # fn demo(runtime: Arc<dyn Runtime>, source: Arc<dyn MemorySource>) -> gcscope_core::error::GcScopeResult<()> {
//! let heap = HeapBuilder::new(runtime, source).build()?;
//! if let Some(ty) = heap.resolve_object_type(Address::from(0x7f00_0010)) {
//!     println!("{} ({})", ty.name(), ty.index());
//! }
//! # Ok(())
//! # }
//! ```

pub mod name;
pub mod segments;
pub mod types;

mod table;

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use tracing::{debug, trace};

pub use name::{derive_type_name, ARRAY_SUFFIX};
pub use segments::ObjectWalker;
pub use types::{ElementKind, GcType, SizeStrategy};

use crate::config::HeapConfig;
use crate::error::GcScopeResult;
use crate::module::{DebuggingModes, MetadataImport, Module, ModuleIndex, Prefetcher};
use crate::revision::{Revision, RevisionGuard};
use crate::roots::RootEnumerator;
use crate::runtime::{MethodTableData, Runtime, SegmentData};
use crate::source::{MemorySource, PageCache};
use crate::types::Address;
use table::TypeTable;

/// Display name of the free-space marker type.
pub const FREE_TYPE_NAME: &str = "Free";

/// Array nesting deeper than this is treated as unresolvable.
const MAX_ELEMENT_DEPTH: usize = 32;

/// Builder for a [`Heap`].
pub struct HeapBuilder
{
    runtime: Arc<dyn Runtime>,
    source: Arc<dyn MemorySource>,
    config: HeapConfig,
    prefetcher: Option<Arc<Prefetcher>>,
}

impl HeapBuilder
{
    /// Start a heap over `source`, decoded by `runtime`, with default config.
    pub fn new(runtime: Arc<dyn Runtime>, source: Arc<dyn MemorySource>) -> Self
    {
        Self {
            runtime,
            source,
            config: HeapConfig::default(),
            prefetcher: None,
        }
    }

    #[must_use]
    pub fn config(mut self, config: HeapConfig) -> Self
    {
        self.config = config;
        self
    }

    /// Queue for binaries missing from a dump. Without one, no prefetch is
    /// ever scheduled.
    #[must_use]
    pub fn prefetcher(mut self, prefetcher: Arc<Prefetcher>) -> Self
    {
        self.prefetcher = Some(prefetcher);
        self
    }

    /// Index the runtime's modules and register the free-space type.
    ///
    /// ## Errors
    ///
    /// `InvalidArgument` for an unusable configuration; otherwise propagates
    /// the runtime's failure to enumerate modules.
    pub fn build(self) -> GcScopeResult<Heap>
    {
        self.config.validate()?;
        let modules = ModuleIndex::build(
            self.runtime.clone(),
            self.source.clone(),
            &self.config,
            self.prefetcher.as_deref(),
        )?;
        let fallback_module = modules.error_module(Address::ZERO, "type outside every known module");

        let mut table = TypeTable::default();
        let free_type = register_free_type(
            &mut table,
            self.runtime.as_ref(),
            self.source.as_ref(),
            &self.config,
            &modules,
            &fallback_module,
        );

        let heap = Heap {
            guard: RevisionGuard::stamp(self.source.current_revision()),
            local: PageCache::new(self.source.clone(), self.config.page_size),
            runtime: self.runtime,
            source: self.source,
            config: self.config,
            modules: Arc::new(modules),
            fallback_module,
            free_type,
            table: RwLock::new(table),
            last: Mutex::new(None),
            _prefetcher: self.prefetcher,
        };

        debug!(
            modules = heap.modules.len(),
            revision = %heap.revision(),
            "built heap"
        );
        Ok(heap)
    }
}

impl fmt::Debug for HeapBuilder
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("HeapBuilder")
            .field("config", &self.config)
            .field("prefetcher", &self.prefetcher.is_some())
            .finish_non_exhaustive()
    }
}

/// One generation's object-graph view
///
/// ## Thread Safety
///
/// Resolution looks read-only but appends to the type table and the alias
/// maps on a miss. Those sit behind a reader-writer lock, so a heap can be
/// shared between threads; concurrent misses on the same descriptor still
/// produce a single type.
pub struct Heap
{
    runtime: Arc<dyn Runtime>,
    source: Arc<dyn MemorySource>,
    local: PageCache,
    config: HeapConfig,
    guard: RevisionGuard,
    modules: Arc<ModuleIndex>,
    fallback_module: Arc<Module>,
    free_type: Arc<GcType>,
    table: RwLock<TypeTable>,
    last: Mutex<Option<(Address, Arc<GcType>)>>,
    _prefetcher: Option<Arc<Prefetcher>>,
}

impl Heap
{
    /// Type of the object at `object`.
    ///
    /// Returns `None` if the descriptor pointer cannot be read or the runtime
    /// has no data for the descriptor. Partially captured heaps make this a
    /// normal outcome.
    pub fn resolve_object_type(&self, object: Address) -> Option<Arc<GcType>>
    {
        if object.is_null() {
            return None;
        }
        if let Some((cached, ty)) = self.last.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            if *cached == object {
                return Some(ty.clone());
            }
        }

        let Some(raw) = self.local.read_pointer(object).or_else(|| self.source.read_pointer(object)) else {
            trace!(object = %object, "descriptor pointer unreadable");
            return None;
        };
        let ty = self.resolve_descriptor(raw)?;

        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some((object, ty.clone()));
        Some(ty)
    }

    /// Type for a raw (possibly tagged) descriptor address.
    pub fn resolve_descriptor(&self, descriptor: Address) -> Option<Arc<GcType>>
    {
        self.resolve_at_depth(descriptor, 0)
    }

    /// Type at `index`; `None` only for `index >= type_count()`.
    pub fn get_type_by_index(&self, index: usize) -> Option<Arc<GcType>>
    {
        self.table().get(index)
    }

    pub fn type_count(&self) -> usize
    {
        self.table().len()
    }

    /// The free-space marker type, registered when the heap was built.
    pub fn free_type(&self) -> Arc<GcType>
    {
        self.free_type.clone()
    }

    /// Element type of an array type.
    pub fn element_type(&self, ty: &GcType) -> Option<Arc<GcType>>
    {
        ty.element_index().and_then(|index| self.get_type_by_index(index.get()))
    }

    /// Forget the one-slot resolution cache and the local page cache.
    pub fn clear_locality_cache(&self)
    {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.local.clear();
    }

    /// Size of the object at `object`, which must be of type `ty`.
    pub fn object_size(&self, object: Address, ty: &GcType) -> Option<u64>
    {
        ty.size_strategy().object_size(&self.local, object)
    }

    /// GC heap segments as reported by the runtime.
    ///
    /// ## Errors
    ///
    /// `Unsupported` if the backend cannot enumerate segments.
    pub fn segments(&self) -> GcScopeResult<Vec<SegmentData>>
    {
        self.runtime.heap_segments()
    }

    /// Walk the objects of `segment` in address order.
    pub fn objects(&self, segment: &SegmentData) -> ObjectWalker<'_>
    {
        ObjectWalker::new(self, segment)
    }

    /// Lazily enumerate GC roots: stack, then statics (if
    /// `include_statics`), then handles, then the finalizer queue.
    pub fn enumerate_roots(&self, include_statics: bool) -> RootEnumerator<'_>
    {
        RootEnumerator::new(self, include_statics)
    }

    pub fn modules(&self) -> &Arc<ModuleIndex>
    {
        &self.modules
    }

    pub fn find_module_containing(&self, address: Address) -> Option<Arc<Module>>
    {
        self.modules.find_module_containing(address)
    }

    /// See [`ModuleIndex::metadata_importer`].
    ///
    /// ## Errors
    ///
    /// `StaleRevision` if `module` belongs to an older generation.
    pub fn metadata_importer(&self, module: &Module) -> GcScopeResult<Option<Arc<dyn MetadataImport>>>
    {
        self.modules.metadata_importer(module)
    }

    /// See [`ModuleIndex::debugging_modes`].
    ///
    /// ## Errors
    ///
    /// `StaleRevision` if `module` belongs to an older generation.
    pub fn debugging_modes(&self, module: &Module) -> GcScopeResult<DebuggingModes>
    {
        self.modules.debugging_modes(module)
    }

    pub fn config(&self) -> &HeapConfig
    {
        &self.config
    }

    pub fn runtime(&self) -> &Arc<dyn Runtime>
    {
        &self.runtime
    }

    pub fn source(&self) -> &Arc<dyn MemorySource>
    {
        &self.source
    }

    /// Revision the heap was built against.
    pub fn revision(&self) -> Revision
    {
        self.guard.revision()
    }

    /// Whether the memory source is still at the heap's revision.
    pub fn is_current(&self) -> bool
    {
        self.guard.is_current(self.source.current_revision())
    }

    fn table(&self) -> RwLockReadGuard<'_, TypeTable>
    {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn table_mut(&self) -> RwLockWriteGuard<'_, TypeTable>
    {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn resolve_at_depth(&self, raw: Address, depth: usize) -> Option<Arc<GcType>>
    {
        let descriptor = raw.masked(self.config.tag_mask);
        if descriptor.is_null() {
            return None;
        }
        let known = self.table().lookup(descriptor);
        if known.is_some() {
            return known;
        }
        if depth > MAX_ELEMENT_DEPTH {
            debug!(descriptor = %descriptor, "array nesting too deep");
            return None;
        }

        let Some(data) = self.runtime.method_table_data(descriptor) else {
            trace!(descriptor = %descriptor, "no method table data");
            return None;
        };
        if data.element_type_handle.is_null() {
            Some(self.construct_type(descriptor, &data))
        } else {
            Some(self.construct_array(descriptor, &data, depth))
        }
    }

    fn construct_type(&self, descriptor: Address, data: &MethodTableData) -> Arc<GcType>
    {
        let canonical = data.canonical_handle.masked(self.config.tag_mask);
        if !canonical.is_null() && canonical != descriptor {
            let existing = self.table().lookup(canonical);
            if let Some(ty) = existing {
                trace!(descriptor = %descriptor, canonical = %canonical, "linking alias to canonical type");
                self.table_mut().alias(descriptor, ty.index());
                return ty;
            }
        }

        let primary = if canonical.is_null() { descriptor } else { canonical };
        let module = self.attribute_module(primary, descriptor);
        let name = self.display_name(primary, descriptor, false);
        let kind = if data.is_primitive { ElementKind::BoxedPrimitive } else { ElementKind::Ordinary };
        let size = SizeStrategy::from_data(data);

        let mut table = self.table_mut();
        // Another thread may have built it between the lookups above and here.
        if let Some(ty) = table.lookup(primary) {
            table.alias(descriptor, ty.index());
            return ty;
        }
        let ty = table.push(|index| GcType {
            index,
            descriptor: primary,
            module,
            name,
            kind,
            size,
        });
        table.alias(primary, ty.index());
        table.alias(descriptor, ty.index());
        debug!(index = %ty.index(), descriptor = %primary, name = ty.name(), "constructed type");
        ty
    }

    fn construct_array(&self, descriptor: Address, data: &MethodTableData, depth: usize) -> Arc<GcType>
    {
        let element_handle = data.element_type_handle.masked(self.config.tag_mask);
        let size = SizeStrategy::from_data(data);
        let existing = self.table().lookup_array(element_handle, size);
        if let Some(ty) = existing {
            self.table_mut().alias(descriptor, ty.index());
            return ty;
        }

        let element = self.resolve_at_depth(element_handle, depth + 1);
        let name = match &element {
            Some(element) => format!("{}{ARRAY_SUFFIX}", element.name()),
            None => self.display_name(descriptor, element_handle, true),
        };
        let module = self.attribute_module(descriptor, element_handle);

        let mut table = self.table_mut();
        if let Some(ty) = table.lookup_array(element_handle, size) {
            table.alias(descriptor, ty.index());
            return ty;
        }
        let ty = table.push(|index| GcType {
            index,
            descriptor,
            module,
            name,
            kind: ElementKind::Array {
                element: element.map(|element| element.index()),
            },
            size,
        });
        table.alias(descriptor, ty.index());
        table.alias_array(element_handle, size, ty.index());
        debug!(index = %ty.index(), descriptor = %descriptor, name = ty.name(), "constructed array type");
        ty
    }

    fn attribute_module(&self, primary: Address, secondary: Address) -> Weak<Module>
    {
        attribute_module(&self.modules, &self.config, &self.fallback_module, primary, secondary)
    }

    fn display_name(&self, primary: Address, secondary: Address, is_array: bool) -> String
    {
        let symbol = self
            .runtime
            .descriptor_symbol(primary)
            .or_else(|| self.runtime.descriptor_symbol(secondary));
        match symbol {
            Some(raw) => derive_type_name(&raw, is_array),
            None => derive_type_name(&format!("<unknown type {primary}>"), is_array),
        }
    }
}

/// Owning module: whoever contains `primary`, else `secondary`, else the
/// runtime core module, else `fallback`.
fn attribute_module(
    modules: &ModuleIndex,
    config: &HeapConfig,
    fallback: &Arc<Module>,
    primary: Address,
    secondary: Address,
) -> Weak<Module>
{
    let module = modules
        .find_module_containing(primary)
        .or_else(|| modules.find_module_containing(secondary))
        .or_else(|| modules.find_core_module(config))
        .unwrap_or_else(|| fallback.clone());
    Arc::downgrade(&module)
}

/// Build the free-space marker type at index 0.
///
/// Segment walks meet free blocks before any object has been resolved, so
/// this type cannot wait for a lazy miss.
fn register_free_type(
    table: &mut TypeTable,
    runtime: &dyn Runtime,
    source: &dyn MemorySource,
    config: &HeapConfig,
    modules: &ModuleIndex,
    fallback: &Arc<Module>,
) -> Arc<GcType>
{
    let descriptor = runtime.free_type_descriptor().masked(config.tag_mask);
    let size = match runtime.method_table_data(descriptor) {
        Some(data) => SizeStrategy::from_data(&data),
        None => SizeStrategy::PerElement {
            base: 3 * u64::from(source.pointer_size()),
            component: 1,
        },
    };
    let module = attribute_module(modules, config, fallback, descriptor, descriptor);

    let ty = table.push(|index| GcType {
        index,
        descriptor,
        module,
        name: FREE_TYPE_NAME.to_string(),
        kind: ElementKind::Free,
        size,
    });
    if !descriptor.is_null() {
        table.alias(descriptor, ty.index());
    }
    trace!(descriptor = %descriptor, "registered free type");
    ty
}

impl fmt::Debug for Heap
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("Heap")
            .field("revision", &self.revision())
            .field("types", &self.type_count())
            .field("modules", &self.modules.len())
            .finish_non_exhaustive()
    }
}
