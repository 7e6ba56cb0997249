//! Shared fixtures for the integration tests.
//!
//! `FakeRuntime` answers every runtime query from plain maps that a test
//! fills in before building a heap. Counters record how often the engine
//! went back to the runtime, so caching behaviour can be asserted.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use gcscope_core::error::{GcScopeError, GcScopeResult};
use gcscope_core::heap::{Heap, HeapBuilder};
use gcscope_core::module::{BinaryStore, MetadataImport, PrefetchRequest};
use gcscope_core::runtime::{
    AppDomainData, DomainModuleData, HandleData, MethodTableData, ModuleData, Runtime, SegmentData, StackSlot,
    StaticSlot, ThreadData,
};
use gcscope_core::source::SnapshotMemory;
use gcscope_core::types::{Address, DomainId};

pub const FREE_DESCRIPTOR: u64 = 0x9000;

/// Runtime backed by hand-written tables.
#[derive(Default)]
pub struct FakeRuntime
{
    pub method_tables: HashMap<Address, MethodTableData>,
    pub symbols: HashMap<Address, String>,
    pub free_descriptor: Address,
    pub modules: Vec<ModuleData>,
    pub domains: Vec<AppDomainData>,
    pub domain_modules: HashMap<DomainId, Vec<DomainModuleData>>,
    pub importers: HashMap<Address, Arc<dyn MetadataImport>>,
    pub threads: Vec<ThreadData>,
    pub stacks: HashMap<u64, Vec<StackSlot>>,
    pub statics: Vec<StaticSlot>,
    pub handles: Vec<HandleData>,
    pub finalizer: HashMap<DomainId, Vec<Address>>,
    pub segments: Vec<SegmentData>,
    /// Root sources that report `Unsupported`: "threads", "statics", "handles", "finalizer"
    pub unsupported: HashSet<&'static str>,
    pub method_table_calls: AtomicUsize,
    pub importer_calls: AtomicUsize,
    pub domain_module_calls: AtomicUsize,
    pub static_requests: Mutex<Vec<bool>>,
}

impl FakeRuntime
{
    pub fn new() -> Self
    {
        Self {
            free_descriptor: Address::from(FREE_DESCRIPTOR),
            ..Self::default()
        }
    }

    /// Register an ordinary type descriptor.
    pub fn class(&mut self, descriptor: u64, canonical: u64, base_size: u32)
    {
        self.method_tables.insert(
            Address::from(descriptor),
            MethodTableData {
                canonical_handle: Address::from(canonical),
                base_size,
                ..MethodTableData::default()
            },
        );
    }

    /// Register an array descriptor over `element`.
    pub fn array(&mut self, descriptor: u64, element: u64, component_size: u32)
    {
        self.method_tables.insert(
            Address::from(descriptor),
            MethodTableData {
                element_type_handle: Address::from(element),
                base_size: 24,
                component_size,
                ..MethodTableData::default()
            },
        );
    }

    pub fn symbol(&mut self, descriptor: u64, raw: &str)
    {
        self.symbols.insert(Address::from(descriptor), raw.to_string());
    }

    pub fn module(&mut self, base: u64, size: u64, file_name: &str)
    {
        self.modules.push(ModuleData {
            image_base: Address::from(base),
            size,
            file_name: file_name.to_string(),
            is_file_backed: true,
            ..ModuleData::default()
        });
    }

    pub fn domain(&mut self, id: u64, name: &str) -> DomainId
    {
        let id = DomainId(Address::from(id));
        self.domains.push(AppDomainData {
            id,
            name: name.to_string(),
        });
        id
    }

    /// Map the image at `image_base` into `domain` at `domain_module`.
    pub fn map_module(&mut self, domain: DomainId, image_base: u64, domain_module: u64)
    {
        self.domain_modules.entry(domain).or_default().push(DomainModuleData {
            image_base: Address::from(image_base),
            domain_module: Address::from(domain_module),
        });
    }

    fn check(&self, source: &'static str) -> GcScopeResult<()>
    {
        if self.unsupported.contains(source) {
            return Err(GcScopeError::Unsupported(source.to_string()));
        }
        Ok(())
    }
}

impl Runtime for FakeRuntime
{
    fn method_table_data(&self, descriptor: Address) -> Option<MethodTableData>
    {
        self.method_table_calls.fetch_add(1, Ordering::SeqCst);
        self.method_tables.get(&descriptor).copied()
    }

    fn free_type_descriptor(&self) -> Address
    {
        self.free_descriptor
    }

    fn descriptor_symbol(&self, descriptor: Address) -> Option<String>
    {
        self.symbols.get(&descriptor).cloned()
    }

    fn modules(&self) -> GcScopeResult<Vec<ModuleData>>
    {
        Ok(self.modules.clone())
    }

    fn app_domains(&self) -> GcScopeResult<Vec<AppDomainData>>
    {
        Ok(self.domains.clone())
    }

    fn domain_modules(&self, domain: DomainId) -> GcScopeResult<Vec<DomainModuleData>>
    {
        self.domain_module_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.domain_modules.get(&domain).cloned().unwrap_or_default())
    }

    fn construct_metadata_importer(&self, domain_module: Address) -> Option<Arc<dyn MetadataImport>>
    {
        self.importer_calls.fetch_add(1, Ordering::SeqCst);
        self.importers.get(&domain_module).cloned()
    }

    fn threads(&self) -> GcScopeResult<Vec<ThreadData>>
    {
        self.check("threads")?;
        Ok(self.threads.clone())
    }

    fn stack_roots(&self, thread: &ThreadData) -> GcScopeResult<Vec<StackSlot>>
    {
        Ok(self.stacks.get(&thread.os_id.raw()).cloned().unwrap_or_default())
    }

    fn static_roots(&self, include_statics: bool) -> GcScopeResult<Vec<StaticSlot>>
    {
        self.check("statics")?;
        self.static_requests.lock().unwrap().push(include_statics);
        Ok(if include_statics { self.statics.clone() } else { Vec::new() })
    }

    fn handles(&self) -> GcScopeResult<Vec<HandleData>>
    {
        self.check("handles")?;
        Ok(self.handles.clone())
    }

    fn finalizer_queue(&self, domain: DomainId) -> GcScopeResult<Vec<Address>>
    {
        self.check("finalizer")?;
        Ok(self.finalizer.get(&domain).cloned().unwrap_or_default())
    }

    fn heap_segments(&self) -> GcScopeResult<Vec<SegmentData>>
    {
        if self.segments.is_empty() {
            return Err(GcScopeError::Unsupported("segments".to_string()));
        }
        Ok(self.segments.clone())
    }
}

/// Importer that knows a fixed set of assembly attributes.
#[derive(Default)]
pub struct FakeImporter
{
    pub attributes: HashMap<String, Vec<u8>>,
}

impl MetadataImport for FakeImporter
{
    fn assembly_attribute(&self, type_name: &str) -> Option<Vec<u8>>
    {
        self.attributes.get(type_name).cloned()
    }
}

/// Binary store that records requests and forwards them to a channel.
pub struct RecordingStore
{
    pub sender: Mutex<std::sync::mpsc::Sender<PrefetchRequest>>,
}

impl BinaryStore for RecordingStore
{
    fn prefetch(&self, request: &PrefetchRequest) -> GcScopeResult<()>
    {
        let _ = self.sender.lock().unwrap().send(request.clone());
        Ok(())
    }
}

/// Memory with one zeroed heap region at `0x10_0000`.
pub fn heap_memory() -> Arc<SnapshotMemory>
{
    let memory = SnapshotMemory::new(8, true);
    memory.map(Address::from(0x10_0000), 0x1_0000).unwrap();
    Arc::new(memory)
}

/// Place an object with the given (possibly tagged) descriptor.
pub fn place(memory: &SnapshotMemory, object: u64, descriptor: u64)
{
    memory.write_pointer(Address::from(object), Address::from(descriptor)).unwrap();
}

pub fn build_heap(runtime: FakeRuntime, memory: &Arc<SnapshotMemory>) -> (Arc<FakeRuntime>, Heap)
{
    gcscope_utils::init_test_logging();
    let runtime = Arc::new(runtime);
    let heap = HeapBuilder::new(runtime.clone(), memory.clone()).build().unwrap();
    (runtime, heap)
}

/// Minimal PE32+ header: DOS header, NT signature, file header and an
/// optional header with sixteen empty data directories.
pub fn pe64_header(time_date_stamp: u32, size_of_image: u32) -> Vec<u8>
{
    let mut bytes = vec![0u8; 0x200];
    bytes[0..2].copy_from_slice(b"MZ");
    bytes[0x3c..0x40].copy_from_slice(&0x40u32.to_le_bytes());
    bytes[0x40..0x44].copy_from_slice(b"PE\0\0");

    let file_header = 0x44;
    bytes[file_header..file_header + 2].copy_from_slice(&0x8664u16.to_le_bytes());
    bytes[file_header + 4..file_header + 8].copy_from_slice(&time_date_stamp.to_le_bytes());
    bytes[file_header + 16..file_header + 18].copy_from_slice(&0xf0u16.to_le_bytes());
    bytes[file_header + 18..file_header + 20].copy_from_slice(&0x2022u16.to_le_bytes());

    let optional = file_header + 20;
    bytes[optional..optional + 2].copy_from_slice(&0x20bu16.to_le_bytes());
    bytes[optional + 56..optional + 60].copy_from_slice(&size_of_image.to_le_bytes());
    bytes[optional + 108..optional + 112].copy_from_slice(&16u32.to_le_bytes());
    bytes
}
