//! Tests for the module index and metadata arbitration

mod common;

use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{pe64_header, FakeImporter, FakeRuntime, RecordingStore};
use gcscope_core::config::HeapConfig;
use gcscope_core::error::GcScopeError;
use gcscope_core::module::{
    DebuggingModes, MetadataStrategy, Module, ModuleIndex, PrefetchRequest, Prefetcher, DEBUGGABLE_ATTRIBUTE,
    ERROR_MODULE_NAME,
};
use gcscope_core::runtime::ModuleData;
use gcscope_core::source::SnapshotMemory;
use gcscope_core::types::Address;

fn build_index(runtime: FakeRuntime, memory: SnapshotMemory) -> (Arc<FakeRuntime>, Arc<SnapshotMemory>, ModuleIndex)
{
    gcscope_utils::init_test_logging();
    let runtime = Arc::new(runtime);
    let memory = Arc::new(memory);
    let index = ModuleIndex::build(runtime.clone(), memory.clone(), &HeapConfig::default(), None).unwrap();
    (runtime, memory, index)
}

fn two_modules() -> FakeRuntime
{
    let mut runtime = FakeRuntime::new();
    // Reported out of order on purpose
    runtime.module(0x3000, 0x800, "/srv/app/second.dll");
    runtime.module(0x1000, 0x1000, "/srv/app/first.dll");
    runtime
}

fn module_data(base: u64, size: u64, name: &str) -> ModuleData
{
    ModuleData {
        image_base: Address::from(base),
        size,
        file_name: name.to_string(),
        is_file_backed: true,
        ..ModuleData::default()
    }
}

fn base_of(module: Option<Arc<Module>>) -> Option<u64>
{
    module.map(|module| module.base().value())
}

#[test]
fn test_find_module_containing_half_open()
{
    let (_runtime, _memory, index) = build_index(two_modules(), SnapshotMemory::new(8, true));

    assert_eq!(base_of(index.find_module_containing(Address::from(0x500))), None);
    assert_eq!(base_of(index.find_module_containing(Address::from(0x1000))), Some(0x1000));
    assert_eq!(base_of(index.find_module_containing(Address::from(0x1fff))), Some(0x1000));
    assert_eq!(base_of(index.find_module_containing(Address::from(0x2000))), None);
    assert_eq!(base_of(index.find_module_containing(Address::from(0x37ff))), Some(0x3000));
    assert_eq!(base_of(index.find_module_containing(Address::from(0x3800))), None);
}

#[test]
fn test_index_is_sorted_and_disjoint()
{
    let (_runtime, _memory, index) = build_index(two_modules(), SnapshotMemory::new(8, true));
    index.add_module(module_data(0x2000, 0x800, "late.dll"), None).unwrap();

    let modules = index.modules();
    let bases: Vec<u64> = modules.iter().map(|module| module.base().value()).collect();
    assert_eq!(bases, vec![0x1000, 0x2000, 0x3000]);

    for (i, first) in modules.iter().enumerate() {
        for second in &modules[i + 1..] {
            let first_end = first.base().value() + first.size();
            let second_end = second.base().value() + second.size();
            assert!(first_end <= second.base().value() || second_end <= first.base().value());
        }
    }

    // Every address maps to the unique module that contains it
    for address in (0..0x4000u64).step_by(0x80) {
        let expected: Vec<_> = modules
            .iter()
            .filter(|module| module.contains(Address::from(address)))
            .collect();
        let found = index.find_module_containing(Address::from(address));
        assert_eq!(expected.len(), usize::from(found.is_some()));
    }
}

#[test]
fn test_overlapping_module_is_rejected()
{
    let mut runtime = two_modules();
    runtime.module(0x1800, 0x100, "/srv/app/overlap.dll");
    let (_runtime, _memory, index) = build_index(runtime, SnapshotMemory::new(8, true));

    assert_eq!(index.len(), 2);
    let failed = index.failed_modules();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].is_error());
    assert_eq!(failed[0].name(), ERROR_MODULE_NAME);

    let err = index.add_module(module_data(0x2800, 0x1000, "late.dll"), None).unwrap_err();
    assert!(matches!(err, GcScopeError::ModuleOverlap { existing, .. } if existing == Address::from(0x3000)));
    assert_eq!(index.failed_modules().len(), 2);
}

#[test]
fn test_zero_size_corrected_from_header()
{
    let memory = SnapshotMemory::new(8, true);
    memory.add_region(Address::from(0x40_0000), pe64_header(7, 0x8000)).unwrap();
    let mut runtime = FakeRuntime::new();
    runtime.module(0x40_0000, 0, "/srv/app/lib.dll");
    runtime.module(0x60_0000, 0, "/srv/app/headerless.dll");
    let (_runtime, _memory, index) = build_index(runtime, memory);

    assert_eq!(index.len(), 1);
    assert_eq!(base_of(index.find_module_containing(Address::from(0x40_7fff))), Some(0x40_0000));
    assert_eq!(index.failed_modules().len(), 1);
}

#[test]
fn test_correct_size()
{
    let (_runtime, _memory, index) = build_index(two_modules(), SnapshotMemory::new(8, true));

    index.correct_size(Address::from(0x1000), 0x1800).unwrap();
    assert_eq!(base_of(index.find_module_containing(Address::from(0x2400))), Some(0x1000));

    let err = index.correct_size(Address::from(0x1000), 0x2800).unwrap_err();
    assert!(matches!(err, GcScopeError::ModuleOverlap { .. }));

    let err = index.correct_size(Address::from(0x5000), 0x10).unwrap_err();
    assert!(matches!(err, GcScopeError::ModuleNotFound(_)));
}

#[test]
fn test_stale_revision_rejected()
{
    let mut runtime = two_modules();
    let domain = runtime.domain(0xd000, "DefaultDomain");
    runtime.map_module(domain, 0x1000, 0xa000);
    runtime.importers.insert(Address::from(0xa000), Arc::new(FakeImporter::default()));
    let (_runtime, memory, index) = build_index(runtime, SnapshotMemory::new(8, true));

    let module = index.find_module_containing(Address::from(0x1000)).unwrap();
    memory.advance_revision();

    let err = index.metadata_importer(&module).err().unwrap();
    assert!(err.is_stale());
    assert!(index.domain_load_address(&module, Some(domain)).unwrap_err().is_stale());
}

#[test]
fn test_cached_debugging_modes_rejected_after_revision_change()
{
    let mut runtime = two_modules();
    let domain = runtime.domain(0xd000, "DefaultDomain");
    runtime.map_module(domain, 0x1000, 0xa000);
    let mut importer = FakeImporter::default();
    importer
        .attributes
        .insert(DEBUGGABLE_ATTRIBUTE.to_string(), vec![0x01, 0x00, 0x07, 0x01, 0x00, 0x00]);
    runtime.importers.insert(Address::from(0xa000), Arc::new(importer));
    let (_runtime, memory, index) = build_index(runtime, SnapshotMemory::new(8, true));

    let module = index.find_module_containing(Address::from(0x1000)).unwrap();
    assert_eq!(index.debugging_modes(&module).unwrap().bits(), 0x107);
    memory.advance_revision();

    assert!(index.debugging_modes(&module).unwrap_err().is_stale());
    assert!(index.metadata_importer(&module).err().unwrap().is_stale());
}

#[test]
fn test_domain_load_address()
{
    let mut runtime = two_modules();
    let first = runtime.domain(0xd000, "DefaultDomain");
    let second = runtime.domain(0xe000, "Plugin");
    runtime.map_module(first, 0x1000, 0xa000);
    runtime.map_module(second, 0x1000, 0xb000);
    let (runtime, _memory, index) = build_index(runtime, SnapshotMemory::new(8, true));

    // Domain mappings are not walked until something needs them
    assert_eq!(runtime.domain_module_calls.load(Ordering::SeqCst), 0);

    let mapped = index.find_module_containing(Address::from(0x1000)).unwrap();
    let unmapped = index.find_module_containing(Address::from(0x3000)).unwrap();

    assert_eq!(index.domain_load_address(&mapped, Some(first)).unwrap(), Address::from(0xa000));
    assert_eq!(index.domain_load_address(&mapped, Some(second)).unwrap(), Address::from(0xb000));
    let any = index.domain_load_address(&mapped, None).unwrap();
    assert!(any == Address::from(0xa000) || any == Address::from(0xb000));
    assert_eq!(index.domain_load_address(&unmapped, None).unwrap(), Address::ZERO);

    assert_eq!(runtime.domain_module_calls.load(Ordering::SeqCst), 2);
    assert_eq!(mapped.domains(), vec![first, second]);
    assert_eq!(index.app_domains().unwrap().len(), 2);
}

#[test]
fn test_metadata_importer_is_cached()
{
    let mut runtime = two_modules();
    let domain = runtime.domain(0xd000, "DefaultDomain");
    runtime.map_module(domain, 0x1000, 0xa000);
    runtime.importers.insert(Address::from(0xa000), Arc::new(FakeImporter::default()));
    let (runtime, _memory, index) = build_index(runtime, SnapshotMemory::new(8, true));

    let mapped = index.find_module_containing(Address::from(0x1000)).unwrap();
    let first = index.metadata_importer(&mapped).unwrap().unwrap();
    let second = index.metadata_importer(&mapped).unwrap().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(runtime.importer_calls.load(Ordering::SeqCst), 1);

    let unmapped = index.find_module_containing(Address::from(0x3000)).unwrap();
    assert!(index.metadata_importer(&unmapped).unwrap().is_none());

    let error = index.error_module(Address::ZERO, "test");
    assert!(index.metadata_importer(&error).unwrap().is_none());
}

#[test]
fn test_debugging_modes()
{
    let mut runtime = FakeRuntime::new();
    runtime.module(0x1000, 0x1000, "debug.dll");
    runtime.module(0x3000, 0x1000, "broken.dll");
    runtime.module(0x5000, 0x1000, "plain.dll");
    let domain = runtime.domain(0xd000, "DefaultDomain");
    for (base, domain_module) in [(0x1000, 0xa000), (0x3000, 0xb000), (0x5000, 0xc000)] {
        runtime.map_module(domain, base, domain_module);
    }

    let mut debug = FakeImporter::default();
    debug
        .attributes
        .insert(DEBUGGABLE_ATTRIBUTE.to_string(), vec![0x01, 0x00, 0x07, 0x01, 0x00, 0x00]);
    let mut broken = FakeImporter::default();
    broken.attributes.insert(DEBUGGABLE_ATTRIBUTE.to_string(), vec![0x00]);
    runtime.importers.insert(Address::from(0xa000), Arc::new(debug));
    runtime.importers.insert(Address::from(0xb000), Arc::new(broken));
    runtime.importers.insert(Address::from(0xc000), Arc::new(FakeImporter::default()));
    let (_runtime, _memory, index) = build_index(runtime, SnapshotMemory::new(8, true));

    let modes = |address: u64| {
        let module = index.find_module_containing(Address::from(address)).unwrap();
        index.debugging_modes(&module).unwrap()
    };

    let debug = modes(0x1000);
    assert!(debug.contains(DebuggingModes::DEFAULT));
    assert!(debug.contains(DebuggingModes::DISABLE_OPTIMIZATIONS));
    assert_eq!(debug.bits(), 0x107);
    assert_eq!(modes(0x3000), DebuggingModes::NONE);
    assert_eq!(modes(0x5000), DebuggingModes::NONE);
}

fn module_with_metadata(base: u64) -> ModuleData
{
    ModuleData {
        metadata_address: Address::from(base + 0x1000),
        metadata_length: 0x20,
        ..module_data(base, 0x8000, "/srv/app/lib.dll")
    }
}

#[test]
fn test_metadata_strategy_selection()
{
    // Live process: always lazy
    let live = SnapshotMemory::new(8, false);
    live.map(Address::from(0x40_1000), 0x20).unwrap();
    let mut runtime = FakeRuntime::new();
    runtime.modules.push(module_with_metadata(0x40_0000));
    let (_runtime, _memory, index) = build_index(runtime, live);
    let module = index.find_by_base(Address::from(0x40_0000)).unwrap();
    assert!(matches!(module.as_loaded().unwrap().metadata_strategy(), MetadataStrategy::Lazy));

    // Dump with the metadata captured: copied eagerly
    let dump = SnapshotMemory::new(8, true);
    dump.add_region(Address::from(0x40_1000), vec![0xab; 0x20]).unwrap();
    let mut runtime = FakeRuntime::new();
    runtime.modules.push(module_with_metadata(0x40_0000));
    let (_runtime, _memory, index) = build_index(runtime, dump);
    let module = index.find_by_base(Address::from(0x40_0000)).unwrap();
    let loaded = module.as_loaded().unwrap();
    assert!(matches!(loaded.metadata_strategy(), MetadataStrategy::Eager(_)));
    assert_eq!(loaded.metadata_blob(), Some(&[0xab; 0x20][..]));

    // Dump without it: prefetch
    let mut runtime = FakeRuntime::new();
    runtime.modules.push(module_with_metadata(0x40_0000));
    let (_runtime, _memory, index) = build_index(runtime, SnapshotMemory::new(8, true));
    let module = index.find_by_base(Address::from(0x40_0000)).unwrap();
    assert!(matches!(module.as_loaded().unwrap().metadata_strategy(), MetadataStrategy::Prefetch));
}

fn prefetch_index(memory: SnapshotMemory, config: &HeapConfig) -> (Prefetcher, mpsc::Receiver<PrefetchRequest>)
{
    gcscope_utils::init_test_logging();
    let (sender, receiver) = mpsc::channel();
    let prefetcher = Prefetcher::new(Arc::new(RecordingStore {
        sender: Mutex::new(sender),
    }))
    .unwrap();

    let mut runtime = FakeRuntime::new();
    runtime.modules.push(module_with_metadata(0x40_0000));
    let index = ModuleIndex::build(Arc::new(runtime), Arc::new(memory), config, Some(&prefetcher)).unwrap();
    assert_eq!(index.len(), 1);
    (prefetcher, receiver)
}

#[test]
fn test_missing_metadata_schedules_prefetch()
{
    let memory = SnapshotMemory::new(8, true);
    memory.add_region(Address::from(0x40_0000), pe64_header(0x5f00_1234, 0x8000)).unwrap();
    let (_prefetcher, receiver) = prefetch_index(memory, &HeapConfig::default());

    let request = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(request.file_name, "lib.dll");
    assert_eq!(request.time_date_stamp, 0x5f00_1234);
    assert_eq!(request.image_size, 0x8000);
}

#[test]
fn test_resident_metadata_does_not_prefetch()
{
    let memory = SnapshotMemory::new(8, true);
    memory.add_region(Address::from(0x40_0000), pe64_header(1, 0x8000)).unwrap();
    memory.add_region(Address::from(0x40_1000), vec![0; 0x20]).unwrap();
    let (_prefetcher, receiver) = prefetch_index(memory, &HeapConfig::default());

    assert!(receiver.recv_timeout(Duration::from_millis(200)).is_err());
}

#[test]
fn test_prefetch_disabled_by_config()
{
    let memory = SnapshotMemory::new(8, true);
    memory.add_region(Address::from(0x40_0000), pe64_header(1, 0x8000)).unwrap();
    let config = HeapConfig {
        prefetch: false,
        ..HeapConfig::default()
    };
    let (_prefetcher, receiver) = prefetch_index(memory, &config);

    assert!(receiver.recv_timeout(Duration::from_millis(200)).is_err());
}
