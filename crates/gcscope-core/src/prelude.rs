//! Common module for library exports

pub use crate::config::HeapConfig;
pub use crate::error::{GcScopeError, GcScopeResult};
pub use crate::heap::{ElementKind, GcType, Heap, HeapBuilder, SizeStrategy};
pub use crate::module::{BinaryStore, DebuggingModes, MetadataImport, Module, ModuleIndex, Prefetcher};
pub use crate::revision::Revision;
pub use crate::roots::{Root, RootEnumerator, RootKind};
pub use crate::runtime::Runtime;
pub use crate::source::{MemorySource, SnapshotMemory};
pub use crate::types::{Address, DomainId, ModuleId, ThreadId, TypeIndex};
