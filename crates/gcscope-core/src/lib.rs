//! # gcscope-core
//!
//! Structural recovery for garbage-collected managed runtimes: given raw
//! memory of a process or a snapshot, rebuild the runtime's types, modules
//! and GC roots.
//!
//! This crate provides:
//! - Object type resolution with descriptor canonicalization ([`heap`])
//! - An address-ordered module index with metadata arbitration ([`module`])
//! - Lazy, ordered GC root enumeration ([`roots`])
//! - Generation checks for cached handles ([`revision`])
//!
//! The crate does not read target memory or decode runtime structures
//! itself. Both come from collaborators: a [`MemorySource`](source::MemorySource)
//! for bytes, a [`Runtime`](runtime::Runtime) for method tables, module
//! records, threads and handle tables.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use gcscope_core::prelude::*;
//!
//! # fn demo(runtime: Arc<dyn Runtime>, source: Arc<dyn MemorySource>) -> GcScopeResult<()> {
//! let heap = HeapBuilder::new(runtime, source).config(HeapConfig::from_env()).build()?;
//! for root in heap.enumerate_roots(true) {
//!     println!("{}", root?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod heap;
pub mod module;
pub mod prelude;
pub mod revision;
pub mod roots;
pub mod runtime;
pub mod source;
pub mod types;

// Re-export commonly used types
pub use error::{GcScopeError, GcScopeResult};
pub use heap::{GcType, Heap, HeapBuilder};
pub use module::{Module, ModuleIndex};
pub use roots::{Root, RootKind};
pub use types::{Address, TypeIndex};
