//! # Types
//!
//! Small value types shared by every layer of the engine.
//!
//! These are plain newtypes: addresses in the target, identifiers for
//! threads, app-domains and resolved types. None of them hold references back
//! into the heap or the module index, so they can be copied freely and used as
//! map keys.

pub mod address;
pub mod ids;

pub use address::Address;
pub use ids::{DomainId, ModuleId, ThreadId, TypeIndex};
