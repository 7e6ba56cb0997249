//! Resolved runtime types.

use std::fmt;
use std::sync::{Arc, Weak};

use crate::module::Module;
use crate::runtime::MethodTableData;
use crate::source::MemorySource;
use crate::types::{Address, TypeIndex};

/// Smallest object the GC allocates, in pointers.
const MIN_OBJECT_POINTERS: u64 = 3;

/// What kind of object a type describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind
{
    /// Ordinary class or struct instance
    Ordinary,
    /// Array; `element` is `None` if the element descriptor did not resolve
    Array
    {
        element: Option<TypeIndex>
    },
    /// Boxed primitive value
    BoxedPrimitive,
    /// The runtime's free-space marker
    Free,
}

/// How to compute the size of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SizeStrategy
{
    /// Every instance has the same size
    Fixed(u64),
    /// `base + count * component`, with the element count stored in the
    /// pointer-sized slot right after the descriptor pointer
    PerElement
    {
        base: u64,
        component: u64,
    },
}

impl SizeStrategy
{
    pub(crate) fn from_data(data: &MethodTableData) -> Self
    {
        if data.component_size == 0 {
            SizeStrategy::Fixed(u64::from(data.base_size))
        } else {
            SizeStrategy::PerElement {
                base: u64::from(data.base_size),
                component: u64::from(data.component_size),
            }
        }
    }

    /// Size of the object at `object`, aligned to the pointer size.
    ///
    /// Returns `None` if the element count cannot be read or the size
    /// overflows.
    pub fn object_size(&self, source: &dyn MemorySource, object: Address) -> Option<u64>
    {
        let pointer_size = u64::from(source.pointer_size());
        let raw = match *self {
            SizeStrategy::Fixed(size) => size,
            SizeStrategy::PerElement { base, component } => {
                let count = source.read_u32(object.checked_add(pointer_size)?)?;
                component.checked_mul(u64::from(count))?.checked_add(base)?
            }
        };

        let aligned = raw.checked_next_multiple_of(pointer_size)?;
        Some(aligned.max(MIN_OBJECT_POINTERS * pointer_size))
    }
}

/// A resolved runtime type
///
/// Created once, the first time its canonical descriptor is resolved, and
/// immutable afterwards. Types live as long as the heap that built them;
/// [`GcType::index`] is their stable identity inside that heap.
pub struct GcType
{
    pub(crate) index: TypeIndex,
    pub(crate) descriptor: Address,
    pub(crate) module: Weak<Module>,
    pub(crate) name: String,
    pub(crate) kind: ElementKind,
    pub(crate) size: SizeStrategy,
}

impl GcType
{
    pub fn index(&self) -> TypeIndex
    {
        self.index
    }

    /// Canonical descriptor address.
    pub fn descriptor(&self) -> Address
    {
        self.descriptor
    }

    /// Owning module.
    ///
    /// The heap keeps every module a type can point at alive, so this only
    /// returns `None` once the heap is gone.
    pub fn module(&self) -> Option<Arc<Module>>
    {
        self.module.upgrade()
    }

    /// Best-effort display name.
    pub fn name(&self) -> &str
    {
        &self.name
    }

    pub fn kind(&self) -> ElementKind
    {
        self.kind
    }

    pub fn size_strategy(&self) -> SizeStrategy
    {
        self.size
    }

    pub fn is_array(&self) -> bool
    {
        matches!(self.kind, ElementKind::Array { .. })
    }

    pub fn is_free(&self) -> bool
    {
        self.kind == ElementKind::Free
    }

    /// Index of the element type, for arrays whose element resolved.
    pub fn element_index(&self) -> Option<TypeIndex>
    {
        match self.kind {
            ElementKind::Array { element } => element,
            _ => None,
        }
    }
}

impl fmt::Debug for GcType
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("GcType")
            .field("index", &self.index)
            .field("descriptor", &self.descriptor)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for GcType
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::source::SnapshotMemory;

    #[test]
    fn test_strategy_selection()
    {
        let fixed = MethodTableData {
            base_size: 24,
            ..MethodTableData::default()
        };
        assert_eq!(SizeStrategy::from_data(&fixed), SizeStrategy::Fixed(24));

        let array = MethodTableData {
            base_size: 24,
            component_size: 4,
            ..MethodTableData::default()
        };
        assert_eq!(SizeStrategy::from_data(&array), SizeStrategy::PerElement { base: 24, component: 4 });
    }

    #[test]
    fn test_fixed_size_is_aligned_and_clamped()
    {
        let memory = SnapshotMemory::new(8, true);
        assert_eq!(SizeStrategy::Fixed(30).object_size(&memory, Address::from(0x1000)), Some(32));
        assert_eq!(SizeStrategy::Fixed(8).object_size(&memory, Address::from(0x1000)), Some(24));
    }

    #[test]
    fn test_per_element_size_reads_count()
    {
        let memory = SnapshotMemory::new(8, true);
        memory.map(Address::from(0x1000), 0x40).unwrap();
        memory.write_u32(Address::from(0x1008), 5).unwrap();

        let strategy = SizeStrategy::PerElement { base: 24, component: 2 };
        assert_eq!(strategy.object_size(&memory, Address::from(0x1000)), Some(40));
        assert_eq!(strategy.object_size(&memory, Address::from(0x9000)), None);
    }
}
