//! Index-stable type arena with its alias maps.

use std::collections::HashMap;
use std::sync::Arc;

use super::types::{GcType, SizeStrategy};
use crate::types::{Address, TypeIndex};

/// Types by index, plus the addresses that lead to them
///
/// `aliases` maps every descriptor address seen so far (raw, canonical,
/// thunked) to the index of its type. `arrays` maps an element descriptor
/// and an instance layout to the array type built over them, so that array
/// descriptors with the same element share one type unless their layouts
/// differ (`T[]` and `T[,]`).
#[derive(Debug, Default)]
pub(crate) struct TypeTable
{
    types: Vec<Arc<GcType>>,
    aliases: HashMap<Address, TypeIndex>,
    arrays: HashMap<(Address, SizeStrategy), TypeIndex>,
}

impl TypeTable
{
    pub(crate) fn len(&self) -> usize
    {
        self.types.len()
    }

    pub(crate) fn get(&self, index: usize) -> Option<Arc<GcType>>
    {
        self.types.get(index).cloned()
    }

    pub(crate) fn lookup(&self, descriptor: Address) -> Option<Arc<GcType>>
    {
        self.aliases.get(&descriptor).and_then(|index| self.get(index.get()))
    }

    pub(crate) fn lookup_array(&self, element: Address, size: SizeStrategy) -> Option<Arc<GcType>>
    {
        self.arrays.get(&(element, size)).and_then(|index| self.get(index.get()))
    }

    /// Point `descriptor` at `index`. An existing alias is kept.
    pub(crate) fn alias(&mut self, descriptor: Address, index: TypeIndex)
    {
        self.aliases.entry(descriptor).or_insert(index);
    }

    pub(crate) fn alias_array(&mut self, element: Address, size: SizeStrategy, index: TypeIndex)
    {
        self.arrays.entry((element, size)).or_insert(index);
    }

    /// Append the type `build` produces for the next free index.
    pub(crate) fn push(&mut self, build: impl FnOnce(TypeIndex) -> GcType) -> Arc<GcType>
    {
        let index = TypeIndex(self.types.len());
        let ty = Arc::new(build(index));
        self.types.push(ty.clone());
        ty
    }
}
