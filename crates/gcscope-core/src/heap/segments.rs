//! Linear object walks over GC heap segments.

use std::sync::Arc;

use tracing::debug;

use super::types::GcType;
use super::Heap;
use crate::runtime::SegmentData;
use crate::types::Address;

/// Iterator over the objects of one segment, in address order
///
/// Free-space blocks are yielded like any other object (their type is
/// [`Heap::free_type`]) so callers can account for fragmentation. The walk
/// ends early at the first object whose type or size cannot be determined;
/// past that point object boundaries are unknown.
pub struct ObjectWalker<'h>
{
    heap: &'h Heap,
    cursor: Address,
    end: Address,
}

impl<'h> ObjectWalker<'h>
{
    pub(crate) fn new(heap: &'h Heap, segment: &SegmentData) -> Self
    {
        Self {
            heap,
            cursor: segment.start,
            end: segment.end,
        }
    }
}

impl Iterator for ObjectWalker<'_>
{
    type Item = (Address, Arc<GcType>);

    fn next(&mut self) -> Option<Self::Item>
    {
        if self.cursor >= self.end {
            return None;
        }

        let object = self.cursor;
        let Some(ty) = self.heap.resolve_object_type(object) else {
            debug!(object = %object, "unresolvable object, ending segment walk");
            self.cursor = self.end;
            return None;
        };
        let Some(size) = self.heap.object_size(object, &ty) else {
            debug!(object = %object, ty = ty.name(), "unreadable object size, ending segment walk");
            self.cursor = self.end;
            return None;
        };

        self.cursor = object.checked_add(size).unwrap_or(self.end);
        Some((object, ty))
    }
}
