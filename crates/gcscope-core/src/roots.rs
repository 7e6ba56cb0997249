//! # GC Roots
//!
//! [`RootEnumerator`] walks the four root sources in a fixed order:
//!
//! 1. Thread stacks, one thread at a time
//! 2. Static fields (only when statics were requested)
//! 3. The handle table
//! 4. The finalizer queue of the primary app-domain
//!
//! Consumers may rely on that grouping: every stack root comes before every
//! static root, and so on.
//!
//! The sequence is lazy. Each source is queried when the enumerator reaches
//! it, and a thread's stack is scanned only once the previous thread's roots
//! have been consumed. Nothing but owned record vectors is kept between
//! items, so dropping the enumerator halfway is always safe. A new call to
//! [`Heap::enumerate_roots`] re-reads the target and may see different roots
//! on a live process.
//!
//! ## Unresolved types
//!
//! Stack and static roots are yielded even when their object's type does
//! not resolve. Handle and finalizer entries whose type does not resolve are
//! skipped: a stale handle or an already collected finalizable object is
//! noise, not a root.
//!
//! ## Errors
//!
//! A source the backend cannot read yields a single `Err` item; enumeration
//! then continues with the next source.

use std::fmt;
use std::sync::Arc;
use std::vec;

use tracing::{debug, trace};

use crate::error::GcScopeResult;
use crate::heap::{GcType, Heap};
use crate::runtime::{HandleData, HandleKind, StackSlot, StaticSlot, ThreadData};
use crate::types::{Address, DomainId};

/// Where a root came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RootKind
{
    Stack,
    Static,
    Handle(HandleKind),
    Finalizer,
}

/// One GC root, produced during a single enumeration pass.
#[derive(Debug, Clone)]
pub struct Root
{
    pub kind: RootKind,
    /// Location holding the reference (for finalizer entries: the object)
    pub address: Address,
    /// Object kept alive
    pub object: Address,
    /// Type of `object`, if it resolved
    pub ty: Option<Arc<GcType>>,
    pub domain: Option<DomainId>,
    /// Human-readable origin
    pub name: String,
}

impl fmt::Display for Root
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let ty = self.ty.as_ref().map_or("<unresolved>", |ty| ty.name());
        write!(f, "{} -> {} ({ty})", self.name, self.object)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source
{
    Stack,
    Static,
    Handle,
    Finalizer,
}

impl Source
{
    fn after(self) -> Stage
    {
        match self {
            Source::Stack => Stage::Open(Source::Static),
            Source::Static => Stage::Open(Source::Handle),
            Source::Handle => Stage::Open(Source::Finalizer),
            Source::Finalizer => Stage::Done,
        }
    }
}

enum Stage
{
    Open(Source),
    Stack
    {
        threads: vec::IntoIter<ThreadData>,
        current: Option<(ThreadData, vec::IntoIter<StackSlot>)>,
    },
    Static(vec::IntoIter<StaticSlot>),
    Handle(vec::IntoIter<HandleData>),
    Finalizer
    {
        domain: DomainId,
        objects: vec::IntoIter<Address>,
    },
    Done,
}

/// Lazy, single-pass sequence of GC roots; see the [module docs](self).
pub struct RootEnumerator<'h>
{
    heap: &'h Heap,
    include_statics: bool,
    stage: Stage,
}

impl<'h> RootEnumerator<'h>
{
    pub(crate) fn new(heap: &'h Heap, include_statics: bool) -> Self
    {
        Self {
            heap,
            include_statics,
            stage: Stage::Open(Source::Stack),
        }
    }

    fn open(&self, source: Source) -> GcScopeResult<Stage>
    {
        let runtime = self.heap.runtime();
        match source {
            Source::Stack => Ok(Stage::Stack {
                threads: runtime.threads()?.into_iter(),
                current: None,
            }),
            Source::Static if !self.include_statics => Ok(Source::Static.after()),
            Source::Static => Ok(Stage::Static(runtime.static_roots(true)?.into_iter())),
            Source::Handle => Ok(Stage::Handle(runtime.handles()?.into_iter())),
            Source::Finalizer => {
                let Some(primary) = self.heap.modules().primary_domain()? else {
                    debug!("no app domains, skipping finalizer queue");
                    return Ok(Stage::Done);
                };
                Ok(Stage::Finalizer {
                    domain: primary,
                    objects: runtime.finalizer_queue(primary)?.into_iter(),
                })
            }
        }
    }

    fn stack_root(&self, thread: &ThreadData, slot: StackSlot) -> Root
    {
        let name = match slot.frame {
            Some(frame) => format!("thread 0x{:x}: {frame}", thread.os_id.raw()),
            None => format!("thread 0x{:x}", thread.os_id.raw()),
        };
        Root {
            kind: RootKind::Stack,
            address: slot.address,
            object: slot.object,
            ty: self.heap.resolve_object_type(slot.object),
            domain: thread.domain,
            name,
        }
    }

    fn static_root(&self, slot: StaticSlot) -> Root
    {
        Root {
            kind: RootKind::Static,
            address: slot.address,
            object: slot.object,
            ty: self.heap.resolve_object_type(slot.object),
            domain: slot.domain,
            name: format!("static var {}.{}", slot.type_name, slot.field_name),
        }
    }

    fn handle_root(&self, handle: &HandleData) -> Option<Root>
    {
        let Some(ty) = self.heap.resolve_object_type(handle.object) else {
            trace!(handle = %handle.address, object = %handle.object, "skipping handle to unresolved object");
            return None;
        };
        Some(Root {
            kind: RootKind::Handle(handle.kind),
            address: handle.address,
            object: handle.object,
            ty: Some(ty),
            domain: handle.domain,
            name: format!("{} handle", handle.kind.label()),
        })
    }

    fn finalizer_root(&self, domain: DomainId, object: Address) -> Option<Root>
    {
        let Some(ty) = self.heap.resolve_object_type(object) else {
            trace!(object = %object, "skipping unresolved finalizer entry");
            return None;
        };
        Some(Root {
            kind: RootKind::Finalizer,
            address: object,
            object,
            ty: Some(ty),
            domain: Some(domain),
            name: "finalization handle".to_string(),
        })
    }
}

impl Iterator for RootEnumerator<'_>
{
    type Item = GcScopeResult<Root>;

    fn next(&mut self) -> Option<Self::Item>
    {
        loop {
            match &mut self.stage {
                Stage::Open(source) => {
                    let source = *source;
                    match self.open(source) {
                        Ok(stage) => self.stage = stage,
                        Err(err) => {
                            debug!(?source, "root source unavailable: {err}");
                            self.stage = source.after();
                            return Some(Err(err));
                        }
                    }
                }
                Stage::Stack { threads, current } => {
                    if let Some((thread, slots)) = current {
                        if let Some(slot) = slots.next() {
                            let thread = thread.clone();
                            return Some(Ok(self.stack_root(&thread, slot)));
                        }
                    }

                    let Some(thread) = threads.next() else {
                        self.stage = Source::Stack.after();
                        continue;
                    };
                    match self.heap.runtime().stack_roots(&thread) {
                        Ok(slots) => *current = Some((thread, slots.into_iter())),
                        Err(err) => {
                            *current = None;
                            debug!(thread = thread.os_id.raw(), "stack scan failed: {err}");
                            return Some(Err(err));
                        }
                    }
                }
                Stage::Static(slots) => match slots.next() {
                    Some(slot) => return Some(Ok(self.static_root(slot))),
                    None => self.stage = Source::Static.after(),
                },
                Stage::Handle(handles) => match handles.next() {
                    Some(handle) => {
                        if let Some(root) = self.handle_root(&handle) {
                            return Some(Ok(root));
                        }
                    }
                    None => self.stage = Source::Handle.after(),
                },
                Stage::Finalizer { domain, objects } => match objects.next() {
                    Some(object) => {
                        let domain = *domain;
                        if let Some(root) = self.finalizer_root(domain, object) {
                            return Some(Ok(root));
                        }
                    }
                    None => self.stage = Stage::Done,
                },
                Stage::Done => return None,
            }
        }
    }
}
