//! Index-linked FIFO of functions waiting to be dumped.
//!
//! Entries live in a slab and are addressed by [`NodeRef`]; a reused slot
//! bumps its generation so stale refs held by the profiler never alias a
//! newer entry.

use parking_lot::Mutex;

use crate::FunctionHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRef {
    index: u32,
    generation: u32,
}

/// What [`WorkList::iterate`] does with an entry after the callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Keep,
    Remove,
    Replace(FunctionHandle),
}

#[derive(Debug, Default)]
struct Slot {
    value: Option<FunctionHandle>,
    generation: u32,
    prev: Option<u32>,
    next: Option<u32>,
}

#[derive(Debug, Default)]
struct ListInner {
    slots: Vec<Slot>,
    free: Vec<u32>,
    head: Option<u32>,
    tail: Option<u32>,
    len: usize,
}

impl ListInner {
    fn live(&self, node: NodeRef) -> bool {
        self.slots
            .get(node.index as usize)
            .is_some_and(|slot| slot.generation == node.generation && slot.value.is_some())
    }

    fn push_back(&mut self, value: FunctionHandle) -> NodeRef {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                (self.slots.len() - 1) as u32
            }
        };
        let tail = self.tail;
        let slot = &mut self.slots[index as usize];
        slot.value = Some(value);
        slot.prev = tail;
        slot.next = None;
        let generation = slot.generation;
        match tail {
            Some(t) => self.slots[t as usize].next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        self.len += 1;
        NodeRef { index, generation }
    }

    fn unlink(&mut self, index: u32) -> Option<FunctionHandle> {
        let (prev, next, value) = {
            let slot = &mut self.slots[index as usize];
            let value = slot.value.take()?;
            slot.generation = slot.generation.wrapping_add(1);
            (slot.prev.take(), slot.next.take(), value)
        };
        match prev {
            Some(p) => self.slots[p as usize].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n as usize].prev = prev,
            None => self.tail = prev,
        }
        self.free.push(index);
        self.len -= 1;
        Some(value)
    }
}

#[derive(Debug, Default)]
pub struct WorkList {
    inner: Mutex<ListInner>,
}

impl WorkList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().len == 0
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    pub fn push_back(&self, value: FunctionHandle) -> NodeRef {
        self.inner.lock().push_back(value)
    }

    pub fn pop_front(&self) -> Option<FunctionHandle> {
        let mut inner = self.inner.lock();
        let head = inner.head?;
        inner.unlink(head)
    }

    /// Unlinks `node`. Returns `None` when it is not (or no longer) here.
    pub fn remove(&self, node: NodeRef) -> Option<FunctionHandle> {
        let mut inner = self.inner.lock();
        if !inner.live(node) {
            return None;
        }
        inner.unlink(node.index)
    }

    pub fn contains(&self, node: NodeRef) -> bool {
        self.inner.lock().live(node)
    }

    pub fn get(&self, node: NodeRef) -> Option<FunctionHandle> {
        let inner = self.inner.lock();
        if !inner.live(node) {
            return None;
        }
        inner.slots[node.index as usize].value
    }

    /// Points `node` at a new handle, e.g. after the function moved.
    pub fn set(&self, node: NodeRef, value: FunctionHandle) -> bool {
        let mut inner = self.inner.lock();
        if !inner.live(node) {
            return false;
        }
        inner.slots[node.index as usize].value = Some(value);
        true
    }

    /// Calls `visit` for every entry in FIFO order. The lock is not held
    /// while `visit` runs; entries removed meanwhile are skipped.
    pub fn iterate(&self, mut visit: impl FnMut(NodeRef, FunctionHandle) -> Visit) {
        let snapshot: Vec<(NodeRef, FunctionHandle)> = {
            let inner = self.inner.lock();
            let mut out = Vec::with_capacity(inner.len);
            let mut cursor = inner.head;
            while let Some(index) = cursor {
                let slot = &inner.slots[index as usize];
                if let Some(value) = slot.value {
                    out.push((
                        NodeRef {
                            index,
                            generation: slot.generation,
                        },
                        value,
                    ));
                }
                cursor = slot.next;
            }
            out
        };
        for (node, value) in snapshot {
            if !self.contains(node) {
                continue;
            }
            match visit(node, value) {
                Visit::Keep => {}
                Visit::Remove => {
                    self.remove(node);
                }
                Visit::Replace(new) => {
                    self.set(node, new);
                }
            }
        }
    }

    pub fn clear(&self) {
        *self.inner.lock() = ListInner::default();
    }
}
