//! Thread identities, control records and the stack arena.

use core::fmt;

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::error::Fatal;
use crate::syscall::{Reply, Request};

/// Storage capacity of a thread name.
pub const THREAD_NAME_CAPACITY: usize = 15;

/// Thread name, truncated to the configured length.
pub type ThreadName = heapless::String<THREAD_NAME_CAPACITY>;

/// Unique identifier of a thread: its slot in the thread table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u8);

impl ThreadId {
    pub(crate) fn index(self) -> usize {
        usize::from(self.0)
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Thread priority; 0 is the highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(pub u8);

impl Priority {
    pub const HIGHEST: Self = Self(0);

    pub fn level(self) -> usize {
        usize::from(self.0)
    }

    /// Priority-0 threads run with maskable interrupts disabled.
    pub fn starts_masked(self) -> bool {
        self == Self::HIGHEST
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Builds a thread name from `name`, keeping at most `len` characters.
pub fn thread_name(name: &str, len: usize) -> ThreadName {
    let mut out = ThreadName::new();
    for c in name.chars().take(len) {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

/// A thread's region of the stack arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackRegion {
    pub offset: usize,
    pub len: usize,
}

impl StackRegion {
    /// One past the highest address; stacks grow down from here.
    pub fn top(&self) -> usize {
        self.offset + self.len
    }
}

/// Bump-only arena thread stacks are carved from.
///
/// Regions are never returned: a thread's stack stays consumed after the
/// thread exits.
pub struct StackArena {
    memory: Box<[u8]>,
    used: usize,
}

impl StackArena {
    pub fn new(size: usize) -> Self {
        Self {
            memory: alloc::vec![0u8; size].into_boxed_slice(),
            used: 0,
        }
    }

    /// Carves and zero-fills `size` bytes.
    pub fn carve(&mut self, size: usize) -> Result<StackRegion, Fatal> {
        let remaining = self.remaining();
        if size > remaining {
            return Err(Fatal::StackExhausted {
                requested: size,
                remaining,
            });
        }
        let region = StackRegion {
            offset: self.used,
            len: size,
        };
        self.memory[region.offset..region.top()].fill(0);
        self.used += size;
        Ok(region)
    }

    pub fn remaining(&self) -> usize {
        self.memory.len() - self.used
    }

    pub fn used(&self) -> usize {
        self.used
    }
}

/// Thread control record.
#[derive(Debug)]
pub struct Tcb {
    pub name: ThreadName,
    pub priority: Priority,
    /// Next thread in the same ready queue.
    pub(crate) next: Option<ThreadId>,
    /// Linked into a ready queue.
    ///
    /// The running thread keeps its place at the head of its queue, so this is
    /// also set while it runs; only the system-call path unlinks it.
    pub(crate) ready: bool,
    pub stack: StackRegion,
    /// Request parked while the thread is inside a trap.
    pub(crate) syscall: Option<Request>,
    /// Reply handed over on the next dispatch.
    pub(crate) reply: Option<Reply>,
}

impl Tcb {
    pub fn new(name: ThreadName, priority: Priority, stack: StackRegion) -> Self {
        Self {
            name,
            priority,
            next: None,
            ready: false,
            stack,
            syscall: None,
            reply: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }
}

/// Fixed-capacity table of thread control records.
///
/// An empty slot is an unused thread; filling and erasing a slot replaces the
/// whole record.
pub struct TaskTable {
    slots: Vec<Option<Tcb>>,
}

impl TaskTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots holding a thread.
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// First unused slot.
    pub fn free_slot(&self) -> Option<ThreadId> {
        self.slots
            .iter()
            .position(Option::is_none)
            .map(|index| ThreadId(index as u8))
    }

    pub fn get(&self, id: ThreadId) -> Option<&Tcb> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: ThreadId) -> Option<&mut Tcb> {
        self.slots.get_mut(id.index()).and_then(Option::as_mut)
    }

    pub fn contains(&self, id: ThreadId) -> bool {
        self.get(id).is_some()
    }

    pub(crate) fn install(&mut self, id: ThreadId, tcb: Tcb) {
        if let Some(slot) = self.slots.get_mut(id.index()) {
            *slot = Some(tcb);
        }
    }

    pub(crate) fn erase(&mut self, id: ThreadId) -> Option<Tcb> {
        self.slots.get_mut(id.index()).and_then(Option::take)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ThreadId, &Tcb)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|tcb| (ThreadId(index as u8), tcb)))
    }
}
