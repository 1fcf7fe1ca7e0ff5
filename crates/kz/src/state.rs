//! Kernel state shared by the system-call and service-call paths.
//!
//! `KernelState` owns the thread table, ready queues, mailboxes, memory pool
//! and stack arena. The running thread stays at the head of its ready queue
//! while it runs, so an interrupt taken on its behalf loses nothing; the
//! system-call path unlinks it first and requeues it only when the call keeps
//! it runnable.

use log::{debug, info, trace};

use crate::config::KernelConfig;
use crate::error::Fatal;
use crate::mailbox::Mailboxes;
use crate::memory::{BlockPtr, MemoryPool, SharedMemory};
use crate::scheduler::ReadyQueues;
use crate::syscall::{Reply, SyscallError};
use crate::thread::{thread_name, Priority, StackArena, TaskTable, Tcb, ThreadId};
use crate::trace::{field16, field8, records, TraceHook};

/// Observable state of a thread slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Unused,
    Ready,
    /// The current thread. It is still linked at the head of its ready queue
    /// until it traps.
    Running,
    Blocked,
}

pub struct KernelState {
    pub(crate) tasks: TaskTable,
    pub(crate) ready: ReadyQueues,
    pub(crate) mailboxes: Mailboxes,
    pub(crate) memory: SharedMemory,
    pub(crate) stacks: StackArena,
    pub(crate) current: Option<ThreadId>,
    name_len: usize,
    priority_levels: usize,
    trace: Option<TraceHook>,
}

impl KernelState {
    pub fn new(config: &KernelConfig, trace: Option<TraceHook>) -> Self {
        Self {
            tasks: TaskTable::new(config.max_threads),
            ready: ReadyQueues::new(config.priority_levels),
            mailboxes: Mailboxes::new(config.mailbox_count),
            memory: MemoryPool::shared(&config.memory_classes),
            stacks: StackArena::new(config.stack_arena_size),
            current: None,
            name_len: config.thread_name_len,
            priority_levels: config.priority_levels,
            trace,
        }
    }

    pub fn current(&self) -> Option<ThreadId> {
        self.current
    }

    pub fn tasks(&self) -> &TaskTable {
        &self.tasks
    }

    pub fn ready(&self) -> &ReadyQueues {
        &self.ready
    }

    pub fn mailboxes(&self) -> &Mailboxes {
        &self.mailboxes
    }

    pub fn memory(&self) -> &SharedMemory {
        &self.memory
    }

    pub fn stacks(&self) -> &StackArena {
        &self.stacks
    }

    pub fn thread_state(&self, id: ThreadId) -> ThreadState {
        match self.tasks.get(id) {
            None => ThreadState::Unused,
            Some(_) if self.current == Some(id) => ThreadState::Running,
            Some(tcb) if tcb.ready => ThreadState::Ready,
            Some(_) => ThreadState::Blocked,
        }
    }

    pub fn check_priority(&self, priority: u8) -> Result<Priority, Fatal> {
        if usize::from(priority) < self.priority_levels {
            Ok(Priority(priority))
        } else {
            Err(Fatal::InvalidPriority(priority))
        }
    }

    /// Fills a free slot, carves its stack and makes the thread ready.
    pub fn spawn(&mut self, name: &str, priority: u8, stack_size: usize) -> Result<ThreadId, Fatal> {
        let priority = self.check_priority(priority)?;
        let id = self.tasks.free_slot().ok_or(Fatal::ThreadTableFull)?;
        let stack = self.stacks.carve(stack_size)?;
        let name = thread_name(name, self.name_len);

        debug!("{name} created as {id} at priority {priority}");
        self.tasks.install(id, Tcb::new(name, priority, stack));
        self.make_ready(id);
        self.emit(records::thread::CREATE, &[id.0, priority.0]);
        Ok(id)
    }

    /// Erases a thread's control record. Its stack stays consumed.
    pub fn erase(&mut self, id: ThreadId) -> Option<Tcb> {
        self.ready.unlink(&mut self.tasks, id);
        let tcb = self.tasks.erase(id)?;
        info!("{} EXIT.", tcb.name);
        if self.current == Some(id) {
            self.current = None;
        }
        self.emit(records::thread::EXIT, &[id.0]);
        Some(tcb)
    }

    /// Unlinks the current thread from its ready queue.
    pub fn getcurrent(&mut self) -> bool {
        match self.current {
            Some(id) => self.make_unready(id),
            None => false,
        }
    }

    /// Requeues the current thread at the tail of its ready queue.
    pub fn putcurrent(&mut self) -> bool {
        match self.current {
            Some(id) => self.make_ready(id),
            None => false,
        }
    }

    pub(crate) fn make_ready(&mut self, id: ThreadId) -> bool {
        let linked = self.ready.enqueue(&mut self.tasks, id);
        if linked {
            self.emit(records::sched::READY, &[id.0]);
        }
        linked
    }

    fn make_unready(&mut self, id: ThreadId) -> bool {
        let unlinked = self.ready.unlink(&mut self.tasks, id);
        if unlinked {
            self.emit(records::sched::UNREADY, &[id.0]);
        }
        unlinked
    }

    /// Makes the head of the highest non-empty ready queue current.
    pub fn schedule(&mut self) -> Result<ThreadId, Fatal> {
        let next = self.ready.select().ok_or(Fatal::NoReadyThread)?;
        if self.current != Some(next) {
            if let Some(tcb) = self.tasks.get(next) {
                trace!("switch to {} ({next})", tcb.name);
                self.emit(records::sched::NEXT, &[next.0, tcb.priority.0]);
            }
        }
        self.current = Some(next);
        Ok(next)
    }

    /// Makes a sleeping thread ready again.
    ///
    /// Waking a thread that is already ready is a no-op; a thread blocked in
    /// `recv` can only be woken by a message.
    pub fn wakeup(&mut self, id: ThreadId) -> Result<(), SyscallError> {
        let ready = match self.tasks.get(id) {
            Some(tcb) => tcb.ready,
            None => return Err(SyscallError::NoSuchThread(id)),
        };
        if ready || self.current == Some(id) {
            return Ok(());
        }
        if let Some(mailbox) = self.mailboxes.waiting_on(id) {
            return Err(SyscallError::BlockedOnMailbox {
                thread: id,
                mailbox,
            });
        }
        self.make_ready(id);
        self.emit(records::thread::WAKEUP, &[id.0]);
        Ok(())
    }

    /// Changes the current thread's priority, returning the old one.
    ///
    /// `None` only queries. The thread must be unlinked: the new priority
    /// takes effect when it is next enqueued.
    pub fn chpri(&mut self, priority: Option<u8>) -> Result<Priority, Fatal> {
        let id = self.current.ok_or(Fatal::NoReadyThread)?;
        let new = priority.map(|p| self.check_priority(p)).transpose()?;
        let tcb = self.tasks.get_mut(id).ok_or(Fatal::NoReadyThread)?;
        let old = tcb.priority;
        if let Some(new) = new {
            tcb.priority = new;
            self.emit(records::thread::CHPRI, &[id.0, old.0, new.0]);
        }
        Ok(old)
    }

    pub fn kmalloc(&mut self, size: usize) -> Result<BlockPtr, Fatal> {
        let block = self.memory.lock().alloc(size)?;
        self.emit_memory(records::memory::ALLOC, block);
        Ok(block)
    }

    pub fn kmfree(&mut self, block: BlockPtr) -> Result<(), Fatal> {
        self.emit_memory(records::memory::FREE, block);
        self.memory.lock().free(block)?;
        Ok(())
    }

    pub(crate) fn set_reply(&mut self, id: ThreadId, reply: Reply) {
        if let Some(tcb) = self.tasks.get_mut(id) {
            tcb.reply = Some(reply);
        }
    }

    pub(crate) fn emit(&self, record_type: u8, payload: &[u8]) {
        if let Some(trace) = &self.trace {
            let _ = trace(record_type, payload, true);
        }
    }

    fn emit_memory(&self, record_type: u8, block: BlockPtr) {
        if self.trace.is_none() {
            return;
        }
        let pool = self.memory.lock();
        if let Ok(size) = pool.block_size(block) {
            let free = pool
                .stats()
                .iter()
                .find(|stats| stats.block_size == size)
                .map_or(0, |stats| stats.free);
            let size = field16(size);
            drop(pool);
            self.emit(record_type, &[size[0], size[1], field8(free)]);
        }
    }
}
