//! System-call records and the thread-side call surface.
//!
//! A thread never touches kernel state. It describes the call as a
//! [`Request`], traps through its [`TrapGate`], and is resumed later with the
//! [`Reply`] the kernel left in its control record.

use core::fmt;

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

use thiserror::Error;

use crate::error::Fatal;
use crate::mailbox::{MailboxId, Message, Payload};
use crate::memory::{BlockPtr, MemoryError, PoolStats, SharedMemory};
use crate::port::Trap;
use crate::service::ServiceCalls;
use crate::thread::{Priority, ThreadId};
use crate::vector::{InterruptHandler, Vector};

/// System call operation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SyscallType {
    Run = 0,
    Exit = 1,
    Wait = 2,
    Sleep = 3,
    Wakeup = 4,
    GetId = 5,
    ChPri = 6,
    Kmalloc = 7,
    Kmfree = 8,
    Send = 9,
    Recv = 10,
    SetIntr = 11,
}

/// Thread body: receives the call surface and its arguments.
pub type ThreadEntry = Box<dyn FnOnce(&Syscalls, &[String]) -> i32 + Send>;

/// Entry point and arguments used once, on a thread's first dispatch.
pub struct ThreadInit {
    entry: ThreadEntry,
    args: Vec<String>,
}

impl ThreadInit {
    /// Startup trampoline: runs the body and exits when it returns.
    pub fn run(self, sys: &Syscalls) -> ! {
        let code = (self.entry)(sys, &self.args);
        log::debug!("thread body returned {code}");
        sys.exit()
    }
}

/// Everything needed to create a thread.
pub struct ThreadSpec {
    pub name: String,
    pub priority: u8,
    pub stack_size: usize,
    pub(crate) init: ThreadInit,
}

impl ThreadSpec {
    pub fn new<F>(name: &str, priority: u8, stack_size: usize, entry: F) -> Self
    where
        F: FnOnce(&Syscalls, &[String]) -> i32 + Send + 'static,
    {
        Self {
            name: String::from(name),
            priority,
            stack_size,
            init: ThreadInit {
                entry: Box::new(entry),
                args: Vec::new(),
            },
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.init.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub(crate) fn into_init(self) -> ThreadInit {
        self.init
    }
}

impl fmt::Debug for ThreadSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadSpec")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("stack_size", &self.stack_size)
            .finish_non_exhaustive()
    }
}

/// A system call with its parameters.
pub enum Request {
    Run(ThreadSpec),
    Exit,
    Wait,
    Sleep,
    Wakeup(ThreadId),
    GetId,
    /// `None` queries without changing anything.
    ChangePriority(Option<u8>),
    Kmalloc(usize),
    Kmfree(BlockPtr),
    Send {
        mailbox: MailboxId,
        size: usize,
        payload: Payload,
    },
    Recv(MailboxId),
    SetIntr {
        vector: Vector,
        handler: InterruptHandler,
    },
}

impl Request {
    pub fn kind(&self) -> SyscallType {
        match self {
            Self::Run(_) => SyscallType::Run,
            Self::Exit => SyscallType::Exit,
            Self::Wait => SyscallType::Wait,
            Self::Sleep => SyscallType::Sleep,
            Self::Wakeup(_) => SyscallType::Wakeup,
            Self::GetId => SyscallType::GetId,
            Self::ChangePriority(_) => SyscallType::ChPri,
            Self::Kmalloc(_) => SyscallType::Kmalloc,
            Self::Kmfree(_) => SyscallType::Kmfree,
            Self::Send { .. } => SyscallType::Send,
            Self::Recv(_) => SyscallType::Recv,
            Self::SetIntr { .. } => SyscallType::SetIntr,
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run(spec) => f.debug_tuple("Run").field(spec).finish(),
            Self::Wakeup(id) => f.debug_tuple("Wakeup").field(id).finish(),
            Self::ChangePriority(p) => f.debug_tuple("ChangePriority").field(p).finish(),
            Self::Kmalloc(size) => f.debug_tuple("Kmalloc").field(size).finish(),
            Self::Kmfree(block) => f.debug_tuple("Kmfree").field(block).finish(),
            Self::Send {
                mailbox,
                size,
                payload,
            } => f
                .debug_struct("Send")
                .field("mailbox", mailbox)
                .field("size", size)
                .field("payload", payload)
                .finish(),
            Self::Recv(mailbox) => f.debug_tuple("Recv").field(mailbox).finish(),
            Self::SetIntr { vector, .. } => {
                f.debug_struct("SetIntr").field("vector", vector).finish_non_exhaustive()
            }
            other => write!(f, "{:?}", other.kind()),
        }
    }
}

/// Output slot filled in by the kernel before the caller resumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Done,
    Thread(ThreadId),
    Priority(Priority),
    Block(BlockPtr),
    Sent(usize),
    Received(Message),
    Refused(SyscallError),
}

/// Calls the kernel refuses without harming the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SyscallError {
    #[error("no such thread: {0}")]
    NoSuchThread(ThreadId),
    #[error("thread {thread} is blocked on {mailbox}")]
    BlockedOnMailbox { thread: ThreadId, mailbox: MailboxId },
    #[error("vector {0} is reserved for the kernel")]
    ReservedVector(Vector),
    #[error("no such vector: {0}")]
    NoSuchVector(Vector),
}

/// Thread-side trap mechanism provided by a [`Port`](crate::Port).
pub trait TrapGate: Send {
    /// Traps into the kernel and blocks until this thread is dispatched again.
    fn enter(&self, trap: Trap) -> Reply;

    /// Traps into the kernel for the last time.
    fn leave(&self, trap: Trap) -> !;

    /// Sets this thread's maskable-interrupt enable.
    fn set_interrupts_enabled(&self, enabled: bool);

    fn interrupts_enabled(&self) -> bool;
}

/// The kernel call surface as seen from a thread.
pub struct Syscalls {
    gate: Box<dyn TrapGate>,
    memory: SharedMemory,
}

impl Syscalls {
    pub fn new(gate: Box<dyn TrapGate>, memory: SharedMemory) -> Self {
        Self { gate, memory }
    }

    fn call(&self, request: Request) -> Reply {
        self.gate.enter(Trap::Syscall(request))
    }

    /// Creates a thread; the caller stays ready ahead of it.
    pub fn run(&self, spec: ThreadSpec) -> ThreadId {
        match self.call(Request::Run(spec)) {
            Reply::Thread(id) => id,
            other => unexpected(SyscallType::Run, other),
        }
    }

    /// Terminates the calling thread.
    pub fn exit(&self) -> ! {
        self.gate.leave(Trap::Syscall(Request::Exit))
    }

    /// Moves the caller to the back of its ready queue.
    pub fn wait(&self) {
        self.call(Request::Wait);
    }

    /// Blocks until another thread or a handler calls `wakeup`.
    pub fn sleep(&self) {
        self.call(Request::Sleep);
    }

    pub fn wakeup(&self, id: ThreadId) -> Result<(), SyscallError> {
        match self.call(Request::Wakeup(id)) {
            Reply::Done => Ok(()),
            Reply::Refused(err) => Err(err),
            other => unexpected(SyscallType::Wakeup, other),
        }
    }

    pub fn getid(&self) -> ThreadId {
        match self.call(Request::GetId) {
            Reply::Thread(id) => id,
            other => unexpected(SyscallType::GetId, other),
        }
    }

    /// Sets the caller's priority and returns the previous one.
    pub fn chpri(&self, priority: u8) -> Priority {
        self.change_priority(Some(priority))
    }

    /// Current priority of the caller.
    pub fn priority(&self) -> Priority {
        self.change_priority(None)
    }

    fn change_priority(&self, priority: Option<u8>) -> Priority {
        match self.call(Request::ChangePriority(priority)) {
            Reply::Priority(old) => old,
            other => unexpected(SyscallType::ChPri, other),
        }
    }

    pub fn kmalloc(&self, size: usize) -> BlockPtr {
        match self.call(Request::Kmalloc(size)) {
            Reply::Block(block) => block,
            other => unexpected(SyscallType::Kmalloc, other),
        }
    }

    pub fn kmfree(&self, block: BlockPtr) {
        self.call(Request::Kmfree(block));
    }

    /// Queues `size` bytes of `payload` on `mailbox`; never blocks.
    pub fn send(&self, mailbox: MailboxId, size: usize, payload: Payload) -> usize {
        match self.call(Request::Send {
            mailbox,
            size,
            payload,
        }) {
            Reply::Sent(size) => size,
            other => unexpected(SyscallType::Send, other),
        }
    }

    /// Sends a `'static` byte string the receiver must not free.
    pub fn send_static(&self, mailbox: MailboxId, data: &'static [u8]) -> usize {
        self.send(mailbox, data.len(), Payload::Static(data))
    }

    /// Copies `data` into a fresh block and sends it; the receiver frees it.
    pub fn send_bytes(&self, mailbox: MailboxId, data: &[u8]) -> Result<usize, MemoryError> {
        let block = self.kmalloc(data.len());
        self.write(block, data)?;
        Ok(self.send(mailbox, data.len(), Payload::Heap(block)))
    }

    /// Takes the next message from `mailbox`, blocking while it is empty.
    pub fn recv(&self, mailbox: MailboxId) -> Message {
        match self.call(Request::Recv(mailbox)) {
            Reply::Received(message) => message,
            other => unexpected(SyscallType::Recv, other),
        }
    }

    /// Installs `handler` on a device vector.
    pub fn setintr<F>(&self, vector: Vector, handler: F) -> Result<(), SyscallError>
    where
        F: FnMut(&mut ServiceCalls<'_>) -> Result<(), Fatal> + Send + 'static,
    {
        let request = Request::SetIntr {
            vector,
            handler: Box::new(handler),
        };
        match self.call(request) {
            Reply::Done => Ok(()),
            Reply::Refused(err) => Err(err),
            other => unexpected(SyscallType::SetIntr, other),
        }
    }

    pub fn enable_interrupts(&self) {
        self.gate.set_interrupts_enabled(true);
    }

    pub fn disable_interrupts(&self) {
        self.gate.set_interrupts_enabled(false);
    }

    pub fn interrupts_enabled(&self) -> bool {
        self.gate.interrupts_enabled()
    }

    /// Sleeps the CPU until an interrupt has been handled.
    pub fn wait_for_interrupt(&self) {
        self.gate.enter(Trap::WaitForInterrupt);
    }

    pub fn write(&self, block: BlockPtr, data: &[u8]) -> Result<(), MemoryError> {
        self.memory.lock().write(block, data)
    }

    pub fn read(&self, block: BlockPtr, len: usize) -> Result<Vec<u8>, MemoryError> {
        self.memory.lock().read(block, len)
    }

    /// Bytes carried by a received message.
    pub fn message_bytes(&self, message: &Message) -> Result<Vec<u8>, MemoryError> {
        match message.payload {
            Payload::Heap(block) => self.read(block, message.size),
            Payload::Static(data) => Ok(data[..message.size.min(data.len())].to_vec()),
        }
    }

    /// Snapshot of the memory pool counters.
    ///
    /// The pool lock is released before this returns, so the kernel is never
    /// left waiting on a thread that holds it across a trap.
    pub fn pool_stats(&self) -> Vec<PoolStats> {
        self.memory.lock().stats()
    }
}

// A reply that does not match the request means the trap protocol itself is
// broken; the panic turns into a soft error for this thread.
fn unexpected(call: SyscallType, reply: Reply) -> ! {
    panic!("{call:?}: unexpected reply {reply:?}")
}
