//! Kernel error types.

use thiserror::Error;

use crate::config::MemoryClass;
use crate::mailbox::MailboxId;
use crate::memory::MemoryError;
use crate::thread::ThreadId;

/// Conditions the kernel cannot recover from.
///
/// Raising one shuts the whole system down: [`Kernel::start`](crate::Kernel::start)
/// logs it and hands it back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fatal {
    #[error("thread table full")]
    ThreadTableFull,
    #[error("stack arena exhausted: {requested} bytes requested, {remaining} left")]
    StackExhausted { requested: usize, remaining: usize },
    #[error("memory pool: {0}")]
    Memory(#[from] MemoryError),
    #[error("mailbox {mailbox} already has receiver {receiver}")]
    ReceiverBusy { mailbox: MailboxId, receiver: ThreadId },
    #[error("no such mailbox: {0}")]
    NoSuchMailbox(MailboxId),
    #[error("invalid priority {0}")]
    InvalidPriority(u8),
    #[error("no thread is ready to run")]
    NoReadyThread,
    #[error("thread {0} waits for an interrupt with interrupts masked")]
    IdleWithInterruptsMasked(ThreadId),
    #[error("all interrupt sources disconnected while idle")]
    InterruptsDisconnected,
    #[error("execution context for {0} could not be created")]
    ContextCreation(ThreadId),
}

/// Rejected [`KernelConfig`](crate::KernelConfig) values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("thread table size {0} out of range")]
    ThreadCount(usize),
    #[error("priority level count {0} out of range")]
    PriorityLevels(usize),
    #[error("thread name length {0} out of range")]
    NameLength(usize),
    #[error("mailbox count {0} out of range")]
    MailboxCount(usize),
    #[error("stack arena must not be empty")]
    StackArena,
    #[error("vector count {0} cannot hold the reserved vectors")]
    VectorCount(usize),
    #[error("no memory size classes configured")]
    NoMemoryClasses,
    #[error("invalid memory class {0:?}")]
    MemoryClass(MemoryClass),
    #[error("memory arena of {0} bytes is too large")]
    MemoryArena(usize),
}
