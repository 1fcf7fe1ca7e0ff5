//! # kz - Cooperative Priority Kernel
//!
//! kz multiplexes a handful of threads over one CPU. Threads only give up the
//! CPU at a system-call trap or at an interrupt boundary they have unmasked;
//! there is no time slicing.
//!
//! ## Architecture
//!
//! **Threads**: a fixed table of thread control records addressed by
//! [`ThreadId`]. Stacks are carved once from a bump-only arena and are never
//! reclaimed.
//!
//! **Scheduling**: one FIFO ready queue per priority level, 0 being the
//! highest. The head of the first non-empty level runs.
//!
//! **Traps**: system calls are request records a thread hands to the kernel
//! through the [`Port`]; the kernel routes them through a vector table shared
//! with device interrupts and the soft-error vector. Interrupt handlers use
//! [`ServiceCalls`] instead of trapping.
//!
//! **IPC and memory**: id-addressed [`mailbox`]es carry messages allocated from
//! a fixed-class [`memory`] pool.
//!
//! ## Module Overview
//!
//! - [`thread`] - thread ids, priorities, control records, stack arena
//! - [`scheduler`] - per-priority ready queues
//! - [`memory`] - fixed size-class block allocator
//! - [`mailbox`] - message queues with a single waiting receiver
//! - [`syscall`] - request/reply records and the thread-side call surface
//! - [`service`] - direct-call kernel services for interrupt handlers
//! - [`vector`] - interrupt/trap vector table
//! - [`port`] - context-switch capability and the hosted port
//! - [`kernel`] - the kernel itself with builder pattern
//! - [`console`] - console driver and command shell threads

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod config;
pub mod console;
pub mod error;
pub mod kernel;
pub mod mailbox;
pub mod memory;
pub mod port;
pub mod scheduler;
pub mod service;
pub mod state;
mod sync;
pub mod syscall;
pub mod thread;
pub mod trace;
pub mod vector;

#[cfg(test)]
mod tests;

pub use config::{KernelConfig, KernelConfigBuilder, MemoryClass};
pub use error::{ConfigError, Fatal};
pub use kernel::{Kernel, KernelBuilder};
pub use mailbox::{MailboxId, Message, Payload};
pub use memory::{BlockPtr, MemoryError, MemoryPool, PoolStats, SharedMemory};
pub use port::{ContextDesc, Port, Trap};
pub use service::ServiceCalls;
pub use state::{KernelState, ThreadState};
pub use syscall::{Reply, Request, SyscallError, SyscallType, Syscalls, ThreadSpec};
pub use thread::{Priority, ThreadId, ThreadName};
pub use vector::{InterruptHandler, Vector};

#[cfg(feature = "std")]
pub use port::hosted::{HostedPort, InterruptLine};

/// Spin forever; the terminal state of a target that has nowhere to report to.
pub fn halt() -> ! {
    loop {
        core::hint::spin_loop();
    }
}
