//! Context-switch capability.
//!
//! The kernel core never looks inside a thread's execution context. A [`Port`]
//! creates one per thread, resumes it with the reply to its last trap, and
//! reports how control came back. Interrupt sources are reached through the
//! port as well, since only the port knows how the hardware delivers them.

use alloc::string::String;

use crate::error::Fatal;
use crate::memory::SharedMemory;
use crate::syscall::{Reply, Request, ThreadInit};
use crate::thread::{StackRegion, ThreadId};
use crate::vector::Vector;

#[cfg(feature = "std")]
pub mod hosted;

/// How control left a thread.
#[derive(Debug)]
pub enum Trap {
    /// System-call trap carrying its request.
    Syscall(Request),
    /// The thread faulted; the text describes the fault.
    Fault(String),
    /// The thread executed a wait-for-interrupt instruction.
    WaitForInterrupt,
}

/// Everything a port needs to build a thread's initial context.
pub struct ContextDesc<'a> {
    pub id: ThreadId,
    pub name: &'a str,
    pub stack: StackRegion,
    /// Initial maskable-interrupt enable.
    pub interrupts_enabled: bool,
    pub init: ThreadInit,
    pub memory: SharedMemory,
}

pub trait Port {
    type Context: Send;

    /// Prepares a context whose first dispatch enters the startup trampoline.
    fn create_context(&mut self, desc: ContextDesc<'_>) -> Result<Self::Context, Fatal>;

    /// Resumes the thread until it traps or faults.
    ///
    /// `reply` is the output of the call the thread trapped with, if any.
    fn restore_context(&mut self, context: &mut Self::Context, reply: Option<Reply>) -> Trap;

    /// Discards the context of a thread that exited.
    fn release_context(&mut self, context: Self::Context);

    /// Whether the thread runs with maskable interrupts enabled.
    fn interrupts_enabled(&self, context: &Self::Context) -> bool;

    /// A raised interrupt, without waiting.
    fn pending_interrupt(&mut self) -> Option<Vector>;

    /// Sleeps until an interrupt is raised. `None` if none ever can be.
    fn wait_for_interrupt(&mut self) -> Option<Vector>;
}
