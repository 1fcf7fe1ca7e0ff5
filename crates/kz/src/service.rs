//! Service calls: kernel operations for interrupt handlers.
//!
//! A handler already runs inside the kernel's interrupt path, so it must not
//! trap. These direct calls do the same work as the matching system calls but
//! never touch the interrupted thread's queue position, and messages they send
//! carry no sender.

use alloc::vec::Vec;

use crate::error::Fatal;
use crate::mailbox::{MailboxId, Payload};
use crate::memory::BlockPtr;
use crate::state::KernelState;
use crate::syscall::SyscallError;
use crate::thread::ThreadId;

pub struct ServiceCalls<'a> {
    state: &'a mut KernelState,
}

impl<'a> ServiceCalls<'a> {
    pub fn new(state: &'a mut KernelState) -> Self {
        Self { state }
    }

    pub fn wakeup(&mut self, id: ThreadId) -> Result<(), SyscallError> {
        self.state.wakeup(id)
    }

    pub fn kmalloc(&mut self, size: usize) -> Result<BlockPtr, Fatal> {
        self.state.kmalloc(size)
    }

    pub fn kmfree(&mut self, block: BlockPtr) -> Result<(), Fatal> {
        self.state.kmfree(block)
    }

    pub fn send(&mut self, mailbox: MailboxId, size: usize, payload: Payload) -> Result<usize, Fatal> {
        self.state.send_message(mailbox, None, size, payload)
    }

    pub fn write(&mut self, block: BlockPtr, data: &[u8]) -> Result<(), Fatal> {
        Ok(self.state.memory.lock().write(block, data)?)
    }

    pub fn read(&mut self, block: BlockPtr, len: usize) -> Result<Vec<u8>, Fatal> {
        Ok(self.state.memory.lock().read(block, len)?)
    }

    /// Thread that was running when the interrupt arrived.
    pub fn current(&self) -> Option<ThreadId> {
        self.state.current
    }
}
