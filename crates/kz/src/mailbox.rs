//! Mailbox IPC.
//!
//! A mailbox is a FIFO of messages plus at most one thread waiting to receive.
//! Sending never blocks; when a receiver is already waiting the head message
//! is handed to it in the same call. A second concurrent receiver on one
//! mailbox is a fatal error, not a queued wait.

use core::fmt;

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use log::trace;

use crate::error::Fatal;
use crate::memory::BlockPtr;
use crate::state::KernelState;
use crate::syscall::Reply;
use crate::thread::ThreadId;
use crate::trace::{field16, records};

/// Pool bytes accounted to each queued message.
pub const MESSAGE_NODE_SIZE: usize = 16;

/// Small-integer mailbox address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MailboxId(pub u8);

impl MailboxId {
    pub const MSGBOX1: Self = Self(0);
    pub const MSGBOX2: Self = Self(1);
    /// Lines typed on the console, sent by the console driver.
    pub const CONSINPUT: Self = Self(2);
    /// Commands for the console driver.
    pub const CONSOUTPUT: Self = Self(3);

    fn index(self) -> usize {
        usize::from(self.0)
    }
}

impl fmt::Display for MailboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mbox{}", self.0)
    }
}

/// Message body.
///
/// Who frees a [`Payload::Heap`] block is agreed between sender and receiver;
/// the kernel only moves the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    Heap(BlockPtr),
    Static(&'static [u8]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    /// `None` for messages sent by interrupt handlers.
    pub sender: Option<ThreadId>,
    pub size: usize,
    pub payload: Payload,
}

#[derive(Debug)]
struct MessageNode {
    node: BlockPtr,
    message: Message,
}

#[derive(Debug, Default)]
struct Mailbox {
    receiver: Option<ThreadId>,
    queue: VecDeque<MessageNode>,
}

pub struct Mailboxes {
    boxes: Vec<Mailbox>,
}

impl Mailboxes {
    pub fn new(count: usize) -> Self {
        Self {
            boxes: (0..count).map(|_| Mailbox::default()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// Thread waiting on `mailbox`, if any.
    pub fn receiver(&self, mailbox: MailboxId) -> Option<ThreadId> {
        self.boxes.get(mailbox.index()).and_then(|mb| mb.receiver)
    }

    /// Messages queued on `mailbox`.
    pub fn pending(&self, mailbox: MailboxId) -> usize {
        self.boxes
            .get(mailbox.index())
            .map_or(0, |mb| mb.queue.len())
    }

    /// Mailbox `thread` is blocked on.
    pub fn waiting_on(&self, thread: ThreadId) -> Option<MailboxId> {
        self.boxes
            .iter()
            .position(|mb| mb.receiver == Some(thread))
            .map(|index| MailboxId(index as u8))
    }

    fn get_mut(&mut self, mailbox: MailboxId) -> Result<&mut Mailbox, Fatal> {
        self.boxes
            .get_mut(mailbox.index())
            .ok_or(Fatal::NoSuchMailbox(mailbox))
    }
}

impl KernelState {
    /// Appends a message and hands it straight to a waiting receiver.
    ///
    /// The sender is never blocked. Returns `size`.
    pub(crate) fn send_message(
        &mut self,
        mailbox: MailboxId,
        sender: Option<ThreadId>,
        size: usize,
        payload: Payload,
    ) -> Result<usize, Fatal> {
        self.mailboxes.get_mut(mailbox)?;
        let node = self.kmalloc(MESSAGE_NODE_SIZE)?;
        let message = Message {
            sender,
            size,
            payload,
        };
        let waiting = {
            let mb = self.mailboxes.get_mut(mailbox)?;
            mb.queue.push_back(MessageNode { node, message });
            mb.receiver.is_some()
        };

        let size_bytes = field16(size);
        let from = sender.map_or(0xFF, |id| id.0);
        self.emit(
            records::mailbox::SEND,
            &[mailbox.0, from, size_bytes[0], size_bytes[1]],
        );
        trace!("{mailbox}: queued {size} bytes from {sender:?}");

        if waiting {
            self.deliver(mailbox)?;
        }
        Ok(size)
    }

    /// Registers `receiver` on `mailbox` and consumes the head message if one
    /// is queued.
    ///
    /// Returns `true` when a message was delivered; otherwise the receiver
    /// stays registered and blocked.
    pub(crate) fn recv_message(
        &mut self,
        mailbox: MailboxId,
        receiver: ThreadId,
    ) -> Result<bool, Fatal> {
        let pending = {
            let mb = self.mailboxes.get_mut(mailbox)?;
            if let Some(busy) = mb.receiver {
                return Err(Fatal::ReceiverBusy {
                    mailbox,
                    receiver: busy,
                });
            }
            mb.receiver = Some(receiver);
            !mb.queue.is_empty()
        };

        if pending {
            self.deliver(mailbox)?;
        } else {
            self.emit(records::mailbox::BLOCK, &[mailbox.0, receiver.0]);
            trace!("{mailbox}: {receiver} blocked");
        }
        Ok(pending)
    }

    fn deliver(&mut self, mailbox: MailboxId) -> Result<(), Fatal> {
        let (receiver, entry) = {
            let mb = self.mailboxes.get_mut(mailbox)?;
            match (mb.receiver, mb.queue.pop_front()) {
                (Some(receiver), Some(entry)) => {
                    mb.receiver = None;
                    (receiver, entry)
                }
                (_, entry) => {
                    if let Some(entry) = entry {
                        mb.queue.push_front(entry);
                    }
                    return Ok(());
                }
            }
        };

        self.kmfree(entry.node)?;
        self.set_reply(receiver, Reply::Received(entry.message));
        self.make_ready(receiver);
        self.emit(records::mailbox::DELIVER, &[mailbox.0, receiver.0]);
        trace!("{mailbox}: delivered to {receiver}");
        Ok(())
    }
}
