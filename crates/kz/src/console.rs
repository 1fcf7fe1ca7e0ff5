//! Console driver and command shell threads.
//!
//! The console driver thread owns a serial port. Other threads talk to it
//! through the `CONSOUTPUT` mailbox with messages of the form
//! `[console, command, data...]`:
//!
//! - `u` + serial number: start using the console; received lines are sent
//!   to `CONSINPUT`.
//! - `w` + bytes: write bytes, `\n` becoming `\r\n`.
//!
//! The serial interrupt handler shares the transmit buffer with the driver
//! thread, so both only touch the console registers inside a critical section.

use core::cell::RefCell;

use alloc::vec::Vec;

use critical_section::Mutex;
use hal::serial::{SerialPort, DEFAULT_DEVICE};
use log::{debug, error, warn};

use crate::error::Fatal;
use crate::mailbox::{MailboxId, Payload};
use crate::service::ServiceCalls;
use crate::sync::Arc;
use crate::syscall::{Syscalls, ThreadSpec};
use crate::thread::ThreadId;
use crate::vector::Vector;

/// Line buffer size; also the size of each block carrying a received line.
pub const CONS_BUFFER_SIZE: usize = 24;
const SEND_BUFFER_SIZE: usize = 64;

pub const CMD_USE: u8 = b'u';
pub const CMD_WRITE: u8 = b'w';

/// Priority the boot thread drops to once it becomes the idle loop.
pub const IDLE_PRIORITY: u8 = 15;

pub const PROMPT: &[u8] = b"command> ";

struct ConsoleReg<S> {
    owner: Option<ThreadId>,
    index: usize,
    serial: S,
    send_buf: heapless::Deque<u8, SEND_BUFFER_SIZE>,
    recv_buf: heapless::Vec<u8, CONS_BUFFER_SIZE>,
}

type SharedConsole<S> = Arc<Mutex<RefCell<ConsoleReg<S>>>>;

impl<S: SerialPort> ConsoleReg<S> {
    fn new(serial: S) -> Self {
        Self {
            owner: None,
            index: 0,
            serial,
            send_buf: heapless::Deque::new(),
            recv_buf: heapless::Vec::new(),
        }
    }

    fn send_char(&mut self) {
        if let Some(byte) = self.send_buf.pop_front() {
            self.serial.send_byte(byte);
        }
    }

    /// Queues `data` and starts transmission if it is not already running.
    ///
    /// Later bytes go out from the transmit interrupt, which disables itself
    /// once the buffer drains.
    fn send_string(&mut self, data: &[u8]) {
        for &byte in data {
            if byte == b'\n' {
                self.push_send(b'\r');
            }
            self.push_send(byte);
        }
        if !self.send_buf.is_empty() && !self.serial.tx_interrupt_enabled() {
            self.serial.enable_tx_interrupt();
            self.send_char();
        }
    }

    fn push_send(&mut self, byte: u8) {
        if self.send_buf.push_back(byte).is_err() {
            warn!("console: transmit buffer full, byte dropped");
        }
    }

    fn intrproc(&mut self, svc: &mut ServiceCalls<'_>) -> Result<(), Fatal> {
        if self.owner.is_none() {
            return Ok(());
        }

        if self.serial.recv_ready() {
            let mut byte = self.serial.recv_byte();
            if byte == b'\r' {
                byte = b'\n';
            }
            self.send_string(&[byte]);

            if byte != b'\n' {
                if self.recv_buf.push(byte).is_err() {
                    warn!("console: line too long, byte dropped");
                }
            } else {
                let block = svc.kmalloc(CONS_BUFFER_SIZE)?;
                svc.write(block, &self.recv_buf)?;
                svc.send(MailboxId::CONSINPUT, self.recv_buf.len(), Payload::Heap(block))?;
                self.recv_buf.clear();
            }
        }

        if self.serial.send_ready() {
            if self.send_buf.is_empty() {
                self.serial.disable_tx_interrupt();
            } else {
                self.send_char();
            }
        }
        Ok(())
    }

    fn command(&mut self, sender: Option<ThreadId>, command: &[u8]) {
        match command {
            [CMD_USE, index, ..] => {
                self.owner = sender;
                self.index = usize::from(index.wrapping_sub(b'0'));
                self.send_buf.clear();
                self.recv_buf.clear();
                if let Err(err) = self.serial.init() {
                    warn!("console: serial{} init failed: {err}", self.index);
                }
                self.serial.enable_rx_interrupt();
                debug!("console: serial{} in use by {sender:?}", self.index);
            }
            [CMD_WRITE, data @ ..] => self.send_string(data),
            _ => warn!("console: unknown command {command:?}"),
        }
    }
}

/// Console driver thread for `serial`.
pub fn consdrv<S>(serial: S) -> ThreadSpec
where
    S: SerialPort + 'static,
{
    ThreadSpec::new("consdrv", 1, 0x200, move |sys, _| consdrv_main(sys, serial))
}

fn consdrv_main<S>(sys: &Syscalls, serial: S) -> i32
where
    S: SerialPort + 'static,
{
    let console: SharedConsole<S> = Arc::new(Mutex::new(RefCell::new(ConsoleReg::new(serial))));

    let shared = Arc::clone(&console);
    let installed = sys.setintr(Vector::SERINTR, move |svc| {
        critical_section::with(|cs| shared.borrow_ref_mut(cs).intrproc(svc))
    });
    if let Err(err) = installed {
        error!("consdrv: {err}");
        return 1;
    }

    loop {
        let message = sys.recv(MailboxId::CONSOUTPUT);
        match sys.message_bytes(&message) {
            Ok(bytes) => match bytes.split_first() {
                Some((b'0', command)) => critical_section::with(|cs| {
                    console.borrow_ref_mut(cs).command(message.sender, command)
                }),
                _ => warn!("consdrv: message for unknown console"),
            },
            Err(err) => warn!("consdrv: unreadable message: {err}"),
        }
        if let Payload::Heap(block) = message.payload {
            sys.kmfree(block);
        }
    }
}

fn send_use(sys: &Syscalls, index: usize) {
    let message = [b'0', CMD_USE, b'0' + index as u8];
    if let Err(err) = sys.send_bytes(MailboxId::CONSOUTPUT, &message) {
        warn!("command: {err}");
    }
}

fn send_write(sys: &Syscalls, text: &[u8]) {
    let mut message = Vec::with_capacity(text.len() + 2);
    message.extend_from_slice(&[b'0', CMD_WRITE]);
    message.extend_from_slice(text);
    if let Err(err) = sys.send_bytes(MailboxId::CONSOUTPUT, &message) {
        warn!("command: {err}");
    }
}

/// Command shell thread: `echo <text>`, anything else is unknown.
pub fn command() -> ThreadSpec {
    ThreadSpec::new("command", 8, 0x200, |sys, _| command_main(sys))
}

fn command_main(sys: &Syscalls) -> i32 {
    send_use(sys, DEFAULT_DEVICE);

    loop {
        send_write(sys, PROMPT);

        let message = sys.recv(MailboxId::CONSINPUT);
        match sys.message_bytes(&message) {
            Ok(line) if line.starts_with(b"echo") => {
                send_write(sys, &line[4..]);
                send_write(sys, b"\n");
            }
            Ok(_) => send_write(sys, b"unknown.\n"),
            Err(err) => warn!("command: unreadable line: {err}"),
        }
        // Lines are allocated by the driver and freed here.
        if let Payload::Heap(block) = message.payload {
            sys.kmfree(block);
        }
    }
}

/// Boot thread: starts the console threads, then idles.
///
/// Created at priority 0 with interrupts masked; it drops to
/// [`IDLE_PRIORITY`] and unmasks once the system threads exist.
pub fn start_threads<S>(serial: S) -> ThreadSpec
where
    S: SerialPort + 'static,
{
    ThreadSpec::new("idle", 0, 0x100, move |sys, _| {
        sys.run(consdrv(serial));
        sys.run(command());

        sys.chpri(IDLE_PRIORITY);
        sys.enable_interrupts();

        loop {
            sys.wait_for_interrupt();
        }
    })
}
