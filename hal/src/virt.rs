//! In-memory serial port for hosted kernels and tests.
//!
//! A [`VirtualSerial`] is a cheap handle onto one emulated SCI channel. The
//! kernel side uses it through [`SerialPort`]; the "terminal" side injects
//! received bytes with [`VirtualSerial::inject`] and collects transmitted ones
//! with [`VirtualSerial::take_output`]. Interrupt requests are level-triggered:
//! the installed request line is raised whenever an enabled condition holds
//! after a register access.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::HalResult;
use crate::serial::SerialPort;

/// Callback used to raise the channel's interrupt request.
pub type IrqLine = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Line {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    rx_irq: bool,
    tx_irq: bool,
}

impl Line {
    fn irq_pending(&self) -> bool {
        (self.rx_irq && !self.rx.is_empty()) || self.tx_irq
    }
}

struct Shared {
    line: Mutex<Line>,
    rx_arrived: Condvar,
    tx_written: Condvar,
    irq: Mutex<Option<IrqLine>>,
}

/// Emulated serial channel; clones share the same registers.
#[derive(Clone)]
pub struct VirtualSerial {
    shared: Arc<Shared>,
}

impl Default for VirtualSerial {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualSerial {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                line: Mutex::new(Line::default()),
                rx_arrived: Condvar::new(),
                tx_written: Condvar::new(),
                irq: Mutex::new(None),
            }),
        }
    }

    /// Connect the interrupt request line.
    pub fn connect_irq(&self, irq: IrqLine) {
        *self.shared.irq.lock().unwrap_or_else(|e| e.into_inner()) = Some(irq);
        self.raise_if_pending();
    }

    /// Feed bytes into the receive side, as if typed on the terminal.
    pub fn inject(&self, bytes: &[u8]) {
        {
            let mut line = self.line();
            line.rx.extend(bytes.iter().copied());
        }
        self.shared.rx_arrived.notify_all();
        self.raise_if_pending();
    }

    /// Drain everything transmitted so far.
    pub fn take_output(&self) -> Vec<u8> {
        std::mem::take(&mut self.line().tx)
    }

    /// Copy of everything transmitted so far, without draining it.
    pub fn output(&self) -> Vec<u8> {
        self.line().tx.clone()
    }

    /// Block until the transmitted bytes contain `pattern` or `timeout` elapses.
    ///
    /// Returns the transmit buffer as seen at that point.
    pub fn wait_for_output(&self, pattern: &[u8], timeout: Duration) -> Option<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut line = self.line();
        loop {
            if contains(&line.tx, pattern) {
                return Some(line.tx.clone());
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            line = self
                .shared
                .tx_written
                .wait_timeout(line, deadline - now)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
    }

    fn line(&self) -> MutexGuard<'_, Line> {
        self.shared.line.lock().unwrap_or_else(|e| e.into_inner())
    }

    // The request callback runs without the register lock held; it may call
    // straight back into the port.
    fn raise_if_pending(&self) {
        if !self.line().irq_pending() {
            return;
        }
        let irq = self
            .shared
            .irq
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(irq) = irq {
            irq();
        }
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}

impl SerialPort for VirtualSerial {
    fn init(&mut self) -> HalResult<()> {
        let mut line = self.line();
        line.rx_irq = false;
        line.tx_irq = false;
        Ok(())
    }

    fn recv_ready(&self) -> bool {
        !self.line().rx.is_empty()
    }

    fn recv_byte(&mut self) -> u8 {
        let byte = {
            let mut line = self.line();
            loop {
                if let Some(byte) = line.rx.pop_front() {
                    break byte;
                }
                line = self
                    .shared
                    .rx_arrived
                    .wait(line)
                    .unwrap_or_else(|e| e.into_inner());
            }
        };
        self.raise_if_pending();
        byte
    }

    fn send_ready(&self) -> bool {
        true
    }

    fn send_byte(&mut self, byte: u8) {
        self.line().tx.push(byte);
        self.shared.tx_written.notify_all();
        self.raise_if_pending();
    }

    fn rx_interrupt_enabled(&self) -> bool {
        self.line().rx_irq
    }

    fn enable_rx_interrupt(&mut self) {
        self.line().rx_irq = true;
        self.raise_if_pending();
    }

    fn disable_rx_interrupt(&mut self) {
        self.line().rx_irq = false;
    }

    fn tx_interrupt_enabled(&self) -> bool {
        self.line().tx_irq
    }

    fn enable_tx_interrupt(&mut self) {
        self.line().tx_irq = true;
        self.raise_if_pending();
    }

    fn disable_tx_interrupt(&mut self) {
        self.line().tx_irq = false;
    }
}
