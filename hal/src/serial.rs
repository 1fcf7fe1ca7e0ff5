//! Serial (SCI/UART) byte I/O abstraction

use crate::error::HalResult;

/// Default serial device used by the console and the boot loader.
pub const DEFAULT_DEVICE: usize = 1;

/// Byte-level serial port.
///
/// Mirrors what a small SCI block exposes: a receive-data-full flag, a
/// transmit-data-empty flag, one data register per direction and an
/// interrupt enable bit per direction. Handlers that run in interrupt context
/// and threads that share a port must serialise access themselves.
pub trait SerialPort: Send {
    /// Initialise the port (baud rate, framing); leaves both interrupts disabled.
    fn init(&mut self) -> HalResult<()>;

    /// A received byte is waiting in the data register.
    fn recv_ready(&self) -> bool;

    /// Read one byte, spinning at the hardware level until one arrives.
    fn recv_byte(&mut self) -> u8;

    /// The transmit data register is empty.
    fn send_ready(&self) -> bool;

    /// Write one byte, spinning until the transmit register is empty.
    fn send_byte(&mut self, byte: u8);

    fn rx_interrupt_enabled(&self) -> bool;
    fn enable_rx_interrupt(&mut self);
    fn disable_rx_interrupt(&mut self);

    fn tx_interrupt_enabled(&self) -> bool;
    fn enable_tx_interrupt(&mut self);
    fn disable_tx_interrupt(&mut self);

    /// Write every byte of `data`.
    fn send_all(&mut self, data: &[u8]) {
        for &byte in data {
            self.send_byte(byte);
        }
    }
}
