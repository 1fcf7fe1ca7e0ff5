//! XMODEM (checksum variant) receiver.
//!
//! The receiver polls the line and sends NAK at a fixed interval until the
//! sender starts. Each block is then framed as
//!
//! ```text
//! SOH | block# | !block# | 128 data bytes | sum of data bytes (mod 256)
//! ```
//!
//! and answered with ACK or NAK. The transfer ends with EOT (acknowledged) or
//! is aborted with CAN.

use hal::SerialPort;
use log::{debug, trace, warn};
use thiserror::Error;

pub const SOH: u8 = 0x01;
pub const EOT: u8 = 0x04;
pub const ACK: u8 = 0x06;
pub const NAK: u8 = 0x15;
pub const CAN: u8 = 0x18;
/// Padding for the tail of the last block.
pub const EOF: u8 = 0x1A;

pub const BLOCK_SIZE: usize = 128;
/// SOH, block number, its complement, data, checksum.
pub const FRAME_SIZE: usize = BLOCK_SIZE + 4;

/// Line polls between two start NAKs.
const DEFAULT_NAK_INTERVAL: u32 = 200_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum XmodemError {
    #[error("transfer cancelled by the sender")]
    Cancelled,
    #[error("unexpected byte {0:#04x} between blocks")]
    UnexpectedByte(u8),
    #[error("image larger than the {capacity}-byte load buffer")]
    BufferFull { capacity: usize },
    #[error("no sender after {naks} NAKs")]
    NoSender { naks: u32 },
}

/// Why a single block was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockFault {
    Sequence { got: u8 },
    Complement,
    Checksum,
}

/// Sum of the data bytes, modulo 256.
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |sum, &byte| sum.wrapping_add(byte))
}

/// Builds one frame for block `number`; a short `data` is padded with [`EOF`].
pub fn frame_block(number: u8, data: &[u8]) -> [u8; FRAME_SIZE] {
    let mut frame = [EOF; FRAME_SIZE];
    frame[0] = SOH;
    frame[1] = number;
    frame[2] = !number;
    let len = data.len().min(BLOCK_SIZE);
    frame[3..3 + len].copy_from_slice(&data[..len]);
    frame[FRAME_SIZE - 1] = checksum(&frame[3..3 + BLOCK_SIZE]);
    frame
}

/// Receives one image into a caller-supplied buffer.
pub struct Receiver<'a, S: SerialPort> {
    serial: &'a mut S,
    nak_interval: u32,
    max_naks: Option<u32>,
}

impl<'a, S: SerialPort> Receiver<'a, S> {
    pub fn new(serial: &'a mut S) -> Self {
        Self {
            serial,
            nak_interval: DEFAULT_NAK_INTERVAL,
            max_naks: None,
        }
    }

    /// Number of line polls between start NAKs.
    pub fn nak_interval(mut self, polls: u32) -> Self {
        self.nak_interval = polls.max(1);
        self
    }

    /// Stop waiting for a sender after `naks` unanswered NAKs.
    ///
    /// By default the receiver waits forever.
    pub fn give_up_after(mut self, naks: u32) -> Self {
        self.max_naks = Some(naks);
        self
    }

    /// Runs one transfer into `buf` and returns the number of bytes received,
    /// always a multiple of [`BLOCK_SIZE`].
    pub fn receive(&mut self, buf: &mut [u8]) -> Result<usize, XmodemError> {
        let mut size = 0;
        let mut expected: u8 = 1;
        let mut receiving = false;

        loop {
            if !receiving {
                self.wait_for_sender()?;
            }

            match self.serial.recv_byte() {
                EOT => {
                    self.serial.send_byte(ACK);
                    debug!("xmodem: {size} bytes received");
                    return Ok(size);
                }
                CAN => {
                    warn!("xmodem: cancelled after {size} bytes");
                    return Err(XmodemError::Cancelled);
                }
                SOH => {
                    receiving = true;
                    match self.read_block(expected) {
                        Ok(block) => {
                            let Some(slot) = buf.get_mut(size..size + BLOCK_SIZE) else {
                                self.serial.send_all(&[CAN, CAN]);
                                return Err(XmodemError::BufferFull {
                                    capacity: buf.len(),
                                });
                            };
                            slot.copy_from_slice(&block);
                            size += BLOCK_SIZE;
                            trace!("xmodem: block {expected} ok");
                            expected = expected.wrapping_add(1);
                            self.serial.send_byte(ACK);
                        }
                        // Our ACK was lost and the sender repeated the block.
                        Err(BlockFault::Sequence { got })
                            if size > 0 && got == expected.wrapping_sub(1) =>
                        {
                            debug!("xmodem: block {got} repeated");
                            self.serial.send_byte(ACK);
                        }
                        Err(fault) => {
                            debug!("xmodem: block {expected} refused: {fault:?}");
                            self.serial.send_byte(NAK);
                        }
                    }
                }
                other if receiving => return Err(XmodemError::UnexpectedByte(other)),
                other => trace!("xmodem: ignoring {other:#04x} before start"),
            }
        }
    }

    fn wait_for_sender(&mut self) -> Result<(), XmodemError> {
        let mut polls = 0;
        let mut naks = 0;
        while !self.serial.recv_ready() {
            polls += 1;
            if polls < self.nak_interval {
                core::hint::spin_loop();
                continue;
            }
            polls = 0;
            if self.max_naks.is_some_and(|max| naks >= max) {
                return Err(XmodemError::NoSender { naks });
            }
            self.serial.send_byte(NAK);
            naks += 1;
        }
        Ok(())
    }

    /// Reads the rest of a frame after SOH.
    ///
    /// The whole frame is consumed even when an early field is wrong, so the
    /// next byte on the line is the start of the retransmission.
    fn read_block(&mut self, expected: u8) -> Result<[u8; BLOCK_SIZE], BlockFault> {
        let number = self.serial.recv_byte();
        let complement = self.serial.recv_byte();
        let mut block = [0u8; BLOCK_SIZE];
        for byte in block.iter_mut() {
            *byte = self.serial.recv_byte();
        }
        let sum = self.serial.recv_byte();

        if number ^ complement != 0xFF {
            return Err(BlockFault::Complement);
        }
        if checksum(&block) != sum {
            return Err(BlockFault::Checksum);
        }
        if number != expected {
            return Err(BlockFault::Sequence { got: number });
        }
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_layout() {
        let frame = frame_block(3, b"abc");
        assert_eq!(frame[..3], [SOH, 3, 0xFC]);
        assert_eq!(&frame[3..6], b"abc");
        assert!(frame[6..FRAME_SIZE - 1].iter().all(|&b| b == EOF));
        assert_eq!(frame[FRAME_SIZE - 1], checksum(&frame[3..FRAME_SIZE - 1]));
    }

    #[test]
    fn checksum_wraps() {
        assert_eq!(checksum(&[0xFF, 0x02]), 0x01);
        assert_eq!(checksum(&[]), 0);
    }
}
