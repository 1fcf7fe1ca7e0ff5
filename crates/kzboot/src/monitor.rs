//! The `kzload>` boot monitor.
//!
//! Commands typed on the serial console:
//!
//! - `load` - receive an image over XMODEM into the load buffer
//! - `dump` - hex dump of the load buffer
//! - `run`  - load the buffered ELF image and hand back its entry point

use core::fmt::{self, Write};

use alloc::vec;
use alloc::vec::Vec;

use hal::SerialPort;
use log::{info, warn};
use thiserror::Error;

use crate::elf::{self, ElfError, LoadTarget};
use crate::xmodem::{Receiver, XmodemError};

pub const BANNER: &str = "kzload (kozos boot loader) started.\n";
pub const PROMPT: &str = "kzload> ";

/// Longest command line; extra characters are echoed but dropped.
const LINE_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MonitorError {
    #[error("xmodem: {0}")]
    Xmodem(#[from] XmodemError),
    #[error("elf: {0}")]
    Elf(#[from] ElfError),
    #[error("nothing loaded")]
    NoImage,
    #[error("unknown command")]
    UnknownCommand,
}

/// Console output with `\n` sent as `\r\n`.
struct Console<'a, S: SerialPort>(&'a mut S);

impl<S: SerialPort> Write for Console<'_, S> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.0.send_byte(b'\r');
            }
            self.0.send_byte(byte);
        }
        Ok(())
    }
}

pub struct Monitor<S: SerialPort, T: LoadTarget> {
    serial: S,
    target: T,
    buffer: Vec<u8>,
    size: Option<usize>,
    nak_interval: Option<u32>,
}

impl<S: SerialPort, T: LoadTarget> Monitor<S, T> {
    /// A monitor with a `buffer_size`-byte XMODEM load buffer.
    pub fn new(serial: S, target: T, buffer_size: usize) -> Self {
        Self {
            serial,
            target,
            buffer: vec![0; buffer_size],
            size: None,
            nak_interval: None,
        }
    }

    /// Line polls between XMODEM start NAKs.
    pub fn nak_interval(mut self, polls: u32) -> Self {
        self.nak_interval = Some(polls);
        self
    }

    /// The received image, if a `load` succeeded.
    pub fn image(&self) -> Option<&[u8]> {
        self.size.map(|size| &self.buffer[..size])
    }

    pub fn into_parts(self) -> (S, T) {
        (self.serial, self.target)
    }

    fn console(&mut self) -> Console<'_, S> {
        Console(&mut self.serial)
    }

    /// Serves commands until `run` succeeds, then returns the entry point.
    pub fn run(&mut self) -> u32 {
        let _ = self.console().write_str(BANNER);
        loop {
            let _ = self.console().write_str(PROMPT);
            let line = self.read_line();
            match self.execute(&line) {
                Ok(Some(entry)) => return entry,
                Ok(None) => {}
                Err(err) => self.report(err),
            }
        }
    }

    /// Runs one command line.
    ///
    /// Returns the entry point once an image has been loaded by `run`.
    pub fn execute(&mut self, line: &[u8]) -> Result<Option<u32>, MonitorError> {
        match line {
            b"load" => {
                self.load()?;
                Ok(None)
            }
            b"dump" => {
                self.dump()?;
                Ok(None)
            }
            b"run" => self.start().map(Some),
            _ => Err(MonitorError::UnknownCommand),
        }
    }

    fn load(&mut self) -> Result<(), MonitorError> {
        self.size = None;
        let mut receiver = Receiver::new(&mut self.serial);
        if let Some(polls) = self.nak_interval {
            receiver = receiver.nak_interval(polls);
        }
        let size = receiver.receive(&mut self.buffer)?;
        self.size = Some(size);
        info!("kzload: {size} bytes loaded");
        let _ = self.console().write_str("\nXMODEM receive succeeded.\n");
        Ok(())
    }

    fn dump(&mut self) -> Result<(), MonitorError> {
        let size = self.size.ok_or(MonitorError::NoImage)?;
        let mut out = Console(&mut self.serial);
        let _ = writeln!(out, "size: {size:x}");
        for (i, byte) in self.buffer[..size].iter().enumerate() {
            let _ = write!(out, "{byte:02x}");
            let _ = match i & 0xF {
                15 => out.write_str("\n"),
                7 => out.write_str("  "),
                _ => out.write_str(" "),
            };
        }
        let _ = out.write_str("\n");
        Ok(())
    }

    fn start(&mut self) -> Result<u32, MonitorError> {
        let size = self.size.ok_or(MonitorError::NoImage)?;
        let entry = elf::load(&self.buffer[..size], &mut self.target)?;
        let _ = writeln!(self.console(), "starting from entry point: {entry:x}");
        Ok(entry)
    }

    fn report(&mut self, err: MonitorError) {
        warn!("kzload: {err}");
        let message = match err {
            MonitorError::Xmodem(_) => "\nXMODEM receive error!\n",
            MonitorError::Elf(_) => "run error!\n",
            MonitorError::NoImage => "no data.\n",
            MonitorError::UnknownCommand => "unknown.\n",
        };
        let _ = self.console().write_str(message);
    }

    /// Reads one echoed line; CR ends it like LF.
    fn read_line(&mut self) -> Vec<u8> {
        let mut line = Vec::with_capacity(LINE_CAPACITY);
        loop {
            let mut byte = self.serial.recv_byte();
            if byte == b'\r' {
                byte = b'\n';
            }
            if byte == b'\n' {
                self.serial.send_byte(b'\r');
            }
            self.serial.send_byte(byte);
            if byte == b'\n' {
                return line;
            }
            if line.len() < LINE_CAPACITY {
                line.push(byte);
            }
        }
    }
}
