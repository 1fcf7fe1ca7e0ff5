//! Hardware Abstraction Layer (HAL) for the kz kernel
//!
//! This crate provides the one peripheral the kernel talks to directly: a
//! byte-oriented serial port with per-direction interrupt enables. The console
//! driver and the XMODEM receiver both sit on top of [`serial::SerialPort`].
//!
//! With the `std` feature, [`virt::VirtualSerial`] emulates a UART in memory so
//! kernels can be exercised on a development host.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod error;
pub mod serial;

#[cfg(feature = "std")]
pub mod virt;

// Re-export commonly used types
pub use error::{HalError, HalResult};
pub use serial::SerialPort;
