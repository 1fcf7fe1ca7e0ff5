//! # kzboot - Boot Loader for kz
//!
//! Everything that runs before the kernel: an XMODEM receiver that pulls an
//! image over the default serial device, an ELF32 loader that validates the
//! image and copies its loadable segments into place, and the small
//! `kzload>` monitor that ties the two together.
//!
//! All three only need a [`hal::SerialPort`] and, for loading, a
//! [`LoadTarget`] describing the memory the image is copied into.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod elf;
pub mod monitor;
pub mod xmodem;

pub use elf::{ElfError, ElfImage, LoadTarget, ProgramHeader, RamImage};
pub use monitor::{Monitor, MonitorError};
pub use xmodem::{Receiver, XmodemError};
