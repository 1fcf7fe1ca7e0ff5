//! Serial HAL error types

use core::fmt;

/// Serial port errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalError {
    /// No serial channel with this index
    NoSuchDevice(usize),
    /// Baud rate the channel cannot generate
    UnsupportedBaudRate(u32),
    /// Overrun or framing error latched by the receiver
    LineError,
    /// Channel already claimed
    Busy,
}

impl fmt::Display for HalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSuchDevice(index) => write!(f, "no serial device {}", index),
            Self::UnsupportedBaudRate(baud) => write!(f, "unsupported baud rate {}", baud),
            Self::LineError => write!(f, "receive line error"),
            Self::Busy => write!(f, "serial device busy"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for HalError {}

/// Result type for HAL operations
pub type HalResult<T> = Result<T, HalError>;
