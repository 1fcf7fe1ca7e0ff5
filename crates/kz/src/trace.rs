//! Trace hook plumbing and the record identifiers the kernel emits.

#[cfg(feature = "trace")]
pub use kzs::{TraceError, TraceHook};

#[cfg(feature = "trace")]
pub type TraceResult = Result<(), TraceError>;

#[cfg(not(feature = "trace"))]
use alloc::sync::Arc;

#[cfg(not(feature = "trace"))]
pub type TraceError = core::convert::Infallible;

#[cfg(not(feature = "trace"))]
pub type TraceResult = Result<(), TraceError>;

#[cfg(not(feature = "trace"))]
pub type TraceHook = Arc<dyn Fn(u8, &[u8], bool) -> TraceResult + Send + Sync>;

/// Little-endian 16-bit record field; larger values saturate at `0xFFFF`.
pub(crate) fn field16(value: usize) -> [u8; 2] {
    u16::try_from(value).unwrap_or(u16::MAX).to_le_bytes()
}

/// 8-bit record field; larger values saturate at `0xFF`.
pub(crate) fn field8(value: usize) -> u8 {
    u8::try_from(value).unwrap_or(u8::MAX)
}

/// Canonical trace record identifiers.
pub mod records {
    /// Thread lifecycle records.
    pub mod thread {
        /// A control record was filled and the thread enqueued (`[thread, priority]`).
        pub const CREATE: u8 = 1;
        /// A thread left through `exit`, explicitly or by returning (`[thread]`).
        pub const EXIT: u8 = 2;
        /// A thread was terminated by the soft-error vector (`[thread]`).
        pub const DOWN: u8 = 3;
        /// `[thread, old, new]`
        pub const CHPRI: u8 = 4;
        /// A sleeping thread was made ready (`[thread]`).
        pub const WAKEUP: u8 = 5;
    }

    /// Scheduler records.
    pub mod sched {
        /// The scheduler selected the next thread (`[thread, priority]`).
        pub const NEXT: u8 = 50;
        /// A thread was enqueued at the tail of its ready queue.
        pub const READY: u8 = 51;
        /// A thread was unlinked from its ready queue.
        pub const UNREADY: u8 = 52;
        /// The running thread waits for an interrupt.
        pub const IDLE: u8 = 53;
    }

    /// Trap and interrupt entry records.
    pub mod trap {
        /// System call entry (`[thread, op code]`).
        pub const SYSCALL: u8 = 70;
        /// Vector entry (`[vector]`).
        pub const INTERRUPT: u8 = 71;
        /// A vector fired with no handler installed.
        pub const UNHANDLED: u8 = 72;
    }

    /// Mailbox records.
    pub mod mailbox {
        /// `[mailbox, sender, size_lo, size_hi]`, sender 0xFF for service calls.
        /// Sizes above 0xFFFF are recorded as 0xFFFF.
        pub const SEND: u8 = 90;
        /// `[mailbox, receiver]`
        pub const DELIVER: u8 = 91;
        /// Receiver blocked on an empty mailbox (`[mailbox, receiver]`).
        pub const BLOCK: u8 = 92;
    }

    /// Memory pool records.
    pub mod memory {
        /// `[class_size_lo, class_size_hi, free]`
        pub const ALLOC: u8 = 110;
        pub const FREE: u8 = 111;
    }

    /// Fatal shutdown.
    pub const SYSDOWN: u8 = 127;
}
