//! Interrupt and trap vector table.
//!
//! Every entry into the kernel arrives on a vector: the soft-error and
//! system-call vectors are owned by the kernel, the rest belong to devices and
//! get their handlers from `setintr`. An empty entry is legal and does nothing.

use core::fmt;

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::error::Fatal;
use crate::service::ServiceCalls;
use crate::syscall::SyscallError;

/// Interrupt or trap type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Vector(pub u8);

impl Vector {
    /// Thread-level fault; terminates the faulting thread.
    pub const SOFTERR: Self = Self(0);
    /// System-call trap.
    pub const SYSCALL: Self = Self(1);
    /// Serial device interrupt.
    pub const SERINTR: Self = Self(2);

    pub fn is_reserved(self) -> bool {
        self == Self::SOFTERR || self == Self::SYSCALL
    }

    fn index(self) -> usize {
        usize::from(self.0)
    }
}

impl fmt::Display for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::SOFTERR => write!(f, "softerr"),
            Self::SYSCALL => write!(f, "syscall"),
            Self::SERINTR => write!(f, "serintr"),
            Self(n) => write!(f, "vector{n}"),
        }
    }
}

/// Device interrupt handler. Runs in interrupt context and must only use
/// service calls.
pub type InterruptHandler = Box<dyn FnMut(&mut ServiceCalls<'_>) -> Result<(), Fatal> + Send>;

pub(crate) enum VectorEntry {
    Syscall,
    SoftError,
    Device(InterruptHandler),
}

/// Handler kind, detached from the table borrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VectorKind {
    Syscall,
    SoftError,
    Device,
}

pub(crate) struct VectorTable {
    entries: Vec<Option<VectorEntry>>,
}

impl VectorTable {
    /// Table with the kernel's own vectors installed.
    pub(crate) fn new(count: usize) -> Self {
        let mut entries: Vec<Option<VectorEntry>> = (0..count).map(|_| None).collect();
        entries[Vector::SOFTERR.index()] = Some(VectorEntry::SoftError);
        entries[Vector::SYSCALL.index()] = Some(VectorEntry::Syscall);
        Self { entries }
    }

    pub(crate) fn kind(&self, vector: Vector) -> Option<VectorKind> {
        self.entries
            .get(vector.index())
            .and_then(Option::as_ref)
            .map(|entry| match entry {
                VectorEntry::Syscall => VectorKind::Syscall,
                VectorEntry::SoftError => VectorKind::SoftError,
                VectorEntry::Device(_) => VectorKind::Device,
            })
    }

    pub(crate) fn handler_mut(&mut self, vector: Vector) -> Option<&mut InterruptHandler> {
        match self.entries.get_mut(vector.index()) {
            Some(Some(VectorEntry::Device(handler))) => Some(handler),
            _ => None,
        }
    }

    /// Installs a device handler, replacing any previous one.
    pub(crate) fn install(
        &mut self,
        vector: Vector,
        handler: InterruptHandler,
    ) -> Result<(), SyscallError> {
        if vector.is_reserved() {
            return Err(SyscallError::ReservedVector(vector));
        }
        let slot = self
            .entries
            .get_mut(vector.index())
            .ok_or(SyscallError::NoSuchVector(vector))?;
        *slot = Some(VectorEntry::Device(handler));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> InterruptHandler {
        Box::new(|_: &mut ServiceCalls<'_>| Ok::<(), Fatal>(()))
    }

    #[test]
    fn kernel_vectors_are_preinstalled() {
        let table = VectorTable::new(3);
        assert_eq!(table.kind(Vector::SOFTERR), Some(VectorKind::SoftError));
        assert_eq!(table.kind(Vector::SYSCALL), Some(VectorKind::Syscall));
        assert_eq!(table.kind(Vector::SERINTR), None);
        assert_eq!(table.kind(Vector(9)), None);
    }

    #[test]
    fn device_handlers_cannot_replace_kernel_vectors() {
        let mut table = VectorTable::new(3);

        assert_eq!(
            table.install(Vector::SYSCALL, noop()),
            Err(SyscallError::ReservedVector(Vector::SYSCALL))
        );
        assert_eq!(
            table.install(Vector(3), noop()),
            Err(SyscallError::NoSuchVector(Vector(3)))
        );
        assert!(table.install(Vector::SERINTR, noop()).is_ok());
        assert_eq!(table.kind(Vector::SERINTR), Some(VectorKind::Device));
        assert!(table.handler_mut(Vector::SERINTR).is_some());
    }
}
