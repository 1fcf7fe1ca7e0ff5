//! Hosted port: each kernel thread runs on its own OS thread.
//!
//! Only one of them is ever allowed to run. Dispatching a thread sends it the
//! reply to its last trap over its resume channel; the kernel then blocks on
//! the thread's trap channel until it traps again. This gives the
//! single-CPU, run-until-trap behaviour of the real context switch.
//!
//! Interrupts are raised through [`InterruptLine`]s and queued; the kernel
//! takes them at dispatch boundaries and while idling.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::warn;

use crate::error::Fatal;
use crate::memory::SharedMemory;
use crate::port::{ContextDesc, Port, Trap};
use crate::syscall::{Reply, Syscalls, ThreadInit, TrapGate};
use crate::vector::Vector;

// Thread exit and thread faults both travel as unwinds out of the thread body.
#[cfg(panic = "abort")]
compile_error!("the hosted port requires panic = \"unwind\"");

/// Unwind payloads that end a hosted thread without a fault.
enum Unwind {
    /// The thread exited through the kernel.
    Exited,
    /// The kernel went away while the thread was parked.
    Halted,
}

/// Raises interrupts on a [`HostedPort`]. Clones share the same line.
///
/// Once every line is dropped, a thread idling in `wait_for_interrupt` can
/// never be woken and the kernel shuts down.
#[derive(Clone)]
pub struct InterruptLine {
    tx: Sender<Vector>,
}

impl InterruptLine {
    /// Returns `false` if the kernel is gone.
    pub fn raise(&self, vector: Vector) -> bool {
        self.tx.send(vector).is_ok()
    }

    /// Callback suitable for a device's interrupt request output.
    pub fn trigger(&self, vector: Vector) -> Arc<dyn Fn() + Send + Sync> {
        let line = self.clone();
        Arc::new(move || {
            line.raise(vector);
        })
    }
}

pub struct HostedPort {
    irq: Receiver<Vector>,
}

impl HostedPort {
    pub fn new() -> (Self, InterruptLine) {
        let (tx, irq) = mpsc::channel();
        (Self { irq }, InterruptLine { tx })
    }
}

pub struct HostedContext {
    resume: Sender<Option<Reply>>,
    traps: Receiver<Trap>,
    interrupts: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

struct HostedGate {
    traps: Sender<Trap>,
    resume: Receiver<Option<Reply>>,
    interrupts: Arc<AtomicBool>,
}

impl TrapGate for HostedGate {
    fn enter(&self, trap: Trap) -> Reply {
        if self.traps.send(trap).is_err() {
            panic::resume_unwind(Box::new(Unwind::Halted));
        }
        match self.resume.recv() {
            Ok(Some(reply)) => reply,
            Ok(None) => Reply::Done,
            Err(_) => panic::resume_unwind(Box::new(Unwind::Halted)),
        }
    }

    fn leave(&self, trap: Trap) -> ! {
        let _ = self.traps.send(trap);
        panic::resume_unwind(Box::new(Unwind::Exited))
    }

    fn set_interrupts_enabled(&self, enabled: bool) {
        self.interrupts.store(enabled, Ordering::SeqCst);
    }

    fn interrupts_enabled(&self) -> bool {
        self.interrupts.load(Ordering::SeqCst)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown fault".to_string()
    }
}

fn thread_main(init: ThreadInit, gate: HostedGate, memory: SharedMemory, faults: Sender<Trap>) {
    // Parked until the first dispatch.
    if gate.resume.recv().is_err() {
        return;
    }
    let sys = Syscalls::new(Box::new(gate), memory);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        init.run(&sys);
    }));
    if let Err(payload) = outcome {
        if payload.downcast_ref::<Unwind>().is_none() {
            let _ = faults.send(Trap::Fault(panic_message(payload.as_ref())));
        }
    }
}

impl Port for HostedPort {
    type Context = HostedContext;

    fn create_context(&mut self, desc: ContextDesc<'_>) -> Result<HostedContext, Fatal> {
        let (resume_tx, resume_rx) = mpsc::channel();
        let (trap_tx, trap_rx) = mpsc::channel();
        let interrupts = Arc::new(AtomicBool::new(desc.interrupts_enabled));

        let gate = HostedGate {
            traps: trap_tx.clone(),
            resume: resume_rx,
            interrupts: Arc::clone(&interrupts),
        };
        let init = desc.init;
        let memory = desc.memory;
        let handle = thread::Builder::new()
            .name(format!("kz-{}", desc.name))
            .spawn(move || thread_main(init, gate, memory, trap_tx))
            .map_err(|err| {
                warn!("spawning {} failed: {err}", desc.name);
                Fatal::ContextCreation(desc.id)
            })?;

        Ok(HostedContext {
            resume: resume_tx,
            traps: trap_rx,
            interrupts,
            handle: Some(handle),
        })
    }

    fn restore_context(&mut self, context: &mut HostedContext, reply: Option<Reply>) -> Trap {
        if context.resume.send(reply).is_err() {
            return Trap::Fault("thread vanished".to_string());
        }
        context
            .traps
            .recv()
            .unwrap_or_else(|_| Trap::Fault("thread vanished".to_string()))
    }

    fn release_context(&mut self, mut context: HostedContext) {
        let handle = context.handle.take();
        drop(context);
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    fn interrupts_enabled(&self, context: &HostedContext) -> bool {
        context.interrupts.load(Ordering::SeqCst)
    }

    fn pending_interrupt(&mut self) -> Option<Vector> {
        self.irq.try_recv().ok()
    }

    fn wait_for_interrupt(&mut self) -> Option<Vector> {
        self.irq.recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Kernel;
    use crate::syscall::ThreadSpec;

    #[test]
    fn exits_and_faults_end_only_their_own_thread() {
        assert!(cfg!(panic = "unwind"));

        let (done_tx, done_rx) = mpsc::channel();
        let init = ThreadSpec::new("init", 1, 0x100, move |sys, _| {
            sys.run(ThreadSpec::new("returns", 2, 0x100, |_, _| 0));
            sys.run(ThreadSpec::new("faults", 2, 0x100, |_, _| panic!("bad trap")));
            sys.run(ThreadSpec::new("last", 3, 0x100, move |_, _| {
                let _ = done_tx.send("last ran");
                0
            }));
            0
        });

        let (port, _line) = HostedPort::new();
        let stopped = Kernel::builder(port).build().unwrap().start(init);

        assert_eq!(stopped, Fatal::NoReadyThread);
        assert_eq!(done_rx.try_recv(), Ok("last ran"));
    }
}
