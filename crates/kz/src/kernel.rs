//! The kz kernel: dispatch loop, trap handling and system calls.
//!
//! Control only ever flows one way: the kernel selects a thread, the port
//! resumes it, and the thread comes back with a [`Trap`]. The trap is routed
//! through the vector table, the matching routine updates kernel state, and the
//! loop selects again. Pending device interrupts are taken before a thread
//! with unmasked interrupts is resumed, and while a thread idles.

use alloc::vec::Vec;

use log::{debug, error, info, trace, warn};

use crate::config::KernelConfig;
use crate::error::{ConfigError, Fatal};
use crate::port::{ContextDesc, Port, Trap};
use crate::service::ServiceCalls;
use crate::state::KernelState;
use crate::syscall::{Reply, Request, ThreadSpec};
use crate::thread::ThreadId;
use crate::trace::{records, TraceHook};
use crate::vector::{Vector, VectorKind, VectorTable};

/// Builder for constructing a kernel around a port.
pub struct KernelBuilder<P: Port> {
    port: P,
    config: KernelConfig,
    trace: Option<TraceHook>,
}

impl<P: Port> KernelBuilder<P> {
    pub fn new(port: P) -> Self {
        Self {
            port,
            config: KernelConfig::default(),
            trace: None,
        }
    }

    pub fn config(mut self, config: KernelConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the trace hook for kernel events.
    pub fn with_trace_hook(mut self, hook: TraceHook) -> Self {
        self.trace = Some(hook);
        self
    }

    /// Validates the configuration and builds the kernel.
    pub fn build(self) -> Result<Kernel<P>, ConfigError> {
        self.config.validate()?;
        Ok(Kernel::new(self.config, self.port, self.trace))
    }
}

pub struct Kernel<P: Port> {
    config: KernelConfig,
    state: KernelState,
    contexts: Vec<Option<P::Context>>,
    vectors: VectorTable,
    port: P,
}

impl<P: Port> Kernel<P> {
    /// Creates a new kernel builder.
    pub fn builder(port: P) -> KernelBuilder<P> {
        KernelBuilder::new(port)
    }

    fn new(config: KernelConfig, port: P, trace: Option<TraceHook>) -> Self {
        let state = KernelState::new(&config, trace);
        let contexts = (0..config.max_threads).map(|_| None).collect();
        let vectors = VectorTable::new(config.vector_count);
        Self {
            config,
            state,
            contexts,
            vectors,
            port,
        }
    }

    /// Returns the kernel configuration.
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn state(&self) -> &KernelState {
        &self.state
    }

    /// Boots the kernel with `first` as the initial thread.
    ///
    /// Returns only when the system shuts down, with the reason.
    pub fn start(mut self, first: ThreadSpec) -> Fatal {
        info!("{} boot", self.config.name);
        let fatal = match self.create_thread(first) {
            Ok(_) => self.run(),
            Err(fatal) => fatal,
        };
        error!("system error!");
        error!("{}: {fatal}", self.config.name);
        self.state.emit(records::SYSDOWN, &[]);
        fatal
    }

    fn run(&mut self) -> Fatal {
        loop {
            if let Err(fatal) = self.step() {
                return fatal;
            }
        }
    }

    /// One schedule/dispatch/trap round.
    fn step(&mut self) -> Result<(), Fatal> {
        let next = self.state.schedule()?;

        let unmasked = self
            .context(next)
            .is_some_and(|context| self.port.interrupts_enabled(context));
        if unmasked {
            if let Some(vector) = self.port.pending_interrupt() {
                return self.interrupt(vector);
            }
        }

        let trap = self.dispatch(next);
        self.take_trap(next, trap)
    }

    fn context(&self, id: ThreadId) -> Option<&P::Context> {
        self.contexts.get(id.index()).and_then(Option::as_ref)
    }

    fn dispatch(&mut self, id: ThreadId) -> Trap {
        let reply = self
            .state
            .tasks
            .get_mut(id)
            .and_then(|tcb| tcb.reply.take());
        match self.contexts.get_mut(id.index()).and_then(Option::as_mut) {
            Some(context) => self.port.restore_context(context, reply),
            None => Trap::Fault(alloc::format!("{id} has no context")),
        }
    }

    fn take_trap(&mut self, id: ThreadId, trap: Trap) -> Result<(), Fatal> {
        match trap {
            Trap::Syscall(request) => {
                if let Some(tcb) = self.state.tasks.get_mut(id) {
                    tcb.syscall = Some(request);
                }
                self.interrupt(Vector::SYSCALL)
            }
            Trap::Fault(reason) => {
                warn!("{id} faulted: {reason}");
                self.interrupt(Vector::SOFTERR)
            }
            Trap::WaitForInterrupt => {
                self.state.set_reply(id, Reply::Done);
                let masked = self
                    .context(id)
                    .is_some_and(|context| !self.port.interrupts_enabled(context));
                if masked {
                    return Err(Fatal::IdleWithInterruptsMasked(id));
                }
                self.state.emit(records::sched::IDLE, &[id.0]);
                let vector = self
                    .port
                    .wait_for_interrupt()
                    .ok_or(Fatal::InterruptsDisconnected)?;
                self.interrupt(vector)
            }
        }
    }

    /// Generic vector entry.
    fn interrupt(&mut self, vector: Vector) -> Result<(), Fatal> {
        self.state.emit(records::trap::INTERRUPT, &[vector.0]);
        match self.vectors.kind(vector) {
            Some(VectorKind::Syscall) => self.syscall_intr(),
            Some(VectorKind::SoftError) => self.softerr_intr(),
            Some(VectorKind::Device) => {
                if let Some(handler) = self.vectors.handler_mut(vector) {
                    let mut services = ServiceCalls::new(&mut self.state);
                    handler(&mut services)?;
                }
                Ok(())
            }
            None => {
                trace!("{vector}: no handler");
                self.state.emit(records::trap::UNHANDLED, &[vector.0]);
                Ok(())
            }
        }
    }

    fn syscall_intr(&mut self) -> Result<(), Fatal> {
        let Some(id) = self.state.current else {
            return Ok(());
        };
        let Some(request) = self
            .state
            .tasks
            .get_mut(id)
            .and_then(|tcb| tcb.syscall.take())
        else {
            warn!("{id}: syscall trap without a request");
            return Ok(());
        };

        self.state
            .emit(records::trap::SYSCALL, &[id.0, request.kind() as u8]);
        trace!("{id}: {request:?}");

        self.state.getcurrent();
        self.call_functions(id, request)
    }

    /// Terminates the current thread after a fault.
    fn softerr_intr(&mut self) -> Result<(), Fatal> {
        let Some(id) = self.state.current else {
            return Ok(());
        };
        if let Some(tcb) = self.state.tasks.get(id) {
            error!("{} DOWN", tcb.name);
        }
        self.state.emit(records::thread::DOWN, &[id.0]);
        self.state.getcurrent();
        self.exit_thread(id);
        Ok(())
    }

    /// Performs one system call for `caller`, who has already been unlinked.
    fn call_functions(&mut self, caller: ThreadId, request: Request) -> Result<(), Fatal> {
        let state = &mut self.state;
        match request {
            Request::Run(spec) => {
                state.putcurrent();
                let id = self.create_thread(spec)?;
                self.state.set_reply(caller, Reply::Thread(id));
            }
            Request::Exit => self.exit_thread(caller),
            Request::Wait => {
                state.putcurrent();
                state.set_reply(caller, Reply::Done);
            }
            Request::Sleep => state.set_reply(caller, Reply::Done),
            Request::Wakeup(target) => {
                state.putcurrent();
                let reply = match state.wakeup(target) {
                    Ok(()) => Reply::Done,
                    Err(err) => Reply::Refused(err),
                };
                state.set_reply(caller, reply);
            }
            Request::GetId => {
                state.putcurrent();
                state.set_reply(caller, Reply::Thread(caller));
            }
            Request::ChangePriority(priority) => {
                let old = state.chpri(priority)?;
                state.putcurrent();
                state.set_reply(caller, Reply::Priority(old));
            }
            Request::Kmalloc(size) => {
                state.putcurrent();
                let block = state.kmalloc(size)?;
                state.set_reply(caller, Reply::Block(block));
            }
            Request::Kmfree(block) => {
                state.kmfree(block)?;
                state.putcurrent();
                state.set_reply(caller, Reply::Done);
            }
            Request::Send {
                mailbox,
                size,
                payload,
            } => {
                state.putcurrent();
                state.set_reply(caller, Reply::Sent(size));
                state.send_message(mailbox, Some(caller), size, payload)?;
            }
            Request::Recv(mailbox) => {
                state.recv_message(mailbox, caller)?;
            }
            Request::SetIntr { vector, handler } => {
                let reply = match self.vectors.install(vector, handler) {
                    Ok(()) => {
                        debug!("{vector}: handler installed by {caller}");
                        Reply::Done
                    }
                    Err(err) => Reply::Refused(err),
                };
                self.state.putcurrent();
                self.state.set_reply(caller, reply);
            }
        }
        Ok(())
    }

    /// Creates a thread and its context; the new thread is enqueued last.
    fn create_thread(&mut self, spec: ThreadSpec) -> Result<ThreadId, Fatal> {
        let id = self
            .state
            .spawn(&spec.name, spec.priority, spec.stack_size)?;
        let (name, stack, priority) = match self.state.tasks.get(id) {
            Some(tcb) => (tcb.name.clone(), tcb.stack, tcb.priority),
            None => return Err(Fatal::ContextCreation(id)),
        };

        let desc = ContextDesc {
            id,
            name: &name,
            stack,
            interrupts_enabled: !priority.starts_masked(),
            init: spec.into_init(),
            memory: self.state.memory.clone(),
        };
        let context = self.port.create_context(desc)?;
        if let Some(slot) = self.contexts.get_mut(id.index()) {
            *slot = Some(context);
        }
        Ok(id)
    }

    fn exit_thread(&mut self, id: ThreadId) {
        self.state.erase(id);
        if let Some(context) = self.contexts.get_mut(id.index()).and_then(Option::take) {
            self.port.release_context(context);
        }
    }
}
