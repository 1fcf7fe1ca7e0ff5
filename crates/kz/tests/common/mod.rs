#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use kz::{Fatal, HostedPort, InterruptLine, Kernel, KernelConfig, ThreadSpec};
use log::{LevelFilter, Log, Metadata, Record};
use once_cell::sync::Lazy;

/// Ordered notes written by test threads.
#[derive(Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    pub fn note(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }
}

/// Boots a kernel with the default configuration and returns why it stopped.
pub fn boot(first: ThreadSpec) -> Fatal {
    boot_with(KernelConfig::default(), first)
}

pub fn boot_with(config: KernelConfig, first: ThreadSpec) -> Fatal {
    let (port, _line) = HostedPort::new();
    Kernel::builder(port)
        .config(config)
        .build()
        .unwrap()
        .start(first)
}

/// Boots a kernel whose interrupt line is owned by the caller.
pub fn boot_with_line<F>(first: F) -> Fatal
where
    F: FnOnce(InterruptLine) -> ThreadSpec,
{
    let (port, line) = HostedPort::new();
    let kernel = Kernel::builder(port).build().unwrap();
    kernel.start(first(line))
}

pub struct CaptureLogger {
    lines: Mutex<Vec<String>>,
}

impl CaptureLogger {
    pub fn contains(&self, text: &str) -> bool {
        self.lines.lock().unwrap().iter().any(|line| line == text)
    }
}

impl Log for CaptureLogger {
    fn enabled(&self, _metadata: &Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &Record<'_>) {
        self.lines.lock().unwrap().push(record.args().to_string());
    }

    fn flush(&self) {}
}

static LOGGER: Lazy<CaptureLogger> = Lazy::new(|| CaptureLogger {
    lines: Mutex::new(Vec::new()),
});

/// Installs the capturing logger once per test binary.
pub fn capture_logs() -> &'static CaptureLogger {
    if log::set_logger(&*LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Info);
    }
    &LOGGER
}
