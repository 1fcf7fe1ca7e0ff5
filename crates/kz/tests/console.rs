//! Console driver and command shell over a virtual serial line.

use std::thread;
use std::time::Duration;

use hal::virt::VirtualSerial;
use kz::console::start_threads;
use kz::{HostedPort, Kernel, Vector};

const TIMEOUT: Duration = Duration::from_secs(5);

/// Boots the console system on a background thread.
///
/// The kernel never returns: the serial port keeps an interrupt line alive.
fn boot_console() -> VirtualSerial {
    let serial = VirtualSerial::new();
    let (port, line) = HostedPort::new();
    serial.connect_irq(line.trigger(Vector::SERINTR));

    let device = serial.clone();
    thread::spawn(move || {
        let kernel = Kernel::builder(port).build().unwrap();
        kernel.start(start_threads(device))
    });
    serial
}

fn expect_output(serial: &VirtualSerial, pattern: &[u8]) -> Vec<u8> {
    serial.wait_for_output(pattern, TIMEOUT).unwrap_or_else(|| {
        panic!(
            "no {:?} in {:?}",
            String::from_utf8_lossy(pattern),
            String::from_utf8_lossy(&serial.output())
        )
    })
}

#[test]
fn prompt_then_echo() {
    let serial = boot_console();
    expect_output(&serial, b"command> ");
    serial.take_output();

    serial.inject(b"echo hello\r");
    let output = expect_output(&serial, b"command> ");
    assert_eq!(output, b"echo hello\r\n hello\r\ncommand> ");
}

#[test]
fn unknown_command() {
    let serial = boot_console();
    expect_output(&serial, b"command> ");
    serial.take_output();

    serial.inject(b"help\r");
    let output = expect_output(&serial, b"command> ");
    assert_eq!(output, b"help\r\nunknown.\r\ncommand> ");
}

#[test]
fn several_lines_in_a_row() {
    let serial = boot_console();
    expect_output(&serial, b"command> ");
    serial.take_output();

    serial.inject(b"echo one\r");
    expect_output(&serial, b"command> ");
    serial.take_output();

    serial.inject(b"echo two\r");
    let output = expect_output(&serial, b"command> ");
    assert_eq!(output, b"echo two\r\n two\r\ncommand> ");
}
