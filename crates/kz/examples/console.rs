//! Console demo: the command shell on a virtual serial line.
//!
//! Run with `cargo run -p kz --example console`. Each line given on the
//! command line is typed into the console; everything the system transmits is
//! printed.

use std::env;
use std::thread;
use std::time::Duration;

use hal::virt::VirtualSerial;
use kz::console::{start_threads, PROMPT};
use kz::{HostedPort, Kernel, Vector};

fn main() {
    let serial = VirtualSerial::new();
    let (port, line) = HostedPort::new();
    serial.connect_irq(line.trigger(Vector::SERINTR));

    let device = serial.clone();
    thread::spawn(move || {
        let kernel = match Kernel::builder(port).build() {
            Ok(kernel) => kernel,
            Err(err) => {
                eprintln!("bad configuration: {err}");
                return;
            }
        };
        let fatal = kernel.start(start_threads(device));
        eprintln!("kernel stopped: {fatal}");
    });

    let mut lines: Vec<String> = env::args().skip(1).collect();
    if lines.is_empty() {
        lines = vec!["echo hello".into(), "help".into()];
    }

    let timeout = Duration::from_secs(2);
    let wait_prompt = || match serial.wait_for_output(PROMPT, timeout) {
        Some(_) => print!("{}", String::from_utf8_lossy(&serial.take_output())),
        None => eprintln!("no prompt within {timeout:?}"),
    };

    wait_prompt();
    for text in lines {
        serial.inject(text.as_bytes());
        serial.inject(b"\r");
        wait_prompt();
    }
    println!();
}
