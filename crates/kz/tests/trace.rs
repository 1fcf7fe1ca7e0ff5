//! Kernel trace records through a kzs memory backend.

#![cfg(feature = "trace")]

use kz::trace::records;
use kz::{Fatal, HostedPort, Kernel, MailboxId, ThreadSpec};
use kzs::{MemoryBackend, TraceConfig, Tracer};

fn traced_run(first: ThreadSpec) -> (Fatal, Vec<(u8, Vec<u8>)>) {
    let backend = MemoryBackend::new();
    let tracer = Tracer::new(TraceConfig::default(), backend.clone()).into_handle();
    let (port, _line) = HostedPort::new();
    let fatal = Kernel::builder(port)
        .with_trace_hook(tracer.hook())
        .build()
        .unwrap()
        .start(first);
    let emitted = backend
        .records(true)
        .into_iter()
        .map(|record| (record.record_type, record.payload))
        .collect();
    (fatal, emitted)
}

#[test]
fn lifecycle_records_are_emitted() {
    let init = ThreadSpec::new("init", 1, 0x100, |sys, _| {
        sys.run(ThreadSpec::new("child", 3, 0x100, |_, _| 0));
        0
    });

    let (fatal, emitted) = traced_run(init);
    assert_eq!(fatal, Fatal::NoReadyThread);

    let creates: Vec<_> = emitted
        .iter()
        .filter(|(kind, _)| *kind == records::thread::CREATE)
        .map(|(_, payload)| payload.clone())
        .collect();
    assert_eq!(creates, [vec![0, 1], vec![1, 3]]);

    let exits: Vec<_> = emitted
        .iter()
        .filter(|(kind, _)| *kind == records::thread::EXIT)
        .map(|(_, payload)| payload.clone())
        .collect();
    assert_eq!(exits, [vec![0], vec![1]]);

    assert_eq!(emitted.last(), Some(&(records::SYSDOWN, Vec::new())));
}

#[test]
fn mailbox_records_follow_the_message() {
    let init = ThreadSpec::new("init", 0, 0x100, |sys, _| {
        sys.run(ThreadSpec::new("rx", 1, 0x100, |sys, _| {
            sys.recv(MailboxId::MSGBOX2);
            0
        }));
        sys.run(ThreadSpec::new("tx", 2, 0x100, |sys, _| {
            sys.send_static(MailboxId::MSGBOX2, b"abc");
            0
        }));
        0
    });

    let (fatal, emitted) = traced_run(init);
    assert_eq!(fatal, Fatal::NoReadyThread);

    let mailbox: Vec<_> = emitted
        .iter()
        .filter(|(kind, _)| {
            [
                records::mailbox::BLOCK,
                records::mailbox::SEND,
                records::mailbox::DELIVER,
            ]
            .contains(kind)
        })
        .cloned()
        .collect();
    assert_eq!(
        mailbox,
        [
            (records::mailbox::BLOCK, vec![1, 1]),
            (records::mailbox::SEND, vec![1, 2, 3, 0]),
            (records::mailbox::DELIVER, vec![1, 1]),
        ]
    );
}
