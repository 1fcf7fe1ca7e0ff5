//! Mailbox IPC and memory calls between hosted threads.

mod common;

use std::sync::{Arc, Mutex};

use common::{boot, Journal};
use kz::{Fatal, MailboxId, MemoryError, Payload, SyscallError, ThreadId, ThreadSpec};

#[test]
fn blocked_receiver_gets_message_and_sender_id() {
    let journal = Journal::default();
    let (jr, js) = (journal.clone(), journal.clone());
    let sender_id = Arc::new(Mutex::new(None::<ThreadId>));
    let reported = Arc::clone(&sender_id);

    let init = ThreadSpec::new("init", 0, 0x100, move |sys, _| {
        sys.run(ThreadSpec::new("R", 3, 0x100, move |sys, _| {
            jr.note("R waits");
            let message = sys.recv(MailboxId::MSGBOX1);
            let bytes = sys.message_bytes(&message).unwrap();
            jr.note(format!(
                "R got {} bytes {:?} from {:?}",
                message.size,
                String::from_utf8_lossy(&bytes),
                message.sender
            ));
            0
        }));
        sys.run(ThreadSpec::new("S", 4, 0x100, move |sys, _| {
            *reported.lock().unwrap() = Some(sys.getid());
            js.note("S sends");
            let sent = sys.send_static(MailboxId::MSGBOX1, b"hello");
            js.note(format!("S sent {sent}"));
            0
        }));
        0
    });

    assert_eq!(boot(init), Fatal::NoReadyThread);
    let s = sender_id.lock().unwrap().unwrap();
    assert_eq!(
        journal.entries(),
        [
            "R waits".to_string(),
            "S sends".to_string(),
            format!("R got 5 bytes \"hello\" from Some({s:?})"),
            "S sent 5".to_string(),
        ]
    );
}

#[test]
fn heap_payload_is_freed_by_the_receiver() {
    let journal = Journal::default();
    let (jr, js) = (journal.clone(), journal.clone());

    let init = ThreadSpec::new("init", 0, 0x100, move |sys, _| {
        sys.run(ThreadSpec::new("producer", 2, 0x100, move |sys, _| {
            sys.send_bytes(MailboxId::MSGBOX2, b"ping").unwrap();
            js.note("sent");
            0
        }));
        sys.run(ThreadSpec::new("consumer", 3, 0x100, move |sys, _| {
            let message = sys.recv(MailboxId::MSGBOX2);
            let bytes = sys.message_bytes(&message).unwrap();
            jr.note(String::from_utf8(bytes).unwrap());
            if let Payload::Heap(block) = message.payload {
                sys.kmfree(block);
            }
            let stats = sys.pool_stats();
            let all_free = stats.iter().all(|class| class.free == class.total);
            jr.note(format!("all free: {all_free}"));
            0
        }));
        0
    });

    assert_eq!(boot(init), Fatal::NoReadyThread);
    assert_eq!(journal.entries(), ["sent", "ping", "all free: true"]);
}

#[test]
fn exhausting_a_size_class_is_fatal() {
    let count = Arc::new(Mutex::new(0usize));
    let counter = Arc::clone(&count);

    let init = ThreadSpec::new("init", 1, 0x100, move |sys, _| {
        loop {
            sys.kmalloc(10);
            *counter.lock().unwrap() += 1;
        }
    });

    assert_eq!(
        boot(init),
        Fatal::Memory(MemoryError::Exhausted { class_size: 16 })
    );
    assert_eq!(*count.lock().unwrap(), 8);
}

#[test]
fn oversized_allocation_is_fatal() {
    let init = ThreadSpec::new("init", 1, 0x100, |sys, _| {
        sys.kmalloc(61);
        0
    });

    assert_eq!(boot(init), Fatal::Memory(MemoryError::TooLarge { size: 61 }));
}

#[test]
fn freed_blocks_are_reused() {
    let journal = Journal::default();
    let notes = journal.clone();

    let init = ThreadSpec::new("init", 1, 0x100, move |sys, _| {
        let first = sys.kmalloc(30);
        sys.kmfree(first);
        let second = sys.kmalloc(30);
        notes.note(format!("reused: {}", first == second));
        sys.write(second, b"payload").unwrap();
        let back = sys.read(second, 7).unwrap();
        notes.note(String::from_utf8(back).unwrap());
        0
    });

    assert_eq!(boot(init), Fatal::NoReadyThread);
    assert_eq!(journal.entries(), ["reused: true", "payload"]);
}

#[test]
fn pool_stats_do_not_hold_the_pool_across_calls() {
    let journal = Journal::default();
    let notes = journal.clone();

    let init = ThreadSpec::new("init", 1, 0x100, move |sys, _| {
        let before = sys.pool_stats();
        let block = sys.kmalloc(20);
        let during = sys.pool_stats();
        sys.kmfree(block);
        let after = sys.pool_stats();
        notes.note(format!(
            "32-byte class free: {} {} {}",
            before[1].free, during[1].free, after[1].free
        ));
        notes.note(format!("low water: {}", after[1].min_free));
        0
    });

    assert_eq!(boot(init), Fatal::NoReadyThread);
    assert_eq!(
        journal.entries(),
        ["32-byte class free: 8 7 8", "low water: 7"]
    );
}

#[test]
fn double_free_is_fatal() {
    let init = ThreadSpec::new("init", 1, 0x100, |sys, _| {
        let block = sys.kmalloc(8);
        sys.kmfree(block);
        sys.kmfree(block);
        0
    });

    assert!(matches!(
        boot(init),
        Fatal::Memory(MemoryError::DoubleFree { .. })
    ));
}

#[test]
fn second_receiver_on_one_mailbox_is_fatal() {
    let init = ThreadSpec::new("init", 0, 0x100, |sys, _| {
        for name in ["first", "second"] {
            sys.run(ThreadSpec::new(name, 2, 0x100, |sys, _| {
                sys.recv(MailboxId::MSGBOX1);
                0
            }));
        }
        0
    });

    assert_eq!(
        boot(init),
        Fatal::ReceiverBusy {
            mailbox: MailboxId::MSGBOX1,
            receiver: ThreadId(1)
        }
    );
}

#[test]
fn receiver_is_not_woken_by_wakeup() {
    let journal = Journal::default();
    let (jr, jw) = (journal.clone(), journal.clone());

    let init = ThreadSpec::new("init", 0, 0x100, move |sys, _| {
        let receiver = sys.run(ThreadSpec::new("rx", 1, 0x100, move |sys, _| {
            let message = sys.recv(MailboxId::MSGBOX1);
            jr.note(format!("rx got {}", message.size));
            0
        }));
        sys.run(ThreadSpec::new("waker", 2, 0x100, move |sys, _| {
            let refused = sys.wakeup(receiver);
            jw.note(format!("{refused:?}"));
            sys.send_static(MailboxId::MSGBOX1, b"go");
            0
        }));
        0
    });

    assert_eq!(boot(init), Fatal::NoReadyThread);
    let refused = Err::<(), _>(SyscallError::BlockedOnMailbox {
        thread: ThreadId(1),
        mailbox: MailboxId::MSGBOX1,
    });
    assert_eq!(journal.entries(), [format!("{refused:?}"), "rx got 2".to_string()]);
}

#[test]
fn unknown_mailbox_is_fatal() {
    let init = ThreadSpec::new("init", 1, 0x100, |sys, _| {
        sys.recv(MailboxId(7));
        0
    });

    assert_eq!(boot(init), Fatal::NoSuchMailbox(MailboxId(7)));
}
