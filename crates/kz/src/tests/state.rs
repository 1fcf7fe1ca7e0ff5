use alloc::vec;

use super::{kernel_state, reply_of};
use crate::error::Fatal;
use crate::mailbox::MailboxId;
use crate::state::ThreadState;
use crate::syscall::{Reply, SyscallError};
use crate::thread::{Priority, ThreadId};

#[test]
fn higher_priority_runs_and_sleep_wakeup_restores_it() {
    let mut state = kernel_state();
    let a = state.spawn("A", 5, 0x100).unwrap();
    let b = state.spawn("B", 2, 0x100).unwrap();

    assert_eq!(state.schedule().unwrap(), b);
    assert_eq!(state.thread_state(b), ThreadState::Running);

    // B sleeps: unlinked and not requeued.
    state.getcurrent();
    assert_eq!(state.schedule().unwrap(), a);
    assert_eq!(state.thread_state(b), ThreadState::Blocked);
    assert!(state.ready().select() != Some(b));

    // A wakes B and stays ready itself.
    state.getcurrent();
    state.putcurrent();
    state.wakeup(b).unwrap();
    assert_eq!(state.thread_state(b), ThreadState::Ready);
    assert_eq!(state.schedule().unwrap(), b);
    assert_eq!(state.thread_state(a), ThreadState::Ready);
}

#[test]
fn equal_priority_threads_take_turns_in_ready_order() {
    let mut state = kernel_state();
    let ids: Vec<_> = ["x", "y", "z"]
        .iter()
        .map(|name| state.spawn(name, 4, 0x80).unwrap())
        .collect();

    let mut order = Vec::new();
    for _ in 0..6 {
        let id = state.schedule().unwrap();
        order.push(id);
        // wait: back of the queue
        state.getcurrent();
        state.putcurrent();
    }

    assert_eq!(order[..3], ids[..]);
    assert_eq!(order[3..], ids[..]);
}

#[test]
fn table_capacity_is_never_exceeded() {
    let mut state = kernel_state();
    for n in 0..6 {
        state.spawn("t", 3, 0x10).unwrap();
        assert_eq!(state.tasks().occupied(), n + 1);
    }
    assert_eq!(state.spawn("t", 3, 0x10), Err(Fatal::ThreadTableFull));
    assert_eq!(state.tasks().occupied(), 6);
}

#[test]
fn exited_slot_is_reused_but_stack_is_not() {
    let mut state = kernel_state();
    let first = state.spawn("first", 1, 0x200).unwrap();
    let used = state.stacks().used();

    assert!(state.erase(first).is_some());
    assert_eq!(state.thread_state(first), ThreadState::Unused);

    let second = state.spawn("second", 1, 0x200).unwrap();
    assert_eq!(second, first);
    assert_eq!(state.stacks().used(), used + 0x200);
    assert_eq!(state.tasks().get(second).unwrap().name.as_str(), "second");
}

#[test]
fn stack_arena_exhaustion_is_fatal() {
    let mut state = kernel_state();
    state.spawn("big", 1, 0x1f00).unwrap();
    assert_eq!(
        state.spawn("more", 1, 0x200),
        Err(Fatal::StackExhausted {
            requested: 0x200,
            remaining: 0x100
        })
    );
}

#[test]
fn out_of_range_priority_is_fatal() {
    let mut state = kernel_state();
    assert_eq!(state.spawn("bad", 16, 0x10), Err(Fatal::InvalidPriority(16)));
}

#[test]
fn empty_ready_queues_are_fatal() {
    let mut state = kernel_state();
    assert_eq!(state.schedule(), Err(Fatal::NoReadyThread));

    let only = state.spawn("only", 0, 0x10).unwrap();
    state.schedule().unwrap();
    state.getcurrent();
    state.erase(only);
    assert_eq!(state.schedule(), Err(Fatal::NoReadyThread));
}

#[test]
fn chpri_returns_old_priority_and_requeues_at_new_level() {
    let mut state = kernel_state();
    let low = state.spawn("low", 9, 0x10).unwrap();
    let boot = state.spawn("boot", 0, 0x10).unwrap();

    assert_eq!(state.schedule().unwrap(), boot);
    state.getcurrent();
    assert_eq!(state.chpri(Some(15)).unwrap(), Priority(0));
    state.putcurrent();

    assert_eq!(state.schedule().unwrap(), low);
    assert_eq!(state.tasks().get(boot).unwrap().priority, Priority(15));

    state.getcurrent();
    assert_eq!(state.chpri(None).unwrap(), Priority(9));
    assert_eq!(state.chpri(Some(16)), Err(Fatal::InvalidPriority(16)));
}

#[test]
fn wakeup_refuses_unused_and_mailbox_blocked_threads() {
    let mut state = kernel_state();
    let receiver = state.spawn("rx", 1, 0x10).unwrap();
    let other = state.spawn("other", 2, 0x10).unwrap();

    assert_eq!(
        state.wakeup(ThreadId(5)),
        Err(SyscallError::NoSuchThread(ThreadId(5)))
    );

    assert_eq!(state.schedule().unwrap(), receiver);
    state.getcurrent();
    assert!(!state.recv_message(MailboxId::MSGBOX1, receiver).unwrap());

    assert_eq!(state.schedule().unwrap(), other);
    assert_eq!(
        state.wakeup(receiver),
        Err(SyscallError::BlockedOnMailbox {
            thread: receiver,
            mailbox: MailboxId::MSGBOX1
        })
    );
    // Already ready: nothing to do.
    assert_eq!(state.wakeup(other), Ok(()));
    assert_eq!(reply_of(&mut state, receiver), None);
}

#[test]
fn kmalloc_exhaustion_is_fatal() {
    let mut state = kernel_state();
    for _ in 0..8 {
        state.kmalloc(10).unwrap();
    }
    assert!(matches!(
        state.kmalloc(10),
        Err(Fatal::Memory(crate::memory::MemoryError::Exhausted { class_size: 16 }))
    ));
}

#[test]
fn replies_are_parked_per_thread() {
    let mut state = kernel_state();
    let id = state.spawn("t", 1, 0x10).unwrap();
    state.set_reply(id, Reply::Thread(id));
    assert_eq!(reply_of(&mut state, id), Some(Reply::Thread(id)));
    assert_eq!(reply_of(&mut state, id), None);
}

#[test]
fn running_thread_stays_linked_until_it_traps() {
    let mut state = kernel_state();
    let a = state.spawn("A", 4, 0x10).unwrap();
    let b = state.spawn("B", 4, 0x10).unwrap();

    assert_eq!(state.schedule().unwrap(), a);
    assert_eq!(state.thread_state(a), ThreadState::Running);
    assert!(state.tasks().get(a).unwrap().is_ready());
    assert_eq!(state.ready().level(state.tasks(), 4), vec![a, b]);

    state.getcurrent();
    assert!(!state.tasks().get(a).unwrap().is_ready());
    assert_eq!(state.ready().level(state.tasks(), 4), vec![b]);

    state.putcurrent();
    assert_eq!(state.ready().level(state.tasks(), 4), vec![b, a]);
}
