//! Priority ready queues.
//!
//! One FIFO per priority level, linked through the `next` field of the thread
//! control records. Selection is O(levels): the head of the first non-empty
//! level wins.

use alloc::vec::Vec;

use crate::thread::{TaskTable, ThreadId};

#[derive(Debug, Clone, Copy, Default)]
struct Queue {
    head: Option<ThreadId>,
    tail: Option<ThreadId>,
}

pub struct ReadyQueues {
    levels: Vec<Queue>,
}

impl ReadyQueues {
    pub fn new(levels: usize) -> Self {
        Self {
            levels: alloc::vec![Queue::default(); levels],
        }
    }

    /// Appends `id` to the tail of its priority's queue.
    ///
    /// Returns `false` if the thread is unknown or already linked.
    pub fn enqueue(&mut self, tasks: &mut TaskTable, id: ThreadId) -> bool {
        let level = match tasks.get(id) {
            Some(tcb) if !tcb.ready => tcb.priority.level(),
            _ => return false,
        };
        let Some(queue) = self.levels.get_mut(level) else {
            return false;
        };

        match queue.tail {
            Some(tail) => {
                if let Some(tcb) = tasks.get_mut(tail) {
                    tcb.next = Some(id);
                }
            }
            None => queue.head = Some(id),
        }
        queue.tail = Some(id);

        if let Some(tcb) = tasks.get_mut(id) {
            tcb.next = None;
            tcb.ready = true;
        }
        true
    }

    /// Unlinks `id` from wherever it sits in its queue.
    ///
    /// Returns `false` if the thread was not linked.
    pub fn unlink(&mut self, tasks: &mut TaskTable, id: ThreadId) -> bool {
        let (level, next) = match tasks.get(id) {
            Some(tcb) if tcb.ready => (tcb.priority.level(), tcb.next),
            _ => return false,
        };
        let Some(queue) = self.levels.get_mut(level) else {
            return false;
        };

        let mut prev = None;
        let mut cursor = queue.head;
        while let Some(at) = cursor {
            if at == id {
                break;
            }
            prev = Some(at);
            cursor = tasks.get(at).and_then(|tcb| tcb.next);
        }
        if cursor.is_none() {
            return false;
        }

        match prev {
            Some(prev) => {
                if let Some(tcb) = tasks.get_mut(prev) {
                    tcb.next = next;
                }
            }
            None => queue.head = next,
        }
        if queue.tail == Some(id) {
            queue.tail = prev;
        }

        if let Some(tcb) = tasks.get_mut(id) {
            tcb.next = None;
            tcb.ready = false;
        }
        true
    }

    /// Head of the highest-priority non-empty queue.
    pub fn select(&self) -> Option<ThreadId> {
        self.levels.iter().find_map(|queue| queue.head)
    }

    /// Threads linked at `level`, head first.
    pub fn level(&self, tasks: &TaskTable, level: usize) -> Vec<ThreadId> {
        let mut out = Vec::new();
        let mut cursor = self.levels.get(level).and_then(|queue| queue.head);
        while let Some(id) = cursor {
            out.push(id);
            cursor = tasks.get(id).and_then(|tcb| tcb.next);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.select().is_none()
    }
}
