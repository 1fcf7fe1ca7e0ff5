mod state;

use crate::config::KernelConfig;
use crate::state::KernelState;
use crate::syscall::Reply;
use crate::thread::ThreadId;

fn kernel_state() -> KernelState {
    KernelState::new(&KernelConfig::default(), None)
}

/// Takes the reply parked for `id`.
fn reply_of(state: &mut KernelState, id: ThreadId) -> Option<Reply> {
    state.tasks.get_mut(id).and_then(|tcb| tcb.reply.take())
}
