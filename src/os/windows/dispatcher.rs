//! The dispatcher thread: sole consumer of the event waiter.

use {
    super::{
        pipe_instance::PipeInstance,
        waiter::{EventWaiter, WaitOutcome},
    },
    crate::{
        misc::{Token, LOCK_POISON},
        pool::WorkerPool,
    },
    std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicBool, Ordering::*},
            Arc, Mutex,
        },
    },
    tracing::{debug, error},
};

/// State shared between the dispatcher thread, the worker pool and the transport facade.
pub(super) struct Core {
    pub waiter: EventWaiter,
    pub pool: WorkerPool,
    pub running: AtomicBool,
    pub targets: Mutex<HashMap<Token, Target>>,
    /// Closed instances parked here until the dispatcher is provably outside the wait call.
    /// Dropping an event handle the dispatcher is still waiting on is undefined behavior on the
    /// OS level, so only the dispatcher thread drains this list.
    pub retired: Mutex<Vec<Arc<PipeInstance>>>,
}

/// Which half of which instance a token's event belongs to.
#[derive(Clone)]
pub(super) enum Target {
    Read(Arc<PipeInstance>),
    Write(Arc<PipeInstance>),
}

impl Core {
    pub fn target(&self, token: Token) -> Option<Target> {
        self.targets.lock().expect(LOCK_POISON).get(&token).cloned()
    }
    pub fn insert_target(&self, token: Token, target: Target) {
        self.targets.lock().expect(LOCK_POISON).insert(token, target);
    }
    pub fn remove_target(&self, token: Token) {
        self.targets.lock().expect(LOCK_POISON).remove(&token);
    }
}

pub(super) fn run(core: &Arc<Core>) {
    debug!("dispatcher thread running");
    while core.running.load(Acquire) {
        core.retired.lock().expect(LOCK_POISON).clear();
        match core.waiter.wait() {
            Ok(WaitOutcome::Wake) => {}
            Ok(WaitOutcome::Ready(token)) => match core.target(token) {
                Some(Target::Read(instance)) => instance.handle_read_event(core),
                Some(Target::Write(instance)) => instance.handle_write_event(core),
                // Raced a deregistration.
                None => {}
            },
            Err(e) => {
                error!(%e, "event wait failed, stopping dispatcher");
                core.running.store(false, Release);
                break;
            }
        }
    }

    let leftovers =
        core.targets.lock().expect(LOCK_POISON).values().cloned().collect::<Vec<_>>();
    for target in leftovers {
        match target {
            Target::Read(instance) | Target::Write(instance) => instance.close(core),
        }
    }
    core.retired.lock().expect(LOCK_POISON).clear();
    debug!("dispatcher thread stopped");
}
