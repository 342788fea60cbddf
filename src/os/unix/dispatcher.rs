//! The dispatcher thread: the single consumer of poller readiness batches.

use {
    super::{endpoint::Endpoint, poller::Poller, session::ClientSession},
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
    pub poller: Poller,
    pub pool: WorkerPool,
    pub running: AtomicBool,
    pub targets: Mutex<HashMap<Token, Target>>,
}

#[derive(Clone)]
pub(super) enum Target {
    Endpoint(Arc<Endpoint>),
    Session(Arc<ClientSession>),
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
    pub fn has_target(&self, token: Token) -> bool {
        self.targets.lock().expect(LOCK_POISON).contains_key(&token)
    }
}

pub(super) fn run(core: &Arc<Core>) {
    debug!("dispatcher thread running");
    while core.running.load(Acquire) {
        let batch = match core.poller.wait() {
            Ok(batch) => batch,
            Err(e) => {
                error!(%e, "readiness multiplexer failed, stopping dispatcher");
                core.running.store(false, Release);
                break;
            }
        };
        for (token, readiness) in batch {
            // The batch can be stale: an earlier handler in the same batch may have closed
            // this target already.
            match core.target(token) {
                Some(Target::Endpoint(endpoint)) => endpoint.accept_ready(core),
                Some(Target::Session(session)) => {
                    if readiness.readable {
                        session.handle_read(core);
                    }
                    // Reads can close the session; re-check liveness before writing.
                    if readiness.writable && core.has_target(token) {
                        session.handle_write(core);
                    }
                }
                None => {}
            }
        }
    }

    // Release every OS resource still registered, whether this is an orderly shutdown or a
    // fatal multiplexer failure.
    let leftovers =
        core.targets.lock().expect(LOCK_POISON).values().cloned().collect::<Vec<_>>();
    for target in leftovers {
        match target {
            Target::Session(session) => session.close(core),
            Target::Endpoint(endpoint) => endpoint.close(core),
        }
    }
    debug!("dispatcher thread stopped");
}
