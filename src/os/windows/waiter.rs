//! Readiness multiplexer over `WaitForMultipleObjects` with a dedicated wakeup event in slot 0.

#![allow(clippy::arithmetic_side_effects)]

use {
    super::{c_wrappers, winprelude::*},
    crate::misc::{Token, LOCK_POISON},
    std::{io, os::windows::io::OwnedHandle, sync::Mutex},
};

// WaitForMultipleObjects cannot take more than this many handles in one call
// (MAXIMUM_WAIT_OBJECTS). Two events per endpoint plus the wakeup slot; the transport caps its
// endpoint count so the wait set can never outgrow this.
pub(super) const MAX_WAIT_HANDLES: usize = 64;

pub(super) enum WaitOutcome {
    /// [`wake`](EventWaiter::wake) was called; re-check the run flag and registrations.
    Wake,
    /// The overlapped operation tied to this registration completed.
    Ready(Token),
}

/// Registry of (token, event handle) pairs. Registrations may change from any thread;
/// [`wait`](EventWaiter::wait) rebuilds the handle array from the registry every time it is
/// called, so a change becomes visible after the next [`wake`](EventWaiter::wake).
///
/// The registry stores borrowed raw handles; owners must deregister before closing the event.
pub(super) struct EventWaiter {
    wake_event: OwnedHandle,
    registry: Mutex<Vec<(Token, HANDLE)>>,
}

impl EventWaiter {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            wake_event: c_wrappers::create_manual_reset_event()?,
            registry: Mutex::new(Vec::new()),
        })
    }

    pub fn register(&self, token: Token, event: HANDLE) {
        self.registry.lock().expect(LOCK_POISON).push((token, event));
    }

    pub fn deregister(&self, token: Token) {
        self.registry.lock().expect(LOCK_POISON).retain(|(t, _)| *t != token);
    }

    pub fn wake(&self) {
        c_wrappers::set_event(self.wake_event.as_int_handle()).ok();
    }

    /// Blocks until one registered event or the wakeup event is signaled.
    pub fn wait(&self) -> io::Result<WaitOutcome> {
        let (handles, tokens) = {
            let registry = self.registry.lock().expect(LOCK_POISON);
            let mut handles = Vec::with_capacity(registry.len() + 1);
            let mut tokens = Vec::with_capacity(registry.len());
            handles.push(self.wake_event.as_int_handle());
            for (token, event) in registry.iter() {
                handles.push(*event);
                tokens.push(*token);
            }
            (handles, tokens)
        };
        if handles.len() > MAX_WAIT_HANDLES {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("too many endpoints: {} events exceed the wait limit", handles.len()),
            ));
        }
        let index = c_wrappers::wait_for_multiple(&handles)?;
        if index == 0 {
            c_wrappers::reset_event(self.wake_event.as_int_handle())?;
            return Ok(WaitOutcome::Wake);
        }
        match tokens.get(index - 1) {
            Some(token) => Ok(WaitOutcome::Ready(*token)),
            None => Err(io::Error::new(
                io::ErrorKind::Other,
                "wait returned an index outside the handle array",
            )),
        }
    }
}
