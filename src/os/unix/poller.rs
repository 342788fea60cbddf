//! Readiness multiplexer over `poll(2)` with a self-pipe for cross-thread wakeups.

#![allow(clippy::indexing_slicing, clippy::arithmetic_side_effects)]

use {
    super::{c_wrappers, unixprelude::*},
    crate::misc::{Token, LOCK_POISON},
    std::{collections::HashMap, io, os::fd::OwnedFd, sync::Mutex},
};

pub(super) const READ: u8 = 0b01;
pub(super) const WRITE: u8 = 0b10;

#[derive(Copy, Clone, Debug, Default)]
pub(super) struct Readiness {
    pub readable: bool,
    pub writable: bool,
}

/// One registered file descriptor. The poller stores raw fds only; their owners are responsible
/// for deregistering before closing.
#[derive(Copy, Clone, Debug)]
struct Registration {
    fd: RawFd,
    interest: u8,
}

/// Registry of fds plus the wakeup self-pipe. Registrations may be changed from any thread;
/// [`wait`](Poller::wait) is only ever called from the dispatcher thread. A registration change
/// made while the dispatcher is blocked takes effect after the next [`wake`](Poller::wake).
pub(super) struct Poller {
    wake_rx: OwnedFd,
    wake_tx: OwnedFd,
    registry: Mutex<HashMap<Token, Registration>>,
}

impl Poller {
    pub fn new() -> io::Result<Self> {
        let (wake_rx, wake_tx) = c_wrappers::self_pipe()?;
        Ok(Self { wake_rx, wake_tx, registry: Mutex::new(HashMap::new()) })
    }

    pub fn register(&self, token: Token, fd: RawFd, interest: u8) {
        self.registry.lock().expect(LOCK_POISON).insert(token, Registration { fd, interest });
    }

    /// Replaces the interest set of an existing registration. Returns false if the token is no
    /// longer registered, which callers treat as "the source has been closed underneath us".
    pub fn set_interest(&self, token: Token, interest: u8) -> bool {
        match self.registry.lock().expect(LOCK_POISON).get_mut(&token) {
            Some(reg) => {
                reg.interest = interest;
                true
            }
            None => false,
        }
    }

    pub fn deregister(&self, token: Token) {
        self.registry.lock().expect(LOCK_POISON).remove(&token);
    }

    /// Interrupts a concurrent [`wait`](Poller::wait), making it return early.
    pub fn wake(&self) { c_wrappers::write_wake_byte(self.wake_tx.as_fd()); }

    /// Blocks until at least one registered source is ready or [`wake`](Poller::wake) is called.
    /// Signal interruption and wakeups surface as an empty batch so the dispatcher re-checks its
    /// run flag and registration changes.
    pub fn wait(&self) -> io::Result<Vec<(Token, Readiness)>> {
        let (mut pollfds, tokens) = {
            let registry = self.registry.lock().expect(LOCK_POISON);
            let mut pollfds = Vec::with_capacity(registry.len() + 1);
            let mut tokens = Vec::with_capacity(registry.len());
            pollfds.push(libc::pollfd {
                fd: self.wake_rx.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            });
            for (token, reg) in registry.iter() {
                let mut events = 0;
                if reg.interest & READ != 0 {
                    events |= libc::POLLIN;
                }
                if reg.interest & WRITE != 0 {
                    events |= libc::POLLOUT;
                }
                pollfds.push(libc::pollfd { fd: reg.fd, events, revents: 0 });
                tokens.push(*token);
            }
            (pollfds, tokens)
        };

        match c_wrappers::poll(&mut pollfds, -1) {
            Ok(..) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(Vec::new()),
            Err(e) => return Err(e),
        }

        if pollfds[0].revents & libc::POLLIN != 0 {
            c_wrappers::drain(self.wake_rx.as_fd());
        }

        let mut ready = Vec::new();
        for (pfd, token) in pollfds[1..].iter().zip(tokens) {
            let revents = pfd.revents;
            // POLLNVAL means the fd raced a deregistration and is already closed.
            if revents & libc::POLLNVAL != 0 {
                continue;
            }
            // Hangups and errors are delivered as readability so the read path observes the
            // EOF or socket error and closes the session.
            let readable = revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0;
            let writable = revents & libc::POLLOUT != 0;
            if readable || writable {
                ready.push((token, Readiness { readable, writable }));
            }
        }
        Ok(ready)
    }
}
