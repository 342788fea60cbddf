//! Per-connection state: the incremental message reader on the inbound side and a FIFO reply
//! queue on the outbound side.
//!
//! Reads and writes happen on the dispatcher thread only; replies are enqueued from worker
//! threads, which flip the session's poller interest to include writability and wake the
//! dispatcher.

#![allow(clippy::indexing_slicing, clippy::arithmetic_side_effects)]

use {
    super::{
        dispatcher::{Core, Target},
        poller,
        unixprelude::*,
    },
    crate::{
        callback::MessageCallback,
        framing::{encode_message, MessageReader},
        misc::{next_session_seq, next_token, Token, LOCK_POISON},
    },
    std::{
        collections::VecDeque,
        io::{self, Read, Write},
        net::Shutdown,
        os::unix::net::UnixStream,
        sync::{Arc, Mutex},
    },
    tracing::{debug, warn},
};

const READ_CHUNK: usize = 8192;

pub(super) struct ClientSession {
    token: Token,
    seq: u64,
    endpoint: Arc<str>,
    stream: UnixStream,
    callback: Arc<dyn MessageCallback>,
    inner: Mutex<Inner>,
}

struct Inner {
    reader: MessageReader,
    write_queue: VecDeque<Vec<u8>>,
    write_pos: usize,
    open: bool,
}

impl ClientSession {
    /// Wraps an accepted connection and registers it for read readiness. Runs on the dispatcher
    /// thread, so no wakeup is needed.
    pub fn install(
        stream: UnixStream,
        endpoint: Arc<str>,
        callback: Arc<dyn MessageCallback>,
        core: &Arc<Core>,
    ) -> io::Result<()> {
        stream.set_nonblocking(true)?;
        let token = next_token();
        let seq = next_session_seq();
        let session = Arc::new(Self {
            token,
            seq,
            endpoint,
            stream,
            callback,
            inner: Mutex::new(Inner {
                reader: MessageReader::new(),
                write_queue: VecDeque::new(),
                write_pos: 0,
                open: true,
            }),
        });
        core.insert_target(token, Target::Session(Arc::clone(&session)));
        core.poller.register(token, session.stream.as_raw_fd(), poller::READ);
        debug!(endpoint = &*session.endpoint, seq, "client connected");
        Ok(())
    }

    /// Drains the socket, feeding the message assembler. EOF and protocol errors both close the
    /// session, but only after every message fully received beforehand has been dispatched —
    /// fire-and-forget clients disconnect right behind their last message. Dispatch happens
    /// after the session lock is released.
    pub fn handle_read(self: &Arc<Self>, core: &Arc<Core>) {
        let mut messages = Vec::new();
        let mut close_after = false;
        {
            let mut inner = self.inner.lock().expect(LOCK_POISON);
            if !inner.open {
                return;
            }
            let mut buf = [0u8; READ_CHUNK];
            loop {
                match (&self.stream).read(&mut buf) {
                    Ok(0) => {
                        debug!(endpoint = &*self.endpoint, seq = self.seq, "client disconnected");
                        close_after = true;
                        break;
                    }
                    Ok(n) => {
                        if let Err(e) = inner.reader.consume(&buf[..n]) {
                            warn!(
                                endpoint = &*self.endpoint,
                                seq = self.seq,
                                %e,
                                "protocol error, closing connection"
                            );
                            close_after = true;
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        warn!(
                            endpoint = &*self.endpoint,
                            seq = self.seq,
                            %e,
                            "read failed, closing connection"
                        );
                        close_after = true;
                        break;
                    }
                }
            }
            while let Some(msg) = inner.reader.next_message() {
                messages.push(msg);
            }
        }
        for message in messages {
            self.dispatch(core, message);
        }
        if close_after {
            self.close(core);
        }
    }

    /// Hands one complete message to the worker pool. The callback's reply, if any, is framed
    /// and queued for the dispatcher to write.
    fn dispatch(self: &Arc<Self>, core: &Arc<Core>, message: Vec<u8>) {
        let session = Arc::clone(self);
        let job_core = Arc::clone(core);
        core.pool.submit(move || {
            let Some(reply) = session.callback.data_received(&message) else { return };
            if reply.is_empty() {
                return;
            }
            match encode_message(&reply) {
                Ok(framed) => session.enqueue_reply(&job_core, framed),
                Err(e) => {
                    warn!(
                        endpoint = &*session.endpoint,
                        seq = session.seq,
                        %e,
                        "callback reply rejected, closing connection"
                    );
                    session.close(&job_core);
                }
            }
        });
    }

    fn enqueue_reply(&self, core: &Core, framed: Vec<u8>) {
        {
            let mut inner = self.inner.lock().expect(LOCK_POISON);
            if !inner.open {
                debug!(seq = self.seq, "dropping reply to closed connection");
                return;
            }
            inner.write_queue.push_back(framed);
        }
        if core.poller.set_interest(self.token, poller::READ | poller::WRITE) {
            core.poller.wake();
        }
    }

    /// Flushes as much of the reply queue as the socket accepts. Runs on the dispatcher thread.
    pub fn handle_write(&self, core: &Arc<Core>) {
        let mut inner = self.inner.lock().expect(LOCK_POISON);
        if !inner.open {
            return;
        }
        loop {
            let Some(front) = inner.write_queue.front() else { break };
            let len = front.len();
            let pos = inner.write_pos;
            match (&self.stream).write(&front[pos..]) {
                Ok(n) => {
                    inner.write_pos += n;
                    if inner.write_pos == len {
                        inner.write_queue.pop_front();
                        inner.write_pos = 0;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    drop(inner);
                    warn!(
                        endpoint = &*self.endpoint,
                        seq = self.seq,
                        %e,
                        "write failed, closing connection"
                    );
                    self.close(core);
                    return;
                }
            }
        }
        // Queue drained. Drop write interest so an idle socket stops reporting writability;
        // already on the dispatcher thread, so no wakeup.
        core.poller.set_interest(self.token, poller::READ);
    }

    /// Idempotent teardown: deregisters, unpublishes and shuts the socket down. Pending queued
    /// replies and partial inbound state are discarded.
    pub fn close(&self, core: &Core) {
        {
            let mut inner = self.inner.lock().expect(LOCK_POISON);
            if !inner.open {
                return;
            }
            inner.open = false;
            inner.write_queue.clear();
            inner.reader.reset();
        }
        core.poller.deregister(self.token);
        core.remove_target(self.token);
        self.stream.shutdown(Shutdown::Both).ok();
        debug!(endpoint = &*self.endpoint, seq = self.seq, "session closed");
    }
}
