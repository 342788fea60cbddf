//! One reusable named pipe instance: overlapped connect/read/write state machines.
//!
//! A pipe object is comparatively expensive to create, so an endpoint keeps a single instance
//! alive for its whole lifetime and recycles it between clients: when a client disconnects, the
//! instance cancels outstanding I/O, disconnects and re-enters the connect wait on the same
//! handle.
//!
//! The read half moves `Connecting -> Reading` and stays there until the client goes away
//! (recycle) or an unexpected failure occurs (`Error`, terminal until the endpoint is
//! destroyed). The write half alternates `Quiet <-> Writing`; workers enqueue framed replies
//! and signal the write event when the half is quiet so the dispatcher starts the first write.

#![allow(clippy::indexing_slicing)]

use {
    super::{
        c_wrappers::{self, ConnectOutcome},
        dispatcher::{Core, Target},
        winprelude::*,
    },
    crate::{
        callback::MessageCallback,
        error::Result,
        framing::{encode_message, MessageReader},
        misc::{next_session_seq, next_token, Token, LOCK_POISON},
    },
    std::{
        collections::VecDeque,
        ffi::OsStr,
        io,
        mem::zeroed,
        os::windows::io::OwnedHandle,
        sync::{Arc, Mutex},
    },
    tracing::{debug, warn},
    windows_sys::Win32::{
        Foundation::{ERROR_BROKEN_PIPE, ERROR_NO_DATA, ERROR_PIPE_NOT_CONNECTED},
        System::IO::OVERLAPPED,
    },
};

const READ_CHUNK: usize = 8192;

fn client_gone(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error().map(|c| c as u32),
        Some(ERROR_BROKEN_PIPE | ERROR_NO_DATA | ERROR_PIPE_NOT_CONNECTED)
    )
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum ReadState {
    Connecting,
    Reading,
    Error,
    Closed,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum WriteState {
    Quiet,
    Writing,
}

pub(super) struct PipeInstance {
    name: Arc<str>,
    pipe: OwnedHandle,
    read_event: OwnedHandle,
    write_event: OwnedHandle,
    read_token: Token,
    write_token: Token,
    callback: Arc<dyn MessageCallback>,
    inner: Mutex<Inner>,
}

struct Inner {
    read_state: ReadState,
    write_state: WriteState,
    // Boxed so their addresses stay stable while the kernel owns them mid-operation.
    read_overlapped: Box<OVERLAPPED>,
    write_overlapped: Box<OVERLAPPED>,
    read_buf: Box<[u8; READ_CHUNK]>,
    reader: MessageReader,
    // The in-flight write buffer. Must not be touched until its completion event fires.
    write_buf: Vec<u8>,
    write_queue: VecDeque<Vec<u8>>,
    // Diagnostics: which connect cycle this instance is serving.
    conn_seq: u64,
}

// The overlapped structures and buffers are only ever accessed under the inner lock, and the
// kernel only writes to them while an operation is in flight. The raw pointer inside OVERLAPPED
// is what blocks the automatic impls.
unsafe impl Send for PipeInstance {}
unsafe impl Sync for PipeInstance {}

impl PipeInstance {
    /// Creates the pipe object, registers both completion events with the waiter and publishes
    /// the instance to the dispatcher. The caller follows up with
    /// [`begin_connect`](PipeInstance::begin_connect).
    pub fn open(
        name: &str,
        path: &OsStr,
        callback: Arc<dyn MessageCallback>,
        core: &Arc<Core>,
    ) -> Result<Arc<Self>> {
        let pipe = c_wrappers::create_named_pipe(path, true)?;
        let read_event = c_wrappers::create_manual_reset_event()?;
        let write_event = c_wrappers::create_manual_reset_event()?;
        let mut read_overlapped: Box<OVERLAPPED> = Box::new(unsafe { zeroed() });
        read_overlapped.hEvent = read_event.as_int_handle();
        let mut write_overlapped: Box<OVERLAPPED> = Box::new(unsafe { zeroed() });
        write_overlapped.hEvent = write_event.as_int_handle();
        let (read_token, write_token) = (next_token(), next_token());
        let instance = Arc::new(Self {
            name: Arc::from(name),
            pipe,
            read_event,
            write_event,
            read_token,
            write_token,
            callback,
            inner: Mutex::new(Inner {
                read_state: ReadState::Connecting,
                write_state: WriteState::Quiet,
                read_overlapped,
                write_overlapped,
                read_buf: Box::new([0; READ_CHUNK]),
                reader: MessageReader::new(),
                write_buf: Vec::new(),
                write_queue: VecDeque::new(),
                conn_seq: 0,
            }),
        });
        core.waiter.register(read_token, instance.read_event.as_int_handle());
        core.waiter.register(write_token, instance.write_event.as_int_handle());
        core.insert_target(read_token, Target::Read(Arc::clone(&instance)));
        core.insert_target(write_token, Target::Write(Arc::clone(&instance)));
        core.waiter.wake();
        debug!(name, "pipe instance created");
        Ok(instance)
    }

    /// Starts waiting for the first client.
    pub fn begin_connect(&self) {
        let mut inner = self.inner.lock().expect(LOCK_POISON);
        self.start_connect_locked(&mut inner);
    }

    /// Handles a signaled read event: either a completed connect or a completed read. Runs on
    /// the dispatcher thread.
    pub fn handle_read_event(self: &Arc<Self>, core: &Arc<Core>) {
        c_wrappers::reset_event(self.read_event.as_int_handle()).ok();
        let mut messages = Vec::new();
        {
            let mut inner = self.inner.lock().expect(LOCK_POISON);
            match inner.read_state {
                ReadState::Connecting => {
                    let r = c_wrappers::overlapped_result(
                        self.pipe.as_int_handle(),
                        &mut *inner.read_overlapped,
                    );
                    match r {
                        Ok(..) => {
                            debug!(
                                endpoint = &*self.name,
                                seq = inner.conn_seq,
                                "client connected"
                            );
                            self.enter_reading_locked(&mut inner);
                        }
                        Err(e) => {
                            warn!(endpoint = &*self.name, %e, "connect wait failed, retrying");
                            self.recycle_locked(&mut inner);
                        }
                    }
                }
                ReadState::Reading => {
                    let r = c_wrappers::overlapped_result(
                        self.pipe.as_int_handle(),
                        &mut *inner.read_overlapped,
                    );
                    match r {
                        Ok(0) => self.recycle_locked(&mut inner),
                        Ok(n) => {
                            let consumed = {
                                let Inner { reader, read_buf, .. } = &mut *inner;
                                reader.consume(&read_buf[..n])
                            };
                            match consumed {
                                Ok(()) => {
                                    while let Some(msg) = inner.reader.next_message() {
                                        messages.push(msg);
                                    }
                                    self.start_read_locked(&mut inner);
                                }
                                Err(e) => {
                                    warn!(
                                        endpoint = &*self.name,
                                        seq = inner.conn_seq,
                                        %e,
                                        "protocol error, dropping client"
                                    );
                                    self.recycle_locked(&mut inner);
                                }
                            }
                        }
                        Err(e) if client_gone(&e) => self.recycle_locked(&mut inner),
                        Err(e) => self.fail_locked(&mut inner, &e, "read"),
                    }
                }
                ReadState::Error | ReadState::Closed => {}
            }
        }
        for message in messages {
            self.dispatch(core, message);
        }
    }

    /// Handles a signaled write event: a completed overlapped write, or a worker's nudge to
    /// start draining a queue that was enqueued into while quiet. Runs on the dispatcher thread.
    pub fn handle_write_event(&self, _core: &Arc<Core>) {
        c_wrappers::reset_event(self.write_event.as_int_handle()).ok();
        let mut inner = self.inner.lock().expect(LOCK_POISON);
        if matches!(inner.read_state, ReadState::Error | ReadState::Closed) {
            return;
        }
        match inner.write_state {
            WriteState::Writing => {
                let r = c_wrappers::overlapped_result(
                    self.pipe.as_int_handle(),
                    &mut *inner.write_overlapped,
                );
                match r {
                    Ok(n) if n == inner.write_buf.len() => {
                        inner.write_buf.clear();
                        self.start_next_write_locked(&mut inner);
                    }
                    Ok(n) => {
                        warn!(
                            endpoint = &*self.name,
                            seq = inner.conn_seq,
                            wrote = n,
                            expected = inner.write_buf.len(),
                            "short pipe write, dropping client"
                        );
                        self.recycle_locked(&mut inner);
                    }
                    Err(e) if client_gone(&e) => self.recycle_locked(&mut inner),
                    Err(e) => self.fail_locked(&mut inner, &e, "write"),
                }
            }
            WriteState::Quiet => self.start_next_write_locked(&mut inner),
        }
    }

    /// Queues a framed reply. Called from worker threads.
    pub fn enqueue_reply(&self, framed: Vec<u8>) {
        let mut inner = self.inner.lock().expect(LOCK_POISON);
        if inner.read_state != ReadState::Reading {
            debug!(endpoint = &*self.name, "dropping reply to departed client");
            return;
        }
        inner.write_queue.push_back(framed);
        if inner.write_state == WriteState::Quiet {
            c_wrappers::set_event(self.write_event.as_int_handle()).ok();
        }
    }

    /// Terminal teardown, used by destroy and shutdown. Idempotent. The instance's handles are
    /// parked on the core's retirement list so the dispatcher drops them outside its wait call.
    pub fn close(self: &Arc<Self>, core: &Core) {
        {
            let mut inner = self.inner.lock().expect(LOCK_POISON);
            if inner.read_state == ReadState::Closed {
                return;
            }
            inner.read_state = ReadState::Closed;
            inner.write_state = WriteState::Quiet;
            inner.write_queue.clear();
        }
        c_wrappers::cancel_io(self.pipe.as_int_handle());
        c_wrappers::disconnect_named_pipe(self.pipe.as_int_handle()).ok();
        core.waiter.deregister(self.read_token);
        core.waiter.deregister(self.write_token);
        core.remove_target(self.read_token);
        core.remove_target(self.write_token);
        core.retired.lock().expect(LOCK_POISON).push(Arc::clone(self));
        core.waiter.wake();
        debug!(endpoint = &*self.name, "pipe instance closed");
    }

    fn dispatch(self: &Arc<Self>, core: &Arc<Core>, message: Vec<u8>) {
        let instance = Arc::clone(self);
        core.pool.submit(move || {
            let Some(reply) = instance.callback.data_received(&message) else { return };
            if reply.is_empty() {
                return;
            }
            match encode_message(&reply) {
                Ok(framed) => instance.enqueue_reply(framed),
                Err(e) => {
                    warn!(
                        endpoint = &*instance.name,
                        %e,
                        "callback reply rejected, dropping client"
                    );
                    let mut inner = instance.inner.lock().expect(LOCK_POISON);
                    if inner.read_state == ReadState::Reading {
                        instance.recycle_locked(&mut inner);
                    }
                }
            }
        });
    }

    fn start_connect_locked(&self, inner: &mut Inner) {
        inner.conn_seq = next_session_seq();
        inner.read_state = ReadState::Connecting;
        let r = c_wrappers::connect_named_pipe(
            self.pipe.as_int_handle(),
            &mut *inner.read_overlapped,
        );
        match r {
            Ok(ConnectOutcome::Pending) => {}
            Ok(ConnectOutcome::Connected) => {
                debug!(endpoint = &*self.name, seq = inner.conn_seq, "client connected");
                self.enter_reading_locked(inner);
            }
            Err(e) => {
                warn!(endpoint = &*self.name, %e, "cannot wait for clients");
                inner.read_state = ReadState::Error;
            }
        }
    }

    fn enter_reading_locked(&self, inner: &mut Inner) {
        inner.read_state = ReadState::Reading;
        self.start_read_locked(inner);
    }

    fn start_read_locked(&self, inner: &mut Inner) {
        let r = {
            let Inner { read_overlapped, read_buf, .. } = &mut *inner;
            c_wrappers::start_overlapped_read(
                self.pipe.as_int_handle(),
                &mut read_buf[..],
                &mut **read_overlapped,
            )
        };
        match r {
            Ok(()) => {}
            Err(e) if client_gone(&e) => self.recycle_locked(inner),
            Err(e) => self.fail_locked(inner, &e, "read"),
        }
    }

    fn start_next_write_locked(&self, inner: &mut Inner) {
        let Some(next) = inner.write_queue.pop_front() else {
            inner.write_state = WriteState::Quiet;
            return;
        };
        inner.write_buf = next;
        let r = {
            let Inner { write_overlapped, write_buf, .. } = &mut *inner;
            c_wrappers::start_overlapped_write(
                self.pipe.as_int_handle(),
                write_buf,
                &mut **write_overlapped,
            )
        };
        match r {
            Ok(()) => inner.write_state = WriteState::Writing,
            Err(e) if client_gone(&e) => self.recycle_locked(inner),
            Err(e) => self.fail_locked(inner, &e, "write"),
        }
    }

    /// The client went away: cancel I/O, disconnect, clear per-connection state and put the
    /// same instance back into the connect wait.
    fn recycle_locked(&self, inner: &mut Inner) {
        debug!(
            endpoint = &*self.name,
            seq = inner.conn_seq,
            "client disconnected, recycling pipe instance"
        );
        c_wrappers::cancel_io(self.pipe.as_int_handle());
        c_wrappers::disconnect_named_pipe(self.pipe.as_int_handle()).ok();
        inner.reader.reset();
        inner.write_queue.clear();
        inner.write_buf.clear();
        inner.write_state = WriteState::Quiet;
        c_wrappers::reset_event(self.write_event.as_int_handle()).ok();
        self.start_connect_locked(inner);
    }

    /// Unexpected OS failure: the instance stops serving until destroyed.
    fn fail_locked(&self, inner: &mut Inner, e: &io::Error, during: &str) {
        warn!(
            endpoint = &*self.name,
            seq = inner.conn_seq,
            %e,
            "pipe {during} failed, endpoint out of service"
        );
        c_wrappers::cancel_io(self.pipe.as_int_handle());
        inner.read_state = ReadState::Error;
        inner.write_state = WriteState::Quiet;
        inner.write_queue.clear();
    }
}
