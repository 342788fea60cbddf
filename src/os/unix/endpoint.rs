//! A named server endpoint: one bound, nonblocking Unix domain socket listener.

use {
    super::{
        dispatcher::{Core, Target},
        poller,
        session::ClientSession,
        unixprelude::*,
    },
    crate::{
        callback::MessageCallback,
        error::Result,
        misc::{next_token, Token},
    },
    std::{
        io, mem,
        os::unix::net::UnixListener,
        path::{Path, PathBuf},
        sync::Arc,
    },
    tracing::{debug, warn},
};

fn sun_path_max() -> usize {
    let addr = unsafe { mem::zeroed::<libc::sockaddr_un>() };
    mem::size_of_val(&addr.sun_path)
}

pub(super) struct Endpoint {
    name: Arc<str>,
    path: PathBuf,
    listener: UnixListener,
    token: Token,
    callback: Arc<dyn MessageCallback>,
}

impl Endpoint {
    /// Binds the listener, registers it for accept readiness and publishes it to the dispatcher.
    pub fn open(
        name: &str,
        path: PathBuf,
        callback: Arc<dyn MessageCallback>,
        core: &Arc<Core>,
    ) -> Result<Arc<Self>> {
        // One byte of sun_path is the terminating nul.
        if path.as_os_str().as_bytes().len() >= sun_path_max() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("socket path {} exceeds the platform sun_path limit", path.display()),
            )
            .into());
        }
        let listener = UnixListener::bind(&path)?;
        listener.set_nonblocking(true)?;
        let token = next_token();
        let endpoint =
            Arc::new(Self { name: Arc::from(name), path, listener, token, callback });
        core.insert_target(token, Target::Endpoint(Arc::clone(&endpoint)));
        core.poller.register(token, endpoint.listener.as_raw_fd(), poller::READ);
        // Endpoints are created off the dispatcher thread, which may be mid-wait on the old
        // registration set.
        core.poller.wake();
        debug!(name, path = %endpoint.path.display(), "endpoint listening");
        Ok(endpoint)
    }

    /// Accepts every pending connection. Runs on the dispatcher thread.
    pub fn accept_ready(&self, core: &Arc<Core>) {
        loop {
            match self.listener.accept() {
                Ok((stream, _)) => {
                    if let Err(e) = ClientSession::install(
                        stream,
                        Arc::clone(&self.name),
                        Arc::clone(&self.callback),
                        core,
                    ) {
                        warn!(endpoint = &*self.name, %e, "failed to set up accepted connection");
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(endpoint = &*self.name, %e, "accept failed");
                    break;
                }
            }
        }
    }

    pub fn close(&self, core: &Core) {
        core.poller.deregister(self.token);
        core.remove_target(self.token);
        core.poller.wake();
        debug!(name = &*self.name, "endpoint closed");
    }

    pub fn path(&self) -> &Path { &self.path }
}
