//! The Windows transport facade.

use {
    super::{
        dispatcher::{self, Core},
        pipe_instance::PipeInstance,
        waiter::{EventWaiter, MAX_WAIT_HANDLES},
    },
    crate::{
        callback::MessageCallback,
        error::{Error, Result},
        misc::LOCK_POISON,
        name::validate_name,
        pool::WorkerPool,
        properties::TransportProperties,
        transport::ServerTransport,
    },
    std::{
        collections::HashMap,
        ffi::OsString,
        io,
        sync::{
            atomic::{AtomicBool, Ordering::*},
            Arc, Mutex,
        },
        thread::JoinHandle,
    },
    tracing::{debug, info, warn},
};

/// Longest pipe path the `\\.\pipe\` namespace accepts.
const MAX_PIPE_PATH: usize = 256;

/// Endpoints one transport can multiplex. Each endpoint contributes two completion events to the
/// dispatcher's wait set, which also holds the wakeup event and is hard-limited by the OS.
const MAX_ENDPOINTS: usize = (MAX_WAIT_HANDLES - 1) / 2;

/// Windows named pipe IPC server transport.
///
/// See [`ServerTransport`] for the operation contract. Dropping the transport performs a
/// best-effort [`shutdown`](ServerTransport::shutdown).
pub struct NamedPipeTransport {
    core: Arc<Core>,
    endpoints: Mutex<HashMap<String, Arc<PipeInstance>>>,
    prefix: String,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl ServerTransport for NamedPipeTransport {
    fn start(props: &TransportProperties) -> Result<Self> {
        let TransportProperties::NamedPipe { prefix } = props else {
            return Err(Error::UnsupportedProperties);
        };
        // The prefix obeys the same character rules as server names, keeping the full pipe name
        // within one validated alphabet.
        validate_name(prefix)?;
        let core = Arc::new(Core {
            waiter: EventWaiter::new()?,
            pool: WorkerPool::new()?,
            running: AtomicBool::new(true),
            targets: Mutex::new(HashMap::new()),
            retired: Mutex::new(Vec::new()),
        });
        let dispatcher = std::thread::Builder::new()
            .name("msgpipe-dispatch".into())
            .spawn({
                let core = Arc::clone(&core);
                move || dispatcher::run(&core)
            })
            .map_err(Error::Io)?;
        info!(prefix, "named pipe transport started");
        Ok(Self {
            core,
            endpoints: Mutex::new(HashMap::new()),
            prefix: prefix.clone(),
            dispatcher: Mutex::new(Some(dispatcher)),
        })
    }

    fn create_server(&self, name: &str, callback: Arc<dyn MessageCallback>) -> Result<()> {
        validate_name(name)?;
        if !self.core.running.load(Acquire) {
            return Err(Error::Stopped);
        }
        let mut endpoints = self.endpoints.lock().expect(LOCK_POISON);
        if endpoints.contains_key(name) {
            return Err(Error::AlreadyExists(name.to_owned()));
        }
        // Refused here, where the caller can handle it; letting the wait set outgrow the OS
        // limit would instead kill the dispatcher under every existing endpoint.
        if endpoints.len() >= MAX_ENDPOINTS {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("endpoint limit of {MAX_ENDPOINTS} per transport reached"),
            )));
        }
        let path = format!(r"\\.\pipe\{}-{name}", self.prefix);
        if path.len() > MAX_PIPE_PATH {
            return Err(Error::InvalidName(name.to_owned()));
        }
        // A collision with a pipe created by another process fails here through the
        // first-instance flag.
        let instance = PipeInstance::open(
            name,
            OsString::from(path).as_os_str(),
            callback,
            &self.core,
        )?;
        instance.begin_connect();
        endpoints.insert(name.to_owned(), instance);
        info!(name, "IPC server created");
        Ok(())
    }

    fn create_server_for_owner(
        &self,
        name: &str,
        callback: Arc<dyn MessageCallback>,
        owner: &str,
    ) -> Result<()> {
        // The pipe namespace is flat; there is no per-owner placement to apply.
        debug!(name, owner, "per-owner placement not applicable to named pipes");
        self.create_server(name, callback)
    }

    fn server_exists(&self, name: &str) -> bool {
        self.endpoints.lock().expect(LOCK_POISON).contains_key(name)
    }

    fn destroy_server(&self, name: &str) -> Result<()> {
        let instance = self
            .endpoints
            .lock()
            .expect(LOCK_POISON)
            .remove(name)
            .ok_or_else(|| Error::NotFound(name.to_owned()))?;
        instance.close(&self.core);
        info!(name, "IPC server destroyed");
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        let was_running = self.core.running.swap(false, AcqRel);
        self.core.waiter.wake();
        if let Some(handle) = self.dispatcher.lock().expect(LOCK_POISON).take() {
            if handle.join().is_err() {
                warn!("dispatcher thread panicked");
            }
        }
        self.endpoints.lock().expect(LOCK_POISON).clear();
        self.core.pool.shutdown();
        if was_running {
            info!("named pipe transport stopped");
        }
        Ok(())
    }
}

impl Drop for NamedPipeTransport {
    fn drop(&mut self) {
        if self.core.running.load(Acquire) {
            if let Err(e) = self.shutdown() {
                warn!(%e, "transport shutdown during drop failed");
            }
        }
    }
}
