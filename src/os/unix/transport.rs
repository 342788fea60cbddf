//! The Unix transport facade tying provisioning, the dispatcher and the endpoint table together.

use {
    super::{
        c_wrappers,
        dispatcher::{self, Core},
        endpoint::Endpoint,
        poller::Poller,
        provision::{self, OWNER_DIR_MODE, SHARED_BASE_MODE, SOCKET_FILE_PREFIX},
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
        env, fs, io,
        path::PathBuf,
        sync::{
            atomic::{AtomicBool, Ordering::*},
            Arc, Mutex,
        },
        thread::JoinHandle,
    },
    tracing::{info, warn},
};

/// Unix domain socket IPC server transport.
///
/// See [`ServerTransport`] for the operation contract. Dropping the transport performs a
/// best-effort [`shutdown`](ServerTransport::shutdown).
pub struct UnixSocketTransport {
    core: Arc<Core>,
    endpoints: Mutex<HashMap<String, Arc<Endpoint>>>,
    socket_dir: PathBuf,
    per_user: bool,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl ServerTransport for UnixSocketTransport {
    fn start(props: &TransportProperties) -> Result<Self> {
        let TransportProperties::UnixSocket { socket_dir, per_user } = props else {
            return Err(Error::UnsupportedProperties);
        };
        let socket_dir = if socket_dir.is_absolute() {
            socket_dir.clone()
        } else {
            env::current_dir().map_err(Error::Io)?.join(socket_dir)
        };
        let euid = c_wrappers::geteuid();
        let base_mode = if *per_user { SHARED_BASE_MODE } else { OWNER_DIR_MODE };
        provision::prepare_dir(&socket_dir, base_mode, euid)?;

        let core = Arc::new(Core {
            poller: Poller::new()?,
            pool: WorkerPool::new()?,
            running: AtomicBool::new(true),
            targets: Mutex::new(HashMap::new()),
        });
        let dispatcher = std::thread::Builder::new()
            .name("msgpipe-dispatch".into())
            .spawn({
                let core = Arc::clone(&core);
                move || dispatcher::run(&core)
            })
            .map_err(Error::Io)?;
        info!(socket_dir = %socket_dir.display(), per_user, "unix socket transport started");
        Ok(Self {
            core,
            endpoints: Mutex::new(HashMap::new()),
            socket_dir,
            per_user: *per_user,
            dispatcher: Mutex::new(Some(dispatcher)),
        })
    }

    fn create_server(&self, name: &str, callback: Arc<dyn MessageCallback>) -> Result<()> {
        if self.per_user {
            let owner = c_wrappers::username_of_euid()?;
            return self.create_internal(name, callback, Some(&owner));
        }
        self.create_internal(name, callback, None)
    }

    fn create_server_for_owner(
        &self,
        name: &str,
        callback: Arc<dyn MessageCallback>,
        owner: &str,
    ) -> Result<()> {
        if !self.per_user {
            // Owner subdirectories only exist in the multi-user layout.
            return Err(Error::UnsupportedProperties);
        }
        self.create_internal(name, callback, Some(owner))
    }

    fn server_exists(&self, name: &str) -> bool {
        self.endpoints.lock().expect(LOCK_POISON).contains_key(name)
    }

    fn destroy_server(&self, name: &str) -> Result<()> {
        let endpoint = self
            .endpoints
            .lock()
            .expect(LOCK_POISON)
            .remove(name)
            .ok_or_else(|| Error::NotFound(name.to_owned()))?;
        endpoint.close(&self.core);
        // Live sessions accepted through this endpoint keep running until their clients hang up.
        match fs::remove_file(endpoint.path()) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        info!(name, "IPC server destroyed");
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        let was_running = self.core.running.swap(false, AcqRel);
        self.core.poller.wake();
        if let Some(handle) = self.dispatcher.lock().expect(LOCK_POISON).take() {
            if handle.join().is_err() {
                warn!("dispatcher thread panicked");
            }
        }
        self.endpoints.lock().expect(LOCK_POISON).clear();
        self.core.pool.shutdown();
        provision::remove_tree(&self.socket_dir)?;
        if was_running {
            info!("unix socket transport stopped");
        }
        Ok(())
    }
}

impl UnixSocketTransport {
    /// The directory clients resolve socket paths against, for publishing via
    /// [`SOCKET_DIR_ENV_VAR`](crate::SOCKET_DIR_ENV_VAR).
    pub fn socket_dir(&self) -> &std::path::Path { &self.socket_dir }

    fn create_internal(
        &self,
        name: &str,
        callback: Arc<dyn MessageCallback>,
        owner: Option<&str>,
    ) -> Result<()> {
        validate_name(name)?;
        if !self.core.running.load(Acquire) {
            return Err(Error::Stopped);
        }
        // The table lock is held across provisioning and bind so two concurrent creates of the
        // same name cannot both reach the filesystem.
        let mut endpoints = self.endpoints.lock().expect(LOCK_POISON);
        if endpoints.contains_key(name) {
            return Err(Error::AlreadyExists(name.to_owned()));
        }
        let euid = c_wrappers::geteuid();
        // Re-verified on every bind: the directory may have been replaced or re-permissioned
        // since the transport started.
        let (path, expected_owner) = match owner {
            None => {
                provision::verify_dir(&self.socket_dir, OWNER_DIR_MODE, euid)?;
                (self.socket_dir.join(format!("{SOCKET_FILE_PREFIX}{name}")), euid)
            }
            Some(owner) => {
                provision::verify_dir(&self.socket_dir, SHARED_BASE_MODE, euid)?;
                let owner_uid = c_wrappers::uid_of_user(owner)?.ok_or_else(|| {
                    Error::Io(io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("no such user: {owner}"),
                    ))
                })?;
                let dir = provision::prepare_owner_dir(&self.socket_dir, owner, owner_uid)?;
                (dir.join(name), owner_uid)
            }
        };
        provision::delete_stale(&path)?;
        let endpoint = Endpoint::open(name, path, callback, &self.core)?;
        // A socket bound by a privileged process in another user's directory must end up owned
        // by that user before the post-bind ownership check.
        let handover = if expected_owner != euid {
            c_wrappers::chown(endpoint.path(), expected_owner).map_err(Error::Io)
        } else {
            Ok(())
        };
        if let Err(e) = handover
            .and_then(|()| provision::verify_socket_file(endpoint.path(), expected_owner))
        {
            endpoint.close(&self.core);
            fs::remove_file(endpoint.path()).ok();
            return Err(e);
        }
        endpoints.insert(name.to_owned(), endpoint);
        info!(name, owner = owner.unwrap_or("<process user>"), "IPC server created");
        Ok(())
    }
}

impl Drop for UnixSocketTransport {
    fn drop(&mut self) {
        if self.core.running.load(Acquire) {
            if let Err(e) = self.shutdown() {
                warn!(%e, "transport shutdown during drop failed");
            }
        }
    }
}
