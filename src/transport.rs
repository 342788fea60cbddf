use {
    crate::{callback::MessageCallback, error::Result, properties::TransportProperties},
    std::sync::Arc,
};

/// Fixed limit on a message payload in either direction, in bytes.
///
/// A client message over the limit is a protocol error that closes the offending connection; a
/// callback reply over the limit likewise closes the connection rather than transmitting a
/// truncated reply.
pub const MAX_MESSAGE_SIZE: usize = 8092;

/// The contract of a named local IPC server transport.
///
/// A transport owns one dispatcher thread and one worker pool, multiplexes any number of named
/// endpoints, and invokes each endpoint's [`MessageCallback`] with every complete message a
/// connected client delivers. All operations except [`start`](ServerTransport::start) and
/// [`shutdown`](ServerTransport::shutdown) may be called concurrently from multiple threads.
pub trait ServerTransport: Sized {
    /// Provisions the transport's OS resources (socket directory, readiness multiplexer, worker
    /// pool) and launches the dispatcher thread.
    ///
    /// Directory permission or ownership mismatches are configuration errors that fail `start`
    /// outright; nothing is created in that case.
    fn start(props: &TransportProperties) -> Result<Self>;

    /// Creates a named endpoint that hands every received message to `callback`.
    ///
    /// Fails with [`AlreadyExists`](crate::Error::AlreadyExists) if the name is already bound on
    /// this transport, without touching the existing endpoint.
    fn create_server(&self, name: &str, callback: Arc<dyn MessageCallback>) -> Result<()>;

    /// Like [`create_server`](ServerTransport::create_server), but binds the endpoint under the
    /// given owner's per-user location (hardened multi-user deployments).
    fn create_server_for_owner(
        &self,
        name: &str,
        callback: Arc<dyn MessageCallback>,
        owner: &str,
    ) -> Result<()>;

    /// Whether an endpoint with this name is currently live on this transport.
    fn server_exists(&self, name: &str) -> bool;

    /// Closes the named endpoint and releases its OS resources.
    fn destroy_server(&self, name: &str) -> Result<()>;

    /// Stops the dispatcher, closes all endpoints and live client connections, shuts the worker
    /// pool down (in-flight callbacks finish) and removes on-disk state. Idempotent.
    fn shutdown(&self) -> Result<()>;
}

/// The transport implementation for the target platform.
#[cfg(unix)]
pub type Transport = crate::os::unix::UnixSocketTransport;
/// The transport implementation for the target platform.
#[cfg(windows)]
pub type Transport = crate::os::windows::NamedPipeTransport;
