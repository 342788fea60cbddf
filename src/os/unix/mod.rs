//! Unix domain socket transport.
//!
//! Server endpoints are socket files inside a permission-hardened socket directory. One
//! dispatcher thread multiplexes every listener and client connection through `poll(2)`; client
//! callbacks run on the transport's worker pool.

mod c_wrappers;
mod dispatcher;
mod endpoint;
mod poller;
mod provision;
mod session;
mod transport;

pub use transport::UnixSocketTransport;

pub(crate) use {c_wrappers::username_of_euid, provision::SOCKET_FILE_PREFIX};

pub(super) mod unixprelude {
    pub use {
        libc::{c_int, uid_t},
        std::os::unix::prelude::*,
    };
}
