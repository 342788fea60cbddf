use std::{
    env,
    path::{Path, PathBuf},
};

/// Environment variable through which the socket directory is communicated to client processes
/// that need to locate servers independently of the transport that created them.
pub const SOCKET_DIR_ENV_VAR: &str = "MSGPIPE_SOCKET_DIR";

/// Identifies the transport kind and carries its kind-specific configuration.
///
/// Immutable once handed to [`ServerTransport::start`](crate::ServerTransport::start). Starting a
/// transport with properties of the wrong kind fails with
/// [`UnsupportedProperties`](crate::Error::UnsupportedProperties).
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportProperties {
    /// Unix domain socket transport configuration.
    UnixSocket {
        /// Directory that houses the socket files. Created with hardened permissions on `start`
        /// if absent, verified against them if present.
        socket_dir: PathBuf,
        /// Selects the hardened multi-user layout: a world-traversable top-level directory with
        /// one owner-only subdirectory per server owner.
        per_user: bool,
    },
    /// Windows named pipe transport configuration.
    NamedPipe {
        /// Deployment-specific prefix prepended to every endpoint name under the `\\.\pipe\`
        /// namespace.
        prefix: String,
    },
}

impl TransportProperties {
    /// Single-user Unix socket properties: socket files live directly in `socket_dir`, which is
    /// kept owner-only.
    pub fn unix_socket(socket_dir: impl AsRef<Path>) -> Self {
        Self::UnixSocket { socket_dir: socket_dir.as_ref().to_owned(), per_user: false }
    }
    /// Hardened multi-user Unix socket properties: servers bind under per-owner subdirectories
    /// of `socket_dir`.
    pub fn unix_socket_per_user(socket_dir: impl AsRef<Path>) -> Self {
        Self::UnixSocket { socket_dir: socket_dir.as_ref().to_owned(), per_user: true }
    }
    /// Named pipe properties with the given pipe-name prefix.
    pub fn named_pipe(prefix: impl Into<String>) -> Self {
        Self::NamedPipe { prefix: prefix.into() }
    }
    /// Reads the socket directory from [`SOCKET_DIR_ENV_VAR`], for client processes locating a
    /// server whose transport they did not start.
    pub fn socket_dir_from_env() -> Option<PathBuf> {
        env::var_os(SOCKET_DIR_ENV_VAR).map(PathBuf::from)
    }
}
