//! Error type for transport and channel operations.

use std::{io, path::PathBuf};

/// Failures surfaced by [`ServerTransport`](crate::ServerTransport) operations and by
/// [`ClientChannel`](crate::ClientChannel).
///
/// Configuration and security failures (`InvalidName`, `AlreadyExists`, `NotFound`, `Insecure`,
/// `UnsupportedProperties`) are always returned synchronously from the operation that caused them.
/// Protocol and I/O failures local to one client connection are contained to that connection and
/// logged instead; they only appear in this type when they occur on a client channel.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The server name is empty, too long or contains characters outside the allowed set.
    #[error("invalid server name {0:?}")]
    InvalidName(String),
    /// A server with this name is already live on this transport.
    #[error("IPC server {0:?} already exists")]
    AlreadyExists(String),
    /// No server with this name is live on this transport.
    #[error("IPC server {0:?} does not exist")]
    NotFound(String),
    /// The socket directory or a socket file has permission bits or an owner other than the ones
    /// this deployment requires. The transport refuses to operate on it rather than fix it up.
    #[error("{path:?} is insecure: {reason}")]
    Insecure {
        /// The offending filesystem path.
        path: PathBuf,
        /// What exactly did not match.
        reason: String,
    },
    /// The properties object describes a different transport kind than the one being started.
    #[error("unsupported transport properties for this transport kind")]
    UnsupportedProperties,
    /// A payload exceeds the fixed per-message limit.
    #[error("message of {size} bytes exceeds the {max}-byte limit")]
    TooBig {
        /// Size of the rejected payload.
        size: usize,
        /// The limit it was checked against.
        max: usize,
    },
    /// A message frame received from the peer could not be decoded.
    #[error("malformed message frame: {0}")]
    Malformed(String),
    /// The transport has been shut down or its dispatcher has terminated.
    #[error("transport is not running")]
    Stopped,
    /// An operating system I/O failure.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result alias defaulting to the crate's [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;
