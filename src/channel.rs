//! Blocking client-side channel speaking the framed message protocol.

#![allow(clippy::indexing_slicing)]

use {
    crate::{
        error::{Error, Result},
        framing::{encode_message, MessageReader},
        name::validate_name,
        properties::TransportProperties,
    },
    std::io::{self, Read, Write},
};

#[cfg(unix)]
type Stream = std::os::unix::net::UnixStream;
#[cfg(windows)]
type Stream = std::fs::File;

/// A blocking connection to a named IPC server.
///
/// Handles framing on both directions: [`send`](ClientChannel::send) wraps a payload in a message
/// header, [`recv`](ClientChannel::recv) reassembles the peer's frames into whole payloads. The
/// channel enforces the same per-message size limit the server does.
pub struct ClientChannel {
    stream: Stream,
    reader: MessageReader,
}

impl ClientChannel {
    /// Connects to the server `name` as located by `props`.
    ///
    /// For a per-user Unix socket transport this resolves the endpoint under the current user's
    /// subdirectory; use [`connect_for_owner`](ClientChannel::connect_for_owner) to reach a
    /// server created for a different owner.
    pub fn connect(props: &TransportProperties, name: &str) -> Result<Self> {
        Self::connect_inner(props, name, None)
    }

    /// Connects to a server that was created under `owner`'s per-user location.
    pub fn connect_for_owner(
        props: &TransportProperties,
        name: &str,
        owner: &str,
    ) -> Result<Self> {
        Self::connect_inner(props, name, Some(owner))
    }

    #[cfg(unix)]
    fn connect_inner(
        props: &TransportProperties,
        name: &str,
        owner: Option<&str>,
    ) -> Result<Self> {
        use crate::os::unix::{username_of_euid, SOCKET_FILE_PREFIX};
        validate_name(name)?;
        let TransportProperties::UnixSocket { socket_dir, per_user } = props else {
            return Err(Error::UnsupportedProperties);
        };
        let path = if *per_user {
            let owner = match owner {
                Some(owner) => owner.to_owned(),
                None => username_of_euid()?,
            };
            socket_dir.join(owner).join(name)
        } else {
            socket_dir.join(format!("{SOCKET_FILE_PREFIX}{name}"))
        };
        let stream = Stream::connect(path)?;
        Ok(Self { stream, reader: MessageReader::new() })
    }

    #[cfg(windows)]
    fn connect_inner(
        props: &TransportProperties,
        name: &str,
        owner: Option<&str>,
    ) -> Result<Self> {
        validate_name(name)?;
        let TransportProperties::NamedPipe { prefix } = props else {
            return Err(Error::UnsupportedProperties);
        };
        // The pipe namespace is flat; per-owner placement does not apply.
        let _ = owner;
        let path = format!(r"\\.\pipe\{prefix}-{name}");
        let stream = std::fs::OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self { stream, reader: MessageReader::new() })
    }

    /// Frames and sends one payload. Rejects empty payloads and payloads over
    /// [`MAX_MESSAGE_SIZE`](crate::MAX_MESSAGE_SIZE) without writing anything.
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        let framed = encode_message(payload)?;
        self.stream.write_all(&framed)?;
        self.stream.flush()?;
        Ok(())
    }

    /// Blocks until one whole message has arrived. A clean peer close mid-stream surfaces as
    /// [`io::ErrorKind::UnexpectedEof`].
    pub fn recv(&mut self) -> Result<Vec<u8>> {
        loop {
            if let Some(message) = self.reader.next_message() {
                return Ok(message);
            }
            let mut buf = [0u8; 8192];
            let n = match self.stream.read(&mut buf) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed before a complete message arrived",
                    )
                    .into())
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            self.reader.consume(&buf[..n]).map_err(Error::from)?;
        }
    }

    /// Sends one payload and waits for the server's reply.
    pub fn roundtrip(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        self.send(payload)?;
        self.recv()
    }
}
