/// Capability supplied by the owner of a server endpoint, invoked with every message a client
/// delivers to that endpoint.
///
/// Invocations happen on the transport's worker pool, never on its dispatcher thread, so a
/// blocking implementation delays only its own clients' replies and cannot stall acceptance of
/// new connections. A returned reply is sent back over the connection the message arrived on; it
/// must not exceed [`MAX_MESSAGE_SIZE`](crate::MAX_MESSAGE_SIZE), otherwise the connection is
/// closed with a logged protocol error.
pub trait MessageCallback: Send + Sync + 'static {
    /// Handles one complete message, optionally producing a reply.
    fn data_received(&self, data: &[u8]) -> Option<Vec<u8>>;
}

impl<F: Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync + 'static> MessageCallback for F {
    fn data_received(&self, data: &[u8]) -> Option<Vec<u8>> { self(data) }
}
