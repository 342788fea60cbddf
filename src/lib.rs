#![doc = include_str!("../README.md")]
#![warn(
    missing_docs,
    clippy::panic_in_result_fn,
    clippy::missing_assert_message,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]

#[macro_use]
mod macros;

pub mod error;
pub use error::{Error, Result};

mod callback;
mod channel;
mod framing;
mod name;
mod properties;
mod transport;
pub use {
    callback::MessageCallback,
    channel::ClientChannel,
    properties::{TransportProperties, SOCKET_DIR_ENV_VAR},
    transport::{ServerTransport, Transport, MAX_MESSAGE_SIZE},
};

mod pool;

/// Platform-specific transport implementations.
///
/// This module houses two submodules, `unix` and `windows`, of which only the one matching the
/// target platform is compiled. The [`Transport`] alias at the crate root resolves to the
/// platform's implementation, which is the intended way of referring to it.
pub mod os {
    #[cfg(unix)]
    pub mod unix;
    #[cfg(windows)]
    pub mod windows;
}

mod misc;
