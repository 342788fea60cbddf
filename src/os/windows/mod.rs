//! Windows named pipe transport.
//!
//! Endpoints are overlapped named pipe instances under `\\.\pipe\`. One dispatcher thread blocks
//! in `WaitForMultipleObjects` on the completion events of every outstanding overlapped
//! operation; client callbacks run on the transport's worker pool. Unlike the Unix poller, a
//! signaled event here means "an overlapped operation finished", not "the handle would not
//! block".

mod c_wrappers;
mod dispatcher;
mod pipe_instance;
mod transport;
mod waiter;

pub use transport::NamedPipeTransport;

pub(super) mod winprelude {
    pub use {
        std::os::windows::prelude::*,
        windows_sys::Win32::Foundation::{HANDLE, INVALID_HANDLE_VALUE},
    };

    /// Windows-sys in version 0.52 represents handles as `isize`, unlike the standard library
    /// which uses pointer-sized `RawHandle`.
    pub trait AsIntHandle: AsRawHandle {
        #[inline]
        fn as_int_handle(&self) -> HANDLE { self.as_raw_handle() as HANDLE }
    }
    impl<T: AsRawHandle + ?Sized> AsIntHandle for T {}
}
