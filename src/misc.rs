#![allow(dead_code, clippy::arithmetic_side_effects)]

use std::{
    io,
    sync::atomic::{AtomicU64, Ordering::Relaxed},
};

pub(crate) static LOCK_POISON: &str = "unexpected lock poison";

pub(crate) trait ToBool {
    fn to_bool(self) -> bool;
}
impl ToBool for bool {
    #[inline(always)]
    fn to_bool(self) -> bool { self }
}
impl ToBool for i32 {
    #[inline(always)]
    fn to_bool(self) -> bool { self != 0 }
}

pub(crate) trait OrErrno<T>: Sized {
    fn true_or_errno(self, f: impl FnOnce() -> T) -> io::Result<T>;
    #[inline(always)]
    fn true_val_or_errno(self, value: T) -> io::Result<T> { self.true_or_errno(|| value) }
}
impl<B: ToBool, T> OrErrno<T> for B {
    #[inline]
    fn true_or_errno(self, f: impl FnOnce() -> T) -> io::Result<T> {
        if self.to_bool() {
            Ok(f())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

/// Identifies one registered I/O source within a transport's readiness multiplexer.
pub(crate) type Token = u64;

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);
pub(crate) fn next_token() -> Token { NEXT_TOKEN.fetch_add(1, Relaxed) }

// Diagnostics only, never correctness-relevant.
static NEXT_SESSION_SEQ: AtomicU64 = AtomicU64::new(1);
pub(crate) fn next_session_seq() -> u64 { NEXT_SESSION_SEQ.fetch_add(1, Relaxed) }

/// Worker pool sizing, a function of available processors.
pub(crate) fn default_pool_size() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1) * 2
}
