//! Test utilities: scratch socket directories, server name generation and payload synthesis.
#![allow(dead_code, unused_macros)]

#[macro_use]
mod eyre;
mod xorshift;

pub use {eyre::*, xorshift::*};

use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

pub fn test_wrapper(f: impl FnOnce() -> TestResult) -> TestResult {
    eyre::install();
    f()
}

/// A unique, not-yet-existing directory under the system temp dir.
pub fn scratch_dir(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "msgpipe-test-{tag}-{}-{:08x}",
        std::process::id(),
        Xorshift32::from_system_time().next(),
    ))
}

/// Generates server names unique within this process run.
#[derive(Copy, Clone, Debug)]
pub struct NameGen {
    rng: Xorshift32,
}
impl NameGen {
    pub fn new() -> Self { Self { rng: Xorshift32::from_system_time() } }
}
impl Iterator for NameGen {
    type Item = String;
    fn next(&mut self) -> Option<Self::Item> {
        Some(format!("msgpipe-test-{:08x}", self.rng.next()))
    }
}

pub fn echo_callback() -> Arc<dyn msgpipe::MessageCallback> {
    Arc::new(|data: &[u8]| -> Option<Vec<u8>> { Some(data.to_vec()) })
}

pub fn patterned_payload(len: usize) -> Vec<u8> {
    let mut rng = Xorshift32::from_system_time();
    (0..len).map(|_| (rng.next() & 0xFF) as u8).collect()
}

/// Polls `cond` until it holds or the deadline passes.
pub fn eventually(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}
