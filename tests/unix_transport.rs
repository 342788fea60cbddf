//! End-to-end tests for the Unix domain socket transport.
#![cfg(unix)]

#[macro_use]
mod util;

use {
    msgpipe::{
        ClientChannel, Error, ServerTransport, Transport, TransportProperties, MAX_MESSAGE_SIZE,
    },
    std::{
        fs,
        os::unix::fs::{DirBuilderExt, MetadataExt},
        sync::{
            atomic::{AtomicUsize, Ordering::SeqCst},
            Arc,
        },
        time::Duration,
    },
    util::*,
};

#[test]
fn create_exists_destroy_lifecycle() -> TestResult {
    test_wrapper(|| {
        let props = TransportProperties::unix_socket(scratch_dir("lifecycle"));
        let transport = Transport::start(&props)?;
        let name = NameGen::new().next().unwrap();

        ensure_eq!(transport.server_exists(&name), false);
        transport.create_server(&name, echo_callback())?;
        ensure_eq!(transport.server_exists(&name), true);

        // A duplicate bind must fail without disturbing the live endpoint.
        let dup = transport.create_server(&name, echo_callback());
        color_eyre::eyre::ensure!(
            matches!(dup, Err(Error::AlreadyExists(ref n)) if n == &name),
            "duplicate create returned {dup:?}"
        );
        ensure_eq!(transport.server_exists(&name), true);

        transport.destroy_server(&name)?;
        ensure_eq!(transport.server_exists(&name), false);
        let gone = transport.destroy_server(&name);
        color_eyre::eyre::ensure!(
            matches!(gone, Err(Error::NotFound(_))),
            "double destroy returned {gone:?}"
        );
        transport.shutdown()?;
        Ok(())
    })
}

#[test]
fn rejects_invalid_names() -> TestResult {
    test_wrapper(|| {
        let props = TransportProperties::unix_socket(scratch_dir("names"));
        let transport = Transport::start(&props)?;
        for name in ["", ".hidden", "a/b", "white space", "nul\0byte"] {
            let r = transport.create_server(name, echo_callback());
            color_eyre::eyre::ensure!(
                matches!(r, Err(Error::InvalidName(_))),
                "{name:?} was accepted"
            );
        }
        transport.shutdown()?;
        Ok(())
    })
}

#[test]
fn echo_roundtrip_up_to_limit() -> TestResult {
    test_wrapper(|| {
        let props = TransportProperties::unix_socket(scratch_dir("echo"));
        let transport = Transport::start(&props)?;
        let name = NameGen::new().next().unwrap();
        transport.create_server(&name, echo_callback())?;

        let mut channel = ClientChannel::connect(&props, &name)?;
        for len in [1, 17, 4096, MAX_MESSAGE_SIZE] {
            let payload = patterned_payload(len);
            let reply = channel.roundtrip(&payload)?;
            ensure_eq!(reply, payload, "{len}-byte payload must echo byte-identically");
        }
        transport.shutdown()?;
        Ok(())
    })
}

#[test]
fn multiple_messages_one_connection() -> TestResult {
    test_wrapper(|| {
        let props = TransportProperties::unix_socket(scratch_dir("multi"));
        let transport = Transport::start(&props)?;
        let name = NameGen::new().next().unwrap();
        transport.create_server(&name, echo_callback())?;

        let mut channel = ClientChannel::connect(&props, &name)?;
        for i in 0..50u32 {
            let payload = i.to_be_bytes();
            ensure_eq!(channel.roundtrip(&payload)?, payload.to_vec());
        }
        transport.shutdown()?;
        Ok(())
    })
}

#[test]
fn oversized_client_message_rejected_before_send() -> TestResult {
    test_wrapper(|| {
        let props = TransportProperties::unix_socket(scratch_dir("toobig"));
        let transport = Transport::start(&props)?;
        let name = NameGen::new().next().unwrap();
        transport.create_server(&name, echo_callback())?;

        let mut channel = ClientChannel::connect(&props, &name)?;
        let r = channel.send(&vec![0u8; MAX_MESSAGE_SIZE + 1]);
        color_eyre::eyre::ensure!(matches!(r, Err(Error::TooBig { .. })), "send returned {r:?}");
        // The channel is still usable, nothing was written.
        ensure_eq!(channel.roundtrip(b"still alive")?, b"still alive".to_vec());
        transport.shutdown()?;
        Ok(())
    })
}

#[test]
fn oversized_reply_closes_connection() -> TestResult {
    test_wrapper(|| {
        let props = TransportProperties::unix_socket(scratch_dir("bigreply"));
        let transport = Transport::start(&props)?;
        let name = NameGen::new().next().unwrap();
        let oversized: Arc<dyn msgpipe::MessageCallback> =
            Arc::new(|_: &[u8]| -> Option<Vec<u8>> { Some(vec![0u8; MAX_MESSAGE_SIZE + 1]) });
        transport.create_server(&name, oversized)?;

        let mut channel = ClientChannel::connect(&props, &name)?;
        channel.send(b"trigger")?;
        // No truncated reply may arrive; the server closes the connection instead.
        let r = channel.recv();
        color_eyre::eyre::ensure!(r.is_err(), "got a reply that should have been suppressed");
        transport.shutdown()?;
        Ok(())
    })
}

#[test]
fn callbacks_without_reply_still_consume_messages() -> TestResult {
    test_wrapper(|| {
        let props = TransportProperties::unix_socket(scratch_dir("oneway"));
        let transport = Transport::start(&props)?;
        let name = NameGen::new().next().unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let callback: Arc<dyn msgpipe::MessageCallback> = Arc::new(move |_: &[u8]| {
            counter.fetch_add(1, SeqCst);
            None
        });
        transport.create_server(&name, callback)?;

        let mut channel = ClientChannel::connect(&props, &name)?;
        for _ in 0..5 {
            channel.send(b"fire and forget")?;
        }
        color_eyre::eyre::ensure!(
            eventually(Duration::from_secs(5), || seen.load(SeqCst) == 5),
            "callback ran {} times, expected 5",
            seen.load(SeqCst)
        );
        transport.shutdown()?;
        Ok(())
    })
}

#[test]
fn message_sent_just_before_disconnect_reaches_callback() -> TestResult {
    test_wrapper(|| {
        let props = TransportProperties::unix_socket(scratch_dir("lastword"));
        let transport = Transport::start(&props)?;
        let name = NameGen::new().next().unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let callback: Arc<dyn msgpipe::MessageCallback> = Arc::new(move |_: &[u8]| {
            counter.fetch_add(1, SeqCst);
            None
        });
        transport.create_server(&name, callback)?;

        // The hangup must not swallow a message the client got out before it: the server may
        // well observe the send and the EOF in the same readiness cycle.
        for _ in 0..3 {
            let mut channel = ClientChannel::connect(&props, &name)?;
            channel.send(b"parting shot")?;
            drop(channel);
        }
        color_eyre::eyre::ensure!(
            eventually(Duration::from_secs(5), || seen.load(SeqCst) == 3),
            "callback ran {} times, expected 3",
            seen.load(SeqCst)
        );
        transport.shutdown()?;
        Ok(())
    })
}

#[test]
fn insecure_directory_fails_start() -> TestResult {
    test_wrapper(|| {
        let dir = scratch_dir("insecure");
        fs::DirBuilder::new().recursive(true).mode(0o775).create(&dir)?;
        // Group-writable socket directories defeat the ownership checks.
        let r = Transport::start(&TransportProperties::unix_socket(&dir));
        color_eyre::eyre::ensure!(
            matches!(r, Err(Error::Insecure { .. })),
            "start accepted a group-writable directory"
        );
        fs::remove_dir_all(&dir)?;
        Ok(())
    })
}

#[test]
fn concurrent_creates_distinct_names() -> TestResult {
    test_wrapper(|| {
        let props = TransportProperties::unix_socket(scratch_dir("concurrent"));
        let transport = Arc::new(Transport::start(&props)?);
        let names = NameGen::new().take(8).collect::<Vec<_>>();
        let handles = names
            .iter()
            .map(|name| {
                let transport = Arc::clone(&transport);
                let name = name.clone();
                std::thread::spawn(move || transport.create_server(&name, echo_callback()))
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap()?;
        }
        for name in &names {
            ensure_eq!(transport.server_exists(name), true, "{name} missing");
            let mut channel = ClientChannel::connect(&props, name)?;
            ensure_eq!(channel.roundtrip(b"ping")?, b"ping".to_vec());
        }
        transport.shutdown()?;
        Ok(())
    })
}

#[test]
fn shutdown_removes_directory_and_endpoints() -> TestResult {
    test_wrapper(|| {
        let dir = scratch_dir("teardown");
        let props = TransportProperties::unix_socket(&dir);
        let transport = Transport::start(&props)?;
        let names = NameGen::new().take(3).collect::<Vec<_>>();
        for name in &names {
            transport.create_server(name, echo_callback())?;
        }
        transport.shutdown()?;
        for name in &names {
            ensure_eq!(transport.server_exists(name), false);
        }
        ensure_eq!(dir.exists(), false, "socket directory must be removed on shutdown");
        // Creating after shutdown is an error, not a hang.
        let late = transport.create_server(&names[0], echo_callback());
        color_eyre::eyre::ensure!(matches!(late, Err(Error::Stopped)), "late create: {late:?}");
        Ok(())
    })
}

#[test]
fn per_user_layout_roundtrip() -> TestResult {
    test_wrapper(|| {
        let dir = scratch_dir("peruser");
        let props = TransportProperties::unix_socket_per_user(&dir);
        let transport = Transport::start(&props)?;
        let name = NameGen::new().next().unwrap();
        transport.create_server(&name, echo_callback())?;

        // The base directory is world-traversable, the per-owner subdirectory is owner-only.
        ensure_eq!(fs::symlink_metadata(&dir)?.mode() & 0o7777, 0o755);
        let owner_dir = fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .find(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .expect("per-owner subdirectory must exist");
        ensure_eq!(fs::symlink_metadata(owner_dir.path())?.mode() & 0o7777, 0o700);
        ensure_eq!(owner_dir.path().join(&name).exists(), true);

        let mut channel = ClientChannel::connect(&props, &name)?;
        ensure_eq!(channel.roundtrip(b"hardened")?, b"hardened".to_vec());
        transport.shutdown()?;
        ensure_eq!(dir.exists(), false);
        Ok(())
    })
}

#[test]
fn client_disconnect_leaves_server_usable() -> TestResult {
    test_wrapper(|| {
        let props = TransportProperties::unix_socket(scratch_dir("reconnect"));
        let transport = Transport::start(&props)?;
        let name = NameGen::new().next().unwrap();
        transport.create_server(&name, echo_callback())?;

        for cycle in 0..3 {
            let mut channel = ClientChannel::connect(&props, &name)?;
            let payload = patterned_payload(128);
            ensure_eq!(channel.roundtrip(&payload)?, payload, "cycle {cycle}");
            drop(channel);
        }
        transport.shutdown()?;
        Ok(())
    })
}

#[test]
fn stale_socket_file_is_replaced() -> TestResult {
    test_wrapper(|| {
        let dir = scratch_dir("stale");
        let props = TransportProperties::unix_socket(&dir);
        let name = NameGen::new().next().unwrap();
        {
            let first = Transport::start(&props)?;
            first.create_server(&name, echo_callback())?;
            // Simulate an unclean exit: forget the transport so nothing is cleaned up.
            std::mem::forget(first);
        }
        let second = Transport::start(&props)?;
        second.create_server(&name, echo_callback())?;
        let mut channel = ClientChannel::connect(&props, &name)?;
        ensure_eq!(channel.roundtrip(b"fresh bind")?, b"fresh bind".to_vec());
        second.shutdown()?;
        Ok(())
    })
}
