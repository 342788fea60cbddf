//! End-to-end tests for the Windows named pipe transport.
#![cfg(windows)]

#[macro_use]
mod util;

use {
    msgpipe::{
        ClientChannel, Error, ServerTransport, Transport, TransportProperties, MAX_MESSAGE_SIZE,
    },
    std::time::{Duration, Instant},
    util::*,
};

/// Connecting can transiently fail while the server is recycling its single pipe instance
/// after the previous client; retry until the instance is back in the connect wait.
fn connect_retrying(props: &TransportProperties, name: &str) -> TestResult<ClientChannel> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match ClientChannel::connect(props, name) {
            Ok(channel) => return Ok(channel),
            Err(e) if Instant::now() < deadline => {
                let _ = e;
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[test]
fn create_exists_destroy_lifecycle() -> TestResult {
    test_wrapper(|| {
        let props = TransportProperties::named_pipe("msgpipe-test");
        let transport = Transport::start(&props)?;
        let name = NameGen::new().next().unwrap();

        ensure_eq!(transport.server_exists(&name), false);
        transport.create_server(&name, echo_callback())?;
        ensure_eq!(transport.server_exists(&name), true);

        let dup = transport.create_server(&name, echo_callback());
        color_eyre::eyre::ensure!(
            matches!(dup, Err(Error::AlreadyExists(ref n)) if n == &name),
            "duplicate create returned {dup:?}"
        );

        transport.destroy_server(&name)?;
        ensure_eq!(transport.server_exists(&name), false);
        transport.shutdown()?;
        Ok(())
    })
}

#[test]
fn echo_roundtrip_up_to_limit() -> TestResult {
    test_wrapper(|| {
        let props = TransportProperties::named_pipe("msgpipe-test");
        let transport = Transport::start(&props)?;
        let name = NameGen::new().next().unwrap();
        transport.create_server(&name, echo_callback())?;

        let mut channel = connect_retrying(&props, &name)?;
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
fn pipe_instance_reused_across_clients() -> TestResult {
    test_wrapper(|| {
        let props = TransportProperties::named_pipe("msgpipe-test");
        let transport = Transport::start(&props)?;
        let name = NameGen::new().next().unwrap();
        transport.create_server(&name, echo_callback())?;

        // The endpoint has exactly one instance; each cycle must find it recycled and ready.
        for cycle in 0..3 {
            let mut channel = connect_retrying(&props, &name)?;
            let payload = patterned_payload(256);
            ensure_eq!(channel.roundtrip(&payload)?, payload, "cycle {cycle}");
            drop(channel);
        }
        transport.shutdown()?;
        Ok(())
    })
}

#[test]
fn oversized_reply_closes_connection() -> TestResult {
    test_wrapper(|| {
        let props = TransportProperties::named_pipe("msgpipe-test");
        let transport = Transport::start(&props)?;
        let name = NameGen::new().next().unwrap();
        let oversized: std::sync::Arc<dyn msgpipe::MessageCallback> =
            std::sync::Arc::new(|_: &[u8]| -> Option<Vec<u8>> {
                Some(vec![0u8; MAX_MESSAGE_SIZE + 1])
            });
        transport.create_server(&name, oversized)?;

        let mut channel = connect_retrying(&props, &name)?;
        channel.send(b"trigger")?;
        let r = channel.recv();
        color_eyre::eyre::ensure!(r.is_err(), "got a reply that should have been suppressed");
        transport.shutdown()?;
        Ok(())
    })
}

#[test]
fn endpoint_limit_refuses_create_without_killing_dispatcher() -> TestResult {
    test_wrapper(|| {
        let props = TransportProperties::named_pipe("msgpipe-test");
        let transport = Transport::start(&props)?;
        let mut gen = NameGen::new();
        let names = gen.by_ref().take(31).collect::<Vec<_>>();
        for name in &names {
            transport.create_server(name, echo_callback())?;
        }

        // One past the wait-set ceiling fails at the call site; everything already bound keeps
        // serving.
        let over = gen.next().unwrap();
        color_eyre::eyre::ensure!(
            transport.create_server(&over, echo_callback()).is_err(),
            "endpoint over the wait-set limit was accepted"
        );
        let mut channel = connect_retrying(&props, &names[0])?;
        ensure_eq!(channel.roundtrip(b"still serving")?, b"still serving".to_vec());

        // Destroying one frees a slot for the refused endpoint.
        transport.destroy_server(&names[30])?;
        transport.create_server(&over, echo_callback())?;
        transport.shutdown()?;
        Ok(())
    })
}

#[test]
fn rejects_invalid_names_and_prefixes() -> TestResult {
    test_wrapper(|| {
        let bad_prefix = Transport::start(&TransportProperties::named_pipe("has space"));
        color_eyre::eyre::ensure!(
            matches!(bad_prefix, Err(Error::InvalidName(_))),
            "bad prefix accepted"
        );

        let props = TransportProperties::named_pipe("msgpipe-test");
        let transport = Transport::start(&props)?;
        for name in ["", ".hidden", r"back\slash", "white space"] {
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
