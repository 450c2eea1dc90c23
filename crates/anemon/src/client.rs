/// Session supervisor: handshake, keep-alive thread and receive loop, with optional
/// re-handshake after a fatal transport error.
use std::io;

use tracing::{info, warn};

use crate::{
    config::ClientConfig,
    dispatch::{DispatchStats, Dispatcher},
    model::StationName,
    output::SampleSink,
    scheduler::{KeepAliveScheduler, Shutdown},
    transport::Session,
    AnemResult, Error,
};

/// Run sessions until `shutdown` is triggered or the reconnect budget is spent.
///
/// The station name survives reconnects. Returns the totals of the last session.
pub fn run<P: SampleSink>(
    config: &ClientConfig,
    mut sink: P,
    shutdown: &Shutdown,
) -> AnemResult<DispatchStats> {
    let station = StationName::new();
    let mut attempt = 0;
    loop {
        match run_session(config, &mut sink, &station, shutdown) {
            Ok(stats) => return Ok(stats),
            Err(e) if attempt < config.reconnect_attempts && !shutdown.is_triggered() => {
                attempt += 1;
                warn!(
                    "session failed: {e}; reconnecting ({attempt}/{})",
                    config.reconnect_attempts
                );
            }
            Err(e) => return Err(e),
        }
    }
}

/// One session: handshake, then keep-alive and dispatcher side by side until either stops.
pub fn run_session<P: SampleSink>(
    config: &ClientConfig,
    sink: P,
    station: &StationName,
    shutdown: &Shutdown,
) -> AnemResult<DispatchStats> {
    let session = Session::establish(config)?;
    info!(
        "session {:#06x} established {} -> {}",
        config.session_id,
        session.local_addr(),
        session.peer_addr()
    );

    let stop = shutdown.child();
    let keepalive = KeepAliveScheduler::new(
        session.writer()?,
        config.keepalive.clone(),
        config.keepalive_interval,
    )
    .with_session_id(config.keepalive_prefix())
    .spawn(stop.clone())?;

    let mut dispatcher = Dispatcher::new(&session, sink, config).with_station(station.clone());
    let received = dispatcher.run(&stop);
    stop.trigger();
    let sent = keepalive
        .join()
        .map_err(|_| Error::Io(io::Error::other("keep-alive thread panicked")))?;

    // The receive error is the root cause when both sides failed.
    received?;
    sent?;
    Ok(dispatcher.stats())
}

#[cfg(test)]
mod test {
    use std::{
        net::UdpSocket,
        thread,
        time::{Duration, Instant},
    };

    use super::*;
    use crate::{
        lazy_init_tracing,
        model::WindSample,
        protocol::wind::{encode_sample, SampleLayout},
    };

    /// Minimal relay: answers the handshake with an identity and a sample, then echoes PONG to
    /// every PING until `frames` keep-alive frames were seen. The socket is handed back so the
    /// client never sees the port close.
    fn fake_relay(
        socket: UdpSocket,
        frames: usize,
    ) -> thread::JoinHandle<(Vec<Vec<u8>>, UdpSocket)> {
        thread::spawn(move || {
            socket
                .set_read_timeout(Some(Duration::from_secs(5)))
                .unwrap();
            let mut buf = [0u8; 1024];
            let (n, client) = socket.recv_from(&mut buf).unwrap();
            assert_eq!(&buf[2..7], b"CRQST", "{:?}", &buf[..n]);

            let mut identity = vec![0x0D];
            identity.extend_from_slice(b"Mt. Wellington");
            identity.push(0);
            socket.send_to(&identity, client).unwrap();
            let sample = WindSample {
                heading_deg: 50.0,
                speed_mps: 5.0,
                avg_speed_mps: 1.02,
                battery: 5,
                stow: 1,
                ..Default::default()
            };
            socket
                .send_to(&encode_sample(&sample, SampleLayout::Basic), client)
                .unwrap();

            let mut seen = Vec::new();
            while seen.len() < frames {
                let (n, from) = socket.recv_from(&mut buf).unwrap();
                if buf[..n].ends_with(b"PING") {
                    socket.send_to(b"PONG", from).unwrap();
                }
                seen.push(buf[..n].to_vec());
            }
            (seen, socket)
        })
    }

    #[test]
    fn test_session_end_to_end() {
        lazy_init_tracing();
        let relay = UdpSocket::bind("127.0.0.1:0").unwrap();
        let relay_addr = relay.local_addr().unwrap();
        let handle = fake_relay(relay, 6);

        let config = ClientConfig::new("127.0.0.1")
            .with_remote_port(relay_addr.port())
            .with_local_port(0)
            .with_session_id(0x0102)
            .with_layout(SampleLayout::Basic)
            .with_keepalive(Default::default(), Duration::from_millis(10))
            .with_poll_slice(Duration::from_millis(10));
        let shutdown = Shutdown::new();
        let stopper = shutdown.clone();

        let mut lines = Vec::new();
        let (stats, seen) = thread::scope(|s| {
            let client = s.spawn(|| run(&config, &mut lines, &shutdown));
            let (seen, _relay) = handle.join().unwrap();
            stopper.trigger();
            (client.join().unwrap(), seen)
        });
        let stats = stats.unwrap();

        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("Mt. Wellington "));
        assert!(lines[0].ends_with("  5.00 050   1.02 005 1"));
        assert_eq!(stats.samples, 1);
        assert_eq!(stats.identities, 1);
        assert!(stats.echoes >= 1);

        // POLL first, then PINGs, all led by the session id.
        assert_eq!(seen[0], vec![0x01, 0x02, 0x01]);
        for frame in &seen[1..5] {
            assert_eq!(frame.as_slice(), &[0x01, 0x02, b'P', b'I', b'N', b'G']);
        }
        assert_eq!(seen[5], vec![0x01, 0x02, 0x01]);
    }

    #[test]
    fn test_resolution_failure_is_fatal() {
        let config = ClientConfig::new("no such host.invalid")
            .with_local_port(0)
            .with_reconnect_attempts(2);
        let start = Instant::now();
        let err = run(&config, Vec::<String>::new(), &Shutdown::new()).unwrap_err();
        assert!(matches!(err, Error::Resolve(_)));
        assert!(start.elapsed() < Duration::from_secs(30));
    }
}
