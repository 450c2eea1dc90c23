/// Telemetry client for anemometer / weather-station relays reachable over UDP.
///
/// The *protocol* modules hold the pure wire codecs: the signed connection request, the
/// keep-alive frames, the inbound classifier and the [`WindSample`](model::WindSample) decoder.
/// The *session* side ([`transport`], [`scheduler`], [`dispatch`], [`client`]) owns the socket,
/// runs the keep-alive cadence and routes every inbound datagram.
use std::{io, num::ParseIntError, sync::Once};

use thiserror::Error;

pub mod client;
pub mod config;
pub mod dispatch;
pub mod model;
pub mod output;
pub mod protocol;
pub mod scheduler;
pub mod transport;

use model::WindSample;

/// Result type for this library
pub type AnemResult<T> = std::result::Result<T, Error>;

/// Error type for this library
#[derive(Debug, Error)]
pub enum Error {
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Payload rejected by sentinel check (first byte {0:#04x})")]
    Sentinel(u8),
    #[error("Invalid {field} field: {source}")]
    Field {
        field: &'static str,
        partial: Box<WindSample>,
        #[source]
        source: ParseIntError,
    },
    #[error("Could not resolve {0}")]
    Resolve(String),
    #[error("Receive timed out")]
    Timeout,
    #[error("Session shut down")]
    Shutdown,
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Transport error: {0}")]
    Io(#[from] io::Error),
}

impl From<nom::error::Error<&[u8]>> for Error {
    fn from(err: nom::error::Error<&[u8]>) -> Self {
        Error::ParseError(format!("{:?}", err.code))
    }
}

impl Error {
    /// Transient conditions are logged and the receive loop carries on. Anything else at the
    /// transport boundary ends the session.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Timeout => true,
            Error::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::WouldBlock
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }

    /// True for errors raised while decoding a payload, as opposed to moving it.
    pub fn is_decode(&self) -> bool {
        matches!(
            self,
            Error::ParseError(_) | Error::Sentinel(_) | Error::Field { .. }
        )
    }
}

/// Install the fmt subscriber for a binary. `RUST_LOG` takes precedence over `level`.
pub fn init_tracing(level: &str) -> AnemResult<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .try_init()
        .map_err(|e| Error::Config(format!("failed to init logging: {e}")))
}

/// Test binary helper to init tracing. This is usually the responsibility of the consumer of the
/// library crate.
pub fn lazy_init_tracing() {
    {
        static INIT: Once = Once::new();
        &INIT
    }
    .call_once(|| {
        tracing_subscriber::fmt::init();
    });
}
