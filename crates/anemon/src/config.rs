/// Client configuration. Defaults reproduce the reference relay client.
use std::time::Duration;

use crate::{
    protocol::{
        request::ConnectionRequest,
        wind::{SampleLayout, SentinelPolicy, WindDecoder},
    },
    scheduler::KeepAliveCycle,
};

pub const DEFAULT_REMOTE_PORT: u16 = 7755;
pub const DEFAULT_LOCAL_PORT: u16 = 7756;
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(2);
/// How often a blocked receive wakes up to look for shutdown.
pub const DEFAULT_POLL_SLICE: Duration = Duration::from_millis(250);

/// How the session is established with the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeMode {
    /// Request and telemetry share one association on the remote port.
    SinglePhase { desired_port: Option<u16> },
    /// Send the request to the remote (negotiation) port asking for `data_port`, then reopen the
    /// association on `data_port` for the telemetry stream.
    TwoPhase { data_port: u16 },
}

impl Default for HandshakeMode {
    fn default() -> Self {
        HandshakeMode::SinglePhase { desired_port: None }
    }
}

/// Which clock stamps a printed sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DisplayTime {
    /// Local wall clock at receipt.
    #[default]
    Received,
    /// Relay clock embedded in the sample, falling back to receipt time when absent or invalid.
    Relay,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub remote_port: u16,
    pub local_port: u16,
    pub handshake: HandshakeMode,
    pub session_id: u16,
    /// Lead every keep-alive frame with the session id.
    pub prefix_session_id: bool,
    pub keepalive: KeepAliveCycle,
    pub keepalive_interval: Duration,
    pub receive_timeout: Duration,
    pub poll_slice: Duration,
    pub layout: SampleLayout,
    pub sentinel: SentinelPolicy,
    pub display_time: DisplayTime,
    /// Full re-handshakes allowed after a fatal transport error.
    pub reconnect_attempts: u32,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            remote_port: DEFAULT_REMOTE_PORT,
            local_port: DEFAULT_LOCAL_PORT,
            handshake: HandshakeMode::default(),
            session_id: rand::random(),
            prefix_session_id: true,
            keepalive: KeepAliveCycle::default(),
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            poll_slice: DEFAULT_POLL_SLICE,
            layout: SampleLayout::default(),
            sentinel: SentinelPolicy::default(),
            display_time: DisplayTime::default(),
            reconnect_attempts: 0,
        }
    }

    pub fn with_remote_port(mut self, port: u16) -> Self {
        self.remote_port = port;
        self
    }

    pub fn with_local_port(mut self, port: u16) -> Self {
        self.local_port = port;
        self
    }

    pub fn with_handshake(mut self, handshake: HandshakeMode) -> Self {
        self.handshake = handshake;
        self
    }

    pub fn with_session_id(mut self, session_id: u16) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn with_prefix_session_id(mut self, prefix: bool) -> Self {
        self.prefix_session_id = prefix;
        self
    }

    pub fn with_keepalive(mut self, cycle: KeepAliveCycle, interval: Duration) -> Self {
        self.keepalive = cycle;
        self.keepalive_interval = interval;
        self
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    pub fn with_poll_slice(mut self, slice: Duration) -> Self {
        self.poll_slice = slice;
        self
    }

    pub fn with_layout(mut self, layout: SampleLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_sentinel(mut self, sentinel: SentinelPolicy) -> Self {
        self.sentinel = sentinel;
        self
    }

    pub fn with_display_time(mut self, display_time: DisplayTime) -> Self {
        self.display_time = display_time;
        self
    }

    pub fn with_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.reconnect_attempts = attempts;
        self
    }

    /// The request sent on the first (or only) association.
    pub fn connection_request(&self) -> ConnectionRequest {
        let req = ConnectionRequest::new(self.session_id);
        match self.handshake {
            HandshakeMode::SinglePhase {
                desired_port: Some(port),
            } => req.with_desired_port(port),
            HandshakeMode::SinglePhase { desired_port: None } => req,
            HandshakeMode::TwoPhase { data_port } => req.with_desired_port(data_port),
        }
    }

    pub fn decoder(&self) -> WindDecoder {
        WindDecoder::new(self.layout).with_sentinel(self.sentinel)
    }

    /// Session id to lead keep-alive frames with, if any.
    pub fn keepalive_prefix(&self) -> Option<u16> {
        self.prefix_session_id.then_some(self.session_id)
    }
}
