/// Keep-alive frames sent on every scheduler tick.
use std::fmt;

use super::{WireMsg, TAG_STATION, TAG_WIND};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageKind {
    /// Pure liveness probe, literal `PING`.
    Ping,
    /// Ask for one wind sample right away.
    Poll,
    /// Ask for the station identity.
    Info,
}

impl MessageKind {
    pub fn payload(&self) -> &'static [u8] {
        match self {
            MessageKind::Ping => b"PING",
            MessageKind::Poll => &[TAG_WIND],
            MessageKind::Info => &[TAG_STATION],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Ping => "PING",
            MessageKind::Poll => "POLL",
            MessageKind::Info => "INFO",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A keep-alive frame, optionally led by the 2-byte session id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAlive {
    pub kind: MessageKind,
    pub session_id: Option<u16>,
}

impl KeepAlive {
    pub fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            session_id: None,
        }
    }

    pub fn with_session_id(mut self, session_id: u16) -> Self {
        self.session_id = Some(session_id);
        self
    }
}

impl WireMsg for KeepAlive {
    fn to_bytes(&self) -> Vec<u8> {
        let payload = self.kind.payload();
        let mut bytes = Vec::with_capacity(payload.len() + 2);
        if let Some(id) = self.session_id {
            bytes.extend_from_slice(&id.to_be_bytes());
        }
        bytes.extend_from_slice(payload);
        bytes
    }

    fn label(&self) -> &'static str {
        self.kind.as_str()
    }
}
