/// Connection request frame.
///
/// The relay is stateless; a client announces itself with one signed request and the relay
/// starts streaming to the sender's address. Layout (14 bytes):
///
/// | offset | len | field                                         |
/// |--------|-----|-----------------------------------------------|
/// | 0      | 2   | session id, big endian                        |
/// | 2      | 5   | `CRQST`                                       |
/// | 7      | 2   | desired data port, big endian (0 when absent) |
/// | 9      | 4   | zero                                          |
/// | 13     | 1   | XOR of every preceding byte                   |
use super::WireMsg;

pub const MARKER: [u8; 5] = *b"CRQST";
pub const REQUEST_LEN: usize = 14;

const PORT_OFFSET: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionRequest {
    pub session_id: u16,
    pub desired_port: Option<u16>,
}

impl ConnectionRequest {
    pub fn new(session_id: u16) -> Self {
        Self {
            session_id,
            desired_port: None,
        }
    }

    pub fn with_desired_port(mut self, port: u16) -> Self {
        self.desired_port = Some(port);
        self
    }

    pub fn encode(&self) -> [u8; REQUEST_LEN] {
        let mut frame = [0u8; REQUEST_LEN];
        frame[..2].copy_from_slice(&self.session_id.to_be_bytes());
        frame[2..PORT_OFFSET].copy_from_slice(&MARKER);
        if let Some(port) = self.desired_port {
            frame[PORT_OFFSET..PORT_OFFSET + 2].copy_from_slice(&port.to_be_bytes());
        }
        frame[REQUEST_LEN - 1] = checksum(&frame[..REQUEST_LEN - 1]);
        frame
    }
}

impl WireMsg for ConnectionRequest {
    fn to_bytes(&self) -> Vec<u8> {
        self.encode().to_vec()
    }

    fn label(&self) -> &'static str {
        "CRQST"
    }
}

/// Running exclusive-or of every byte.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}
