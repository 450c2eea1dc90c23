pub mod inbound;
pub mod keepalive;
pub mod request;
pub mod wind;

/// Leading byte of an echo / liveness reply (`PING`, `PONG`).
pub const TAG_ECHO: u8 = b'P';
/// Leading byte of a wind sample, also sent alone as a poll request.
pub const TAG_WIND: u8 = 0x01;
/// Leading byte of a station identity, also sent alone as an info request.
pub const TAG_STATION: u8 = 0x0D;

/// Largest datagram the relay is expected to send.
pub const MAX_DATAGRAM: usize = 1024;

/// Trait implemented by outbound frames.
pub trait WireMsg {
    fn to_bytes(&self) -> Vec<u8>;

    /// Short label used in traffic logs.
    fn label(&self) -> &'static str;
}
