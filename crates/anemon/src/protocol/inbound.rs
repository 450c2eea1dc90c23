/// Inbound datagram classification by leading tag byte.
use super::{TAG_ECHO, TAG_STATION, TAG_WIND};

/// One received datagram, borrowed from the receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound<'a> {
    /// Liveness reply; the whole datagram is opaque text.
    Echo(&'a [u8]),
    /// Wind sample; the whole datagram, tag included, goes to the decoder.
    Wind(&'a [u8]),
    /// Station identity; the bytes after the tag.
    Station(&'a [u8]),
    /// Any other leading byte.
    Unknown(u8),
    Empty,
}

impl<'a> Inbound<'a> {
    pub fn classify(datagram: &'a [u8]) -> Self {
        match datagram.first() {
            None => Inbound::Empty,
            Some(&TAG_ECHO) => Inbound::Echo(datagram),
            Some(&TAG_WIND) => Inbound::Wind(datagram),
            Some(&TAG_STATION) => Inbound::Station(&datagram[1..]),
            Some(&other) => Inbound::Unknown(other),
        }
    }
}

/// Station name from the body of an identity datagram: everything but the trailing terminator.
pub fn station_name(body: &[u8]) -> String {
    let name = match body.split_last() {
        Some((_terminator, name)) => name,
        None => body,
    };
    String::from_utf8_lossy(name).into_owned()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(Inbound::classify(b"PONG"), Inbound::Echo(b"PONG"));
        assert_eq!(Inbound::classify(&[0x01, 0x02]), Inbound::Wind(&[0x01, 0x02]));
        assert_eq!(Inbound::classify(&[0x0D, b'a', 0]), Inbound::Station(&[b'a', 0]));
        assert_eq!(Inbound::classify(&[0x7f]), Inbound::Unknown(0x7f));
        assert_eq!(Inbound::classify(&[]), Inbound::Empty);
    }

    #[test]
    fn test_classify_total() {
        for tag in 0..=u8::MAX {
            let datagram = [tag, 0, 0, 0];
            let inbound = Inbound::classify(&datagram);
            match tag {
                b'P' => assert!(matches!(inbound, Inbound::Echo(_))),
                0x01 => assert!(matches!(inbound, Inbound::Wind(_))),
                0x0D => assert!(matches!(inbound, Inbound::Station(_))),
                _ => assert_eq!(inbound, Inbound::Unknown(tag)),
            }
        }
    }

    #[test]
    fn test_station_name() {
        let mut datagram = vec![0x0D];
        datagram.extend_from_slice(b"Mt. Wellington");
        datagram.push(0x00);
        let Inbound::Station(body) = Inbound::classify(&datagram) else {
            panic!("not a station identity");
        };
        assert_eq!(station_name(body), "Mt. Wellington");
    }

    #[test]
    fn test_station_name_edges() {
        assert_eq!(station_name(&[]), "");
        assert_eq!(station_name(&[0]), "");
        assert_eq!(station_name(b"ab\r"), "ab");
    }
}
