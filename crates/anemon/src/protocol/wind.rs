/// Wind sample decoder.
///
/// The relay packs decimal digits as raw values 0-9, one per byte, so every digit byte has to be
/// shifted by `'0'` before it reads as text. Layout of the basic sample (16 bytes):
///
/// | offset | len | field                                      |
/// |--------|-----|--------------------------------------------|
/// | 0      | 1   | tag, 0x01                                  |
/// | 1      | 3   | heading, degrees                           |
/// | 4      | 5   | speed, hundredths of m/s                   |
/// | 9      | 5   | average speed, hundredths of m/s           |
/// | 14     | 1   | battery level, raw                         |
/// | 15     | 1   | stow flag, raw                             |
///
/// The extended sample appends the relay clock as six raw bytes (year since 2000, month, day,
/// hour, minute, second), a name length byte and the name itself.
use nom::{bytes::complete::take, number::complete::u8 as raw_u8, Finish, IResult};
use tracing::debug;

use crate::{
    model::{RelayTimestamp, WindSample},
    AnemResult, Error,
};

/// Minimum length of a basic sample.
pub const BASIC_LEN: usize = 16;
/// Minimum length of an extended sample, before the name bytes.
pub const EXTENDED_LEN: usize = 23;

const HEADING_DIGITS: usize = 3;
const SPEED_DIGITS: usize = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SampleLayout {
    /// Heading, speeds, battery and stow only.
    Basic,
    /// Basic fields followed by the relay timestamp and station name.
    #[default]
    Extended,
}

impl SampleLayout {
    pub fn min_len(&self) -> usize {
        match self {
            SampleLayout::Basic => BASIC_LEN,
            SampleLayout::Extended => EXTENDED_LEN,
        }
    }
}

/// What to do when the first payload byte equals 1.
///
/// The poll tag of a wind sample is also 0x01, so a relay that tags its samples correctly always
/// trips this check. `Observe` logs it and decodes anyway; `Reject` refuses the payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SentinelPolicy {
    #[default]
    Observe,
    Reject,
}

const SENTINEL: u8 = 1;

#[derive(Debug, Clone, Copy, Default)]
pub struct WindDecoder {
    pub layout: SampleLayout,
    pub sentinel: SentinelPolicy,
}

/// Fixed-width fields before digit shifting.
struct RawSample<'a> {
    heading: &'a [u8],
    speed: &'a [u8],
    avg: &'a [u8],
    battery: u8,
    stow: u8,
}

struct RawTrailer<'a> {
    timestamp: RelayTimestamp,
    name: &'a [u8],
}

impl WindDecoder {
    pub fn new(layout: SampleLayout) -> Self {
        Self {
            layout,
            sentinel: SentinelPolicy::default(),
        }
    }

    pub fn with_sentinel(mut self, sentinel: SentinelPolicy) -> Self {
        self.sentinel = sentinel;
        self
    }

    /// Whether `bytes` starts with the sentinel value, before any shifting.
    pub fn trips_sentinel(bytes: &[u8]) -> bool {
        bytes.first() == Some(&SENTINEL)
    }

    /// Decode a full datagram, tag byte included.
    pub fn decode(&self, bytes: &[u8]) -> AnemResult<WindSample> {
        if Self::trips_sentinel(bytes) {
            match self.sentinel {
                SentinelPolicy::Reject => return Err(Error::Sentinel(SENTINEL)),
                SentinelPolicy::Observe => debug!("sentinel byte present, decoding anyway"),
            }
        }

        let (rest, raw) = nom_basic(bytes).finish()?;
        let mut sample = WindSample::default();
        sample.heading_deg = shifted_field("heading", raw.heading, &sample)? as f64;
        sample.speed_mps = shifted_field("speed", raw.speed, &sample)? as f64 / 100.0;
        sample.avg_speed_mps = shifted_field("average", raw.avg, &sample)? as f64 / 100.0;
        sample.battery = raw.battery;
        sample.stow = raw.stow;

        if self.layout == SampleLayout::Extended {
            let (_, trailer) = nom_trailer(rest).finish()?;
            sample.timestamp = Some(trailer.timestamp);
            sample.station_name = Some(String::from_utf8_lossy(trailer.name).into_owned());
        } else if !rest.is_empty() {
            debug!("ignoring {} trailing bytes after basic sample", rest.len());
        }
        Ok(sample)
    }
}

fn nom_basic(bytes: &[u8]) -> IResult<&[u8], RawSample<'_>> {
    let (rest, _tag) = raw_u8(bytes)?;
    let (rest, heading) = take(HEADING_DIGITS)(rest)?;
    let (rest, speed) = take(SPEED_DIGITS)(rest)?;
    let (rest, avg) = take(SPEED_DIGITS)(rest)?;
    let (rest, battery) = raw_u8(rest)?;
    let (rest, stow) = raw_u8(rest)?;
    Ok((
        rest,
        RawSample {
            heading,
            speed,
            avg,
            battery,
            stow,
        },
    ))
}

fn nom_trailer(bytes: &[u8]) -> IResult<&[u8], RawTrailer<'_>> {
    let (rest, year_since_2000) = raw_u8(bytes)?;
    let (rest, month) = raw_u8(rest)?;
    let (rest, day) = raw_u8(rest)?;
    let (rest, hour) = raw_u8(rest)?;
    let (rest, minute) = raw_u8(rest)?;
    let (rest, second) = raw_u8(rest)?;
    let (rest, name_len) = raw_u8(rest)?;
    let (rest, name) = take(name_len)(rest)?;
    let timestamp = RelayTimestamp {
        year_since_2000,
        month,
        day,
        hour,
        minute,
        second,
    };
    Ok((rest, RawTrailer { timestamp, name }))
}

/// Shift each byte by `'0'` and read the run as a decimal integer.
fn shifted_field(field: &'static str, raw: &[u8], partial: &WindSample) -> AnemResult<u32> {
    let text: String = raw
        .iter()
        .map(|b| char::from(b.wrapping_add(b'0')))
        .collect();
    text.parse::<u32>().map_err(|source| Error::Field {
        field,
        partial: Box::new(partial.clone()),
        source,
    })
}

/// Lay out a sample the way the relay does. Test-only: the client never sends samples.
#[cfg(test)]
pub(crate) fn encode_sample(sample: &WindSample, layout: SampleLayout) -> Vec<u8> {
    fn digits(value: u32, width: usize) -> Vec<u8> {
        format!("{value:0width$}")
            .bytes()
            .map(|b| b - b'0')
            .collect()
    }

    let mut bytes = vec![super::TAG_WIND];
    bytes.extend(digits(sample.heading_deg.round() as u32, HEADING_DIGITS));
    bytes.extend(digits((sample.speed_mps * 100.0).round() as u32, SPEED_DIGITS));
    bytes.extend(digits(
        (sample.avg_speed_mps * 100.0).round() as u32,
        SPEED_DIGITS,
    ));
    bytes.push(sample.battery);
    bytes.push(sample.stow);
    if layout == SampleLayout::Extended {
        let ts = sample.timestamp.unwrap_or_default();
        bytes.extend([
            ts.year_since_2000,
            ts.month,
            ts.day,
            ts.hour,
            ts.minute,
            ts.second,
        ]);
        let name = sample.station_name.clone().unwrap_or_default();
        bytes.push(name.len() as u8);
        bytes.extend(name.bytes());
    }
    bytes
}
