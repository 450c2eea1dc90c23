/// Receive loop: the only reader of the session socket.
///
/// Every datagram is classified by its tag byte and handled on its own; the relay gives no
/// ordering guarantee and may never answer a given poll.
use std::{
    net::SocketAddr,
    time::{Duration, Instant},
};

use chrono::{DateTime, Local, NaiveDateTime};
use tracing::{debug, error, info, warn};

use crate::{
    config::{ClientConfig, DisplayTime},
    model::{StationName, WindSample},
    output::{SampleLine, SampleSink},
    protocol::{
        inbound::{station_name, Inbound},
        wind::WindDecoder,
        MAX_DATAGRAM,
    },
    scheduler::Shutdown,
    transport::DatagramSource,
    AnemResult, Error,
};

/// What became of one datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Echo,
    Sample,
    Station,
    DecodeFailed,
    Ignored,
}

/// Running totals, mostly for tests and the exit log line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub echoes: u64,
    pub samples: u64,
    pub identities: u64,
    pub decode_errors: u64,
    pub ignored: u64,
    pub silences: u64,
    /// Wind payloads whose first byte equals the decoder's sentinel value.
    pub sentinel_hits: u64,
}

pub struct Dispatcher<R, P> {
    source: R,
    sink: P,
    decoder: WindDecoder,
    station: StationName,
    display_time: DisplayTime,
    receive_timeout: Duration,
    poll_slice: Duration,
    stats: DispatchStats,
}

impl<R: DatagramSource, P: SampleSink> Dispatcher<R, P> {
    pub fn new(source: R, sink: P, config: &ClientConfig) -> Self {
        Self {
            source,
            sink,
            decoder: config.decoder(),
            station: StationName::new(),
            display_time: config.display_time,
            receive_timeout: config.receive_timeout,
            poll_slice: config.poll_slice,
            stats: DispatchStats::default(),
        }
    }

    /// Share a station name cell that outlives this dispatcher.
    pub fn with_station(mut self, station: StationName) -> Self {
        self.station = station;
        self
    }

    pub fn station(&self) -> &StationName {
        &self.station
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Receive and dispatch until `shutdown` is triggered or the transport fails.
    ///
    /// Waits are cut into slices of at most `poll_slice` so shutdown is noticed promptly; relay
    /// silence is reported once per full receive timeout.
    pub fn run(&mut self, shutdown: &Shutdown) -> AnemResult<()> {
        let mut buf = [0u8; MAX_DATAGRAM];
        let mut last_heard = Instant::now();
        let slice = self.poll_slice.min(self.receive_timeout);
        while !shutdown.is_triggered() {
            match self.source.recv_timeout(&mut buf, slice) {
                Ok(received) => {
                    last_heard = Instant::now();
                    self.handle(&buf[..received.len], received.from, Local::now())?;
                }
                Err(Error::Timeout) => {
                    if last_heard.elapsed() >= self.receive_timeout {
                        warn!("no datagram from relay in {:?}", self.receive_timeout);
                        self.stats.silences += 1;
                        last_heard = Instant::now();
                    }
                }
                Err(e) if e.is_transient() => warn!("{e}"),
                Err(e) => {
                    error!("receive failed: {e}");
                    return Err(e);
                }
            }
        }
        debug!("dispatcher stopped: {:?}", self.stats);
        Ok(())
    }

    /// Classify and handle one datagram. Only a failing sample sink is an error here.
    pub fn handle(
        &mut self,
        datagram: &[u8],
        from: SocketAddr,
        received_at: DateTime<Local>,
    ) -> AnemResult<Outcome> {
        let outcome = match Inbound::classify(datagram) {
            Inbound::Echo(text) => {
                info!("{} - {}", from, String::from_utf8_lossy(text));
                self.stats.echoes += 1;
                Outcome::Echo
            }
            Inbound::Wind(bytes) => {
                info!("{} - WINDDATA", from);
                if WindDecoder::trips_sentinel(bytes) {
                    if self.stats.sentinel_hits == 0 {
                        warn!(
                            "wind payload starts with the sentinel byte; policy {:?}",
                            self.decoder.sentinel
                        );
                    }
                    self.stats.sentinel_hits += 1;
                }
                match self.decoder.decode(bytes) {
                    Ok(sample) => {
                        self.emit(&sample, received_at.naive_local())?;
                        self.stats.samples += 1;
                        Outcome::Sample
                    }
                    Err(e) => {
                        warn!("dropping sample: {e}");
                        self.stats.decode_errors += 1;
                        Outcome::DecodeFailed
                    }
                }
            }
            Inbound::Station(body) => {
                let name = station_name(body);
                info!("{} - STATION {:?}", from, name);
                self.station.set(name);
                self.stats.identities += 1;
                Outcome::Station
            }
            Inbound::Unknown(tag) => {
                debug!("{} - ignoring datagram with tag {:#04x}", from, tag);
                self.stats.ignored += 1;
                Outcome::Ignored
            }
            Inbound::Empty => {
                debug!("{} - ignoring empty datagram", from);
                self.stats.ignored += 1;
                Outcome::Ignored
            }
        };
        Ok(outcome)
    }

    fn emit(&mut self, sample: &WindSample, received_at: NaiveDateTime) -> AnemResult<()> {
        let relay_time = sample.timestamp.and_then(|ts| ts.to_datetime());
        if let Some(ts) = relay_time {
            debug!("relay timestamp {}", ts);
        }
        let time = match self.display_time {
            DisplayTime::Received => received_at,
            DisplayTime::Relay => relay_time.unwrap_or(received_at),
        };
        // A name embedded in the sample wins over the last identity datagram.
        let identity = self.station.get();
        let station = match sample.station_name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => identity.as_str(),
        };
        self.sink.emit(&SampleLine {
            station,
            time,
            sample,
        })
    }
}
