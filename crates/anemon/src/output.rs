/// Rendering of decoded samples.
use std::{fmt, io::Write};

use chrono::NaiveDateTime;

use crate::{model::WindSample, AnemResult};

pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A sample ready for display: the reading, the station it is attributed to and the time it is
/// stamped with.
#[derive(Debug, Clone, Copy)]
pub struct SampleLine<'a> {
    pub station: &'a str,
    pub time: NaiveDateTime,
    pub sample: &'a WindSample,
}

impl fmt::Display for SampleLine<'_> {
    /// `name time speed heading average battery stow`, fixed width.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let w = self.sample;
        write!(
            f,
            "{} {} {:6.2} {:03.0} {:6.2} {:03} {:1}",
            self.station,
            self.time.format(TIME_FORMAT),
            w.speed_mps,
            w.heading_deg,
            w.avg_speed_mps,
            w.battery,
            w.stow
        )
    }
}

/// Consumer of decoded samples.
pub trait SampleSink {
    fn emit(&mut self, line: &SampleLine<'_>) -> AnemResult<()>;
}

impl<P: SampleSink + ?Sized> SampleSink for &mut P {
    fn emit(&mut self, line: &SampleLine<'_>) -> AnemResult<()> {
        (**self).emit(line)
    }
}

/// Collects rendered lines in memory.
impl SampleSink for Vec<String> {
    fn emit(&mut self, line: &SampleLine<'_>) -> AnemResult<()> {
        self.push(line.to_string());
        Ok(())
    }
}

/// Writes one line per sample and flushes, so piped output stays live.
pub struct LinePrinter<W> {
    out: W,
}

impl<W: Write> LinePrinter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> SampleSink for LinePrinter<W> {
    fn emit(&mut self, line: &SampleLine<'_>) -> AnemResult<()> {
        writeln!(self.out, "{line}")?;
        self.out.flush()?;
        Ok(())
    }
}
