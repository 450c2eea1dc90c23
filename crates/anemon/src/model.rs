/// Decoded telemetry types and the process-wide station name.
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{NaiveDate, NaiveDateTime};

//  _____
// |_   _|   _ _ __   ___  ___
//   | || | | | '_ \ / _ \/ __|
//   | || |_| | |_) |  __/\__ \
//   |_| \__, | .__/ \___||___/
//       |___/|_|

/// One decoded wind reading.
///
/// `speed_mps` and `avg_speed_mps` carry two implied decimal digits on the wire, so they are
/// always a multiple of 0.01. `heading_deg` is used as sent (0-359).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindSample {
    pub heading_deg: f64,
    pub speed_mps: f64,
    pub avg_speed_mps: f64,
    pub battery: u8,
    pub stow: u8,
    /// Relay clock at sampling time. Only present in the extended layout.
    pub timestamp: Option<RelayTimestamp>,
    /// Station name embedded in the sample. Only present in the extended layout.
    pub station_name: Option<String>,
}

impl WindSample {
    pub fn is_stowed(&self) -> bool {
        self.stow != 0
    }
}

/// Raw timestamp fields as sent by the relay, year counted from 2000.
///
/// Kept unconverted so that a nonsense date from the relay never fails a sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayTimestamp {
    pub year_since_2000: u8,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl RelayTimestamp {
    pub fn year(&self) -> i32 {
        2000 + self.year_since_2000 as i32
    }

    /// `None` when the fields do not form a real calendar date and time.
    pub fn to_datetime(&self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(self.year(), self.month as u32, self.day as u32)?.and_hms_opt(
            self.hour as u32,
            self.minute as u32,
            self.second as u32,
        )
    }
}

//  ____  _        _   _               _   _
// / ___|| |_ __ _| |_(_) ___  _ __   | \ | | __ _ _ __ ___   ___
// \___ \| __/ _` | __| |/ _ \| '_ \  |  \| |/ _` | '_ ` _ \ / _ \
//  ___) | || (_| | |_| | (_) | | | | | |\  | (_| | | | | | |  __/
// |____/ \__\__,_|\__|_|\___/|_| |_| |_| \_|\__,_|_| |_| |_|\___|

/// Station name learned from the last `StationIdentity` datagram.
///
/// Cloned handles share the same cell. Only the dispatcher writes it; every reader sees an empty
/// string until the first identity arrives.
#[derive(Debug, Clone, Default)]
pub struct StationName {
    inner: Arc<RwLock<String>>,
}

impl StationName {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> String {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set(&self, name: impl Into<String>) {
        *self
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner) = name.into();
    }
}
