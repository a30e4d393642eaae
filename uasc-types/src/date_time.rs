// UASC for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Contains the implementation of `DateTime`.

use std::{
    fmt,
    io::{Read, Write},
    ops::{Add, Sub},
    str::FromStr,
};

use chrono::{Duration, TimeZone, Timelike, Utc};

use crate::encoding::{
    read_i64, write_i64, DecodingOptions, EncodingResult, SimpleBinaryDecodable,
    SimpleBinaryEncodable,
};

const NANOS_PER_TICK: i64 = 100;
const TICKS_PER_SECOND: i64 = 10_000_000;

/// Value of the Unix epoch, 1970-01-01, in ticks since 1601-01-01.
const EPOCH_TICKS: i64 = 116_444_736_000_000_000;

/// Ticks between 1601-01-01 and the OPC UA minimum time of 1601-01-01... i.e.
/// the smallest value that does not encode as zero. Values below this
/// threshold encode as zero on the wire.
const MIN_TICKS: i64 = 0;

/// Ticks at 9999-12-31 23:59:59, the OPC UA maximum time. Values at or
/// above this threshold decode as the maximum.
const MAX_TICKS: i64 = 2_650_467_743_990_000_000;

/// An OPC UA DateTime: a 64-bit count of 100 nanosecond ticks since
/// 1601-01-01 00:00:00 UTC, the Windows FILETIME epoch.
#[derive(PartialEq, PartialOrd, Eq, Ord, Copy, Clone)]
pub struct DateTime {
    date_time: chrono::DateTime<Utc>,
}

impl fmt::Debug for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.date_time.to_rfc3339())
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.date_time.to_rfc3339())
    }
}

impl Default for DateTime {
    fn default() -> Self {
        Self::epoch()
    }
}

impl SimpleBinaryEncodable for DateTime {
    fn byte_len(&self) -> usize {
        8
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        write_i64(stream, self.checked_ticks())
    }
}

impl SimpleBinaryDecodable for DateTime {
    fn decode<S: Read + ?Sized>(
        stream: &mut S,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Self> {
        let ticks = read_i64(stream)?;
        Ok(DateTime::from_ticks(ticks) + decoding_options.client_offset)
    }
}

impl Add<Duration> for DateTime {
    type Output = DateTime;

    fn add(self, other: Duration) -> DateTime {
        DateTime::from(self.date_time + other)
    }
}

impl Sub<Duration> for DateTime {
    type Output = DateTime;

    fn sub(self, other: Duration) -> DateTime {
        DateTime::from(self.date_time - other)
    }
}

impl Sub<DateTime> for DateTime {
    type Output = Duration;

    fn sub(self, other: DateTime) -> Duration {
        self.date_time - other.date_time
    }
}

impl From<chrono::DateTime<Utc>> for DateTime {
    fn from(date_time: chrono::DateTime<Utc>) -> Self {
        // Truncate sub-tick precision so equality is stable across a round trip
        let nanos = date_time.nanosecond() - date_time.nanosecond() % NANOS_PER_TICK as u32;
        DateTime {
            date_time: date_time.with_nanosecond(nanos).unwrap_or(date_time),
        }
    }
}

impl From<DateTime> for chrono::DateTime<Utc> {
    fn from(value: DateTime) -> Self {
        value.date_time
    }
}

impl FromStr for DateTime {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        chrono::DateTime::parse_from_rfc3339(s)
            .map(|d| DateTime::from(d.with_timezone(&Utc)))
            .map_err(|_| ())
    }
}

impl DateTime {
    /// The current time in UTC.
    pub fn now() -> DateTime {
        DateTime::from(Utc::now())
    }

    /// The domain minimum, 1601-01-01 00:00:00 UTC.
    pub fn epoch() -> DateTime {
        DateTime::from(Utc.with_ymd_and_hms(1601, 1, 1, 0, 0, 0).unwrap())
    }

    /// The domain maximum, 9999-12-31 23:59:59 UTC.
    pub fn endtimes() -> DateTime {
        DateTime::from(Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59).unwrap())
    }

    /// Construct from a tick count. Zero or negative values become the
    /// domain minimum, values at or past the end of times become the
    /// domain maximum.
    pub fn from_ticks(ticks: i64) -> DateTime {
        if ticks <= MIN_TICKS {
            Self::epoch()
        } else if ticks >= MAX_TICKS {
            Self::endtimes()
        } else {
            let secs = ticks / TICKS_PER_SECOND;
            let nanos = (ticks % TICKS_PER_SECOND) * NANOS_PER_TICK;
            DateTime {
                date_time: Utc
                    .timestamp_opt(secs - EPOCH_TICKS / TICKS_PER_SECOND, nanos as u32)
                    .unwrap(),
            }
        }
    }

    /// Ticks since 1601-01-01. May be negative for times before the epoch.
    pub fn ticks(&self) -> i64 {
        let secs = self.date_time.timestamp();
        let nanos = self.date_time.timestamp_subsec_nanos() as i64;
        EPOCH_TICKS + secs * TICKS_PER_SECOND + nanos / NANOS_PER_TICK
    }

    /// Ticks clamped to the encodable range: times at or before the domain
    /// minimum become zero, times at or past the end of times saturate at
    /// the maximum.
    pub fn checked_ticks(&self) -> i64 {
        let ticks = self.ticks();
        if ticks <= MIN_TICKS {
            0
        } else if ticks >= MAX_TICKS {
            MAX_TICKS
        } else {
            ticks
        }
    }

    /// True if this is the domain minimum.
    pub fn is_null(&self) -> bool {
        self.checked_ticks() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn epoch_encodes_as_zero() {
        let epoch = DateTime::epoch();
        assert_eq!(epoch.encode_to_vec(), vec![0u8; 8]);
    }

    #[test]
    fn before_epoch_encodes_as_zero() {
        let before = DateTime::from(Utc.with_ymd_and_hms(1600, 6, 1, 0, 0, 0).unwrap());
        assert_eq!(before.encode_to_vec(), vec![0u8; 8]);
    }

    #[test]
    fn zero_decodes_as_minimum() {
        let mut c = Cursor::new(vec![0u8; 8]);
        let dt = DateTime::decode(&mut c, &DecodingOptions::test()).unwrap();
        assert_eq!(dt, DateTime::epoch());
    }

    #[test]
    fn round_trip_now() {
        let now = DateTime::now();
        let mut c = Cursor::new(now.encode_to_vec());
        let decoded = DateTime::decode(&mut c, &DecodingOptions::test()).unwrap();
        assert_eq!(decoded, now);
    }

    #[test]
    fn unix_epoch_ticks() {
        let unix = DateTime::from(Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(unix.ticks(), 116_444_736_000_000_000);
    }

    #[test]
    fn max_saturates() {
        let dt = DateTime::from_ticks(i64::MAX);
        assert_eq!(dt, DateTime::endtimes());
    }
}
