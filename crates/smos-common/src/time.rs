//! Time handling for L2 granules.
//!
//! Granule headers carry their validity period as strings such as
//! `UTC=2023-04-01T11:15:10`, and catalogs often use the compact form
//! `20230401111510`. Both are accepted here.

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::attrs::Attrs;
use crate::error::{CommonError, CommonResult};

/// Header attribute holding the start of a granule's validity period.
pub const VALIDITY_START_ATTR: &str = "FH:Validity_Period:Validity_Start";
/// Header attribute holding the end of a granule's validity period.
pub const VALIDITY_STOP_ATTR: &str = "FH:Validity_Period:Validity_Stop";

/// CF units of encoded cube time values.
pub const TIME_UNITS: &str = "milliseconds since 2010-01-01 00:00:00.000000";
/// CF calendar of encoded cube time values.
pub const TIME_CALENDAR: &str = "proleptic_gregorian";

/// Start and stop time of one granule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeBounds {
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
}

impl TimeBounds {
    pub fn new(start: DateTime<Utc>, stop: DateTime<Utc>) -> Self {
        Self { start, stop }
    }

    /// Center of the interval.
    pub fn midpoint(&self) -> DateTime<Utc> {
        self.start + (self.stop - self.start) / 2
    }

    /// Duration of the interval.
    pub fn duration(&self) -> Duration {
        self.stop - self.start
    }

    /// Read the validity period from granule header attributes.
    pub fn from_attrs(attrs: &Attrs) -> CommonResult<Self> {
        let start = raw_time_attr(attrs, VALIDITY_START_ATTR)?;
        let stop = raw_time_attr(attrs, VALIDITY_STOP_ATTR)?;
        Ok(Self::new(start, stop))
    }
}

/// A closed time range used for catalog queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Parse a start/end pair of raw time strings.
    pub fn parse(start: &str, end: &str) -> CommonResult<Self> {
        Ok(Self::new(parse_raw_time(start)?, parse_raw_time(end)?))
    }

    /// Whether `bounds` overlaps this range.
    pub fn overlaps(&self, bounds: &TimeBounds) -> bool {
        bounds.start <= self.end && bounds.stop >= self.start
    }
}

fn raw_time_attr(attrs: &Attrs, name: &str) -> CommonResult<DateTime<Utc>> {
    let value = attrs
        .get(name)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CommonError::MissingAttribute(name.to_string()))?;
    parse_raw_time(value)
}

/// Parse a granule time string.
///
/// Accepts an optional `UTC=` prefix, ISO dates with `T` or a space as
/// separator and optional fractional seconds, an optional trailing `Z`,
/// and the compact form `YYYYMMDDHHMMSS`.
pub fn parse_raw_time(s: &str) -> CommonResult<DateTime<Utc>> {
    let s = s.trim();
    let s = s.strip_prefix("UTC=").unwrap_or(s);
    let s = s.strip_suffix('Z').unwrap_or(s);

    if s.len() == 14 && s.bytes().all(|b| b.is_ascii_digit()) {
        return NaiveDateTime::parse_from_str(s, "%Y%m%d%H%M%S")
            .map(|ndt| Utc.from_utc_datetime(&ndt))
            .map_err(|_| CommonError::invalid_time(s));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(Utc.from_utc_datetime(&ndt));
        }
    }

    if let Ok(ndt) = NaiveDateTime::parse_from_str(&format!("{s}T00:00:00"), "%Y-%m-%dT%H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&ndt));
    }

    Err(CommonError::invalid_time(s))
}

/// Reference instant of [`TIME_UNITS`].
pub fn time_epoch() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_262_304_000, 0).unwrap_or_default()
}

/// Encode a time as milliseconds since 2010-01-01.
pub fn encode_time(t: &DateTime<Utc>) -> i64 {
    (*t - time_epoch()).num_milliseconds()
}

/// Inverse of [`encode_time`].
pub fn decode_time(millis: i64) -> DateTime<Utc> {
    time_epoch() + Duration::milliseconds(millis)
}

/// Format a time as `YYYYMMDDHHMMSS`.
pub fn to_compact_time(t: &DateTime<Utc>) -> String {
    t.format("%Y%m%d%H%M%S").to_string()
}
