use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

use crate::firestore::error::{invalid_argument, FirestoreResult};

/// Point in time with nanosecond precision, as carried by `google.protobuf.Timestamp`.
///
/// `nanos` is always normalised into `0..1_000_000_000`, so ordering by
/// `(seconds, nanos)` is chronological.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: i32,
}

impl Timestamp {
    pub fn new(seconds: i64, nanos: i32) -> Self {
        let carry = nanos.div_euclid(1_000_000_000) as i64;
        Self {
            seconds: seconds + carry,
            nanos: nanos.rem_euclid(1_000_000_000),
        }
    }

    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    pub fn from_datetime(datetime: DateTime<Utc>) -> Self {
        Self::new(datetime.timestamp(), datetime.timestamp_subsec_nanos() as i32)
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.seconds, self.nanos as u32).single()
    }

    /// Parses the RFC 3339 form used by the JSON mapping, e.g. `2024-01-01T00:00:00.123456Z`.
    pub fn parse_rfc3339(value: &str) -> FirestoreResult<Self> {
        let parsed = DateTime::parse_from_rfc3339(value)
            .map_err(|err| invalid_argument(format!("Invalid timestamp '{value}': {err}")))?;
        Ok(Self::from_datetime(parsed.with_timezone(&Utc)))
    }

    pub fn to_rfc3339(&self) -> String {
        match self.to_datetime() {
            Some(datetime) => datetime.to_rfc3339_opts(SecondsFormat::Nanos, true),
            None => format!("{}.{:09}s", self.seconds, self.nanos),
        }
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.seconds
            .cmp(&other.seconds)
            .then_with(|| self.nanos.cmp(&other.nanos))
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_nanoseconds() {
        let timestamp = Timestamp::new(1, 1_500_000_000);
        assert_eq!(timestamp, Timestamp::new(2, 500_000_000));

        let negative = Timestamp::new(1, -1);
        assert_eq!(negative.seconds, 0);
        assert_eq!(negative.nanos, 999_999_999);
    }

    #[test]
    fn orders_by_seconds_then_nanos() {
        assert!(Timestamp::new(1, 999) < Timestamp::new(2, 0));
        assert!(Timestamp::new(2, 1) > Timestamp::new(2, 0));
    }

    #[test]
    fn parses_fractional_rfc3339() {
        let parsed = Timestamp::parse_rfc3339("1970-01-01T00:00:01.000000500Z").unwrap();
        assert_eq!(parsed, Timestamp::new(1, 500));
        assert_eq!(parsed.to_rfc3339(), "1970-01-01T00:00:01.000000500Z");
        assert!(Timestamp::parse_rfc3339("yesterday").is_err());
    }
}
