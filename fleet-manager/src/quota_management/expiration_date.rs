use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use std::{fmt, str::FromStr};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Midnight of a calendar day in an explicit UTC offset, written as `2022-12-06 +01:00`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ExpirationDate(DateTime<FixedOffset>);

impl ExpirationDate {
    pub fn new(date: NaiveDate, offset: FixedOffset) -> Option<Self> {
        date.and_hms_opt(0, 0, 0)?.and_local_timezone(offset).single().map(Self)
    }

    pub fn as_datetime(&self) -> DateTime<FixedOffset> {
        self.0
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.0 <= now
    }
}

impl From<DateTime<FixedOffset>> for ExpirationDate {
    fn from(value: DateTime<FixedOffset>) -> Self {
        Self(value)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid expiration date '{value}': expected format 'YYYY-MM-DD +HH:MM'")]
pub struct ParseExpirationDateError {
    value: String,
}

impl FromStr for ExpirationDate {
    type Err = ParseExpirationDateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseExpirationDateError { value: s.to_string() };
        let (date, offset) = s.trim().split_once(' ').ok_or_else(err)?;
        NaiveDate::parse_from_str(date, DATE_FORMAT).map_err(|_| err())?;
        DateTime::parse_from_str(&format!("{date} 00:00:00 {offset}"), "%Y-%m-%d %H:%M:%S %:z")
            .map(Self)
            .map_err(|_| err())
    }
}

impl fmt::Display for ExpirationDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %:z"))
    }
}

impl Serialize for ExpirationDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ExpirationDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}
