use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Wall-clock time of day (`HH:MM`), interpreted in the scheduler's time zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay {
    pub hour: u8,
    pub minute: u8,
}

impl TimeOfDay {
    pub fn new(hour: u8, minute: u8) -> Result<Self, CoreError> {
        if hour > 23 || minute > 59 {
            return Err(CoreError::InvalidTime(format!("{hour:02}:{minute:02}")));
        }
        Ok(Self { hour, minute })
    }

    pub fn as_naive_time(&self) -> NaiveTime {
        // hour/minute are range-checked on construction
        NaiveTime::from_hms_opt(self.hour as u32, self.minute as u32, 0).unwrap_or(NaiveTime::MIN)
    }

    /// True once `time` has reached this time of day.
    pub fn reached_by(&self, time: NaiveTime) -> bool {
        time >= self.as_naive_time()
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for TimeOfDay {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (h, m) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| CoreError::InvalidTime(s.to_string()))?;
        let hour = h.parse().map_err(|_| CoreError::InvalidTime(s.to_string()))?;
        let minute = m.parse().map_err(|_| CoreError::InvalidTime(s.to_string()))?;
        Self::new(hour, minute)
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(t: TimeOfDay) -> Self {
        t.to_string()
    }
}

/// Saturday or Sunday.
pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Calendar date of `now` in the exchange time zone.
pub fn exchange_date(now: DateTime<Utc>, tz: Tz) -> NaiveDate {
    tz.from_utc_datetime(&now.naive_utc()).date_naive()
}

/// Parse an IANA zone name, mapping failures to a configuration error.
pub fn parse_timezone(name: &str) -> Result<Tz, CoreError> {
    name.parse::<Tz>()
        .map_err(|e| CoreError::Config(format!("unknown time zone {name:?}: {e}")))
}
