//! Attribute time windows.
//!
//! A `Period` is a non-negative span of time. It parses both the human form
//! used in definitions (`"7 days"`, `"12 hours"`) and ISO-8601 durations as
//! returned by the registry (`"P7D"`, `"PT12H"`), and always serializes as
//! ISO-8601.
use std::fmt;
use std::str::FromStr;

use chrono::Duration;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

const SECONDS_PER_MINUTE: i64 = 60;
const SECONDS_PER_HOUR: i64 = 60 * SECONDS_PER_MINUTE;
const SECONDS_PER_DAY: i64 = 24 * SECONDS_PER_HOUR;
const SECONDS_PER_WEEK: i64 = 7 * SECONDS_PER_DAY;

/// Longest span chrono can hold as a `Duration`.
pub const MAX_SECONDS: i64 = i64::MAX / 1000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid period '{input}': {reason}")]
pub struct PeriodParseError {
    pub input: String,
    pub reason: String,
}

impl PeriodParseError {
    fn new(input: &str, reason: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Period {
    seconds: i64,
}

impl Period {
    pub fn days(days: i64) -> Self {
        Self::from_seconds(days.saturating_mul(SECONDS_PER_DAY))
    }

    pub fn weeks(weeks: i64) -> Self {
        Self::from_seconds(weeks.saturating_mul(SECONDS_PER_WEEK))
    }

    pub fn hours(hours: i64) -> Self {
        Self::from_seconds(hours.saturating_mul(SECONDS_PER_HOUR))
    }

    /// Clamped to `0..=MAX_SECONDS`.
    pub fn from_seconds(seconds: i64) -> Self {
        Self {
            seconds: seconds.clamp(0, MAX_SECONDS),
        }
    }

    pub fn from_duration(duration: Duration) -> Self {
        Self::from_seconds(duration.num_seconds())
    }

    pub fn as_duration(&self) -> Duration {
        Duration::seconds(self.seconds)
    }

    pub fn num_seconds(&self) -> i64 {
        self.seconds
    }

    /// Whole days in the period; a 36 hour period is one day.
    pub fn num_days(&self) -> i64 {
        self.seconds / SECONDS_PER_DAY
    }

    pub fn to_iso8601(&self) -> String {
        let days = self.seconds / SECONDS_PER_DAY;
        let rem = self.seconds % SECONDS_PER_DAY;
        if rem == 0 {
            return format!("P{}D", days);
        }

        let mut out = String::from("P");
        if days > 0 {
            out.push_str(&format!("{}D", days));
        }
        out.push('T');
        let hours = rem / SECONDS_PER_HOUR;
        let minutes = (rem % SECONDS_PER_HOUR) / SECONDS_PER_MINUTE;
        let seconds = rem % SECONDS_PER_MINUTE;
        if hours > 0 {
            out.push_str(&format!("{}H", hours));
        }
        if minutes > 0 {
            out.push_str(&format!("{}M", minutes));
        }
        if seconds > 0 {
            out.push_str(&format!("{}S", seconds));
        }
        out
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_iso8601())
    }
}

impl FromStr for Period {
    type Err = PeriodParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(PeriodParseError::new(s, "empty period"));
        }
        if trimmed.starts_with('P') || trimmed.starts_with('p') {
            parse_iso8601(trimmed)
        } else {
            parse_human(trimmed)
        }
    }
}

fn parse_iso8601(input: &str) -> Result<Period, PeriodParseError> {
    let body = &input[1..];
    let mut seconds = 0i64;
    let mut in_time = false;
    let mut digits = String::new();

    for c in body.chars() {
        match c {
            '0'..='9' => digits.push(c),
            'T' | 't' => {
                if !digits.is_empty() {
                    return Err(PeriodParseError::new(input, "number without unit"));
                }
                in_time = true;
            }
            unit => {
                let value: i64 = digits
                    .parse()
                    .map_err(|_| PeriodParseError::new(input, format!("missing number before '{}'", unit)))?;
                digits.clear();
                let scale = match (in_time, unit.to_ascii_uppercase()) {
                    (false, 'W') => SECONDS_PER_WEEK,
                    (false, 'D') => SECONDS_PER_DAY,
                    (true, 'H') => SECONDS_PER_HOUR,
                    (true, 'M') => SECONDS_PER_MINUTE,
                    (true, 'S') => 1,
                    (false, 'Y') | (false, 'M') => {
                        return Err(PeriodParseError::new(
                            input,
                            "calendar years and months are not supported",
                        ))
                    }
                    _ => return Err(PeriodParseError::new(input, format!("unknown unit '{}'", unit))),
                };
                seconds = value
                    .checked_mul(scale)
                    .and_then(|s| s.checked_add(seconds))
                    .filter(|s| *s <= MAX_SECONDS)
                    .ok_or_else(|| PeriodParseError::new(input, "period is too large"))?;
            }
        }
    }

    if !digits.is_empty() {
        return Err(PeriodParseError::new(input, "number without unit"));
    }
    Ok(Period::from_seconds(seconds))
}

fn parse_human(input: &str) -> Result<Period, PeriodParseError> {
    let mut parts = input.split_whitespace();
    let (Some(amount), Some(unit), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(PeriodParseError::new(input, "expected '<number> <unit>'"));
    };

    let amount: i64 = amount
        .parse()
        .map_err(|_| PeriodParseError::new(input, format!("'{}' is not a whole number", amount)))?;
    if amount < 0 {
        return Err(PeriodParseError::new(input, "period cannot be negative"));
    }

    let scale = match unit.to_ascii_lowercase().trim_end_matches('s') {
        "week" => SECONDS_PER_WEEK,
        "day" => SECONDS_PER_DAY,
        "hour" => SECONDS_PER_HOUR,
        "minute" => SECONDS_PER_MINUTE,
        "second" => 1,
        other => return Err(PeriodParseError::new(input, format!("unknown unit '{}'", other))),
    };
    let seconds = amount
        .checked_mul(scale)
        .filter(|s| *s <= MAX_SECONDS)
        .ok_or_else(|| PeriodParseError::new(input, "period is too large"))?;
    Ok(Period::from_seconds(seconds))
}

impl Serialize for Period {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_iso8601())
    }
}

impl<'de> Deserialize<'de> for Period {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PeriodVisitor;

        impl<'de> Visitor<'de> for PeriodVisitor {
            type Value = Period;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an ISO-8601 duration, a '<number> <unit>' string or a number of seconds")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Period, E> {
                v.parse().map_err(E::custom)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Period, E> {
                Ok(Period::from_seconds(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Period, E> {
                Ok(Period::from_seconds(i64::try_from(v).unwrap_or(i64::MAX)))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Period, E> {
                Ok(Period::from_seconds(v as i64))
            }
        }

        deserializer.deserialize_any(PeriodVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_human_forms() {
        assert_eq!("7 days".parse::<Period>().unwrap(), Period::days(7));
        assert_eq!("1 day".parse::<Period>().unwrap(), Period::days(1));
        assert_eq!("2 weeks".parse::<Period>().unwrap(), Period::days(14));
        assert_eq!("12 Hours".parse::<Period>().unwrap(), Period::hours(12));
    }

    #[test]
    fn test_parse_iso_forms() {
        assert_eq!("P7D".parse::<Period>().unwrap(), Period::days(7));
        assert_eq!("P2W".parse::<Period>().unwrap(), Period::weeks(2));
        assert_eq!("PT12H".parse::<Period>().unwrap(), Period::hours(12));
        assert_eq!(
            "P1DT30M".parse::<Period>().unwrap().num_seconds(),
            SECONDS_PER_DAY + 30 * SECONDS_PER_MINUTE
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<Period>().is_err());
        assert!("seven days".parse::<Period>().is_err());
        assert!("7 fortnights".parse::<Period>().is_err());
        assert!("P1M".parse::<Period>().is_err());
        assert!("P7".parse::<Period>().is_err());
        assert!("-3 days".parse::<Period>().is_err());
    }

    #[test]
    fn test_iso_output() {
        assert_eq!(Period::days(30).to_iso8601(), "P30D");
        assert_eq!(Period::hours(36).to_iso8601(), "P1DT12H");
        assert_eq!(Period::from_seconds(90).to_iso8601(), "PT1M30S");
    }

    #[test]
    fn test_num_days_truncates() {
        assert_eq!(Period::hours(36).num_days(), 1);
        assert_eq!(Period::hours(12).num_days(), 0);
    }

    #[test]
    fn test_oversized_periods() {
        assert!("99999999999999999 weeks".parse::<Period>().is_err());
        assert!("P99999999999999999W".parse::<Period>().is_err());
        assert!("PT9223372036854775807S".parse::<Period>().is_err());
        assert_eq!(Period::weeks(i64::MAX).num_seconds(), MAX_SECONDS);

        let p: Period = serde_json::from_str("9223372036854775807").unwrap();
        assert_eq!(p.num_seconds(), MAX_SECONDS);
        assert_eq!(p.num_days(), MAX_SECONDS / SECONDS_PER_DAY);
        assert_eq!(p.as_duration().num_seconds(), MAX_SECONDS);
        let p: Period = serde_json::from_str("18446744073709551615").unwrap();
        assert_eq!(p.num_seconds(), MAX_SECONDS);
    }

    #[test]
    fn test_serde_accepts_strings_and_seconds() {
        let p: Period = serde_json::from_str("\"7 days\"").unwrap();
        assert_eq!(p, Period::days(7));
        let p: Period = serde_json::from_str("604800").unwrap();
        assert_eq!(p, Period::days(7));
        assert_eq!(serde_json::to_string(&p).unwrap(), "\"P7D\"");
    }
}
