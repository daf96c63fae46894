//! Date helpers behind the temporal operators. Instants travel between rules
//! as ISO-8601 strings; naive values stay naive until `to_timezone` pins
//! them to a zone.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use chrono_tz::Tz;
use std::fmt::Write;

use crate::errors::{EvalError, Result};
use crate::rule::TimeUnit;
use crate::value::Value;

const ISO_NAIVE: [&str; 5] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d",
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Instant {
    Aware(DateTime<FixedOffset>),
    Naive(NaiveDateTime),
}

impl Instant {
    /// Parses with one strftime format, accepting zoned, naive and
    /// date-only inputs in that order.
    pub fn parse_with(text: &str, fmt: &str) -> Option<Instant> {
        if let Ok(dt) = DateTime::parse_from_str(text, fmt) {
            return Some(Instant::Aware(dt));
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(Instant::Naive(dt));
        }
        NaiveDate::parse_from_str(text, fmt)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(Instant::Naive)
    }

    pub fn parse_rfc3339(text: &str) -> Option<Instant> {
        DateTime::parse_from_rfc3339(text.trim()).ok().map(Instant::Aware)
    }

    /// RFC 3339 first, then the common naive ISO-8601 shapes.
    pub fn parse_iso(text: &str) -> Option<Instant> {
        let text = text.trim();
        Self::parse_rfc3339(text).or_else(|| ISO_NAIVE.iter().find_map(|fmt| Self::parse_with(text, fmt)))
    }

    pub fn to_iso(&self) -> String {
        match self {
            Instant::Naive(dt) => dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string(),
            Instant::Aware(dt) => dt.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        }
    }

    /// `None` when the format asks for fields the instant does not have,
    /// e.g. `%z` on a naive value.
    pub fn format(&self, fmt: &str) -> Option<String> {
        let mut out = String::new();
        let written = match self {
            Instant::Naive(dt) => write!(out, "{}", dt.format(fmt)),
            Instant::Aware(dt) => write!(out, "{}", dt.format(fmt)),
        };
        written.ok().map(|_| out)
    }
}

/// Tries `formats` in order. With `strict` only the first candidate counts;
/// an empty list falls back to ISO-8601.
pub fn date_parse(text: &str, formats: &[String], strict: bool) -> Result<Instant> {
    let text = text.trim();
    let parsed = match (formats.first(), strict) {
        (None, true) => Instant::parse_rfc3339(text),
        (None, false) => Instant::parse_iso(text),
        (Some(first), true) => Instant::parse_with(text, first),
        (Some(_), false) => formats
            .iter()
            .find_map(|fmt| Instant::parse_with(text, fmt))
            .or_else(|| Instant::parse_iso(text)),
    };
    parsed.ok_or_else(|| EvalError::DateParseFailure { input: text.to_string() })
}

/// Epoch value in `unit` to an RFC 3339 UTC string.
pub fn from_timestamp(value: &Value, unit: TimeUnit) -> Option<String> {
    let dt = match value {
        Value::Int(n) => {
            let per = unit.per_second() as i64;
            let nanos = n.rem_euclid(per) * (1_000_000_000 / per);
            DateTime::<Utc>::from_timestamp(n.div_euclid(per), nanos as u32)?
        }
        other => {
            let total = other.as_f64()? / unit.per_second();
            if !total.is_finite() {
                return None;
            }
            let whole = total.floor();
            let nanos = (((total - whole) * 1e9).round() as u32).min(999_999_999);
            DateTime::<Utc>::from_timestamp(whole as i64, nanos)?
        }
    };
    Some(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

/// Re-expresses `instant` in `to`. Naive instants are read as `from`
/// (UTC when unset).
pub fn to_timezone(instant: Instant, from: Option<Tz>, to: Tz) -> Option<String> {
    let utc = match instant {
        Instant::Aware(dt) => dt.with_timezone(&Utc),
        Instant::Naive(naive) => from
            .unwrap_or(Tz::UTC)
            .from_local_datetime(&naive)
            .earliest()?
            .with_timezone(&Utc),
    };
    Some(utc.with_timezone(&to).fixed_offset().to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn iso_fallbacks() {
        assert_eq!(date_parse("2024-03-01", &[], false).unwrap().to_iso(), "2024-03-01T00:00:00");
        assert_eq!(
            date_parse("2024-03-01T10:30:00+02:00", &[], false).unwrap().to_iso(),
            "2024-03-01T10:30:00+02:00"
        );
        assert!(date_parse("2024-03-01", &[], true).is_err());
    }

    #[test]
    fn strict_only_tries_the_first_format() {
        let formats = vec!["%d/%m/%Y".to_string(), "%Y.%m.%d".to_string()];
        assert!(date_parse("2024.03.01", &formats, false).is_ok());
        assert!(matches!(
            date_parse("2024.03.01", &formats, true),
            Err(EvalError::DateParseFailure { .. })
        ));
        assert_eq!(date_parse("01/03/2024", &formats, true).unwrap().to_iso(), "2024-03-01T00:00:00");
    }

    #[test]
    fn timestamps_by_unit() {
        assert_eq!(from_timestamp(&Value::Int(0), TimeUnit::Seconds).unwrap(), "1970-01-01T00:00:00Z");
        assert_eq!(
            from_timestamp(&Value::Int(1_500), TimeUnit::Millis).unwrap(),
            "1970-01-01T00:00:01.500Z"
        );
        assert_eq!(
            from_timestamp(&Value::Float(86_400.0), TimeUnit::Seconds).unwrap(),
            "1970-01-02T00:00:00Z"
        );
    }

    #[test]
    fn naive_instants_take_the_source_zone() {
        let naive = Instant::parse_iso("2024-01-15 12:00").unwrap();
        assert_eq!(
            to_timezone(naive, Some(Tz::Europe__Paris), Tz::UTC).unwrap(),
            "2024-01-15T11:00:00Z"
        );
        assert_eq!(
            to_timezone(naive, None, Tz::Asia__Tokyo).unwrap(),
            "2024-01-15T21:00:00+09:00"
        );
    }
}
