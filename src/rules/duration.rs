//! Expiry resolution for blacklist entries.
//!
//! A caller gives either a relative span (`for`, e.g. `8h`, `1 day`,
//! `1 year 1 day`, `P1Y2M3DT4H5M6S`) or an absolute end (`until`, e.g.
//! `2014-11-14 17:03:00+01:00`). Both resolve to a UTC instant. Whether that
//! instant is far enough in the future is checked by the rule store when the
//! rule is inserted, not here.

use chrono::{DateTime, Duration, Months, NaiveDate, NaiveDateTime, Utc};
use thiserror::Error;

/// Span used when a request names neither `for` nor `until`.
pub const DEFAULT_BLACKLIST_DURATION: &str = "8 hours";

/// Longest span accepted, in seconds (about ten thousand years).
const MAX_SPAN_SECS: f64 = 315_576_000_000.0;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationError {
    #[error("malformed interval: {0}")]
    MalformedInterval(String),
    #[error("malformed timestamp: {0}")]
    MalformedTimestamp(String),
    #[error("both 'for' ({for_value}) and 'until' ({until_value}) given")]
    MultipleDurations {
        for_value: String,
        until_value: String,
    },
}

/// How long a blacklist entry should last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DurationSpec {
    /// Relative to the creation instant.
    For(String),
    /// Absolute end; UTC unless the text names an offset.
    Until(String),
}

impl DurationSpec {
    /// Build a duration from the optional `for` / `until` request parameters.
    ///
    /// Blank values count as absent. Supplying both is an error; supplying
    /// neither yields `For(default)`.
    pub fn from_parameters(
        for_value: Option<&str>,
        until_value: Option<&str>,
        default: &str,
    ) -> Result<Self, DurationError> {
        let for_value = for_value.map(str::trim).filter(|s| !s.is_empty());
        let until_value = until_value.map(str::trim).filter(|s| !s.is_empty());
        match (for_value, until_value) {
            (Some(f), Some(u)) => Err(DurationError::MultipleDurations {
                for_value: f.to_string(),
                until_value: u.to_string(),
            }),
            (Some(f), None) => Ok(DurationSpec::For(f.to_string())),
            (None, Some(u)) => Ok(DurationSpec::Until(u.to_string())),
            (None, None) => Ok(DurationSpec::For(default.to_string())),
        }
    }

    /// Resolve to a concrete expiry instant.
    pub fn resolve(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, DurationError> {
        match self {
            DurationSpec::For(text) => Interval::parse(text)?
                .add_to(now)
                .ok_or_else(|| DurationError::MalformedInterval(text.clone())),
            DurationSpec::Until(text) => parse_timestamp(text),
        }
    }
}

impl Default for DurationSpec {
    fn default() -> Self {
        DurationSpec::For(DEFAULT_BLACKLIST_DURATION.to_string())
    }
}

/// A non-negative calendar interval: whole months plus an exact span.
///
/// Months are kept apart so that `1 month` from January 31st lands on the
/// last day of February rather than 30 days later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub months: u32,
    pub span: Duration,
}

enum Unit {
    Seconds(f64),
    Months(f64),
}

impl Interval {
    /// Parse a unit-suffixed span or an ISO-8601 duration.
    pub fn parse(text: &str) -> Result<Self, DurationError> {
        let malformed = || DurationError::MalformedInterval(text.to_string());
        let normalized = text.trim().to_ascii_lowercase();
        if normalized.is_empty() {
            return Err(malformed());
        }

        let parts = if let Some(iso) = normalized.strip_prefix('p') {
            parse_iso_parts(iso)
        } else {
            parse_unit_parts(&normalized)
        }
        .ok_or_else(malformed)?;

        let mut months = 0.0_f64;
        let mut seconds = 0.0_f64;
        for (value, unit) in parts {
            match unit {
                Unit::Seconds(factor) => seconds += value * factor,
                Unit::Months(factor) => months += value * factor,
            }
        }

        // Fractional months become 30-day chunks.
        let whole_months = months.trunc();
        seconds += (months - whole_months) * 30.0 * 86_400.0;

        if !seconds.is_finite() || seconds > MAX_SPAN_SECS || whole_months > 120_000.0 {
            return Err(malformed());
        }

        Ok(Self {
            months: whole_months as u32,
            span: Duration::milliseconds((seconds * 1000.0).round() as i64),
        })
    }

    /// `start` plus this interval, or `None` on overflow.
    pub fn add_to(&self, start: DateTime<Utc>) -> Option<DateTime<Utc>> {
        start
            .checked_add_months(Months::new(self.months))?
            .checked_add_signed(self.span)
    }
}

fn unit_factor(unit: &str) -> Option<Unit> {
    Some(match unit {
        "" | "s" | "sec" | "secs" | "second" | "seconds" => Unit::Seconds(1.0),
        "m" | "min" | "mins" | "minute" | "minutes" => Unit::Seconds(60.0),
        "h" | "hr" | "hrs" | "hour" | "hours" => Unit::Seconds(3_600.0),
        "d" | "day" | "days" => Unit::Seconds(86_400.0),
        "w" | "week" | "weeks" => Unit::Seconds(604_800.0),
        "mon" | "mons" | "month" | "months" => Unit::Months(1.0),
        "y" | "yr" | "yrs" | "year" | "years" => Unit::Months(12.0),
        _ => return None,
    })
}

/// `8h`, `1 day 2 hours`, `2.5w`, `90` (seconds).
fn parse_unit_parts(text: &str) -> Option<Vec<(f64, Unit)>> {
    let mut parts = Vec::new();
    let mut rest = text.trim_start();
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if num_len == 0 {
            return None;
        }
        let value: f64 = rest[..num_len].parse().ok()?;
        rest = rest[num_len..].trim_start();

        let unit_len = rest
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(rest.len());
        let unit = unit_factor(&rest[..unit_len])?;
        rest = rest[unit_len..].trim_start_matches([' ', ',']);

        parts.push((value, unit));
    }
    (!parts.is_empty()).then_some(parts)
}

/// The part after `P` of an ISO-8601 duration, lowercased.
fn parse_iso_parts(text: &str) -> Option<Vec<(f64, Unit)>> {
    let mut parts = Vec::new();
    let mut in_time = false;
    let mut number = String::new();
    for c in text.chars() {
        match c {
            't' if number.is_empty() && !in_time => in_time = true,
            '0'..='9' | '.' | ',' => number.push(if c == ',' { '.' } else { c }),
            designator => {
                if number.is_empty() {
                    return None;
                }
                let value: f64 = number.parse().ok()?;
                number.clear();
                let unit = match (in_time, designator) {
                    (false, 'y') => Unit::Months(12.0),
                    (false, 'm') => Unit::Months(1.0),
                    (false, 'w') => Unit::Seconds(604_800.0),
                    (false, 'd') => Unit::Seconds(86_400.0),
                    (true, 'h') => Unit::Seconds(3_600.0),
                    (true, 'm') => Unit::Seconds(60.0),
                    (true, 's') => Unit::Seconds(1.0),
                    _ => return None,
                };
                parts.push((value, unit));
            }
        }
    }
    (number.is_empty() && !parts.is_empty()).then_some(parts)
}

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f %:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f %z",
    "%Y-%m-%d %H:%M:%S%.f%#z",
];

/// Parse an absolute timestamp. Offset-less values are taken as UTC.
pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, DurationError> {
    let trimmed = text.trim();
    let trimmed = trimmed
        .strip_suffix(" UTC")
        .or_else(|| trimmed.strip_suffix("Z"))
        .map(|s| s.trim_end())
        .unwrap_or(trimmed);

    if let Ok(dt) = DateTime::parse_from_rfc3339(text.trim()) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(trimmed, format) {
            return Ok(dt.with_timezone(&Utc));
        }
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(naive.and_utc());
        }
    }
    if let Some(midnight) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(midnight.and_utc());
    }

    Err(DurationError::MalformedTimestamp(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 31, 12, 0, 0).unwrap()
    }

    #[test]
    fn unit_spans() {
        let cases = [
            ("8h", Duration::hours(8)),
            ("8 hours", Duration::hours(8)),
            ("1 day", Duration::days(1)),
            ("2.5w", Duration::hours(420)),
            ("90", Duration::seconds(90)),
            ("1 day 2 hours", Duration::hours(26)),
            ("1d, 30m", Duration::minutes(24 * 60 + 30)),
            ("  45 MIN ", Duration::minutes(45)),
        ];
        for (text, expected) in cases {
            let interval = Interval::parse(text).unwrap();
            assert_eq!(interval.months, 0, "{text}");
            assert_eq!(interval.span, expected, "{text}");
        }
    }

    #[test]
    fn calendar_units() {
        let interval = Interval::parse("1 year 1 day").unwrap();
        assert_eq!(interval.months, 12);
        assert_eq!(interval.span, Duration::days(1));

        // Jan 31 + 1 month clamps to Feb 29 (leap year).
        let end = Interval::parse("1 month").unwrap().add_to(start()).unwrap();
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 2, 29, 12, 0, 0).unwrap());
    }

    #[test]
    fn iso_durations() {
        let interval = Interval::parse("P1Y2M3DT4H5M6S").unwrap();
        assert_eq!(interval.months, 14);
        assert_eq!(
            interval.span,
            Duration::days(3) + Duration::hours(4) + Duration::minutes(5) + Duration::seconds(6)
        );
        assert_eq!(Interval::parse("PT30M").unwrap().span, Duration::minutes(30));
        assert_eq!(Interval::parse("P2W").unwrap().span, Duration::weeks(2));
    }

    #[test]
    fn malformed_intervals() {
        for bad in ["", "soon", "8 fortnights", "h8", "-1 day", "P", "PT", "P1H", "1..5h", "1e400 years"] {
            assert!(
                matches!(Interval::parse(bad), Err(DurationError::MalformedInterval(_))),
                "{bad:?} should be malformed"
            );
        }
    }

    #[test]
    fn timestamps() {
        let expected = Utc.with_ymd_and_hms(2014, 11, 14, 16, 3, 0).unwrap();
        for text in [
            "2014-11-14 16:03:00",
            "2014-11-14T16:03:00",
            "2014-11-14 17:03:00+01:00",
            "2014-11-14T17:03:00+01:00",
            "2014-11-14 17:03:00 +0100",
            "2014-11-14 16:03:00 UTC",
            "2014-11-14T16:03:00Z",
            "2014-11-14 16:03",
        ] {
            assert_eq!(parse_timestamp(text), Ok(expected), "{text}");
        }
        assert_eq!(
            parse_timestamp("2014-11-14"),
            Ok(Utc.with_ymd_and_hms(2014, 11, 14, 0, 0, 0).unwrap())
        );
        assert!(matches!(
            parse_timestamp("next tuesday"),
            Err(DurationError::MalformedTimestamp(_))
        ));
    }

    #[test]
    fn parameters_select_one_duration() {
        assert_eq!(
            DurationSpec::from_parameters(None, None, DEFAULT_BLACKLIST_DURATION),
            Ok(DurationSpec::For("8 hours".to_string()))
        );
        assert_eq!(
            DurationSpec::from_parameters(Some(" 1h "), Some("  "), DEFAULT_BLACKLIST_DURATION),
            Ok(DurationSpec::For("1h".to_string()))
        );
        assert_eq!(
            DurationSpec::from_parameters(None, Some("2030-01-01"), DEFAULT_BLACKLIST_DURATION),
            Ok(DurationSpec::Until("2030-01-01".to_string()))
        );
        assert!(matches!(
            DurationSpec::from_parameters(Some("1h"), Some("2030-01-01"), DEFAULT_BLACKLIST_DURATION),
            Err(DurationError::MultipleDurations { .. })
        ));
    }

    #[test]
    fn resolve_relative_and_absolute() {
        assert_eq!(
            DurationSpec::For("8h".into()).resolve(start()),
            Ok(start() + Duration::hours(8))
        );
        let until = DurationSpec::Until("2030-06-01 00:00:00+02:00".into());
        assert_eq!(
            until.resolve(start()),
            Ok(Utc.with_ymd_and_hms(2030, 5, 31, 22, 0, 0).unwrap())
        );
    }
}
