// Shared pattern helpers used by every section parser.
//
// Patterns are compiled once into process-wide statics and never mutated, so
// they can be shared freely between parsers and threads.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use regex::{Captures, Regex};
use std::str::FromStr;

use crate::error::{BugreportError, Result};

/// `YYYY-MM-DD HH:MM:SS`, as printed by dumpstate and the VM trace headers.
pub const DATE_TIME_PATTERN: &str =
    r"\d{4}-(?:0[1-9]|1[0-2])-(?:0[1-9]|[12]\d|3[01]) (?:[01]\d|2[0-3]):[0-5]\d:[0-5]\d";

/// `[YYYY-]MM-DD HH:MM:SS.mmm`, as printed by logcat.
pub const LOG_DATE_TIME_PATTERN: &str =
    r"(?:\d{4}-)?(?:0[1-9]|1[0-2])-(?:0[1-9]|[12]\d|3[01]) (?:[01]\d|2[0-3]):[0-5]\d:[0-5]\d\.\d{3}";

/// Compiles a built-in pattern anchored at both ends, so that it only matches
/// a whole line. Built-in patterns are constants, a failure here is a bug.
pub fn full_match(pattern: &str) -> Regex {
    try_full_match(pattern).unwrap_or_else(|e| panic!("invalid built-in pattern {}: {}", pattern, e))
}

/// Fallible variant of [`full_match`] for patterns that come from configuration.
pub fn try_full_match(pattern: &str) -> Result<Regex> {
    Ok(Regex::new(&format!("^(?:{})$", pattern))?)
}

/// Whether the whole text matches the pattern.
pub fn matches(re: &Regex, text: &str) -> bool {
    re.is_match(text)
}

/// Captures for the text, or `None` when it does not match. Not matching is
/// a normal outcome while classifying lines.
pub fn match_captures<'t>(re: &Regex, text: &'t str) -> Option<Captures<'t>> {
    re.captures(text)
}

/// Parses the date-time captured by a numbered group.
pub fn parse_calendar(caps: &Captures<'_>, group: usize, year: i32) -> Result<NaiveDateTime> {
    let text = caps
        .get(group)
        .ok_or_else(|| BugreportError::MissingGroup {
            group: group.to_string(),
        })?
        .as_str();
    parse_date_time(text, year)
}

/// Parses the date-time captured by a named group.
pub fn parse_calendar_named(caps: &Captures<'_>, name: &str, year: i32) -> Result<NaiveDateTime> {
    let text = caps
        .name(name)
        .ok_or_else(|| BugreportError::MissingGroup {
            group: name.to_string(),
        })?
        .as_str();
    parse_date_time(text, year)
}

/// Parses `YYYY-MM-DD HH:MM:SS[.fff]` or `MM-DD HH:MM:SS[.fff]`. The year-less
/// form takes `year`.
pub fn parse_date_time(text: &str, year: i32) -> Result<NaiveDateTime> {
    let text = text.trim();
    let (date_part, time_part) = text
        .split_once(' ')
        .ok_or_else(|| date_error(text, "missing time of day"))?;

    let fields: Vec<&str> = date_part.split('-').collect();
    let (year, month, day) = match fields.as_slice() {
        [y, m, d] => (parse_field::<i32>(text, y)?, parse_field::<u32>(text, m)?, parse_field::<u32>(text, d)?),
        [m, d] => {
            let (month, day) = (parse_field::<u32>(text, m)?, parse_field::<u32>(text, d)?);
            (leap_day_year(year, month, day), month, day)
        }
        _ => return Err(date_error(text, "expected [YYYY-]MM-DD")),
    };

    let date = NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| date_error(text, "no such calendar date"))?;
    let time = NaiveTime::parse_from_str(time_part.trim(), "%H:%M:%S%.f")
        .map_err(|e| date_error(text, &e.to_string()))?;

    Ok(date.and_time(time))
}

/// A year-less 02-29 cannot belong to a common year; it takes the closest
/// leap year at or before `year`.
fn leap_day_year(year: i32, month: u32, day: u32) -> i32 {
    if (month, day) != (2, 29) {
        return year;
    }
    (0..8)
        .map(|back| year - back)
        .find(|&y| NaiveDate::from_ymd_opt(y, 2, 29).is_some())
        .unwrap_or(year)
}

fn parse_field<T: FromStr>(text: &str, field: &str) -> Result<T> {
    field
        .parse()
        .map_err(|_| date_error(text, &format!("bad field '{}'", field)))
}

fn date_error(text: &str, reason: &str) -> BugreportError {
    BugreportError::DateParse {
        text: text.to_string(),
        reason: reason.to_string(),
    }
}

/// Integer from a named group, or `default` when the group is absent or not a number.
pub fn get_int<T: FromStr>(caps: &Captures<'_>, name: &str, default: T) -> T {
    caps.name(name)
        .and_then(|m| m.as_str().trim().parse().ok())
        .unwrap_or(default)
}

/// Text of a named group, if it participated in the match.
pub fn get_str(caps: &Captures<'_>, name: &str) -> Option<String> {
    caps.name(name).map(|m| m.as_str().to_string())
}

/// Converts a decimal seconds string (`"5.0"`, `"0.123"`) to whole
/// milliseconds without going through floating point. Digits past the
/// millisecond are truncated.
pub fn parse_duration_ms(text: &str) -> Option<i64> {
    let text = text.trim();
    let (whole, frac) = text.split_once('.').unwrap_or((text, ""));
    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let seconds: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let millis_digits: String = frac.chars().take(3).collect();
    let millis: i64 = format!("{:0<3}", millis_digits).parse().ok()?;

    seconds.checked_mul(1000)?.checked_add(millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_full_match_is_anchored() {
        let re = full_match(r"ANR in \S+");
        assert!(matches(&re, "ANR in com.example"));
        assert!(!matches(&re, "xx ANR in com.example"));
        assert!(!matches(&re, "ANR in com.example and more"));
    }

    #[test]
    fn test_try_full_match_rejects_bad_pattern() {
        assert!(matches!(try_full_match("(unclosed"), Err(BugreportError::Pattern(_))));
    }

    #[test]
    fn test_match_captures_returns_none_on_mismatch() {
        let re = full_match(r"pid (?P<pid>\d+)");
        assert!(match_captures(&re, "tid 12").is_none());
        let caps = match_captures(&re, "pid 12").unwrap();
        assert_eq!(get_int(&caps, "pid", -1), 12);
        assert_eq!(get_int(&caps, "missing", -1), -1);
    }

    #[test]
    fn test_parse_full_date_time() {
        let t = parse_date_time("2016-01-01 00:00:00", 1999).unwrap();
        assert_eq!(t.year(), 2016);
        assert_eq!(t.month(), 1);
        assert_eq!(t.second(), 0);
    }

    #[test]
    fn test_parse_year_less_date_time_with_millis() {
        let t = parse_date_time("11-08 17:54:04.540", 2025).unwrap();
        assert_eq!(t.year(), 2025);
        assert_eq!(t.month(), 11);
        assert_eq!(t.day(), 8);
        assert_eq!(t.hour(), 17);
        assert_eq!(t.nanosecond(), 540_000_000);
    }

    #[test]
    fn test_year_less_leap_day_in_common_year() {
        let t = parse_date_time("02-29 10:00:00.000", 2017).unwrap();
        assert_eq!((t.year(), t.month(), t.day()), (2016, 2, 29));
        let t = parse_date_time("02-29 10:00:00.000", 2016).unwrap();
        assert_eq!(t.year(), 2016);
        assert!(parse_date_time("2017-02-29 10:00:00", 2016).is_err());
    }

    #[test]
    fn test_impossible_date_is_an_error() {
        let re = full_match(&format!("(?P<date>{})", LOG_DATE_TIME_PATTERN));
        let caps = match_captures(&re, "02-30 10:00:00.000").unwrap();
        match parse_calendar_named(&caps, "date", 2017) {
            Err(BugreportError::DateParse { text, .. }) => assert_eq!(text, "02-30 10:00:00.000"),
            other => panic!("expected DateParse, got {:?}", other),
        }
    }

    #[test]
    fn test_date_grammar_rejects_out_of_range_fields() {
        let re = full_match(DATE_TIME_PATTERN);
        assert!(matches(&re, "2016-12-31 23:59:59"));
        assert!(!matches(&re, "2016-13-01 00:00:00"));
        assert!(!matches(&re, "2016-01-01 24:00:00"));
    }

    #[test]
    fn test_missing_group() {
        let re = full_match(r"(a)|(b)");
        let caps = match_captures(&re, "b").unwrap();
        assert!(matches!(
            parse_calendar(&caps, 1, 2000),
            Err(BugreportError::MissingGroup { .. })
        ));
    }

    #[test]
    fn test_parse_duration_ms() {
        assert_eq!(parse_duration_ms("5.0"), Some(5000));
        assert_eq!(parse_duration_ms("0.123"), Some(123));
        assert_eq!(parse_duration_ms("12"), Some(12_000));
        assert_eq!(parse_duration_ms("1.5"), Some(1500));
        assert_eq!(parse_duration_ms("1.23456"), Some(1234));
        assert_eq!(parse_duration_ms(""), None);
        assert_eq!(parse_duration_ms("abc"), None);
    }
}
