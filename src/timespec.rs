//! Parsing and matching of recurring and absolute time windows.
//!
//! A spec is a comma-separated list of sub-specs, OR'd together. Each
//! sub-spec is either a recurring weekly window (`Mon-Fri 06:30-20:30
//! Europe/Berlin`) or an absolute interval between two ISO-8601 instants
//! with explicit offsets. The sentinels `always`/`never` are recognized
//! per sub-spec so a comma-separated mix of a sentinel and a window works.

use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::DownscalerError;

const WEEKDAYS: [&str; 7] = ["MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

static RECURRING_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^([a-z]{3})-([a-z]{3}) (\d{2}):(\d{2})-(\d{2}):(\d{2}) ([a-zA-Z/_]+)$")
        .expect("static regex")
});

static ABSOLUTE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}[-+]\d{2}:\d{2})-(\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}[-+]\d{2}:\d{2})$",
    )
    .expect("static regex")
});

/// Evaluates `spec` against `now`. Returns the offending sub-spec text on
/// a malformed entry, per spec.md §4.1 ("fail the entire spec with a
/// reported value error").
pub fn matches(now: DateTime<Utc>, spec: &str) -> Result<bool, DownscalerError> {
    let mut any_matched = false;
    for sub in spec.split(',') {
        let sub = sub.trim();
        if sub.is_empty() {
            continue;
        }
        let lower = sub.to_ascii_lowercase();
        if lower == "always" {
            return Ok(true);
        }
        if lower == "never" {
            continue;
        }
        if let Some(caps) = RECURRING_PATTERN.captures(sub) {
            if matches_recurring(now, &caps)? {
                any_matched = true;
            }
        } else if let Some(caps) = ABSOLUTE_PATTERN.captures(sub) {
            if matches_absolute(now, &caps)? {
                any_matched = true;
            }
        } else {
            return Err(DownscalerError::Parse {
                resource: spec.to_string(),
                field: "time_spec",
                detail: format!(
                    r#"time spec value "{sub}" does not match format ("Mon-Fri 06:30-20:30 Europe/Berlin" or "2019-01-01T00:00:00+00:00-2019-01-02T12:34:56+00:00")"#
                ),
            });
        }
    }
    Ok(any_matched)
}

fn weekday_index(name: &str) -> Result<usize, DownscalerError> {
    let upper = name.to_ascii_uppercase();
    WEEKDAYS
        .iter()
        .position(|d| *d == upper)
        .ok_or_else(|| DownscalerError::Parse {
            resource: name.to_string(),
            field: "weekday",
            detail: format!("unknown weekday {name}"),
        })
}

fn parse_tz(name: &str) -> Result<Tz, DownscalerError> {
    if let Ok(tz) = name.parse::<Tz>() {
        return Ok(tz);
    }
    chrono_tz::TZ_VARIANTS
        .iter()
        .find(|tz| tz.name().eq_ignore_ascii_case(name))
        .copied()
        .ok_or_else(|| DownscalerError::Parse {
            resource: name.to_string(),
            field: "timezone",
            detail: format!("unknown IANA timezone {name}"),
        })
}

fn matches_recurring(now: DateTime<Utc>, caps: &regex::Captures) -> Result<bool, DownscalerError> {
    let tz_name = &caps[7];
    let tz = parse_tz(tz_name)?;

    let day_from = weekday_index(&caps[1])?;
    let day_to = weekday_index(&caps[2])?;
    let hour_from: u32 = caps[3].parse().unwrap();
    let min_from: u32 = caps[4].parse().unwrap();
    let hour_to: u32 = caps[5].parse().unwrap();
    let min_to: u32 = caps[6].parse().unwrap();

    if hour_from > 24 || hour_to > 24 || min_from > 59 || min_to > 59 {
        return Err(DownscalerError::Parse {
            resource: format!("{}:{}-{}:{}", hour_from, min_from, hour_to, min_to),
            field: "time_of_day",
            detail: "hour/minute out of range".to_string(),
        });
    }

    let local = now.with_timezone(&tz);
    let wday = local.weekday().num_days_from_monday() as usize;

    let day_matches = if day_from <= day_to {
        day_from <= wday && wday <= day_to
    } else {
        wday >= day_from || wday <= day_to
    };

    let minute_of_day = local.hour() * 60 + local.minute();
    let minute_from = hour_from * 60 + min_from;
    let minute_to = hour_to * 60 + min_to;
    let time_matches = minute_from <= minute_of_day && minute_of_day < minute_to;

    Ok(day_matches && time_matches)
}

fn matches_absolute(now: DateTime<Utc>, caps: &regex::Captures) -> Result<bool, DownscalerError> {
    let from = DateTime::parse_from_rfc3339(&caps[1])
        .map_err(|e| DownscalerError::Parse {
            resource: caps[1].to_string(),
            field: "timestamp",
            detail: e.to_string(),
        })?
        .with_timezone(&Utc);
    let to = DateTime::parse_from_rfc3339(&caps[2])
        .map_err(|e| DownscalerError::Parse {
            resource: caps[2].to_string(),
            field: "timestamp",
            detail: e.to_string(),
        })?
        .with_timezone(&Utc);
    Ok(from <= now && now <= to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn dt(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn always_and_never() {
        assert!(matches(dt(2018, 10, 23, 21, 56), "always").unwrap());
        assert!(!matches(dt(2018, 10, 23, 21, 56), "never").unwrap());
        assert!(matches(dt(2018, 10, 23, 21, 56), "NEVER,always").unwrap());
    }

    #[test]
    fn recurring_window_matches_weekday_and_time() {
        // 2018-10-23 is a Tuesday
        let spec = "Mon-Fri 07:30-20:30 Europe/Berlin";
        assert!(matches(dt(2018, 10, 23, 15, 0), spec).unwrap());
        assert!(!matches(dt(2018, 10, 23, 4, 0), spec).unwrap());
    }

    #[test]
    fn recurring_window_half_open_end() {
        let spec = "Mon-Sun 00:00-24:00 UTC";
        assert!(matches(dt(2018, 10, 23, 23, 59), spec).unwrap());
        // exclusive end: minute 1440 never occurs, but this checks boundary logic at 0
        assert!(matches(dt(2018, 10, 23, 0, 0), spec).unwrap());
    }

    #[test]
    fn wraparound_weekday_range() {
        let spec = "Fri-Mon 00:00-24:00 UTC";
        // Saturday
        assert!(matches(dt(2018, 10, 20, 12, 0), spec).unwrap());
        // Wednesday
        assert!(!matches(dt(2018, 10, 24, 12, 0), spec).unwrap());
    }

    #[test]
    fn absolute_interval_is_inclusive() {
        let spec = "2019-01-01T00:00:00+00:00-2019-01-02T12:34:56+00:00";
        assert!(matches(dt(2019, 1, 1, 0, 0), spec).unwrap());
        assert!(matches(dt(2019, 1, 2, 12, 34), spec).unwrap());
        assert!(!matches(dt(2019, 1, 2, 12, 35), spec).unwrap());
    }

    #[test]
    fn malformed_subspec_errors() {
        let err = matches(dt(2018, 10, 23, 0, 0), "bogus spec").unwrap_err();
        match err {
            DownscalerError::Parse { .. } => {}
            _ => panic!("expected Parse error"),
        }
    }

    #[test]
    fn absolute_pattern_is_anchored() {
        // A malformed sub-spec that merely *contains* a valid ISO-8601
        // interval must still fail the whole spec (spec.md §4.1: "Parsing
        // is strict"), not match on the embedded substring.
        let spec = "xyz2019-01-01T00:00:00+00:00-2019-01-02T12:34:56+00:00";
        let err = matches(dt(2019, 1, 1, 12, 0), spec).unwrap_err();
        match err {
            DownscalerError::Parse { .. } => {}
            _ => panic!("expected Parse error"),
        }
    }

    #[test]
    fn case_insensitive_weekday_and_tz() {
        let spec = "mon-fri 07:30-20:30 europe/berlin";
        assert!(matches(dt(2018, 10, 23, 15, 0), spec).unwrap());
    }
}
