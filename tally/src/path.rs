//! Permanent record layout.
//!
//! One counter's record for one UTC day lives at
//! `<base_dir>/<yyyy>/<mm>/<dd>/<counter name>/data-<window size>s.json`.
//! Counter names may contain `/`, each segment becomes a directory.
//!
//! Segments are escaped so that every valid name maps to its own valid store
//! path. `%`, `\` and NUL are percent-encoded. An empty segment becomes `%`,
//! `.` becomes `%2E` and `..` becomes `%2E%2E`. A segment ending in `.json`
//! has that dot encoded so it cannot collide with a record file.

use std::num::NonZeroU32;

use chrono::{DateTime, Datelike, NaiveDate};
use tally_counter::Name;

/// The store path of `name`'s record on `date`.
#[must_use]
pub fn record_path(base_dir: &str, date: NaiveDate, name: &Name, window_size: NonZeroU32) -> String {
    let name = name
        .as_str()
        .split('/')
        .map(escape_segment)
        .collect::<Vec<_>>()
        .join("/");
    format!(
        "{base}/{year:04}/{month:02}/{day:02}/{name}/data-{window_size}s.json",
        base = base_dir.trim_end_matches('/'),
        year = date.year(),
        month = date.month(),
        day = date.day(),
    )
}

fn escape_segment(segment: &str) -> String {
    match segment {
        "" => return "%".to_string(),
        "." => return "%2E".to_string(),
        ".." => return "%2E%2E".to_string(),
        _ => {}
    }
    let mut escaped = String::with_capacity(segment.len());
    for c in segment.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            '\\' => escaped.push_str("%5C"),
            '\0' => escaped.push_str("%00"),
            c => escaped.push(c),
        }
    }
    match escaped.strip_suffix(".json") {
        Some(stem) => format!("{stem}%2Ejson"),
        None => escaped,
    }
}

/// The UTC calendar day containing unix second `timestamp`, if representable.
#[must_use]
pub fn date_of(timestamp: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp(timestamp, 0).map(|dt| dt.date_naive())
}
