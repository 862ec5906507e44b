//! Date-time text formats used by the core-banking source.
//!
//! The source carries two representations: report fields as fixed-width
//! `DDMMYYYYHHMM` strings and native DB2 timestamps rendered as
//! `YYYY-MM-DD-HH.MM.SS.ffffff`. Every parser here returns `None` on bad
//! input instead of an error; malformed dates never abort a batch.

use chrono::{NaiveDate, NaiveDateTime};

/// DB2 native timestamp text format (microsecond precision).
pub const DB2_TIMESTAMP_FMT: &str = "%Y-%m-%d-%H.%M.%S%.6f";

/// Width of a `DDMMYYYYHHMM` report date.
pub const REPORT_DATE_WIDTH: usize = 12;

const DB2_PARSE_FMT: &str = "%Y-%m-%d-%H.%M.%S%.f";
const ISO_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Lowest timestamp a cursor can hold: `1900-01-01 00:00:00`.
#[must_use]
pub fn epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1900, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or(NaiveDateTime::MIN)
}

/// Parse a fixed-width `DDMMYYYYHHMM` report date.
///
/// Returns `None` when the input is not exactly 12 ASCII digits or any
/// component is out of range.
#[must_use]
pub fn parse_ddmmyyyyhhmm(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.len() != REPORT_DATE_WIDTH || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let num = |range: std::ops::Range<usize>| raw[range].parse::<u32>().ok();
    let day = num(0..2)?;
    let month = num(2..4)?;
    let year = i32::try_from(num(4..8)?).ok()?;
    let hour = num(8..10)?;
    let minute = num(10..12)?;
    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, 0)
}

/// Render a timestamp back to `DDMMYYYYHHMM`.
#[must_use]
pub fn format_ddmmyyyyhhmm(ts: &NaiveDateTime) -> String {
    ts.format("%d%m%Y%H%M").to_string()
}

/// Parse DB2 timestamp text such as `2024-03-01-14.30.00.000000`.
#[must_use]
pub fn parse_db2(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw.trim(), DB2_PARSE_FMT).ok()
}

/// Render a timestamp as DB2 timestamp text.
#[must_use]
pub fn format_db2(ts: &NaiveDateTime) -> String {
    ts.format(DB2_TIMESTAMP_FMT).to_string()
}

/// Best-effort parse of any timestamp text the source may produce.
///
/// Tries `DDMMYYYYHHMM`, DB2 native, ISO-8601 (with `T` or space) and a
/// bare `YYYY-MM-DD` date, in that order.
#[must_use]
pub fn parse_any(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Some(ts) = parse_ddmmyyyyhhmm(raw) {
        return Some(ts);
    }
    if let Some(ts) = parse_db2(raw) {
        return Some(ts);
    }
    for fmt in ISO_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(ts);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}
