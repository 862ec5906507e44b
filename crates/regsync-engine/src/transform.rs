//! Column coercions applied when shaping source rows into canonical records.
//!
//! Coercions never fail: bad input becomes a zero, `false` or `NULL` so one
//! malformed column cannot abort a batch.

use regsync_types::record::{FieldValue, RawValue};
use regsync_types::timefmt;

/// How a source column is converted to its destination value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    /// Text as delivered.
    Text,
    /// Integer; unparsable or null becomes `0`.
    Integer,
    /// Float; unparsable or null becomes `0.0`.
    Float,
    /// `DDMMYYYYHHMM` report date or native timestamp; anything else is `NULL`.
    ReportDate,
    /// `"Y"` is `true`, everything else (null included) is `false`.
    Flag,
}

/// Float coercion with a zero default.
///
/// Note that a missing amount and a real zero are indistinguishable
/// downstream.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn safe_float(raw: Option<&RawValue>) -> f64 {
    match raw {
        Some(RawValue::Float(v)) if v.is_finite() => *v,
        Some(RawValue::Int(v)) => *v as f64,
        Some(RawValue::Text(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Integer coercion with a zero default.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn safe_int(raw: Option<&RawValue>) -> i64 {
    match raw {
        Some(RawValue::Int(v)) => *v,
        Some(RawValue::Float(v)) if v.is_finite() => v.trunc() as i64,
        Some(RawValue::Text(s)) => s.trim().parse::<i64>().unwrap_or(0),
        Some(RawValue::Bool(b)) => i64::from(*b),
        _ => 0,
    }
}

#[must_use]
pub fn flag(raw: Option<&RawValue>) -> bool {
    match raw {
        Some(RawValue::Text(s)) => s.trim() == "Y",
        Some(RawValue::Bool(b)) => *b,
        _ => false,
    }
}

/// Report-date coercion: `DDMMYYYYHHMM` text or a driver timestamp.
#[must_use]
pub fn report_date(raw: Option<&RawValue>) -> FieldValue {
    match raw {
        Some(RawValue::Timestamp(ts)) => FieldValue::Timestamp(*ts),
        Some(RawValue::Text(s)) => {
            timefmt::parse_ddmmyyyyhhmm(s).map_or(FieldValue::Null, FieldValue::Timestamp)
        }
        _ => FieldValue::Null,
    }
}

#[must_use]
pub fn text(raw: Option<&RawValue>) -> FieldValue {
    raw.and_then(RawValue::as_text)
        .map_or(FieldValue::Null, |s| FieldValue::Text(s.into_owned()))
}

/// Apply `coercion` to a possibly-absent source value.
#[must_use]
pub fn coerce(coercion: Coercion, raw: Option<&RawValue>) -> FieldValue {
    match coercion {
        Coercion::Text => text(raw),
        Coercion::Integer => FieldValue::Int(safe_int(raw)),
        Coercion::Float => FieldValue::Float(safe_float(raw)),
        Coercion::ReportDate => report_date(raw),
        Coercion::Flag => FieldValue::Bool(flag(raw)),
    }
}

/// `camelCase` to `lower_snake` (`nextOfKinGpsCoordinates` becomes
/// `next_of_kin_gps_coordinates`).
#[must_use]
pub fn snake_case(camel: &str) -> String {
    let mut out = String::with_capacity(camel.len() + 8);
    for (i, ch) in camel.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}
