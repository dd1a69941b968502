use crate::trends::analysis::*;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

/// Name of the field every record is expected to carry its observation time in.
pub(crate) const DATE_FIELD: &str = "date";

// Date-times without an offset are read as UTC.
const NAIVE_DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

#[derive(Clone, Debug, PartialEq, Error)]
pub(crate) enum RecordError {
    #[error("record is not an object")]
    NotAnObject,

    #[error("record has no `date` field")]
    MissingDate,

    #[error("`{0}` is not a valid date")]
    InvalidDate(String),

    #[error("record has no `{0}` field")]
    MissingField(String),

    #[error("`{field}` value {value} is not a number")]
    NotANumber { field: String, value: String },

    #[error("`{field}` value is not finite")]
    NonFinite { field: String },
}

/// A single upstream record: a date plus any number of measurement fields.
///
/// Nothing about the shape is trusted up front; each accessor validates the
/// one field it reads.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RawRecord<'a> {
    fields: &'a Map<String, Value>,
}

impl<'a> TryFrom<&'a Value> for RawRecord<'a> {
    type Error = RecordError;

    fn try_from(value: &'a Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            _ => Err(RecordError::NotAnObject),
        }
    }
}

impl<'a> RawRecord<'a> {
    pub(crate) fn timestamp(&self) -> Result<ReadingTime, RecordError> {
        let raw = self.fields.get(DATE_FIELD).ok_or(RecordError::MissingDate)?;
        parse_timestamp(raw)
    }

    pub(crate) fn reading(&self, field: &str) -> Result<f64, RecordError> {
        let raw = self
            .fields
            .get(field)
            .ok_or_else(|| RecordError::MissingField(field.to_owned()))?;

        let value = parse_reading(raw).ok_or_else(|| RecordError::NotANumber {
            field: field.to_owned(),
            value: raw.to_string(),
        })?;

        finite(value).ok_or_else(|| RecordError::NonFinite {
            field: field.to_owned(),
        })
    }

    pub(crate) fn reading_at(&self, field: &str) -> Result<TimedReading<f64>, RecordError> {
        let time = self.timestamp()?;
        let value = self.reading(field)?;
        Ok((value, time))
    }
}

/// Strings are tried as RFC 3339, then as a bare `YYYY-MM-DD` (midnight UTC),
/// then as an offset-less date-time. Numbers are epoch milliseconds.
pub(crate) fn parse_timestamp(raw: &Value) -> Result<ReadingTime, RecordError> {
    let parsed = match raw {
        Value::String(text) => parse_date_text(text.trim()),
        Value::Number(number) => number
            .as_f64()
            .and_then(finite)
            .and_then(|millis| DateTime::from_timestamp_millis(millis.trunc() as i64)),
        _ => None,
    };

    parsed.ok_or_else(|| RecordError::InvalidDate(display_raw(raw)))
}

fn parse_date_text(text: &str) -> Option<ReadingTime> {
    if let Ok(time) = DateTime::parse_from_rfc3339(text) {
        return Some(time.with_timezone(&Utc));
    }

    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .map(|midnight| Utc.from_utc_datetime(&midnight));
    }

    NAIVE_DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Numbers pass straight through; strings yield their longest leading decimal
/// literal, so `" 12.5 µg/m³"` reads as `12.5`. Everything else is rejected.
pub(crate) fn parse_reading(raw: &Value) -> Option<f64> {
    match raw {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => leading_float(text),
        _ => None,
    }
}

fn leading_float(text: &str) -> Option<f64> {
    let text = text.trim_start();
    let bytes = text.as_bytes();

    let signed = matches!(bytes.first(), Some(b'+' | b'-'));
    let mut end = usize::from(signed);

    if text[end..].starts_with("Infinity") {
        let infinity = if bytes[0] == b'-' { f64::NEG_INFINITY } else { f64::INFINITY };
        return Some(infinity);
    }

    let int_digits = digits_from(bytes, end);
    end += int_digits;

    let mut frac_digits = 0;
    if bytes.get(end) == Some(&b'.') {
        frac_digits = digits_from(bytes, end + 1);
        if int_digits > 0 || frac_digits > 0 {
            end += 1 + frac_digits;
        }
    }

    if int_digits == 0 && frac_digits == 0 {
        return None;
    }

    // An exponent only counts when it carries at least one digit.
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        let exp_digits = digits_from(bytes, exp_end);
        if exp_digits > 0 {
            end = exp_end + exp_digits;
        }
    }

    text[..end].parse().ok()
}

fn digits_from(bytes: &[u8], from: usize) -> usize {
    bytes
        .get(from..)
        .map_or(0, |rest| rest.iter().take_while(|b| b.is_ascii_digit()).count())
}

fn display_raw(raw: &Value) -> String {
    match raw {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
