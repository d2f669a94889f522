//! Field type inference for raw CSV cells.
//!
//! A column is classified by running an ordered chain of [`FieldChecker`]s
//! (DATE, then NUMBER) over every non-empty value. A checker only wins when it
//! accepts all of them; otherwise the column falls back to STRING, and a
//! column without any non-empty value is UNKNOWN.
//!
//! Each checker has two stages: a lexical `checks` test and a `convert` step
//! that builds the real value. A value that passes `checks` but fails
//! `convert` (for example `2023-13-40`) demotes the checker and is reported
//! back to the caller as a rejected value.

use std::{fmt, str::FromStr, sync::OnceLock};

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::{
    column_name::normalize_column_name,
    error::{Error, Result},
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldType {
    String,
    Number,
    Date,
    Unknown,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "STRING",
            FieldType::Number => "NUMBER",
            FieldType::Date => "DATE",
            FieldType::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "STRING" => Ok(FieldType::String),
            "NUMBER" => Ok(FieldType::Number),
            "DATE" => Ok(FieldType::Date),
            "UNKNOWN" => Ok(FieldType::Unknown),
            _ => Err(Error::invalid_field(
                "fieldType",
                format!("Unknown field type '{value}'"),
            )),
        }
    }
}

/// Converted cell value produced by a checker.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Date(NaiveDateTime),
    Number(f64),
}

pub trait FieldChecker: Send + Sync {
    fn field_type(&self) -> FieldType;
    fn checks(&self, value: &str) -> bool;
    fn convert(&self, value: &str) -> Result<FieldValue>;
}

fn epoch_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d{10,11}$").expect("valid epoch pattern"))
}

fn slash_date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d{1,2})/(\d{1,2})/(\d{4}|\d{2})$").expect("valid slash date pattern")
    })
}

fn iso_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^(\d{4})-(\d{2})-(\d{2})(?:[T ](\d{2}):(\d{2})(?::(\d{2})(?:\.(\d{1,9}))?)?)?(Z|[+-]\d{2}:?\d{2})?$",
        )
        .expect("valid iso pattern")
    })
}

fn number_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?$").expect("valid number pattern")
    })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DateChecker;

#[derive(Debug, Clone, Copy, Default)]
pub struct NumberChecker;

impl FieldChecker for DateChecker {
    fn field_type(&self) -> FieldType {
        FieldType::Date
    }

    fn checks(&self, value: &str) -> bool {
        epoch_pattern().is_match(value)
            || slash_date_pattern().is_match(value)
            || iso_pattern().is_match(value)
    }

    fn convert(&self, value: &str) -> Result<FieldValue> {
        let invalid = || Error::invalid_field(value, format!("'{value}' is not a valid date"));
        if epoch_pattern().is_match(value) {
            let seconds: i64 = value.parse().map_err(|_| invalid())?;
            let parsed = DateTime::from_timestamp(seconds, 0).ok_or_else(invalid)?;
            return Ok(FieldValue::Date(parsed.naive_utc()));
        }
        if let Some(caps) = slash_date_pattern().captures(value) {
            let month = capture_u32(&caps, 1).ok_or_else(invalid)?;
            let day = capture_u32(&caps, 2).ok_or_else(invalid)?;
            let raw_year = &caps[3];
            let mut year: i32 = raw_year.parse().map_err(|_| invalid())?;
            if raw_year.len() == 2 {
                year += if year < 70 { 2000 } else { 1900 };
            }
            let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(invalid)?;
            return Ok(FieldValue::Date(date.and_time(NaiveTime::MIN)));
        }
        if let Some(caps) = iso_pattern().captures(value) {
            return convert_iso(&caps).map(FieldValue::Date).ok_or_else(invalid);
        }
        Err(invalid())
    }
}

fn capture_u32(caps: &Captures<'_>, idx: usize) -> Option<u32> {
    caps.get(idx).and_then(|m| m.as_str().parse().ok())
}

fn convert_iso(caps: &Captures<'_>) -> Option<NaiveDateTime> {
    let year: i32 = caps[1].parse().ok()?;
    let date = NaiveDate::from_ymd_opt(year, capture_u32(caps, 2)?, capture_u32(caps, 3)?)?;
    let hour = capture_u32(caps, 4).unwrap_or(0);
    let minute = capture_u32(caps, 5).unwrap_or(0);
    let second = capture_u32(caps, 6).unwrap_or(0);
    let nanos = match caps.get(7) {
        Some(fraction) => {
            let digits = fraction.as_str();
            let padded = format!("{digits:0<9}");
            padded.parse().ok()?
        }
        None => 0,
    };
    let time = NaiveTime::from_hms_nano_opt(hour, minute, second, nanos)?;
    let naive = date.and_time(time);
    match caps.get(8).map(|m| m.as_str()) {
        None | Some("Z") => Some(naive),
        Some(offset) => {
            let sign = if offset.starts_with('-') { -1 } else { 1 };
            let digits: String = offset[1..].chars().filter(|c| *c != ':').collect();
            let hours: i32 = digits.get(0..2)?.parse().ok()?;
            let minutes: i32 = digits.get(2..4)?.parse().ok()?;
            if minutes >= 60 {
                return None;
            }
            let zone = FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))?;
            let local = zone.from_local_datetime(&naive).single()?;
            Some(local.naive_utc())
        }
    }
}

impl FieldChecker for NumberChecker {
    fn field_type(&self) -> FieldType {
        FieldType::Number
    }

    fn checks(&self, value: &str) -> bool {
        number_pattern().is_match(value)
    }

    fn convert(&self, value: &str) -> Result<FieldValue> {
        let parsed: f64 = value
            .parse()
            .map_err(|_| Error::invalid_field(value, format!("'{value}' is not a number")))?;
        if !parsed.is_finite() {
            return Err(Error::invalid_field(
                value,
                format!("'{value}' is outside the representable number range"),
            ));
        }
        Ok(FieldValue::Number(parsed))
    }
}

static DATE_CHECKER: DateChecker = DateChecker;
static NUMBER_CHECKER: NumberChecker = NumberChecker;
static DEFAULT_CHECKERS: [&dyn FieldChecker; 2] = [&DATE_CHECKER, &NUMBER_CHECKER];

/// Checker chain in priority order.
pub fn default_checkers() -> &'static [&'static dyn FieldChecker] {
    &DEFAULT_CHECKERS
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDefinition {
    pub name: String,
    pub original_name: String,
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longest_string: Option<usize>,
}

/// A value that matched a checker lexically but failed conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedValue {
    pub field_type: FieldType,
    pub message: String,
}

/// Streaming accumulator for one column.
#[derive(Clone)]
pub struct ColumnInference {
    checkers: &'static [&'static dyn FieldChecker],
    possible: Vec<bool>,
    non_empty: usize,
    longest: usize,
}

impl fmt::Debug for ColumnInference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnInference")
            .field("possible", &self.possible)
            .field("non_empty", &self.non_empty)
            .field("longest", &self.longest)
            .finish()
    }
}

impl Default for ColumnInference {
    fn default() -> Self {
        Self::new()
    }
}

impl ColumnInference {
    pub fn new() -> Self {
        Self::with_checkers(default_checkers())
    }

    pub fn with_checkers(checkers: &'static [&'static dyn FieldChecker]) -> Self {
        Self {
            checkers,
            possible: vec![true; checkers.len()],
            non_empty: 0,
            longest: 0,
        }
    }

    pub fn non_empty(&self) -> usize {
        self.non_empty
    }

    /// Types are judged on the trimmed value. The longest-string width counts
    /// the raw cell, padding included, since that is what gets stored.
    pub fn observe(&mut self, raw: &str) -> Option<RejectedValue> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        self.non_empty += 1;
        self.longest = self.longest.max(raw.encode_utf16().count());

        let mut rejected = None;
        for (checker, possible) in self.checkers.iter().zip(self.possible.iter_mut()) {
            if !*possible {
                continue;
            }
            if !checker.checks(trimmed) {
                *possible = false;
                continue;
            }
            if let Err(err) = checker.convert(trimmed) {
                *possible = false;
                if rejected.is_none() {
                    rejected = Some(RejectedValue {
                        field_type: checker.field_type(),
                        message: err_message(&err),
                    });
                }
            }
        }
        rejected
    }

    pub fn field_type(&self) -> FieldType {
        if self.non_empty == 0 {
            return FieldType::Unknown;
        }
        self.checkers
            .iter()
            .zip(self.possible.iter())
            .find(|(_, possible)| **possible)
            .map(|(checker, _)| checker.field_type())
            .unwrap_or(FieldType::String)
    }

    pub fn finish(&self, name: String, original_name: String) -> ColumnDefinition {
        let field_type = self.field_type();
        ColumnDefinition {
            name,
            original_name,
            field_type,
            longest_string: (field_type == FieldType::String).then_some(self.longest),
        }
    }
}

fn err_message(err: &Error) -> String {
    match err {
        Error::InvalidFieldValue { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

/// Infers the definition of one column from its header and complete value set.
pub fn infer_column_definition<I, S>(header: &str, values: I) -> ColumnDefinition
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut inference = ColumnInference::new();
    for value in values {
        inference.observe(value.as_ref());
    }
    inference.finish(normalize_column_name(header), header.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn infer(values: &[&str]) -> ColumnDefinition {
        infer_column_definition("col", values.iter().copied())
    }

    #[test]
    fn numbers_infer_as_number() {
        let column = infer(&["1", "2.5", "-3", "+4e2", ".5"]);
        assert_eq!(column.field_type, FieldType::Number);
        assert_eq!(column.longest_string, None);
    }

    #[test]
    fn one_text_value_demotes_numbers_to_string() {
        let column = infer(&["1", "2", "abc"]);
        assert_eq!(column.field_type, FieldType::String);
        assert_eq!(column.longest_string, Some(3));
    }

    #[test]
    fn semantically_invalid_date_demotes_to_string() {
        let mut inference = ColumnInference::new();
        assert!(inference.observe("2023-01-01").is_none());
        let rejected = inference.observe("2023-13-40").expect("rejected value");
        assert_eq!(rejected.field_type, FieldType::Date);
        assert_eq!(inference.field_type(), FieldType::String);
    }

    #[test]
    fn date_forms_are_recognized() {
        assert_eq!(infer(&["1/2/23", "12/31/2024"]).field_type, FieldType::Date);
        assert_eq!(
            infer(&["2024-05-06T14:30:00Z", "2024-05-06 14:30", "2024-05-06T14:30:00.123+02:00"])
                .field_type,
            FieldType::Date
        );
        assert_eq!(infer(&["1700000000", "1600000000"]).field_type, FieldType::Date);
    }

    #[test]
    fn epoch_width_and_short_numbers_settle_on_number() {
        let column = infer(&["1700000000", "42"]);
        assert_eq!(column.field_type, FieldType::Number);
    }

    #[test]
    fn empty_column_is_unknown() {
        let column = infer(&["", "  ", ""]);
        assert_eq!(column.field_type, FieldType::Unknown);
        assert_eq!(column.longest_string, None);
    }

    #[test]
    fn blanks_are_ignored_for_type_decision() {
        assert_eq!(infer(&["", "10", " "]).field_type, FieldType::Number);
    }

    #[test]
    fn longest_string_counts_utf16_units() {
        let column = infer(&["a", "😀😀", "abc"]);
        assert_eq!(column.field_type, FieldType::String);
        assert_eq!(column.longest_string, Some(4));
    }

    #[test]
    fn offsets_are_normalized_to_utc() {
        let converted = DateChecker.convert("2024-01-01T02:00:00+02:00").unwrap();
        let expected = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(converted, FieldValue::Date(expected));
    }

    #[test]
    fn padding_counts_toward_width_but_not_type() {
        let column = infer(&["  abc ", "12"]);
        assert_eq!(column.field_type, FieldType::String);
        assert_eq!(column.longest_string, Some(6));
        let padded_numbers = infer(&[" 12 ", "3"]);
        assert_eq!(padded_numbers.field_type, FieldType::Number);
    }

    #[test]
    fn header_is_normalized_and_original_kept() {
        let column = infer_column_definition("Unit Price ($)", ["1.5"]);
        assert_eq!(column.name, "Unit_Price___");
        assert_eq!(column.original_name, "Unit Price ($)");
    }

    #[test]
    fn field_type_parses_case_insensitively() {
        assert_eq!("number".parse::<FieldType>().unwrap(), FieldType::Number);
        assert!("decimal".parse::<FieldType>().is_err());
    }
}
