//! Scalar normalization: numbers, business keys, dates and yes/no flags.
//!
//! Nothing in here fails. Malformed input degrades to `None`.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use sha2::{Digest, Sha256};

use crate::{Number, Scalar};

const KEY_DELIMITER: &str = "|";

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%Y/%m/%d",
    "%b %d, %Y",
    "%B %d, %Y",
    "%d %b %Y",
    "%d %B %Y",
];

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%m/%d/%Y %H:%M"];

/// Outcome of a lenient parse.
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed<T> {
    Value(T),
    /// Missing, blank or the literal `null`.
    Empty,
    /// Present but not understood; carries the offending text.
    Invalid(String),
}

impl<T> Parsed<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Parsed::Value(v) => Some(v),
            Parsed::Empty | Parsed::Invalid(_) => None,
        }
    }
}

pub fn try_parse_number(value: Option<&Scalar>) -> Parsed<Number> {
    let text = match value {
        None => return Parsed::Empty,
        Some(Scalar::Int(v)) => return Parsed::Value(Number::Int(*v)),
        Some(Scalar::Float(v)) => return Parsed::Value(Number::Float(*v)),
        Some(Scalar::Bool(v)) => return Parsed::Invalid(v.to_string()),
        Some(Scalar::Other(v)) => return Parsed::Invalid(v.to_string()),
        Some(Scalar::Text(text)) => text.trim(),
    };

    if text.is_empty() || text.eq_ignore_ascii_case("null") {
        return Parsed::Empty;
    }

    let cleaned = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect::<String>();
    if cleaned.is_empty() || cleaned == "-" || cleaned == "." {
        return Parsed::Invalid(text.to_string());
    }

    match cleaned.parse::<f64>() {
        Ok(parsed) if parsed.is_finite() => {
            if parsed.fract() == 0.0 && parsed.abs() < i64::MAX as f64 {
                Parsed::Value(Number::Int(parsed as i64))
            } else {
                Parsed::Value(Number::Float(parsed))
            }
        }
        _ => Parsed::Invalid(text.to_string()),
    }
}

/// Lenient number parse: `"$1,200.50"` → `1200.5`, `"1,200"` → `1200`, junk → `None`.
pub fn parse_number(value: Option<&Scalar>) -> Option<Number> {
    try_parse_number(value).into_option()
}

/// Largest number in `values`; the earliest one wins a tie.
pub fn first_max(values: impl IntoIterator<Item = Number>) -> Option<Number> {
    values.into_iter().fold(None, |best, candidate| match best {
        Some(current) if candidate.as_f64() <= current.as_f64() => Some(current),
        _ => Some(candidate),
    })
}

/// Text rendering of a scalar for text columns and key parts.
pub fn scalar_text(value: Option<&Scalar>) -> Option<String> {
    match value? {
        Scalar::Text(text) => Some(text.clone()),
        Scalar::Int(v) => Some(v.to_string()),
        Scalar::Float(v) => Some(v.to_string()),
        Scalar::Bool(v) => Some(v.to_string()),
        Scalar::Other(_) => None,
    }
}

/// `true` for a missing value or text that is empty once trimmed.
pub fn is_blank(value: Option<&Scalar>) -> bool {
    match value {
        None => true,
        Some(Scalar::Text(text)) => text.trim().is_empty(),
        Some(_) => false,
    }
}

pub fn flag_is_yes(value: Option<&Scalar>) -> bool {
    matches!(value, Some(Scalar::Text(text)) if text.trim().eq_ignore_ascii_case("yes"))
}

/// Deterministic SHA-256 business key over case/whitespace-normalized parts.
///
/// Part order matters; a missing part hashes as the empty string.
pub fn hash_key<S: AsRef<str>>(parts: &[Option<S>]) -> String {
    let joined = parts
        .iter()
        .map(|part| {
            part.as_ref()
                .map(|p| AsRef::<str>::as_ref(p).trim().to_lowercase())
                .unwrap_or_default()
        })
        .collect::<Vec<_>>()
        .join(KEY_DELIMITER);
    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn coerce_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.date_naive());
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
                .map(|dt| dt.date())
        })
}
