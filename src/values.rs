//! Value rules of primitive field types

use std::sync::OnceLock;

use chrono::{DateTime, NaiveDateTime};
use regex::Regex;
use tracing::error;

use crate::catalog::PrimitiveType;
use crate::graph::Scalar;

static PARTIAL_DATE: OnceLock<Regex> = OnceLock::new();
static EMAIL: OnceLock<Regex> = OnceLock::new();

/// Compile `pattern` into `cell` on first use
fn compiled(cell: &'static OnceLock<Regex>, pattern: &str) -> Option<&'static Regex> {
    if let Some(re) = cell.get() {
        return Some(re);
    }
    match Regex::new(pattern) {
        Ok(re) => Some(cell.get_or_init(|| re)),
        Err(e) => {
            error!(%pattern, "invalid value pattern: {}", e);
            None
        }
    }
}

fn matches(cell: &'static OnceLock<Regex>, pattern: &str, text: &str) -> bool {
    compiled(cell, pattern).is_some_and(|re| re.is_match(text))
}

/// `YYYY`, `YYYY-MM` or `YYYY-MM-DD`
pub fn is_partial_date(text: &str) -> bool {
    matches(&PARTIAL_DATE, r"^\d{4}(-\d{2}(-\d{2})?)?$", text)
}

pub fn is_email(text: &str) -> bool {
    matches(&EMAIL, r"^[^@\s]+@[^@\s]+\.[^@\s]+$", text)
}

pub fn is_url(text: &str) -> bool {
    url::Url::parse(text).is_ok()
}

/// Calendar date of an ISO-8601 timestamp, as `YYYY-MM-DD`
pub fn timestamp_to_date(text: &str) -> Option<String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.format("%Y-%m-%d").to_string());
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|ts| ts.format("%Y-%m-%d").to_string())
}

/// Check one literal against a primitive type
///
/// `Ok(Some(..))` carries the normalized form when the value has to be
/// rewritten (timestamps in DATE fields); `Err` holds the reason.
pub fn check_scalar(primitive: PrimitiveType, value: &Scalar) -> Result<Option<Scalar>, String> {
    match primitive {
        PrimitiveType::None => Err("fields of type 'none' can not hold values".to_string()),
        PrimitiveType::Date => {
            let text = value.as_text().ok_or("a date must be a string")?;
            if is_partial_date(text) {
                return Ok(None);
            }
            timestamp_to_date(text)
                .map(|date| Some(Scalar::Text(date)))
                .ok_or_else(|| format!("'{}' is not a valid date", text))
        }
        PrimitiveType::Email => match value.as_text() {
            Some(text) if is_email(text) => Ok(None),
            _ => Err(format!("'{}' is not a valid email address", value.lexical())),
        },
        PrimitiveType::Text => match value.as_text() {
            Some(text) if !text.contains(|c: char| c == '\n' || c == '\r') => Ok(None),
            Some(_) => Err("line breaks are not allowed".to_string()),
            None => Err("the value should be a string".to_string()),
        },
        PrimitiveType::Textbox => value
            .as_text()
            .map(|_| None)
            .ok_or_else(|| "the value should be a string".to_string()),
        PrimitiveType::Url => check_url(&value.lexical()),
        PrimitiveType::Int => {
            let valid = match value {
                Scalar::Number(n) => n.is_i64() || n.is_u64(),
                Scalar::Text(text) => text.trim().parse::<i64>().is_ok(),
                Scalar::Bool(_) => false,
            };
            if valid {
                Ok(None)
            } else {
                Err(format!("'{}' is not a valid integer", value.lexical()))
            }
        }
        PrimitiveType::Float => {
            let valid = match value {
                Scalar::Number(_) => true,
                Scalar::Text(text) => text.trim().parse::<f64>().is_ok(),
                Scalar::Bool(_) => false,
            };
            if valid {
                Ok(None)
            } else {
                Err(format!("'{}' is not a valid floating-point number", value.lexical()))
            }
        }
    }
}

/// URL check shared by literal values and names of URL entities
pub fn check_url(text: &str) -> Result<Option<Scalar>, String> {
    if is_url(text) {
        Ok(None)
    } else {
        Err(format!("'{}' is not a valid URL", text))
    }
}
