//! Numeric guard helpers applied before every remote write.
//!
//! The remote tables hold loosely-typed historical data: quantities stored as
//! strings, decimal commas, prices that may be missing or negative. Every
//! store sanitizes its payload through these helpers so that what reaches the
//! remote store is always calculation-ready.

use serde_json::Value;

/// Clamp a value to `>= 0`. Non-finite input collapses to `0.0`.
#[must_use]
pub fn non_neg(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

/// Return `value` if it is finite, otherwise `fallback`.
#[must_use]
pub fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() { value } else { fallback }
}

/// Return `value` if it is finite and strictly positive, otherwise `fallback`.
///
/// Markup multipliers go through this guard: a multiplier of zero or below
/// would erase or invert a price, so it falls back (usually to `1.0`).
#[must_use]
pub fn pos_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        fallback
    }
}

/// Couple an "include price" toggle with its price field.
///
/// When the toggle is off the price must be absent; when it is on the price
/// must be a non-negative number, defaulting to `0.0`. Applying this twice
/// yields the same result as applying it once.
#[must_use]
pub fn coupled_price(include: bool, price: Option<f64>) -> Option<f64> {
    if include {
        Some(non_neg(price.unwrap_or(0.0)))
    } else {
        None
    }
}

/// Tolerant numeric coercion from a raw remote field.
///
/// Accepts JSON numbers and numeric strings (whitespace trimmed, decimal
/// comma replaced). Everything else, including booleans and nulls, is `None`.
#[must_use]
pub fn num_from(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => {
            let cleaned = s.trim().replace(',', ".");
            if cleaned.is_empty() {
                return None;
            }
            cleaned.parse::<f64>().ok().filter(|f| f.is_finite())
        }
        _ => None,
    }
}

/// Tolerant boolean coercion from a raw remote field.
///
/// Accepts JSON booleans, the strings `"true"`/`"false"` (any case), and the
/// numbers `0`/`1`.
#[must_use]
pub fn bool_from(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "1" => Some(true),
            "false" | "f" | "0" => Some(false),
            _ => None,
        },
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        _ => None,
    }
}

/// String coercion from a raw remote field. Numbers render through `Display`.
#[must_use]
pub fn str_from(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
