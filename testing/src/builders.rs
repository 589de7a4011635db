//! Payload builders for cost-center rows.
//!
//! Small helpers producing the JSON patches stores accept, with sensible
//! defaults so tests only state what they care about.

use banchetto_core::model::RemoteRow;
use serde_json::{Value, json};

/// Build a row payload from key/value pairs.
#[must_use]
pub fn patch(entries: &[(&str, Value)]) -> RemoteRow {
    entries
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

/// An equipment row payload.
#[must_use]
pub fn equipment(name: &str, quantity: f64, unit_cost: f64) -> RemoteRow {
    patch(&[
        ("name", json!(name)),
        ("quantity", json!(quantity)),
        ("unit_cost", json!(unit_cost)),
        ("vat_percent", json!(22.0)),
        ("uses_vat", json!(false)),
        ("markup_x", json!(1.0)),
        ("include_price", json!(false)),
    ])
}

/// A staff row payload.
#[must_use]
pub fn staff(role: &str, headcount: f64, hours: f64, hourly_cost: f64) -> RemoteRow {
    patch(&[
        ("role", json!(role)),
        ("headcount", json!(headcount)),
        ("hours", json!(hours)),
        ("hourly_cost", json!(hourly_cost)),
        ("markup_x", json!(1.0)),
    ])
}

/// A transport row payload in canonical column names.
#[must_use]
pub fn transport(origin: &str, destination: &str, distance_km: f64) -> RemoteRow {
    patch(&[
        ("origin", json!(origin)),
        ("destination", json!(destination)),
        ("round_trip", json!(false)),
        ("distance_km", json!(distance_km)),
        ("trips", json!(1.0)),
        ("markup_x", json!(1.0)),
    ])
}

/// An extra-fee row payload carrying a raw percent/scope pair.
#[must_use]
pub fn percent_fee(label: &str, percent: Value, scope: &str) -> RemoteRow {
    patch(&[
        ("label", json!(label)),
        ("amount", json!(0.0)),
        ("percent", percent),
        ("apply_on", json!(scope)),
        ("include_price", json!(false)),
    ])
}
