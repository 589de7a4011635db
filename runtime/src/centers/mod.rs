//! Per-cost-center descriptors.
//!
//! Each submodule declares one [`CostCenter`](crate::store::CostCenter): its
//! table, topic, decode, and the sanitize rules applied before every write.
//! The sanitize rules are uniform where the data is uniform: quantities and
//! monetary fields clamp to `>= 0`, markup multipliers fall back to `1.0`,
//! and "include price" toggles null-couple their price field.

mod assets;
mod bundles;
mod discounts;
mod equipment;
mod extra_fees;
mod header;
mod staff;

pub use assets::{AssetStore, Assets};
pub use bundles::BundleStore;
pub use discounts::{DiscountStore, Discounts};
pub use equipment::{Equipment, EquipmentStore};
pub use extra_fees::{ExtraFeeStore, ExtraFees};
pub use header::HeaderStore;
pub use staff::{Staff, StaffCenter};

use banchetto_core::guard;
use banchetto_core::model::RemoteRow;
use serde_json::json;

/// Clamp the named fields to non-negative numbers, when present.
pub(crate) fn clamp_non_neg(patch: &mut RemoteRow, fields: &[&str]) {
    for field in fields {
        if let Some(value) = patch.get(*field) {
            let clamped = guard::non_neg(guard::num_from(value).unwrap_or(0.0));
            patch.insert((*field).to_string(), json!(clamped));
        }
    }
}

/// Normalize a markup field to a positive multiplier, when present.
pub(crate) fn clamp_markup(patch: &mut RemoteRow, field: &str) {
    if let Some(value) = patch.get(field) {
        let clamped = guard::pos_or(guard::num_from(value).unwrap_or(0.0), 1.0);
        patch.insert(field.to_string(), json!(clamped));
    }
}

/// Enforce the include/price null-coupling when the toggle is in the patch.
///
/// A patch that only touches the price still gets the price clamped; the
/// toggle is never invented.
pub(crate) fn couple_price(patch: &mut RemoteRow, include_field: &str, price_field: &str) {
    if let Some(raw) = patch.get(include_field) {
        let include = guard::bool_from(raw).unwrap_or(false);
        patch.insert(include_field.to_string(), json!(include));
        let price = guard::coupled_price(
            include,
            patch.get(price_field).and_then(guard::num_from),
        );
        patch.insert(price_field.to_string(), json!(price));
    } else if let Some(value) = patch.get(price_field) {
        let clamped = guard::num_from(value).map(guard::non_neg);
        patch.insert(price_field.to_string(), json!(clamped));
    }
}

/// Normalize a boolean field, when present.
pub(crate) fn clamp_bool(patch: &mut RemoteRow, field: &str) {
    if let Some(raw) = patch.get(field) {
        let value = guard::bool_from(raw).unwrap_or(false);
        patch.insert(field.to_string(), json!(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizers_are_idempotent() {
        let mut patch: RemoteRow = [
            ("quantity".to_string(), json!(-4)),
            ("unit_cost".to_string(), json!("12,5")),
            ("markup_x".to_string(), json!(0)),
            ("include_price".to_string(), json!("true")),
            ("price".to_string(), json!(-9)),
        ]
        .into_iter()
        .collect();

        clamp_non_neg(&mut patch, &["quantity", "unit_cost"]);
        clamp_markup(&mut patch, "markup_x");
        couple_price(&mut patch, "include_price", "price");
        let once = patch.clone();

        clamp_non_neg(&mut patch, &["quantity", "unit_cost"]);
        clamp_markup(&mut patch, "markup_x");
        couple_price(&mut patch, "include_price", "price");
        assert_eq!(patch, once);

        assert_eq!(once["quantity"], json!(0.0));
        assert_eq!(once["unit_cost"], json!(12.5));
        assert_eq!(once["markup_x"], json!(1.0));
        assert_eq!(once["price"], json!(0.0));
    }

    #[test]
    fn price_nulls_when_toggle_off() {
        let mut patch: RemoteRow = [
            ("include_price".to_string(), json!(false)),
            ("price".to_string(), json!(25.0)),
        ]
        .into_iter()
        .collect();
        couple_price(&mut patch, "include_price", "price");
        assert_eq!(patch["price"], json!(null));
    }
}
