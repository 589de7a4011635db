//! Pure pricing fold.
//!
//! Turns one event's cost-center rows plus its resolved settings into
//! consistent totals: per-center subtotals, extra fees and discounts resolved
//! against their scopes, and the grand total. No I/O; the aggregate views
//! feed it snapshots.

use banchetto_core::model::{
    AssetRow, Bundle, BundleRow, DiscountRow, EquipmentRow, ExtraFeeRow, StaffRow,
    StaffSettings, TransportRow, TransportSettings,
};
use banchetto_core::normalize::Scope;
use std::collections::HashMap;

/// Per-center subtotals, before fees and discounts.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CenterSubtotals {
    /// Menu bundles.
    pub bundles: f64,
    /// Rental equipment.
    pub equipment: f64,
    /// Staff labor.
    pub staff: f64,
    /// Transport.
    pub transport: f64,
    /// Company-owned assets.
    pub assets: f64,
}

impl CenterSubtotals {
    /// Sum of every center.
    #[must_use]
    pub fn sum(&self) -> f64 {
        self.bundles + self.equipment + self.staff + self.transport + self.assets
    }

    /// The base a scoped fee or discount is computed against.
    #[must_use]
    pub fn base_for(&self, scope: Scope) -> f64 {
        match scope {
            Scope::Total => self.sum(),
            Scope::Bundles => self.bundles,
            Scope::Equipment => self.equipment,
            Scope::Staff => self.staff,
            Scope::Transport => self.transport,
            Scope::Assets => self.assets,
        }
    }
}

/// The complete totals of one event.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Totals {
    /// Per-center subtotals.
    pub subtotals: CenterSubtotals,
    /// Extra fees, resolved.
    pub fees: f64,
    /// Discounts, resolved.
    pub discounts: f64,
    /// Grand total: subtotals + fees - discounts.
    pub grand: f64,
}

/// Resolved settings the fold prices against.
///
/// Staff and transport markups come from the settings records (the
/// denormalized per-row markup is a convenience, not what totals read).
#[derive(Debug, Clone, Default)]
pub struct PricingInputs {
    /// Staff markup multiplier.
    pub staff_markup_x: f64,
    /// Transport markup multiplier.
    pub transport_markup_x: f64,
    /// Per-km cost by vehicle key.
    pub vehicle_cost_per_km: HashMap<String, f64>,
}

impl PricingInputs {
    /// Build the inputs from the resolved settings records.
    #[must_use]
    pub fn from_settings(staff: &StaffSettings, transport: &TransportSettings) -> Self {
        Self {
            staff_markup_x: staff.markup_x,
            transport_markup_x: transport.markup_x,
            vehicle_cost_per_km: transport
                .vehicle_types
                .iter()
                .map(|vt| (vt.key.clone(), vt.cost_per_km))
                .collect(),
        }
    }
}

/// Borrowed snapshot of one event's rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventRows<'a> {
    /// Menu bundles.
    pub bundles: &'a [Bundle],
    /// Bundle rows, across all bundles of the event.
    pub bundle_rows: &'a [BundleRow],
    /// Equipment rows.
    pub equipment: &'a [EquipmentRow],
    /// Staff rows.
    pub staff: &'a [StaffRow],
    /// Transport rows.
    pub transport: &'a [TransportRow],
    /// Asset rows.
    pub assets: &'a [AssetRow],
    /// Extra-fee rows.
    pub fees: &'a [ExtraFeeRow],
    /// Discount rows.
    pub discounts: &'a [DiscountRow],
}

fn bundles_subtotal(bundles: &[Bundle], rows: &[BundleRow]) -> f64 {
    let markup_by_bundle: HashMap<&str, f64> = bundles
        .iter()
        .map(|b| (b.id.as_str(), b.markup_x))
        .collect();
    rows.iter()
        .map(|row| {
            let markup = markup_by_bundle
                .get(row.bundle_id.as_str())
                .copied()
                .unwrap_or(1.0);
            row.quantity * row.dish.unit_cost * markup
        })
        .sum()
}

fn equipment_subtotal(rows: &[EquipmentRow]) -> f64 {
    rows.iter()
        .map(|row| match row.price {
            // an explicit sell price is final: no VAT grossing, no markup
            Some(price) => row.quantity * price,
            None => row.quantity * row.gross_unit_cost() * row.markup_x,
        })
        .sum()
}

fn staff_subtotal(rows: &[StaffRow], markup_x: f64) -> f64 {
    rows.iter()
        .map(|row| row.headcount * row.hours * row.hourly_cost)
        .sum::<f64>()
        * markup_x
}

fn transport_subtotal(rows: &[TransportRow], inputs: &PricingInputs) -> f64 {
    rows.iter()
        .map(|row| {
            let cost_per_km = row
                .vehicle_key
                .as_deref()
                .and_then(|key| inputs.vehicle_cost_per_km.get(key))
                .copied()
                .unwrap_or(0.0);
            row.effective_km() * cost_per_km
        })
        .sum::<f64>()
        * inputs.transport_markup_x
}

fn assets_subtotal(rows: &[AssetRow]) -> f64 {
    rows.iter()
        .map(|row| match row.price {
            Some(price) => row.quantity * price,
            None => row.quantity * row.unit_cost * row.markup_x,
        })
        .sum()
}

/// Resolve one fee/discount row: explicit price, else the canonical amount,
/// else the normalized percent against its scope's base.
fn resolve_addon(
    price: Option<f64>,
    amount: f64,
    percent: Option<f64>,
    scope: Scope,
    subtotals: &CenterSubtotals,
) -> f64 {
    if let Some(price) = price {
        return price;
    }
    if amount > 0.0 {
        return amount;
    }
    percent.map_or(0.0, |p| p * subtotals.base_for(scope))
}

/// Fold an event's rows and settings into its totals.
#[must_use]
pub fn event_totals(rows: &EventRows<'_>, inputs: &PricingInputs) -> Totals {
    let subtotals = CenterSubtotals {
        bundles: bundles_subtotal(rows.bundles, rows.bundle_rows),
        equipment: equipment_subtotal(rows.equipment),
        staff: staff_subtotal(rows.staff, inputs.staff_markup_x),
        transport: transport_subtotal(rows.transport, inputs),
        assets: assets_subtotal(rows.assets),
    };

    let fees: f64 = rows
        .fees
        .iter()
        .map(|fee| {
            resolve_addon(
                fee.price,
                fee.amount,
                fee.percent_norm,
                fee.scope_norm,
                &subtotals,
            )
        })
        .sum();

    let discounts: f64 = rows
        .discounts
        .iter()
        .map(|d| resolve_addon(None, d.amount, d.percent_norm, d.scope_norm, &subtotals))
        .sum();

    Totals {
        subtotals,
        fees,
        discounts,
        grand: subtotals.sum() + fees - discounts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use banchetto_core::model::{EventId, RemoteRow, RowId, VehicleType};
    use serde_json::{Value, json};

    fn remote(entries: &[(&str, Value)]) -> RemoteRow {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    fn inputs() -> PricingInputs {
        PricingInputs::from_settings(
            &StaffSettings {
                event_id: EventId::new("ev1"),
                markup_x: 1.5,
            },
            &TransportSettings {
                event_id: EventId::new("ev1"),
                markup_x: 1.2,
                vehicle_types: vec![VehicleType {
                    key: "van".into(),
                    label: "Van".into(),
                    cost_per_km: 0.5,
                }],
            },
        )
    }

    #[test]
    fn bundle_rows_price_through_their_bundle_markup() {
        let bundle = Bundle {
            id: RowId::new("b1"),
            event_id: EventId::new("ev1"),
            created_at: None,
            type_key: "buffet".into(),
            label: "Lunch".into(),
            markup_x: 2.0,
        };
        let row = BundleRow::from_remote(&remote(&[
            ("id", json!("br1")),
            ("bundle_id", json!("b1")),
            ("event_id", json!("ev1")),
            ("dish_id", json!("d1")),
            ("dish_name", json!("Lasagne")),
            ("dish_category", json!("Mains")),
            ("dish_unit_cost", json!(8.0)),
            ("quantity", json!(10)),
        ]));
        let totals = event_totals(
            &EventRows {
                bundles: &[bundle],
                bundle_rows: &[row],
                ..EventRows::default()
            },
            &inputs(),
        );
        assert_eq!(totals.subtotals.bundles, 160.0);
        assert_eq!(totals.grand, 160.0);
    }

    #[test]
    fn staff_prices_through_the_settings_markup() {
        let row = StaffRow::from_remote(&remote(&[
            ("id", json!("s1")),
            ("event_id", json!("ev1")),
            ("role", json!("waiter")),
            ("headcount", json!(2)),
            ("hours", json!(5)),
            ("hourly_cost", json!(10)),
        ]));
        let totals = event_totals(
            &EventRows {
                staff: &[row],
                ..EventRows::default()
            },
            &inputs(),
        );
        // 2 people x 5 h x 10 = 100, x1.5 settings markup
        assert_eq!(totals.subtotals.staff, 150.0);
    }

    #[test]
    fn transport_prices_by_vehicle_km() {
        let row = TransportRow::from_remote(&remote(&[
            ("id", json!("t1")),
            ("event_id", json!("ev1")),
            ("origin", json!("Depot")),
            ("destination", json!("Villa")),
            ("round_trip", json!(true)),
            ("distance_km", json!(30)),
            ("trips", json!(1)),
            ("vehicle_key", json!("van")),
        ]));
        let totals = event_totals(
            &EventRows {
                transport: &[row],
                ..EventRows::default()
            },
            &inputs(),
        );
        // 60 km x 0.5/km x 1.2 markup
        assert!((totals.subtotals.transport - 36.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_vehicle_key_contributes_nothing() {
        let row = TransportRow::from_remote(&remote(&[
            ("id", json!("t1")),
            ("event_id", json!("ev1")),
            ("distance_km", json!(30)),
            ("vehicle_key", json!("helicopter")),
        ]));
        let totals = event_totals(
            &EventRows {
                transport: &[row],
                ..EventRows::default()
            },
            &inputs(),
        );
        assert_eq!(totals.subtotals.transport, 0.0);
    }

    #[test]
    fn percent_fee_applies_to_its_scope() {
        let equipment = EquipmentRow::from_remote(&remote(&[
            ("id", json!("e1")),
            ("event_id", json!("ev1")),
            ("quantity", json!(10)),
            ("unit_cost", json!(10)),
        ]));
        let fee = ExtraFeeRow::from_remote(&remote(&[
            ("id", json!("f1")),
            ("event_id", json!("ev1")),
            ("label", json!("Handling")),
            ("percent", json!("10%")),
            ("scope", json!("equipment")),
        ]));
        let staff = StaffRow::from_remote(&remote(&[
            ("id", json!("s1")),
            ("event_id", json!("ev1")),
            ("headcount", json!(1)),
            ("hours", json!(1)),
            ("hourly_cost", json!(100)),
        ]));
        let totals = event_totals(
            &EventRows {
                equipment: &[equipment],
                staff: &[staff],
                fees: &[fee],
                ..EventRows::default()
            },
            &inputs(),
        );
        // fee is 10% of the equipment subtotal only (100), not of staff
        assert_eq!(totals.subtotals.equipment, 100.0);
        assert!((totals.fees - 10.0).abs() < 1e-9);
    }

    #[test]
    fn canonical_amount_wins_over_percent() {
        let fee = ExtraFeeRow::from_remote(&remote(&[
            ("id", json!("f1")),
            ("event_id", json!("ev1")),
            ("amount", json!(25)),
            ("percent", json!("50%")),
        ]));
        let equipment = EquipmentRow::from_remote(&remote(&[
            ("id", json!("e1")),
            ("event_id", json!("ev1")),
            ("quantity", json!(1)),
            ("unit_cost", json!(1000)),
        ]));
        let totals = event_totals(
            &EventRows {
                equipment: &[equipment],
                fees: &[fee],
                ..EventRows::default()
            },
            &inputs(),
        );
        assert_eq!(totals.fees, 25.0);
    }

    #[test]
    fn discounts_subtract_from_the_grand_total() {
        let equipment = EquipmentRow::from_remote(&remote(&[
            ("id", json!("e1")),
            ("event_id", json!("ev1")),
            ("quantity", json!(2)),
            ("unit_cost", json!(100)),
        ]));
        let discount = DiscountRow::from_remote(&remote(&[
            ("id", json!("d1")),
            ("event_id", json!("ev1")),
            ("label", json!("Loyal customer")),
            ("percent", json!(10)),
        ]));
        let totals = event_totals(
            &EventRows {
                equipment: &[equipment],
                discounts: &[discount],
                ..EventRows::default()
            },
            &inputs(),
        );
        assert_eq!(totals.subtotals.equipment, 200.0);
        assert!((totals.discounts - 20.0).abs() < 1e-9);
        assert!((totals.grand - 180.0).abs() < 1e-9);
    }
}
