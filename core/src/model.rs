//! Event and cost-center row types.
//!
//! Every row belongs to exactly one event and is owned by exactly one store.
//! Rows decode tolerantly from heterogeneous remote JSON (`from_remote`) and
//! encode to write payloads (`to_patch`); the stable sort key everywhere is
//! `(created_at, id)`, with a missing timestamp sorting as the Unix epoch so
//! legacy rows surface first.

use crate::guard;
use crate::normalize::{self, Scope};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use smallvec::SmallVec;

/// Remote rows are plain JSON objects.
pub type RemoteRow = Map<String, Value>;

/// Opaque event identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(String);

impl EventId {
    /// Wrap a raw identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self(String::new())
    }
}

/// Opaque row identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowId(String);

impl RowId {
    /// Wrap a raw identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Remote table names.
pub mod tables {
    /// Event roots.
    pub const EVENTS: &str = "events";
    /// Zero-or-one header record per event.
    pub const EVENT_HEADERS: &str = "event_headers";
    /// Menu bundles.
    pub const BUNDLES: &str = "bundles";
    /// Dish rows owned by a bundle.
    pub const BUNDLE_ROWS: &str = "bundle_rows";
    /// Rental equipment rows.
    pub const EQUIPMENT_ROWS: &str = "equipment_rows";
    /// Staff labor rows.
    pub const STAFF_ROWS: &str = "staff_rows";
    /// Transport rows (irregular historical schema).
    pub const TRANSPORT_ROWS: &str = "transport_rows";
    /// Company-owned asset rows.
    pub const ASSET_ROWS: &str = "asset_rows";
    /// Miscellaneous extra fees.
    pub const EXTRA_FEE_ROWS: &str = "extra_fee_rows";
    /// Discounts.
    pub const DISCOUNT_ROWS: &str = "discount_rows";
    /// Per-event staff settings.
    pub const STAFF_SETTINGS: &str = "staff_settings";
    /// Per-event transport settings.
    pub const TRANSPORT_SETTINGS: &str = "transport_settings";
    /// Per-event transport vehicle types.
    pub const TRANSPORT_VEHICLE_TYPES: &str = "transport_vehicle_types";
    /// Single shared defaults record, keyed by a constant key.
    pub const GLOBAL_DEFAULTS: &str = "global_defaults";
}

fn read_id(row: &RemoteRow, field: &str) -> RowId {
    RowId::new(
        row.get(field)
            .and_then(guard::str_from)
            .unwrap_or_default(),
    )
}

fn read_event_id(row: &RemoteRow) -> EventId {
    EventId::new(
        row.get("event_id")
            .and_then(guard::str_from)
            .unwrap_or_default(),
    )
}

fn read_created_at(row: &RemoteRow) -> Option<DateTime<Utc>> {
    row.get("created_at")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn read_num(row: &RemoteRow, field: &str) -> f64 {
    row.get(field).and_then(guard::num_from).unwrap_or(0.0)
}

fn read_opt_num(row: &RemoteRow, field: &str) -> Option<f64> {
    row.get(field).and_then(guard::num_from)
}

fn read_bool(row: &RemoteRow, field: &str) -> bool {
    row.get(field).and_then(guard::bool_from).unwrap_or(false)
}

fn read_str(row: &RemoteRow, field: &str) -> String {
    row.get(field).and_then(guard::str_from).unwrap_or_default()
}

fn read_opt_str(row: &RemoteRow, field: &str) -> Option<String> {
    row.get(field)
        .and_then(guard::str_from)
        .filter(|s| !s.is_empty())
}

/// Sort key shared by all cost-center rows: creation time ascending, id
/// ascending as tiebreak. A missing timestamp sorts as the epoch.
#[must_use]
pub fn sort_key(created_at: Option<DateTime<Utc>>, id: &RowId) -> (DateTime<Utc>, String) {
    (
        created_at.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        id.as_str().to_string(),
    )
}

/// Contact, billing, and payment-plan fields; zero-or-one per event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventHeader {
    /// Owning event.
    pub event_id: EventId,
    /// Contact person.
    pub contact_name: String,
    /// Contact e-mail.
    pub contact_email: Option<String>,
    /// Contact phone number.
    pub contact_phone: Option<String>,
    /// Billing address.
    pub billing_address: Option<String>,
    /// Fiscal/tax code for invoicing.
    pub tax_code: Option<String>,
    /// Free-form payment-plan terms.
    pub payment_terms: Option<String>,
    /// Deposit fraction agreed up front, already normalized.
    pub deposit_percent: Option<f64>,
}

impl EventHeader {
    /// Tolerant decode from a remote row.
    #[must_use]
    pub fn from_remote(row: &RemoteRow) -> Self {
        Self {
            event_id: read_event_id(row),
            contact_name: read_str(row, "contact_name"),
            contact_email: read_opt_str(row, "contact_email"),
            contact_phone: read_opt_str(row, "contact_phone"),
            billing_address: read_opt_str(row, "billing_address"),
            tax_code: read_opt_str(row, "tax_code"),
            payment_terms: read_opt_str(row, "payment_terms"),
            deposit_percent: row.get("deposit_percent").and_then(normalize::percent_value),
        }
    }

    /// Encode to a write payload.
    #[must_use]
    pub fn to_patch(&self) -> RemoteRow {
        let mut row = RemoteRow::new();
        row.insert("event_id".into(), json!(self.event_id.as_str()));
        row.insert("contact_name".into(), json!(self.contact_name));
        row.insert("contact_email".into(), json!(self.contact_email));
        row.insert("contact_phone".into(), json!(self.contact_phone));
        row.insert("billing_address".into(), json!(self.billing_address));
        row.insert("tax_code".into(), json!(self.tax_code));
        row.insert("payment_terms".into(), json!(self.payment_terms));
        row.insert("deposit_percent".into(), json!(self.deposit_percent));
        row
    }
}

/// Rental equipment row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquipmentRow {
    /// Row identity.
    pub id: RowId,
    /// Owning event.
    pub event_id: EventId,
    /// Creation timestamp; the primary sort key.
    pub created_at: Option<DateTime<Utc>>,
    /// Item label.
    pub name: String,
    /// Quantity, clamped to `>= 0`.
    pub quantity: f64,
    /// Net unit cost.
    pub unit_cost: f64,
    /// VAT percent applied when `uses_vat`.
    pub vat_percent: f64,
    /// Whether the unit cost is grossed up by VAT.
    pub uses_vat: bool,
    /// Markup multiplier.
    pub markup_x: f64,
    /// Unit of measure, normalized to its canonical slug.
    pub uom: Option<String>,
    /// Whether an explicit sell price overrides the computed one.
    pub include_price: bool,
    /// Explicit sell price; coupled to `include_price`.
    pub price: Option<f64>,
    /// Free-form notes.
    pub notes: Option<String>,
}

impl EquipmentRow {
    /// Tolerant decode from a remote row.
    #[must_use]
    pub fn from_remote(row: &RemoteRow) -> Self {
        let include_price = read_bool(row, "include_price");
        Self {
            id: read_id(row, "id"),
            event_id: read_event_id(row),
            created_at: read_created_at(row),
            name: read_str(row, "name"),
            quantity: guard::non_neg(read_num(row, "quantity")),
            unit_cost: guard::non_neg(read_num(row, "unit_cost")),
            vat_percent: guard::non_neg(read_num(row, "vat_percent")),
            uses_vat: read_bool(row, "uses_vat"),
            markup_x: guard::pos_or(read_num(row, "markup_x"), 1.0),
            uom: read_opt_str(row, "uom").map(|raw| normalize::uom_key(&raw)),
            include_price,
            price: guard::coupled_price(include_price, read_opt_num(row, "price")),
            notes: read_opt_str(row, "notes"),
        }
    }

    /// VAT-inclusive unit cost for this row.
    #[must_use]
    pub fn gross_unit_cost(&self) -> f64 {
        normalize::gross_unit_cost(self.unit_cost, self.vat_percent, self.uses_vat, self.price)
    }
}

/// Staff labor row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaffRow {
    /// Row identity.
    pub id: RowId,
    /// Owning event.
    pub event_id: EventId,
    /// Creation timestamp; the primary sort key.
    pub created_at: Option<DateTime<Utc>>,
    /// Role label (waiter, chef, ...).
    pub role: String,
    /// Number of people.
    pub headcount: f64,
    /// Hours per person.
    pub hours: f64,
    /// Hourly cost per person.
    pub hourly_cost: f64,
    /// Markup multiplier, denormalized from the staff settings record.
    pub markup_x: f64,
    /// Free-form notes.
    pub notes: Option<String>,
}

impl StaffRow {
    /// Tolerant decode from a remote row.
    #[must_use]
    pub fn from_remote(row: &RemoteRow) -> Self {
        Self {
            id: read_id(row, "id"),
            event_id: read_event_id(row),
            created_at: read_created_at(row),
            role: read_str(row, "role"),
            headcount: guard::non_neg(read_num(row, "headcount")),
            hours: guard::non_neg(read_num(row, "hours")),
            hourly_cost: guard::non_neg(read_num(row, "hourly_cost")),
            markup_x: guard::pos_or(read_num(row, "markup_x"), 1.0),
            notes: read_opt_str(row, "notes"),
        }
    }
}

/// Transport row in its canonical shape.
///
/// The remote table's column names vary across historical schema versions;
/// the probing adapter maps whatever it discovers back to this shape, so
/// callers never see the variance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportRow {
    /// Row identity.
    pub id: RowId,
    /// Owning event.
    pub event_id: EventId,
    /// Creation timestamp; the primary sort key.
    pub created_at: Option<DateTime<Utc>>,
    /// Trip origin.
    pub origin: String,
    /// Trip destination.
    pub destination: String,
    /// Whether the distance is driven both ways.
    pub round_trip: bool,
    /// One-way distance in kilometers.
    pub distance_km: f64,
    /// Key into the vehicle-type definitions.
    pub vehicle_key: Option<String>,
    /// Number of trips.
    pub trips: f64,
    /// Markup multiplier, denormalized from the transport settings record.
    pub markup_x: f64,
    /// Free-form notes.
    pub notes: Option<String>,
}

impl TransportRow {
    /// Decode from a remote row already normalized to canonical column names.
    #[must_use]
    pub fn from_remote(row: &RemoteRow) -> Self {
        Self {
            id: read_id(row, "id"),
            event_id: read_event_id(row),
            created_at: read_created_at(row),
            origin: read_str(row, "origin"),
            destination: read_str(row, "destination"),
            round_trip: read_bool(row, "round_trip"),
            distance_km: guard::non_neg(read_num(row, "distance_km")),
            vehicle_key: read_opt_str(row, "vehicle_key"),
            trips: guard::pos_or(read_num(row, "trips"), 1.0),
            markup_x: guard::pos_or(read_num(row, "markup_x"), 1.0),
            notes: read_opt_str(row, "notes"),
        }
    }

    /// Kilometers actually driven, accounting for the return leg.
    #[must_use]
    pub fn effective_km(&self) -> f64 {
        let one_way = self.distance_km * self.trips;
        if self.round_trip { one_way * 2.0 } else { one_way }
    }
}

/// Company-owned asset row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRow {
    /// Row identity.
    pub id: RowId,
    /// Owning event.
    pub event_id: EventId,
    /// Creation timestamp; the primary sort key.
    pub created_at: Option<DateTime<Utc>>,
    /// Asset label.
    pub name: String,
    /// Quantity, clamped to `>= 0`.
    pub quantity: f64,
    /// Internal unit cost.
    pub unit_cost: f64,
    /// Markup multiplier.
    pub markup_x: f64,
    /// Whether an explicit sell price overrides the computed one.
    pub include_price: bool,
    /// Explicit sell price; coupled to `include_price`.
    pub price: Option<f64>,
    /// Free-form notes.
    pub notes: Option<String>,
}

impl AssetRow {
    /// Tolerant decode from a remote row.
    #[must_use]
    pub fn from_remote(row: &RemoteRow) -> Self {
        let include_price = read_bool(row, "include_price");
        Self {
            id: read_id(row, "id"),
            event_id: read_event_id(row),
            created_at: read_created_at(row),
            name: read_str(row, "name"),
            quantity: guard::non_neg(read_num(row, "quantity")),
            unit_cost: guard::non_neg(read_num(row, "unit_cost")),
            markup_x: guard::pos_or(read_num(row, "markup_x"), 1.0),
            include_price,
            price: guard::coupled_price(include_price, read_opt_num(row, "price")),
            notes: read_opt_str(row, "notes"),
        }
    }
}

/// Miscellaneous extra fee.
///
/// Carries a canonical computed amount plus the raw percent/scope fields of
/// the source record, normalized on decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtraFeeRow {
    /// Row identity.
    pub id: RowId,
    /// Owning event.
    pub event_id: EventId,
    /// Creation timestamp; the primary sort key.
    pub created_at: Option<DateTime<Utc>>,
    /// Fee label.
    pub label: String,
    /// Canonical computed amount; wins over the percent when positive.
    pub amount: f64,
    /// Normalized percent fraction, when the source row carries one.
    pub percent_norm: Option<f64>,
    /// Normalized scope the percent applies to.
    pub scope_norm: Scope,
    /// Whether an explicit sell price overrides the computed one.
    pub include_price: bool,
    /// Explicit sell price; coupled to `include_price`.
    pub price: Option<f64>,
    /// Free-form notes.
    pub notes: Option<String>,
}

impl ExtraFeeRow {
    /// Tolerant decode from a remote row.
    #[must_use]
    pub fn from_remote(row: &RemoteRow) -> Self {
        let include_price = read_bool(row, "include_price");
        Self {
            id: read_id(row, "id"),
            event_id: read_event_id(row),
            created_at: read_created_at(row),
            label: read_str(row, "label"),
            amount: guard::non_neg(read_num(row, "amount")),
            percent_norm: normalize::percent_any(row),
            scope_norm: normalize::scope_any(row),
            include_price,
            price: guard::coupled_price(include_price, read_opt_num(row, "price")),
            notes: read_opt_str(row, "notes"),
        }
    }
}

/// Discount row; same normalization rules as extra fees, subtracted from the
/// total instead of added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscountRow {
    /// Row identity.
    pub id: RowId,
    /// Owning event.
    pub event_id: EventId,
    /// Creation timestamp; the primary sort key.
    pub created_at: Option<DateTime<Utc>>,
    /// Discount label.
    pub label: String,
    /// Canonical computed amount; wins over the percent when positive.
    pub amount: f64,
    /// Normalized percent fraction, when the source row carries one.
    pub percent_norm: Option<f64>,
    /// Normalized scope the percent applies to.
    pub scope_norm: Scope,
    /// Free-form notes.
    pub notes: Option<String>,
}

impl DiscountRow {
    /// Tolerant decode from a remote row.
    #[must_use]
    pub fn from_remote(row: &RemoteRow) -> Self {
        Self {
            id: read_id(row, "id"),
            event_id: read_event_id(row),
            created_at: read_created_at(row),
            label: read_str(row, "label"),
            amount: guard::non_neg(read_num(row, "amount")),
            percent_norm: normalize::percent_any(row),
            scope_norm: normalize::scope_any(row),
            notes: read_opt_str(row, "notes"),
        }
    }
}

/// Maximum modifier slots a bundle row can carry.
pub const MAX_MODIFIER_SLOTS: usize = 5;

/// A dish reference supplied by the catalog (read-only reference data).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DishRef {
    /// Catalog identity.
    pub id: RowId,
    /// Display name.
    pub name: String,
    /// Catalog category, matched against bundle configuration.
    pub category: String,
    /// Net unit cost from the catalog.
    pub unit_cost: f64,
}

/// A modifier reference (sauce, side, preparation) from the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifierRef {
    /// Catalog identity.
    pub id: RowId,
    /// Display name.
    pub name: String,
    /// Catalog category, matched against the slot configuration.
    pub category: String,
}

/// Menu composition unit owning an ordered list of bundle rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    /// Row identity.
    pub id: RowId,
    /// Owning event.
    pub event_id: EventId,
    /// Creation timestamp; the primary sort key.
    pub created_at: Option<DateTime<Utc>>,
    /// Configuration key selecting composition rules.
    pub type_key: String,
    /// Display label.
    pub label: String,
    /// Markup multiplier from the bundle configuration.
    pub markup_x: f64,
}

impl Bundle {
    /// Tolerant decode from a remote row.
    #[must_use]
    pub fn from_remote(row: &RemoteRow) -> Self {
        Self {
            id: read_id(row, "id"),
            event_id: read_event_id(row),
            created_at: read_created_at(row),
            type_key: read_str(row, "type_key"),
            label: read_str(row, "label"),
            markup_x: guard::pos_or(read_num(row, "markup_x"), 1.0),
        }
    }
}

/// One dish inside a bundle, with up to five modifier references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleRow {
    /// Row identity.
    pub id: RowId,
    /// Owning bundle.
    pub bundle_id: RowId,
    /// Owning event.
    pub event_id: EventId,
    /// Creation timestamp; the primary sort key.
    pub created_at: Option<DateTime<Utc>>,
    /// The dish.
    pub dish: DishRef,
    /// Quantity, clamped to `>= 0`.
    pub quantity: f64,
    /// Modifier slots, positional: index *i* is slot *i*, `None` when empty.
    pub modifiers: SmallVec<[Option<ModifierRef>; MAX_MODIFIER_SLOTS]>,
}

impl BundleRow {
    /// Modifiers actually set, in slot order.
    pub fn set_modifiers(&self) -> impl Iterator<Item = &ModifierRef> {
        self.modifiers.iter().flatten()
    }

    /// Tolerant decode from a remote row.
    #[must_use]
    pub fn from_remote(row: &RemoteRow) -> Self {
        let modifiers = row
            .get("modifiers")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .take(MAX_MODIFIER_SLOTS)
                    .map(|v| {
                        v.as_object().map(|m| ModifierRef {
                            id: read_id(m, "id"),
                            name: read_str(m, "name"),
                            category: read_str(m, "category"),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self {
            id: read_id(row, "id"),
            bundle_id: read_id(row, "bundle_id"),
            event_id: read_event_id(row),
            created_at: read_created_at(row),
            dish: DishRef {
                id: read_id(row, "dish_id"),
                name: read_str(row, "dish_name"),
                category: read_str(row, "dish_category"),
                unit_cost: guard::non_neg(read_num(row, "dish_unit_cost")),
            },
            quantity: guard::non_neg(read_num(row, "quantity")),
            modifiers,
        }
    }
}

/// Per-event staff settings record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaffSettings {
    /// Owning event.
    pub event_id: EventId,
    /// Markup multiplier, always `> 0`.
    pub markup_x: f64,
}

/// A vehicle-type definition with per-kilometer cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleType {
    /// Stable key referenced by transport rows.
    pub key: String,
    /// Display label.
    pub label: String,
    /// Cost per kilometer driven.
    pub cost_per_km: f64,
}

impl VehicleType {
    /// Tolerant decode from a remote row.
    #[must_use]
    pub fn from_remote(row: &RemoteRow) -> Self {
        Self {
            key: read_str(row, "key"),
            label: read_str(row, "label"),
            cost_per_km: guard::non_neg(read_num(row, "cost_per_km")),
        }
    }

    /// Encode to a write payload.
    #[must_use]
    pub fn to_patch(&self) -> RemoteRow {
        let mut row = RemoteRow::new();
        row.insert("key".into(), json!(self.key));
        row.insert("label".into(), json!(self.label));
        row.insert("cost_per_km".into(), json!(self.cost_per_km));
        row
    }
}

/// Per-event transport settings record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportSettings {
    /// Owning event.
    pub event_id: EventId,
    /// Markup multiplier, always `> 0`.
    pub markup_x: f64,
    /// Per-event vehicle-type definitions.
    pub vehicle_types: Vec<VehicleType>,
}

/// The single shared defaults record layered under per-event settings.
///
/// Read preferentially from the remote store and mirrored into the local
/// key-value cache; the mirror is never the authority once the remote value
/// is available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalDefaults {
    /// Default staff markup for newly seeded events.
    pub staff_markup_x: f64,
    /// Default transport markup for newly seeded events.
    pub transport_markup_x: f64,
    /// Default vehicle-type list for newly seeded events.
    pub vehicle_types: Vec<VehicleType>,
}

impl Default for GlobalDefaults {
    fn default() -> Self {
        Self::factory()
    }
}

impl GlobalDefaults {
    /// Factory defaults used when neither remote nor mirrored data exists.
    #[must_use]
    pub fn factory() -> Self {
        Self {
            staff_markup_x: 1.0,
            transport_markup_x: 1.0,
            vehicle_types: vec![
                VehicleType {
                    key: "van".into(),
                    label: "Van".into(),
                    cost_per_km: 0.70,
                },
                VehicleType {
                    key: "truck".into(),
                    label: "Truck".into(),
                    cost_per_km: 1.20,
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(entries: &[(&str, Value)]) -> RemoteRow {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn equipment_decodes_loose_types() {
        let r = row(&[
            ("id", json!("eq1")),
            ("event_id", json!("ev1")),
            ("created_at", json!("2026-03-01T10:00:00Z")),
            ("name", json!("Chafing dish")),
            ("quantity", json!("4")),
            ("unit_cost", json!("12,50")),
            ("vat_percent", json!(22)),
            ("uses_vat", json!("true")),
            ("markup_x", json!(0)),
            ("uom", json!("Pz")),
            ("include_price", json!(false)),
            ("price", json!(99)),
        ]);
        let decoded = EquipmentRow::from_remote(&r);
        assert_eq!(decoded.quantity, 4.0);
        assert_eq!(decoded.uom.as_deref(), Some("pc"));
        assert_eq!(decoded.unit_cost, 12.5);
        assert!(decoded.uses_vat);
        assert_eq!(decoded.markup_x, 1.0);
        // price is forced to null because include_price is off
        assert_eq!(decoded.price, None);
        assert!((decoded.gross_unit_cost() - 15.25).abs() < 1e-9);
    }

    #[test]
    fn fee_normalizes_percent_and_scope() {
        let r = row(&[
            ("id", json!("f1")),
            ("event_id", json!("ev1")),
            ("label", json!("Service")),
            ("percentage", json!("12,5%")),
            ("apply_on", json!("Bundle")),
        ]);
        let fee = ExtraFeeRow::from_remote(&r);
        assert_eq!(fee.percent_norm, Some(0.125));
        assert_eq!(fee.scope_norm, Scope::Bundles);
        assert_eq!(fee.amount, 0.0);
    }

    #[test]
    fn transport_effective_km() {
        let r = row(&[
            ("id", json!("t1")),
            ("event_id", json!("ev1")),
            ("origin", json!("Depot")),
            ("destination", json!("Villa")),
            ("round_trip", json!(true)),
            ("distance_km", json!(30)),
            ("trips", json!(2)),
        ]);
        let t = TransportRow::from_remote(&r);
        assert_eq!(t.effective_km(), 120.0);
    }

    #[test]
    fn bundle_row_caps_modifiers() {
        let mods: Vec<Value> = (0..8)
            .map(|i| json!({"id": format!("m{i}"), "name": "x", "category": "sides"}))
            .collect();
        let r = row(&[
            ("id", json!("br1")),
            ("bundle_id", json!("b1")),
            ("event_id", json!("ev1")),
            ("dish_id", json!("d1")),
            ("dish_name", json!("Lasagne")),
            ("dish_category", json!("Mains")),
            ("dish_unit_cost", json!(8.0)),
            ("quantity", json!(40)),
            ("modifiers", json!(mods)),
        ]);
        let decoded = BundleRow::from_remote(&r);
        assert_eq!(decoded.modifiers.len(), MAX_MODIFIER_SLOTS);
    }

    #[test]
    fn sort_key_missing_timestamp_sorts_first() {
        let a = sort_key(None, &RowId::new("z"));
        let b = sort_key(Some(Utc::now()), &RowId::new("a"));
        assert!(a < b);
    }

    #[test]
    fn factory_defaults_have_positive_markups() {
        let d = GlobalDefaults::factory();
        assert!(d.staff_markup_x > 0.0);
        assert!(d.transport_markup_x > 0.0);
        assert_eq!(d.vehicle_types.len(), 2);
    }
}
