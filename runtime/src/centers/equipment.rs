//! Rental equipment cost center.

use crate::store::{CostCenter, RowStore};
use banchetto_core::bus::topic;
use banchetto_core::model::{EquipmentRow, RemoteRow, RowId, tables};
use chrono::{DateTime, Utc};

/// Descriptor for the equipment table.
pub struct Equipment;

impl CostCenter for Equipment {
    type Row = EquipmentRow;

    const TABLE: &'static str = tables::EQUIPMENT_ROWS;
    const TOPIC: &'static str = topic::EQUIPMENT;

    fn decode(row: &RemoteRow) -> Self::Row {
        EquipmentRow::from_remote(row)
    }

    fn sanitize(mut patch: RemoteRow) -> RemoteRow {
        super::clamp_non_neg(&mut patch, &["quantity", "unit_cost", "vat_percent"]);
        super::clamp_markup(&mut patch, "markup_x");
        super::clamp_bool(&mut patch, "uses_vat");
        super::couple_price(&mut patch, "include_price", "price");
        patch
    }

    fn id(row: &Self::Row) -> &RowId {
        &row.id
    }

    fn created_at(row: &Self::Row) -> Option<DateTime<Utc>> {
        row.created_at
    }
}

/// Row store for rental equipment.
pub type EquipmentStore = RowStore<Equipment>;
