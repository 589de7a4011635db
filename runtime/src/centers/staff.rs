//! Staff labor cost center.

use crate::store::{CostCenter, RowStore};
use banchetto_core::bus::topic;
use banchetto_core::model::{RemoteRow, RowId, StaffRow, tables};
use chrono::{DateTime, Utc};

/// Descriptor for the staff table.
pub struct Staff;

impl CostCenter for Staff {
    type Row = StaffRow;

    const TABLE: &'static str = tables::STAFF_ROWS;
    const TOPIC: &'static str = topic::STAFF;

    fn decode(row: &RemoteRow) -> Self::Row {
        StaffRow::from_remote(row)
    }

    fn sanitize(mut patch: RemoteRow) -> RemoteRow {
        super::clamp_non_neg(&mut patch, &["headcount", "hours", "hourly_cost"]);
        super::clamp_markup(&mut patch, "markup_x");
        patch
    }

    fn id(row: &Self::Row) -> &RowId {
        &row.id
    }

    fn created_at(row: &Self::Row) -> Option<DateTime<Utc>> {
        row.created_at
    }
}

/// Row store for staff labor.
pub type StaffCenter = RowStore<Staff>;
