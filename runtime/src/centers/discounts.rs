//! Discount cost center.

use crate::store::{CostCenter, RowStore};
use banchetto_core::bus::topic;
use banchetto_core::model::{DiscountRow, RemoteRow, RowId, tables};
use chrono::{DateTime, Utc};

/// Descriptor for the discount table.
pub struct Discounts;

impl CostCenter for Discounts {
    type Row = DiscountRow;

    const TABLE: &'static str = tables::DISCOUNT_ROWS;
    const TOPIC: &'static str = topic::DISCOUNTS;

    fn decode(row: &RemoteRow) -> Self::Row {
        DiscountRow::from_remote(row)
    }

    fn sanitize(mut patch: RemoteRow) -> RemoteRow {
        super::clamp_non_neg(&mut patch, &["amount"]);
        patch
    }

    fn id(row: &Self::Row) -> &RowId {
        &row.id
    }

    fn created_at(row: &Self::Row) -> Option<DateTime<Utc>> {
        row.created_at
    }
}

/// Row store for discounts.
pub type DiscountStore = RowStore<Discounts>;
