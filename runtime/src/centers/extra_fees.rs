//! Extra-fee cost center.
//!
//! Fee rows carry a canonical computed amount plus raw percent/scope fields
//! whose names and units vary by source record; decoding normalizes them.

use crate::store::{CostCenter, RowStore};
use banchetto_core::bus::topic;
use banchetto_core::model::{ExtraFeeRow, RemoteRow, RowId, tables};
use chrono::{DateTime, Utc};

/// Descriptor for the extra-fee table.
pub struct ExtraFees;

impl CostCenter for ExtraFees {
    type Row = ExtraFeeRow;

    const TABLE: &'static str = tables::EXTRA_FEE_ROWS;
    const TOPIC: &'static str = topic::EXTRA_FEES;

    fn decode(row: &RemoteRow) -> Self::Row {
        ExtraFeeRow::from_remote(row)
    }

    fn sanitize(mut patch: RemoteRow) -> RemoteRow {
        super::clamp_non_neg(&mut patch, &["amount"]);
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

/// Row store for extra fees.
pub type ExtraFeeStore = RowStore<ExtraFees>;
