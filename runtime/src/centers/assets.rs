//! Company-owned asset cost center.

use crate::store::{CostCenter, RowStore};
use banchetto_core::bus::topic;
use banchetto_core::model::{AssetRow, RemoteRow, RowId, tables};
use chrono::{DateTime, Utc};

/// Descriptor for the asset table.
pub struct Assets;

impl CostCenter for Assets {
    type Row = AssetRow;

    const TABLE: &'static str = tables::ASSET_ROWS;
    const TOPIC: &'static str = topic::ASSETS;

    fn decode(row: &RemoteRow) -> Self::Row {
        AssetRow::from_remote(row)
    }

    fn sanitize(mut patch: RemoteRow) -> RemoteRow {
        super::clamp_non_neg(&mut patch, &["quantity", "unit_cost"]);
        super::clamp_markup(&mut patch, "markup_x");
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

/// Row store for company-owned assets.
pub type AssetStore = RowStore<Assets>;
