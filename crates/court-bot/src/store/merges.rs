//! merge_operations queries.

use chrono::Utc;
use court_common::LegSide;
use rusqlite::{params, OptionalExtension, Row};
use rust_decimal::Decimal;

use super::models::{MergeOpStatus, MergeOperation};
use super::{dec_str, dec_str_opt, get_decimal, get_decimal_opt, get_parsed_opt, ts, Store, StoreError, StoreResult};

/// Fields for a new merge operation row.
#[derive(Debug, Clone)]
pub struct NewMergeOperation {
    pub bothside_group_id: String,
    pub condition_id: String,
    pub event_slug: String,
    pub dir_shares: Decimal,
    pub hedge_shares: Decimal,
    pub merge_amount: Decimal,
    pub remainder_shares: Decimal,
    pub remainder_side: Option<LegSide>,
    pub dir_vwap: Decimal,
    pub hedge_vwap: Decimal,
    pub combined_vwap: Decimal,
    pub gross_profit_usd: Decimal,
    pub gas_cost_usd: Decimal,
    pub net_profit_usd: Decimal,
}

impl Store {
    pub fn insert_merge_operation(&self, op: &NewMergeOperation) -> StoreResult<i64> {
        self.conn().execute(
            "INSERT INTO merge_operations
               (bothside_group_id, condition_id, event_slug, dir_shares, hedge_shares,
                merge_amount, remainder_shares, remainder_side, dir_vwap, hedge_vwap,
                combined_vwap, gross_profit_usd, gas_cost_usd, net_profit_usd,
                status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                     'pending', ?15)",
            params![
                op.bothside_group_id,
                op.condition_id,
                op.event_slug,
                dec_str(op.dir_shares),
                dec_str(op.hedge_shares),
                dec_str(op.merge_amount),
                dec_str(op.remainder_shares),
                op.remainder_side.map(|s| s.as_str()),
                dec_str(op.dir_vwap),
                dec_str(op.hedge_vwap),
                dec_str(op.combined_vwap),
                dec_str(op.gross_profit_usd),
                dec_str(op.gas_cost_usd),
                dec_str(op.net_profit_usd),
                ts(Utc::now()),
            ],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    /// Finalize a merge operation after execution or simulation.
    pub fn finalize_merge_operation(
        &self,
        id: i64,
        status: MergeOpStatus,
        tx_hash: Option<&str>,
        gas_cost_usd: Option<Decimal>,
        net_profit_usd: Option<Decimal>,
        error_message: Option<&str>,
    ) -> StoreResult<()> {
        self.conn().execute(
            "UPDATE merge_operations
             SET status = ?1,
                 tx_hash = COALESCE(?2, tx_hash),
                 gas_cost_usd = COALESCE(?3, gas_cost_usd),
                 net_profit_usd = COALESCE(?4, net_profit_usd),
                 error_message = COALESCE(?5, error_message),
                 executed_at = ?6
             WHERE id = ?7",
            params![
                status.as_str(),
                tx_hash,
                dec_str_opt(gas_cost_usd),
                dec_str_opt(net_profit_usd),
                error_message,
                ts(Utc::now()),
                id,
            ],
        )?;
        Ok(())
    }

    pub fn get_merge_operation(&self, id: i64) -> StoreResult<MergeOperation> {
        self.conn()
            .query_row(
                "SELECT * FROM merge_operations WHERE id = ?1",
                params![id],
                merge_op_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("merge_operation {}", id)))
    }

    /// All merge operations of a bothside group, newest first.
    pub fn merge_operations_for_group(&self, group_id: &str) -> StoreResult<Vec<MergeOperation>> {
        let mut stmt = self.conn().prepare(
            "SELECT * FROM merge_operations WHERE bothside_group_id = ?1 ORDER BY id DESC",
        )?;
        let rows = stmt.query_map(params![group_id], merge_op_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

fn merge_op_from_row(row: &Row<'_>) -> rusqlite::Result<MergeOperation> {
    Ok(MergeOperation {
        id: row.get("id")?,
        bothside_group_id: row.get("bothside_group_id")?,
        condition_id: row.get("condition_id")?,
        event_slug: row.get("event_slug")?,
        dir_shares: get_decimal(row, "dir_shares")?,
        hedge_shares: get_decimal(row, "hedge_shares")?,
        merge_amount: get_decimal(row, "merge_amount")?,
        remainder_shares: get_decimal(row, "remainder_shares")?,
        remainder_side: get_parsed_opt(row, "remainder_side")?,
        dir_vwap: get_decimal(row, "dir_vwap")?,
        hedge_vwap: get_decimal(row, "hedge_vwap")?,
        combined_vwap: get_decimal(row, "combined_vwap")?,
        gross_profit_usd: get_decimal_opt(row, "gross_profit_usd")?,
        gas_cost_usd: get_decimal_opt(row, "gas_cost_usd")?,
        net_profit_usd: get_decimal_opt(row, "net_profit_usd")?,
        status: {
            let raw: String = row.get("status")?;
            raw.parse().map_err(|_| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    format!("corrupt merge status: {raw}").into(),
                )
            })?
        },
        tx_hash: row.get("tx_hash")?,
        error_message: row.get("error_message")?,
    })
}
