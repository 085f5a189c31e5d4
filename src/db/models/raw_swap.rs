use clickhouse::Row;
use serde::Serialize;
use time::OffsetDateTime;

use crate::domain::SwapEvent;

/// Raw swap event persisted to the `raw_swaps` table.
///
/// Field order matches the insert column order. Amounts keep the original
/// decimal strings so downstream exact-math queries stay possible; the f64
/// parse happens only in the window engine.
#[derive(Debug, Clone, Serialize, Row)]
pub struct RawSwapRow {
    #[serde(with = "clickhouse::serde::time::datetime")]
    pub event_time: OffsetDateTime,
    pub chain_id: u32,
    pub tx_hash: String,
    pub log_index: u32,
    pub event_id: String,
    pub token_address: String,
    pub token_symbol: String,
    pub pool_address: String,
    pub side: String,
    pub amount_token: String,
    pub amount_usd: String,
    pub block_number: u64,
    pub removed: u8,
    pub schema_version: u16,
}

impl From<&SwapEvent> for RawSwapRow {
    fn from(ev: &SwapEvent) -> Self {
        Self {
            event_time: ev.event_time,
            chain_id: ev.chain_id,
            tx_hash: ev.tx_hash.clone(),
            log_index: ev.log_index,
            event_id: ev.event_id.clone(),
            token_address: ev.token_address.clone(),
            token_symbol: ev.token_symbol.clone(),
            pool_address: ev.pool_address.clone(),
            side: ev.side.as_str().to_string(),
            amount_token: ev.amount_token.clone(),
            amount_usd: ev.amount_usd.clone(),
            block_number: ev.block_number,
            removed: u8::from(ev.removed),
            schema_version: ev.schema_ver,
        }
    }
}
