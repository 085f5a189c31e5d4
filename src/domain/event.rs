//! Core domain types for the swap stream and rolling-window aggregates.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Trade direction of a swap relative to the tracked token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

/// Raw swap event as delivered on the ingest topic.
///
/// Amounts arrive as decimal strings; `amount_usd` is parsed to f64 for
/// aggregation while the original strings are persisted untouched so that
/// downstream exact-math queries stay possible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapEvent {
    pub chain_id: u32,
    pub tx_hash: String,
    pub log_index: u32,
    /// Canonical id `"<chain>:<tx_hash>:<log_index>"`, lowercase tx hash.
    /// Derived from the other fields when the producer omits it.
    #[serde(default)]
    pub event_id: String,
    pub token_address: String,
    pub token_symbol: String,
    pub pool_address: String,
    pub side: Side,
    /// Decimal(38,18) as string, display only.
    pub amount_token: String,
    /// Decimal(20,6) as string, parsed to f64 for the windows.
    pub amount_usd: String,
    #[serde(with = "time::serde::rfc3339")]
    pub event_time: OffsetDateTime,
    pub block_number: u64,
    /// Reorg compensation flag. A removed event subtracts what its
    /// non-removed counterpart added.
    #[serde(default)]
    pub removed: bool,
    #[serde(default = "default_schema_version", rename = "schema_version")]
    pub schema_ver: u16,
}

fn default_schema_version() -> u16 {
    1
}

/// Canonical key a token is aggregated under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenKey {
    pub chain_id: u32,
    pub token_address: String,
}

impl TokenKey {
    /// Builds a key with the address lowercased, the canonical form.
    pub fn new(chain_id: u32, token_address: &str) -> Self {
        Self {
            chain_id,
            token_address: token_address.to_lowercase(),
        }
    }

    /// Key used in the engine state map: `"<chain>:<address>"`.
    pub fn state_key(&self) -> String {
        format!("{}:{}", self.chain_id, self.token_address)
    }
}

/// Aggregate statistics over one window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Agg {
    pub vol_usd: f64,
    pub trades: u64,
    pub buy: u64,
    pub sell: u64,
}

/// The three current rolling windows of a token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Windows {
    pub w5m: Agg,
    pub w1h: Agg,
    pub w24h: Agg,
}

/// Windows carried by a patch. Optional so a future variant can send only
/// the windows that changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PatchWindows {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub w5m: Option<Agg>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub w1h: Option<Agg>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub w24h: Option<Agg>,
}

/// Incremental update published to subscribers after each applied event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenStatsPatch {
    /// `token:<symbol>`
    pub topic: String,
    pub token: TokenKey,
    #[serde(rename = "ts", with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
    pub windows: PatchWindows,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_key_lowercases_address() {
        let key = TokenKey::new(1, "0xAbCd");
        assert_eq!(key.token_address, "0xabcd");
        assert_eq!(key.state_key(), "1:0xabcd");
    }

    #[test]
    fn swap_event_json_round_trip() {
        let raw = r#"{
            "chain_id": 1,
            "tx_hash": "0xabc",
            "log_index": 7,
            "event_id": "1:0xabc:7",
            "token_address": "0xa0b8",
            "token_symbol": "USDC",
            "pool_address": "0xpool",
            "side": "buy",
            "amount_token": "100.000000000000000000",
            "amount_usd": "100.00",
            "event_time": "2025-06-01T12:00:00Z",
            "block_number": 123,
            "removed": false,
            "schema_version": 1
        }"#;

        let ev: SwapEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(ev.side, Side::Buy);
        assert_eq!(ev.event_time.unix_timestamp(), 1_748_779_200);

        let back = serde_json::to_string(&ev).unwrap();
        let again: SwapEvent = serde_json::from_str(&back).unwrap();
        assert_eq!(again.event_id, ev.event_id);
    }

    #[test]
    fn removed_defaults_to_false() {
        let raw = r#"{
            "chain_id": 1,
            "tx_hash": "0xabc",
            "log_index": 0,
            "event_id": "1:0xabc:0",
            "token_address": "0xa",
            "token_symbol": "WETH",
            "pool_address": "0xp",
            "side": "sell",
            "amount_token": "1",
            "amount_usd": "1.50",
            "event_time": "2025-06-01T00:00:00Z",
            "block_number": 1
        }"#;

        let ev: SwapEvent = serde_json::from_str(raw).unwrap();
        assert!(!ev.removed);
        assert_eq!(ev.schema_ver, 1);
    }

    #[test]
    fn patch_omits_absent_windows() {
        let patch = TokenStatsPatch {
            topic: "token:USDC".to_string(),
            token: TokenKey::new(1, "0xa"),
            generated_at: OffsetDateTime::UNIX_EPOCH,
            windows: PatchWindows {
                w5m: Some(Agg::default()),
                w1h: None,
                w24h: None,
            },
        };

        let json = serde_json::to_string(&patch).unwrap();
        assert!(json.contains("w5m"));
        assert!(!json.contains("w1h"));
    }
}
