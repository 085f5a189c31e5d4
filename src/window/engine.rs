//! The rolling-window engine: a token-state map behind one reader-writer
//! lock, a shared watermark, and the apply/tick/snapshot operations.

use std::time::Duration;

use log::{debug, info};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use thiserror::Error;
use time::{OffsetDateTime, UtcOffset};

use crate::config::WindowSettings;
use crate::domain::{PatchWindows, SwapEvent, TokenKey, TokenStatsPatch, Windows};
use crate::window::rolling::{minute_index, SlotDelta, TokenState};
use crate::window::snapshot::{self, SnapshotError};
use crate::window::watermark::Watermark;

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("event older than watermark")]
    TooLate,
    #[error("invalid amount_usd: {0}")]
    InvalidAmount(String),
}

struct EngineState {
    tokens: FxHashMap<String, TokenState>,
    watermark: Watermark,
}

/// Maintains live 5m/1h/24h windows on top of per-minute buckets.
///
/// Writers (`apply`, `tick`, `restore`) hold the write lock for the duration
/// of one mutation; readers (`get_windows`, `snapshot`, `list_tokens`) take
/// the read lock and return by-value copies so no reference into locked
/// state escapes.
pub struct WindowEngine {
    grace: Duration,
    buckets_per_day: usize,
    coerce_to_utc: bool,
    state: RwLock<EngineState>,
}

impl WindowEngine {
    pub fn new(settings: &WindowSettings) -> Self {
        Self {
            grace: settings.grace,
            buckets_per_day: settings.buckets_per_day,
            coerce_to_utc: settings.coerce_to_utc,
            state: RwLock::new(EngineState {
                tokens: FxHashMap::default(),
                watermark: Watermark::new(settings.grace),
            }),
        }
    }

    /// Applies one swap event and returns the patches to broadcast.
    ///
    /// Late events (older than the watermark) are rejected without mutating
    /// state; reorg compensations (`removed=true`) subtract the magnitudes
    /// their positive counterpart added.
    pub fn apply(&self, ev: &SwapEvent) -> Result<Vec<TokenStatsPatch>, ApplyError> {
        let event_time = if self.coerce_to_utc {
            ev.event_time.to_offset(UtcOffset::UTC)
        } else {
            ev.event_time
        };

        let now = OffsetDateTime::now_utc();
        let mut state = self.state.write();

        if state.watermark.is_late(event_time) {
            debug!(
                "Event {} is too late (ts={event_time}, watermark={:?})",
                ev.event_id,
                state.watermark.current()
            );
            return Err(ApplyError::TooLate);
        }

        let volume_usd = parse_decimal(&ev.amount_usd)
            .map_err(|e| ApplyError::InvalidAmount(format!("{}: {e}", ev.amount_usd)))?;

        let mut delta = SlotDelta {
            vol_usd: volume_usd,
            trades: 1,
            buys: 0,
            sells: 0,
        };
        match ev.side {
            crate::domain::Side::Buy => delta.buys = 1,
            crate::domain::Side::Sell => delta.sells = 1,
        }
        if ev.removed {
            delta = delta.negated();
        }

        let key = TokenKey::new(ev.chain_id, &ev.token_address);
        let state_key = key.state_key();
        let buckets = self.buckets_per_day;

        let ts = state
            .tokens
            .entry(state_key)
            .or_insert_with(|| TokenState::new(key.clone(), buckets, now));

        let slot_idx = minute_index(event_time, buckets);
        ts.apply_delta(slot_idx, &delta, now);

        let windows = ts.windows();
        let patch = TokenStatsPatch {
            topic: format!("token:{}", ev.token_symbol),
            token: key,
            generated_at: now,
            windows: PatchWindows {
                w5m: Some(windows.w5m),
                w1h: Some(windows.w1h),
                w24h: Some(windows.w24h),
            },
        };

        Ok(vec![patch])
    }

    /// Current windows of a token, by value. Absent until the token's first
    /// accepted event.
    pub fn get_windows(&self, key: &TokenKey) -> Option<Windows> {
        let state = self.state.read();
        state.tokens.get(&key.state_key()).map(TokenState::windows)
    }

    /// All tokens with live state.
    pub fn list_tokens(&self) -> Vec<TokenKey> {
        let state = self.state.read();
        state.tokens.values().map(|ts| ts.key.clone()).collect()
    }

    pub fn token_count(&self) -> usize {
        self.state.read().tokens.len()
    }

    /// Advances the watermark and expires the slot that wrapped around.
    ///
    /// Clearing the current minute's slot means that 24 hours later the same
    /// index is reused without pollution; the running sums are then
    /// recomputed from the slots so they stay exact.
    pub fn tick(&self, now: OffsetDateTime) {
        let now = now.to_offset(UtcOffset::UTC);
        let mut state = self.state.write();

        state.watermark.advance(now);

        let current_minute = minute_index(now, self.buckets_per_day);
        for ts in state.tokens.values_mut() {
            ts.slots[current_minute] = SlotDelta::default();
            ts.recompute_windows(now);
        }

        debug!(
            "Tick: watermark={:?}, tokens={}",
            state.watermark.current(),
            state.tokens.len()
        );
    }

    /// Serializes the full window state for a warm restart.
    pub fn snapshot(&self) -> Vec<u8> {
        let state = self.state.read();
        let data = snapshot::encode(
            &state.tokens,
            state.watermark.current(),
            self.grace,
            OffsetDateTime::now_utc(),
        );

        info!(
            "Created window snapshot: {} tokens, {} bytes",
            state.tokens.len(),
            data.len()
        );
        data
    }

    /// Replaces all current state with a decoded snapshot. The running sums
    /// are rebuilt using the snapshot's taken-at time as "now".
    pub fn restore(&self, data: &[u8]) -> Result<(), SnapshotError> {
        let decoded = snapshot::decode(data, self.buckets_per_day)?;

        let mut state = self.state.write();
        state.tokens = decoded.state;
        if let Some(wm) = decoded.watermark {
            state.watermark.restore(wm);
        }

        info!(
            "Restored window snapshot: {} tokens, watermark={:?}, taken_at={}",
            state.tokens.len(),
            decoded.watermark,
            decoded.taken_at
        );
        Ok(())
    }
}

/// Parses a decimal string (e.g. "123.456") into f64. Empty means zero.
fn parse_decimal(s: &str) -> anyhow::Result<f64> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(0.0);
    }

    let val: f64 = s.parse()?;
    if !val.is_finite() {
        anyhow::bail!("not a finite number");
    }
    Ok(val)
}

#[cfg(test)]
mod tests {
    use crate::domain::{Agg, Side};

    use super::*;

    fn test_engine() -> WindowEngine {
        WindowEngine::new(&WindowSettings {
            grace: Duration::from_secs(120),
            buckets_per_day: 1440,
            coerce_to_utc: true,
        })
    }

    fn swap(
        token: &str,
        symbol: &str,
        side: Side,
        amount_usd: &str,
        event_time: OffsetDateTime,
        removed: bool,
    ) -> SwapEvent {
        SwapEvent {
            chain_id: 1,
            tx_hash: "0xabc".to_string(),
            log_index: 7,
            event_id: format!("1:0xabc:{}", 7),
            token_address: token.to_string(),
            token_symbol: symbol.to_string(),
            pool_address: "0xpool".to_string(),
            side,
            amount_token: "1".to_string(),
            amount_usd: amount_usd.to_string(),
            event_time,
            block_number: 100,
            removed,
            schema_ver: 1,
        }
    }

    #[test]
    fn basic_accumulation() {
        let engine = test_engine();
        let now = OffsetDateTime::now_utc();

        let patches = engine
            .apply(&swap("0xA", "USDC", Side::Buy, "100.00", now, false))
            .unwrap();

        let expected = Agg {
            vol_usd: 100.0,
            trades: 1,
            buy: 1,
            sell: 0,
        };

        let windows = engine.get_windows(&TokenKey::new(1, "0xA")).unwrap();
        assert_eq!(windows.w5m, expected);
        assert_eq!(windows.w1h, expected);
        assert_eq!(windows.w24h, expected);

        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].topic, "token:USDC");
        assert_eq!(patches[0].token, TokenKey::new(1, "0xa"));
        assert_eq!(patches[0].windows.w5m, Some(expected));
    }

    #[test]
    fn window_decay_on_tick() {
        let engine = test_engine();
        let now = OffsetDateTime::now_utc();

        engine
            .apply(&swap("0xA", "USDC", Side::Buy, "100.00", now, false))
            .unwrap();

        for minutes in 1..=6i64 {
            engine.tick(now + time::Duration::minutes(minutes));
        }

        let windows = engine.get_windows(&TokenKey::new(1, "0xa")).unwrap();
        assert_eq!(windows.w5m, Agg::default());
        assert_eq!(windows.w1h.vol_usd, 100.0);
        assert_eq!(windows.w1h.trades, 1);
        assert_eq!(windows.w24h, windows.w1h);
    }

    #[test]
    fn reorg_cancels_out() {
        let engine = test_engine();
        let now = OffsetDateTime::now_utc();

        engine
            .apply(&swap("0xA", "USDC", Side::Sell, "50.00", now, false))
            .unwrap();
        engine
            .apply(&swap("0xA", "USDC", Side::Sell, "50.00", now, true))
            .unwrap();

        let windows = engine.get_windows(&TokenKey::new(1, "0xa")).unwrap();
        assert_eq!(windows, Windows::default());
    }

    #[test]
    fn late_event_rejected_without_mutation() {
        let engine = test_engine();
        let now = OffsetDateTime::now_utc();

        engine.tick(now);

        // Three minutes old with a two-minute grace.
        let late = swap(
            "0xA",
            "USDC",
            Side::Buy,
            "100.00",
            now - time::Duration::minutes(3),
            false,
        );

        assert!(matches!(engine.apply(&late), Err(ApplyError::TooLate)));
        assert!(engine.get_windows(&TokenKey::new(1, "0xa")).is_none());
    }

    #[test]
    fn events_accepted_before_first_tick() {
        let engine = test_engine();
        let now = OffsetDateTime::now_utc();

        // Hours old, but no tick has advanced the watermark yet.
        let old = swap(
            "0xA",
            "USDC",
            Side::Buy,
            "10.00",
            now - time::Duration::hours(3),
            false,
        );
        engine.apply(&old).unwrap();

        let windows = engine.get_windows(&TokenKey::new(1, "0xa")).unwrap();
        assert_eq!(windows.w24h.trades, 1);
        assert_eq!(windows.w5m.trades, 0);
    }

    #[test]
    fn invalid_amount_is_a_parse_error() {
        let engine = test_engine();
        let now = OffsetDateTime::now_utc();

        let bad = swap("0xA", "USDC", Side::Buy, "not-a-number", now, false);
        assert!(matches!(
            engine.apply(&bad),
            Err(ApplyError::InvalidAmount(_))
        ));
        assert!(engine.get_windows(&TokenKey::new(1, "0xa")).is_none());

        let nan = swap("0xA", "USDC", Side::Buy, "NaN", now, false);
        assert!(matches!(
            engine.apply(&nan),
            Err(ApplyError::InvalidAmount(_))
        ));
    }

    #[test]
    fn empty_amount_counts_trade_with_zero_volume() {
        let engine = test_engine();
        let now = OffsetDateTime::now_utc();

        engine
            .apply(&swap("0xA", "USDC", Side::Sell, "", now, false))
            .unwrap();

        let windows = engine.get_windows(&TokenKey::new(1, "0xa")).unwrap();
        assert_eq!(windows.w24h.vol_usd, 0.0);
        assert_eq!(windows.w24h.trades, 1);
        assert_eq!(windows.w24h.sell, 1);
    }

    #[test]
    fn window_containment_holds() {
        let engine = test_engine();
        let now = OffsetDateTime::now_utc();

        for (minutes_ago, amount) in [(0i64, "10.0"), (2, "20.0"), (30, "30.0"), (180, "40.0")] {
            engine
                .apply(&swap(
                    "0xA",
                    "USDC",
                    Side::Buy,
                    amount,
                    now - time::Duration::minutes(minutes_ago),
                    false,
                ))
                .unwrap();
        }

        let w = engine.get_windows(&TokenKey::new(1, "0xa")).unwrap();
        assert!(w.w5m.vol_usd <= w.w1h.vol_usd);
        assert!(w.w1h.vol_usd <= w.w24h.vol_usd);
        assert!(w.w5m.trades <= w.w1h.trades);
        assert!(w.w1h.trades <= w.w24h.trades);
    }

    #[test]
    fn snapshot_restore_preserves_windows() {
        let engine = test_engine();
        let now = OffsetDateTime::now_utc();

        engine
            .apply(&swap("0xA", "USDC", Side::Buy, "100.00", now, false))
            .unwrap();
        engine
            .apply(&swap("0xA", "USDC", Side::Sell, "25.00", now, false))
            .unwrap();
        engine
            .apply(&swap("0xB", "WETH", Side::Buy, "1000.00", now, false))
            .unwrap();

        let data = engine.snapshot();

        let restored = test_engine();
        restored.restore(&data).unwrap();

        for token in ["0xa", "0xb"] {
            let key = TokenKey::new(1, token);
            assert_eq!(
                restored.get_windows(&key),
                engine.get_windows(&key),
                "windows diverged for {token}"
            );
        }
        assert_eq!(restored.token_count(), 2);
    }

    #[test]
    fn restore_refuses_bad_version() {
        let engine = test_engine();
        let mut data = engine.snapshot();
        data[0] = 42;

        let fresh = test_engine();
        assert!(matches!(
            fresh.restore(&data),
            Err(SnapshotError::UnsupportedVersion(42))
        ));
    }

    #[test]
    fn list_tokens_reflects_state() {
        let engine = test_engine();
        let now = OffsetDateTime::now_utc();
        assert!(engine.list_tokens().is_empty());

        engine
            .apply(&swap("0xA", "USDC", Side::Buy, "1.0", now, false))
            .unwrap();

        let tokens = engine.list_tokens();
        assert_eq!(tokens, vec![TokenKey::new(1, "0xa")]);
    }
}
