//! Per-token ring buffer of minute slots with incrementally maintained
//! 5m/1h/24h sums.
//!
//! Each token owns one slot per UTC minute-of-day. An event lands in the slot
//! of its event time; window membership is decided by the ring distance from
//! the current minute, not by per-slot expiration. This keeps the per-event
//! cost O(1); a periodic tick clears the slot that just wrapped around and
//! recomputes the running sums.

use time::{OffsetDateTime, UtcOffset};

use crate::domain::{Agg, TokenKey, Windows};

/// Default number of minute buckets: 24 hours of one-minute slots.
pub const BUCKETS_PER_DAY: usize = 1440;

/// Signed per-minute delta. Signed so that reorg compensation
/// (`removed=true`) can subtract.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SlotDelta {
    pub vol_usd: f64,
    pub trades: i64,
    pub buys: i64,
    pub sells: i64,
}

impl SlotDelta {
    pub fn is_empty(&self) -> bool {
        self.vol_usd == 0.0 && self.trades == 0 && self.buys == 0 && self.sells == 0
    }

    pub fn negated(self) -> Self {
        Self {
            vol_usd: -self.vol_usd,
            trades: -self.trades,
            buys: -self.buys,
            sells: -self.sells,
        }
    }
}

/// Running sum of the slots covered by one window.
///
/// Counters stay signed internally; they are clamped at zero only when
/// converted to the externally visible [`Agg`], so a reorg compensation that
/// arrives before its positive counterpart self-corrects.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningAgg {
    pub vol_usd: f64,
    pub trades: i64,
    pub buys: i64,
    pub sells: i64,
}

impl RunningAgg {
    fn add(&mut self, d: &SlotDelta) {
        self.vol_usd += d.vol_usd;
        self.trades += d.trades;
        self.buys += d.buys;
        self.sells += d.sells;
    }

    pub fn to_agg(self) -> Agg {
        Agg {
            vol_usd: self.vol_usd,
            trades: self.trades.max(0) as u64,
            buy: self.buys.max(0) as u64,
            sell: self.sells.max(0) as u64,
        }
    }
}

/// Full sliding-window state of one token: the minute ring plus the three
/// incrementally maintained sums.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenState {
    pub key: TokenKey,
    pub slots: Vec<SlotDelta>,
    pub w5m: RunningAgg,
    pub w1h: RunningAgg,
    pub w24h: RunningAgg,
    pub last_updated: OffsetDateTime,
}

impl TokenState {
    pub fn new(key: TokenKey, buckets_per_day: usize, now: OffsetDateTime) -> Self {
        Self {
            key,
            slots: vec![SlotDelta::default(); buckets_per_day],
            w5m: RunningAgg::default(),
            w1h: RunningAgg::default(),
            w24h: RunningAgg::default(),
            last_updated: now,
        }
    }

    /// Adds a delta into a slot and the windows it currently belongs to.
    pub fn apply_delta(&mut self, slot_idx: usize, delta: &SlotDelta, now: OffsetDateTime) {
        let slot = &mut self.slots[slot_idx];
        slot.vol_usd += delta.vol_usd;
        slot.trades += delta.trades;
        slot.buys += delta.buys;
        slot.sells += delta.sells;

        self.w24h.add(delta);

        if self.is_in_window(slot_idx, now, 60) {
            self.w1h.add(delta);
        }
        if self.is_in_window(slot_idx, now, 5) {
            self.w5m.add(delta);
        }

        self.last_updated = now;
    }

    fn is_in_window(&self, slot_idx: usize, now: OffsetDateTime, window_minutes: usize) -> bool {
        let now_minute = minute_index(now, self.slots.len());
        ring_distance(now_minute, slot_idx, self.slots.len()) < window_minutes
    }

    pub fn windows(&self) -> Windows {
        Windows {
            w5m: self.w5m.to_agg(),
            w1h: self.w1h.to_agg(),
            w24h: self.w24h.to_agg(),
        }
    }

    /// Rebuilds the three running sums from the slots. Used after a tick
    /// cleared a slot and after restoring from a snapshot.
    pub fn recompute_windows(&mut self, now: OffsetDateTime) {
        self.w5m = RunningAgg::default();
        self.w1h = RunningAgg::default();
        self.w24h = RunningAgg::default();

        let len = self.slots.len();
        let now_minute = minute_index(now, len);

        for i in 0..len {
            let slot = self.slots[i];
            if slot.is_empty() {
                continue;
            }

            let dist = ring_distance(now_minute, i, len);

            self.w24h.add(&slot);
            if dist < 60 {
                self.w1h.add(&slot);
            }
            if dist < 5 {
                self.w5m.add(&slot);
            }
        }
    }
}

/// Slot index for a timestamp: UTC minute-of-day modulo the ring size.
pub fn minute_index(t: OffsetDateTime, buckets_per_day: usize) -> usize {
    let t = t.to_offset(UtcOffset::UTC);
    (t.hour() as usize * 60 + t.minute() as usize) % buckets_per_day
}

/// Minute-age of a slot relative to the current minute, wrapping on the ring.
pub fn ring_distance(now_minute: usize, slot_idx: usize, len: usize) -> usize {
    (now_minute + len - slot_idx) % len
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    fn buy_delta(vol: f64) -> SlotDelta {
        SlotDelta {
            vol_usd: vol,
            trades: 1,
            buys: 1,
            sells: 0,
        }
    }

    #[test]
    fn minute_index_is_utc_minute_of_day() {
        assert_eq!(minute_index(datetime!(2025-06-01 00:00:30 UTC), 1440), 0);
        assert_eq!(minute_index(datetime!(2025-06-01 12:34:56 UTC), 1440), 12 * 60 + 34);
        assert_eq!(minute_index(datetime!(2025-06-01 23:59:59 UTC), 1440), 1439);
    }

    #[test]
    fn minute_index_coerces_offsets() {
        // 14:00 at +02:00 is 12:00 UTC.
        let t = datetime!(2025-06-01 14:00:00 +02:00);
        assert_eq!(minute_index(t, 1440), 12 * 60);
    }

    #[test]
    fn ring_distance_wraps() {
        assert_eq!(ring_distance(10, 10, 1440), 0);
        assert_eq!(ring_distance(10, 5, 1440), 5);
        assert_eq!(ring_distance(3, 1439, 1440), 4);
        assert_eq!(ring_distance(0, 1, 1440), 1439);
    }

    #[test]
    fn apply_delta_updates_all_covering_windows() {
        let now = datetime!(2025-06-01 12:00:00 UTC);
        let mut ts = TokenState::new(TokenKey::new(1, "0xa"), BUCKETS_PER_DAY, now);

        ts.apply_delta(minute_index(now, BUCKETS_PER_DAY), &buy_delta(100.0), now);

        let w = ts.windows();
        assert_eq!(w.w5m, w.w1h);
        assert_eq!(w.w1h, w.w24h);
        assert_eq!(w.w24h.vol_usd, 100.0);
        assert_eq!(w.w24h.trades, 1);
        assert_eq!(w.w24h.buy, 1);
        assert_eq!(w.w24h.sell, 0);
    }

    #[test]
    fn old_slot_counts_only_toward_wider_windows() {
        let now = datetime!(2025-06-01 12:00:00 UTC);
        let mut ts = TokenState::new(TokenKey::new(1, "0xa"), BUCKETS_PER_DAY, now);

        // Ten minutes old: out of 5m, inside 1h and 24h.
        let slot = minute_index(datetime!(2025-06-01 11:50:00 UTC), BUCKETS_PER_DAY);
        ts.apply_delta(slot, &buy_delta(50.0), now);

        let w = ts.windows();
        assert_eq!(w.w5m.trades, 0);
        assert_eq!(w.w1h.trades, 1);
        assert_eq!(w.w24h.trades, 1);

        // Two hours old: only 24h.
        let slot = minute_index(datetime!(2025-06-01 10:00:00 UTC), BUCKETS_PER_DAY);
        ts.apply_delta(slot, &buy_delta(25.0), now);

        let w = ts.windows();
        assert_eq!(w.w1h.vol_usd, 50.0);
        assert_eq!(w.w24h.vol_usd, 75.0);
    }

    #[test]
    fn recompute_matches_incremental_sums() {
        let now = datetime!(2025-06-01 12:00:00 UTC);
        let mut ts = TokenState::new(TokenKey::new(1, "0xa"), BUCKETS_PER_DAY, now);

        for offset_min in [0i64, 3, 30, 200] {
            let t = now - time::Duration::minutes(offset_min);
            ts.apply_delta(minute_index(t, BUCKETS_PER_DAY), &buy_delta(10.0), now);
        }

        let incremental = ts.windows();
        ts.recompute_windows(now);
        assert_eq!(ts.windows(), incremental);
    }

    #[test]
    fn w24h_equals_sum_of_slots() {
        let now = datetime!(2025-06-01 06:00:00 UTC);
        let mut ts = TokenState::new(TokenKey::new(1, "0xa"), BUCKETS_PER_DAY, now);

        for i in 0..100usize {
            ts.apply_delta(i * 14 % BUCKETS_PER_DAY, &buy_delta(1.0), now);
        }

        let total: i64 = ts.slots.iter().map(|s| s.trades).sum();
        assert_eq!(ts.w24h.trades, total);
    }

    #[test]
    fn reorg_delta_cancels_exactly() {
        let now = datetime!(2025-06-01 12:00:00 UTC);
        let mut ts = TokenState::new(TokenKey::new(1, "0xa"), BUCKETS_PER_DAY, now);
        let slot = minute_index(now, BUCKETS_PER_DAY);

        let delta = SlotDelta {
            vol_usd: 50.0,
            trades: 1,
            buys: 0,
            sells: 1,
        };
        ts.apply_delta(slot, &delta, now);
        ts.apply_delta(slot, &delta.negated(), now);

        assert_eq!(ts.windows(), Windows::default());
        assert!(ts.slots[slot].is_empty());
    }

    #[test]
    fn negative_counters_clamp_in_agg() {
        let now = datetime!(2025-06-01 12:00:00 UTC);
        let mut ts = TokenState::new(TokenKey::new(1, "0xa"), BUCKETS_PER_DAY, now);
        let slot = minute_index(now, BUCKETS_PER_DAY);

        // Compensation without its positive counterpart.
        ts.apply_delta(slot, &buy_delta(50.0).negated(), now);

        let w = ts.windows();
        assert_eq!(w.w24h.trades, 0);
        assert_eq!(w.w24h.vol_usd, -50.0);
        assert_eq!(ts.w24h.trades, -1);
    }
}
