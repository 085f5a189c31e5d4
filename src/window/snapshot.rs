//! Binary snapshot codec for warm restarts.
//!
//! Layout (all integers little-endian):
//! u16 version, i64 taken-at ms, i64 grace ms, i64 watermark ms (0 when the
//! watermark was never advanced), u32 token count, then per token: u32 chain
//! id, u16-length-prefixed address, u32 non-empty-slot count, per slot
//! u16 minute index + f64 vol + i64 trades + i64 buys + i64 sells, and an
//! i64 last-updated ms. Only non-empty slots are emitted, keeping snapshot
//! size proportional to active minutes per token.

use std::time::Duration;

use rustc_hash::FxHashMap;
use thiserror::Error;
use time::OffsetDateTime;

use crate::domain::TokenKey;
use crate::window::rolling::{SlotDelta, TokenState};

pub const SNAPSHOT_VERSION: u16 = 1;

#[derive(Debug, Error, PartialEq)]
pub enum SnapshotError {
    #[error("empty snapshot data")]
    Empty,
    #[error("unsupported snapshot version: {0}")]
    UnsupportedVersion(u16),
    #[error("snapshot truncated at byte {0}")]
    Truncated(usize),
    #[error("invalid timestamp in snapshot: {0}")]
    InvalidTimestamp(i64),
}

#[derive(Debug, PartialEq)]
pub struct DecodedSnapshot {
    pub state: FxHashMap<String, TokenState>,
    pub watermark: Option<OffsetDateTime>,
    pub taken_at: OffsetDateTime,
}

pub fn encode(
    state: &FxHashMap<String, TokenState>,
    watermark: Option<OffsetDateTime>,
    grace: Duration,
    taken_at: OffsetDateTime,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64 + state.len() * 128);

    buf.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
    buf.extend_from_slice(&unix_ms(taken_at).to_le_bytes());
    buf.extend_from_slice(&(grace.as_millis() as i64).to_le_bytes());
    buf.extend_from_slice(&watermark.map_or(0, unix_ms).to_le_bytes());
    buf.extend_from_slice(&(state.len() as u32).to_le_bytes());

    for ts in state.values() {
        buf.extend_from_slice(&ts.key.chain_id.to_le_bytes());

        let addr = ts.key.token_address.as_bytes();
        buf.extend_from_slice(&(addr.len() as u16).to_le_bytes());
        buf.extend_from_slice(addr);

        let occupied: Vec<(usize, &SlotDelta)> = ts
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| !slot.is_empty())
            .collect();

        buf.extend_from_slice(&(occupied.len() as u32).to_le_bytes());
        for (minute, slot) in occupied {
            buf.extend_from_slice(&(minute as u16).to_le_bytes());
            buf.extend_from_slice(&slot.vol_usd.to_le_bytes());
            buf.extend_from_slice(&slot.trades.to_le_bytes());
            buf.extend_from_slice(&slot.buys.to_le_bytes());
            buf.extend_from_slice(&slot.sells.to_le_bytes());
        }

        buf.extend_from_slice(&unix_ms(ts.last_updated).to_le_bytes());
    }

    buf
}

pub fn decode(data: &[u8], buckets_per_day: usize) -> Result<DecodedSnapshot, SnapshotError> {
    if data.is_empty() {
        return Err(SnapshotError::Empty);
    }

    let mut cur = Cursor::new(data);

    let version = cur.read_u16()?;
    if version != SNAPSHOT_VERSION {
        return Err(SnapshotError::UnsupportedVersion(version));
    }

    let taken_at = from_unix_ms(cur.read_i64()?)?;
    let _grace_ms = cur.read_i64()?;
    let watermark_ms = cur.read_i64()?;
    let watermark = if watermark_ms == 0 {
        None
    } else {
        Some(from_unix_ms(watermark_ms)?)
    };

    let token_count = cur.read_u32()? as usize;
    let mut state = FxHashMap::default();
    state.reserve(token_count);

    for _ in 0..token_count {
        let chain_id = cur.read_u32()?;
        let address = cur.read_string()?;
        let key = TokenKey::new(chain_id, &address);

        let mut ts = TokenState::new(key.clone(), buckets_per_day, taken_at);

        let slot_count = cur.read_u32()? as usize;
        for _ in 0..slot_count {
            let minute = cur.read_u16()? as usize;
            let slot = SlotDelta {
                vol_usd: cur.read_f64()?,
                trades: cur.read_i64()?,
                buys: cur.read_i64()?,
                sells: cur.read_i64()?,
            };
            // Out-of-range minutes can only come from a ring-size change;
            // drop them rather than fail the whole restore.
            if minute < buckets_per_day {
                ts.slots[minute] = slot;
            }
        }

        ts.last_updated = from_unix_ms(cur.read_i64()?)?;
        ts.recompute_windows(taken_at);
        state.insert(key.state_key(), ts);
    }

    Ok(DecodedSnapshot {
        state,
        watermark,
        taken_at,
    })
}

fn unix_ms(t: OffsetDateTime) -> i64 {
    (t.unix_timestamp_nanos() / 1_000_000) as i64
}

fn from_unix_ms(ms: i64) -> Result<OffsetDateTime, SnapshotError> {
    OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000)
        .map_err(|_| SnapshotError::InvalidTimestamp(ms))
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], SnapshotError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or(SnapshotError::Truncated(self.pos))?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn read_u16(&mut self) -> Result<u16, SnapshotError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn read_u32(&mut self) -> Result<u32, SnapshotError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_i64(&mut self) -> Result<i64, SnapshotError> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn read_f64(&mut self) -> Result<f64, SnapshotError> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn read_string(&mut self) -> Result<String, SnapshotError> {
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}
