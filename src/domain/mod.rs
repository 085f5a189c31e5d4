pub mod event;
pub mod id;

pub use event::{Agg, PatchWindows, Side, SwapEvent, TokenKey, TokenStatsPatch, Windows};
pub use id::{make_event_id, parse_event_id, ParsedEventId};
