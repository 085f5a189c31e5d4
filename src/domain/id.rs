//! Canonical event id helpers.
//!
//! EventID = `"<chain_id>:<tx_hash>:<log_index>"` with a lowercase tx hash.

use anyhow::{anyhow, Context};

pub fn make_event_id(chain_id: u32, tx_hash: &str, log_index: u32) -> String {
    format!("{}:{}:{}", chain_id, tx_hash.to_lowercase(), log_index)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEventId {
    pub chain_id: u32,
    pub tx_hash: String,
    pub log_index: u32,
}

pub fn parse_event_id(id: &str) -> anyhow::Result<ParsedEventId> {
    let mut parts = id.splitn(3, ':');
    let (chain, tx, log) = match (parts.next(), parts.next(), parts.next()) {
        (Some(chain), Some(tx), Some(log)) if !tx.is_empty() => (chain, tx, log),
        _ => return Err(anyhow!("invalid event_id format: {id}")),
    };

    Ok(ParsedEventId {
        chain_id: chain.parse().context("invalid chain_id")?,
        tx_hash: tx.to_lowercase(),
        log_index: log.parse().context("invalid log_index")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_lowercases_tx_hash() {
        assert_eq!(make_event_id(1, "0xABCDEF", 7), "1:0xabcdef:7");
    }

    #[test]
    fn parse_round_trip() {
        let id = make_event_id(137, "0xdeadbeef", 42);
        let parsed = parse_event_id(&id).unwrap();
        assert_eq!(
            parsed,
            ParsedEventId {
                chain_id: 137,
                tx_hash: "0xdeadbeef".to_string(),
                log_index: 42,
            }
        );
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!(parse_event_id("1:0xabc").is_err());
        assert!(parse_event_id("x:0xabc:1").is_err());
        assert!(parse_event_id("1::1").is_err());
        assert!(parse_event_id("1:0xabc:notanumber").is_err());
    }
}
