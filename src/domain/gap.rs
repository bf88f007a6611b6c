// =============================================================================
// GapRecord — a missing contiguous range of trade_ids for one symbol/venue
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapRecord {
    pub id: Option<i64>,
    pub exchange: String,
    pub symbol: String,
    pub from_trade_id: i64,
    pub to_trade_id: i64,
    pub gap_size: i64,
    pub detected_at: DateTime<Utc>,
    pub synced: bool,
    pub synced_at: Option<DateTime<Utc>>,
}

impl GapRecord {
    /// `detected_at` is stamped by the caller (see note in
    /// `src/ipc/protocol.rs` about `Utc::now()` availability).
    ///
    /// `gap_size` counts the missing ids inclusively (`to - from + 1`); see
    /// DESIGN.md's Open Question decisions for why this, not the prose
    /// formula, is what's implemented.
    pub fn new(exchange: &str, symbol: &str, from: i64, to: i64, detected_at: DateTime<Utc>) -> Self {
        GapRecord {
            id: None,
            exchange: exchange.to_string(),
            symbol: symbol.to_string(),
            from_trade_id: from,
            to_trade_id: to,
            gap_size: to - from + 1,
            detected_at,
            synced: false,
            synced_at: None,
        }
    }

    pub fn identity(&self) -> (&str, &str, i64, i64) {
        (&self.exchange, &self.symbol, self.from_trade_id, self.to_trade_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gap_size_matches_scenario_4() {
        // trade_ids 1,2,3 then 7 => from=4, to=6, gap_size=3 (spec.md §8 scenario 4).
        let g = GapRecord::new("binance", "BTCUSDT", 4, 6, Utc::now());
        assert_eq!(g.gap_size, 3);
    }
}
