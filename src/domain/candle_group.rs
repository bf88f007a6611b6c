// =============================================================================
// CandleGroup — per-(exchange, symbol) map of timeframe -> FootprintCandle
// =============================================================================
//
// The 1-second candle is the base ingestion candle. Every timeframe is
// updated independently by the same trade (see DESIGN.md Open Question 1);
// rollup from completed 1s candles exists only as a read-only
// reconciliation path in `engine::rollup`, never on the live path.
// =============================================================================

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::footprint_candle::FootprintCandle;
use crate::domain::timeframe::Timeframe;
use crate::domain::trade::TradeData;
use crate::error::FlowtraceResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandleGroup {
    pub exchange: String,
    pub symbol: String,
    pub current: BTreeMap<Timeframe, FootprintCandle>,
    pub last_trade_id: i64,
    /// The multiplier applied to every timeframe's *next* candle at
    /// rollover. Tracks the engine's live bin-multiplier adaptation
    /// (§4.3); already-open candles keep the multiplier they opened
    /// with, same as a live exchange tick-size change only taking
    /// effect on the next bar.
    #[serde(default = "default_bin_multiplier")]
    pub bin_multiplier: u32,
    /// Set whenever a candle in this group has changed since the last
    /// checkpoint flush; cleared by the checkpoint writer on success.
    #[serde(default)]
    pub dirty: bool,
}

fn default_bin_multiplier() -> u32 {
    1
}

impl CandleGroup {
    pub fn new(exchange: &str, symbol: &str, tick_value: Decimal, bin_multiplier: u32) -> Self {
        let bin_multiplier = bin_multiplier.max(1);
        let current = Timeframe::ALL
            .into_iter()
            .map(|tf| {
                (
                    tf,
                    FootprintCandle::empty(exchange, symbol, tf, tick_value, bin_multiplier),
                )
            })
            .collect();
        CandleGroup {
            exchange: exchange.to_string(),
            symbol: symbol.to_string(),
            current,
            last_trade_id: 0,
            bin_multiplier,
            dirty: false,
        }
    }

    /// Record an adapted bin multiplier (§4.3) for this symbol. Takes
    /// effect on the next candle opened per timeframe; currently open
    /// candles keep binning at the multiplier they started with.
    pub fn set_bin_multiplier(&mut self, bin_multiplier: u32) {
        self.bin_multiplier = bin_multiplier.max(1);
    }

    /// Apply one trade to every timeframe independently, returning the
    /// timeframes whose candle completed (sealed) as part of this trade, if
    /// any, paired with the sealed candle ready to publish/store.
    pub fn apply_trade(&mut self, trade: &TradeData) -> FlowtraceResult<Vec<FootprintCandle>> {
        let mut sealed = Vec::new();
        for tf in Timeframe::ALL {
            let candle = self.current.get_mut(&tf).expect("all timeframes present");
            if candle.is_elapsed_at(trade.timestamp) {
                candle.seal();
                sealed.push(candle.clone());
                let next = candle.next_period(self.bin_multiplier);
                self.current.insert(tf, next);
                let candle = self.current.get_mut(&tf).expect("all timeframes present");
                candle.apply_trade(trade)?;
            } else {
                candle.apply_trade(trade)?;
            }
        }
        self.last_trade_id = trade.trade_id;
        self.dirty = true;
        Ok(sealed)
    }

    /// Force-close every open timeframe candle at `now_ms`, used when the
    /// engine idles past a period boundary with no new trade to drive it.
    pub fn seal_elapsed(&mut self, now_ms: i64) -> Vec<FootprintCandle> {
        let mut sealed = Vec::new();
        for tf in Timeframe::ALL {
            let candle = self.current.get_mut(&tf).expect("all timeframes present");
            if candle.is_elapsed_at(now_ms) {
                candle.seal();
                sealed.push(candle.clone());
                let next = candle.next_period(self.bin_multiplier);
                self.current.insert(tf, next);
                self.dirty = true;
            }
        }
        sealed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn trade(price: Decimal, qty: Decimal, is_buyer_maker: bool, ts: i64, id: i64) -> TradeData {
        TradeData {
            exchange: "binance".into(),
            symbol: "BTCUSDT".into(),
            price,
            quantity: qty,
            timestamp: ts,
            trade_id: id,
            is_buyer_maker,
        }
    }

    #[test]
    fn every_timeframe_updates_independently() {
        let mut group = CandleGroup::new("binance", "BTCUSDT", dec!(0.01), 1);
        group
            .apply_trade(&trade(dec!(100.0), dec!(1), false, 1_700_000_000_000, 1))
            .unwrap();
        for tf in Timeframe::ALL {
            let c = &group.current[&tf];
            assert_eq!(c.volume, dec!(1));
            assert_eq!(c.open_time, tf.open_time_for(1_700_000_000_000));
        }
    }

    #[test]
    fn gap_detection_via_last_trade_id() {
        let mut group = CandleGroup::new("binance", "BTCUSDT", dec!(0.01), 1);
        for id in 1..=3 {
            group
                .apply_trade(&trade(dec!(100.0), dec!(1), false, 1_700_000_000_000, id))
                .unwrap();
        }
        assert_eq!(group.last_trade_id, 3);
    }
}
