// =============================================================================
// Candle Engine — per-worker, per-symbol trade application
// =============================================================================
//
// Single-threaded per worker; trade application for one symbol is strictly
// serial and non-suspending (§5). `WorkerRuntime` owns every `CandleGroup`
// assigned to its worker and the small amount of rate-limiting state needed
// to throttle `candle_update` events to once per 250 ms per (symbol,
// timeframe), per §4.3.
// =============================================================================

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;

use crate::domain::{CandleGroup, FootprintCandle, GapRecord, Timeframe, TradeData};
use crate::error::FlowtraceResult;

/// Target bin count from §4.3: "target ≈200 bins across the daily range".
pub const BINS_MAX: u32 = 200;
/// Lower guard band below which the multiplier is recalculated even though
/// it still satisfies `BINS_MAX` — unspecified by spec.md; chosen so
/// recalculation triggers well before bins become too coarse to be useful
/// (documented in DESIGN.md as an implementer decision).
pub const BINS_MIN: u32 = 50;

const CANDLE_UPDATE_THROTTLE: Duration = Duration::from_millis(250);

/// Smallest integer `m >= 1` such that `price / (tick_value * m) <= BINS_MAX`.
pub fn optimal_bin_multiplier(price: Decimal, tick_value: Decimal) -> u32 {
    if tick_value <= Decimal::ZERO || price <= Decimal::ZERO {
        return 1;
    }
    let mut m: u32 = 1;
    loop {
        let implied_bins = price / (tick_value * Decimal::from(m));
        if implied_bins <= Decimal::from(BINS_MAX) {
            return m;
        }
        m += 1;
        if m > 1_000_000 {
            return m;
        }
    }
}

fn implied_bin_count(price: Decimal, tick_value: Decimal, bin_multiplier: u32) -> u32 {
    if tick_value <= Decimal::ZERO || bin_multiplier == 0 {
        return 0;
    }
    let width = tick_value * Decimal::from(bin_multiplier);
    if width <= Decimal::ZERO {
        return 0;
    }
    (price / width).round().try_into().unwrap_or(0)
}

pub struct SymbolConfig {
    pub tick_value: Decimal,
    pub bin_multiplier: u32,
}

pub struct ProcessOutcome {
    pub sealed: Vec<FootprintCandle>,
    pub gap: Option<GapRecord>,
    /// (symbol, timeframe) pairs whose throttle window allows a fresh
    /// `candle_update` event to be published this batch.
    pub updates_to_publish: Vec<(String, Timeframe)>,
}

pub struct WorkerRuntime {
    pub worker_id: String,
    groups: HashMap<String, CandleGroup>,
    configs: HashMap<String, SymbolConfig>,
    last_update_emit: HashMap<(String, Timeframe), Instant>,
}

impl WorkerRuntime {
    pub fn new(worker_id: String) -> Self {
        WorkerRuntime {
            worker_id,
            groups: HashMap::new(),
            configs: HashMap::new(),
            last_update_emit: HashMap::new(),
        }
    }

    pub fn assigned_symbols(&self) -> Vec<String> {
        self.groups.keys().cloned().collect()
    }

    /// §4.3 "On initialising a symbol": compute the bin multiplier from the
    /// first known price if the caller doesn't already have one persisted.
    pub fn initialize_symbol(&mut self, exchange: &str, symbol: &str, tick_value: Decimal, bin_multiplier: Option<u32>, reference_price: Decimal) {
        let multiplier = bin_multiplier
            .filter(|m| *m > 0)
            .unwrap_or_else(|| optimal_bin_multiplier(reference_price, tick_value));
        self.configs.insert(symbol.to_string(), SymbolConfig { tick_value, bin_multiplier: multiplier });
        self.groups
            .entry(symbol.to_string())
            .or_insert_with(|| CandleGroup::new(exchange, symbol, tick_value, multiplier));
    }

    pub fn restore_group(&mut self, symbol: &str, group: CandleGroup, tick_value: Decimal, bin_multiplier: u32) {
        // The checkpointed group's own `bin_multiplier` reflects whatever
        // adaptation (§4.3) was last applied before the crash/restart; it
        // is the source of truth over the caller-supplied default.
        let bin_multiplier = if group.bin_multiplier > 0 { group.bin_multiplier } else { bin_multiplier };
        self.configs.insert(symbol.to_string(), SymbolConfig { tick_value, bin_multiplier });
        self.groups.insert(symbol.to_string(), group);
    }

    pub fn checkpoint_state(&self, symbol: &str) -> Option<serde_json::Value> {
        self.groups.get(symbol).map(|g| serde_json::to_value(g).expect("CandleGroup always serializable"))
    }

    pub fn dirty_symbols(&self) -> Vec<String> {
        self.groups
            .iter()
            .filter(|(_, g)| g.dirty)
            .map(|(symbol, _)| symbol.clone())
            .collect()
    }

    pub fn clear_dirty(&mut self, symbol: &str) {
        if let Some(group) = self.groups.get_mut(symbol) {
            group.dirty = false;
        }
    }

    /// Recompute the bin multiplier if the latest price has moved the
    /// implied bin count outside `[BINS_MIN, BINS_MAX]` (§4.3), and
    /// propagate it to the symbol's `CandleGroup` so the next candle
    /// opened per timeframe actually bins at the new width — recomputing
    /// only `SymbolConfig` and never reaching the group left adaptation
    /// a no-op.
    fn maybe_adapt_bin_multiplier(&mut self, symbol: &str, price: Decimal) {
        let Some(config) = self.configs.get_mut(symbol) else { return };
        let implied = implied_bin_count(price, config.tick_value, config.bin_multiplier);
        if implied == 0 || implied > BINS_MAX || implied < BINS_MIN {
            let adapted = optimal_bin_multiplier(price, config.tick_value);
            config.bin_multiplier = adapted;
            if let Some(group) = self.groups.get_mut(symbol) {
                group.set_bin_multiplier(adapted);
            }
        }
    }

    /// Apply a batch of trades for one symbol (§4.3 Inputs:
    /// `ProcessTradeRequest{symbol, trades[]}`). Out-of-order trades
    /// (`trade_id <= last_trade_id`) are discarded; a jump is recorded as a
    /// gap (§4.3 Gap detection, inclusive-count resolved in DESIGN.md).
    pub fn process_trades(&mut self, exchange: &str, symbol: &str, trades: &[TradeData]) -> FlowtraceResult<ProcessOutcome> {
        if !self.groups.contains_key(symbol) {
            return Err(crate::error::FlowtraceError::Precondition(format!(
                "symbol '{symbol}' was not initialized before trades arrived"
            )));
        }

        let mut sealed = Vec::new();
        let mut gap = None;

        for trade in trades {
            self.maybe_adapt_bin_multiplier(symbol, trade.price);

            let group = self.groups.get_mut(symbol).expect("initialized above");
            if group.last_trade_id != 0 && trade.trade_id <= group.last_trade_id {
                continue; // out-of-order, discard
            }
            if group.last_trade_id != 0 && trade.trade_id > group.last_trade_id + 1 {
                gap = Some(GapRecord::new(
                    exchange,
                    symbol,
                    group.last_trade_id + 1,
                    trade.trade_id - 1,
                    chrono::Utc::now(),
                ));
            }

            let newly_sealed = group.apply_trade(trade)?;
            sealed.extend(newly_sealed);
        }

        let mut updates_to_publish = Vec::new();
        let now = Instant::now();
        for tf in Timeframe::ALL {
            let key = (symbol.to_string(), tf);
            let allowed = self
                .last_update_emit
                .get(&key)
                .map(|last| now.duration_since(*last) >= CANDLE_UPDATE_THROTTLE)
                .unwrap_or(true);
            if allowed {
                self.last_update_emit.insert(key, now);
                updates_to_publish.push((symbol.to_string(), tf));
            }
        }

        Ok(ProcessOutcome { sealed, gap, updates_to_publish })
    }

    /// Idle-path completion check: called on a timer even when no trade has
    /// arrived, so candles still close at their period boundary.
    pub fn seal_elapsed(&mut self, now_ms: i64) -> Vec<(String, Vec<FootprintCandle>)> {
        self.groups
            .iter_mut()
            .filter_map(|(symbol, group)| {
                let sealed = group.seal_elapsed(now_ms);
                if sealed.is_empty() {
                    None
                } else {
                    Some((symbol.clone(), sealed))
                }
            })
            .collect()
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
    fn optimal_bin_multiplier_targets_bins_max() {
        let m = optimal_bin_multiplier(dec!(60000), dec!(0.01));
        let implied = implied_bin_count(dec!(60000), dec!(0.01), m);
        assert!(implied <= BINS_MAX);
    }

    #[test]
    fn gap_detection_scenario_4() {
        let mut runtime = WorkerRuntime::new("worker_0".to_string());
        runtime.initialize_symbol("binance", "BTCUSDT", dec!(0.01), Some(1), dec!(100));
        for id in 1..=3 {
            runtime
                .process_trades("binance", "BTCUSDT", &[trade(dec!(100.0), dec!(1), false, 1_700_000_000_000, id)])
                .unwrap();
        }
        let outcome = runtime
            .process_trades("binance", "BTCUSDT", &[trade(dec!(100.0), dec!(1), false, 1_700_000_000_100, 7)])
            .unwrap();
        let gap = outcome.gap.unwrap();
        assert_eq!(gap.from_trade_id, 4);
        assert_eq!(gap.to_trade_id, 6);
        assert_eq!(gap.gap_size, 3);
    }

    #[test]
    fn out_of_order_trade_is_discarded() {
        let mut runtime = WorkerRuntime::new("worker_0".to_string());
        runtime.initialize_symbol("binance", "BTCUSDT", dec!(0.01), Some(1), dec!(100));
        runtime
            .process_trades("binance", "BTCUSDT", &[trade(dec!(100.0), dec!(1), false, 1_700_000_000_000, 5)])
            .unwrap();
        runtime
            .process_trades("binance", "BTCUSDT", &[trade(dec!(999.0), dec!(1), false, 1_700_000_000_100, 3)])
            .unwrap();
        let state = runtime.checkpoint_state("BTCUSDT").unwrap();
        let group: CandleGroup = serde_json::from_value(state).unwrap();
        assert_eq!(group.last_trade_id, 5);
    }

    #[test]
    fn adapted_bin_multiplier_takes_effect_on_next_candle() {
        let mut runtime = WorkerRuntime::new("worker_0".to_string());
        // tick_value=0.01, bin_multiplier=1 at price=100 implies 10_000 bins,
        // far above BINS_MAX, so the very first trade should trigger adaptation.
        runtime.initialize_symbol("binance", "BTCUSDT", dec!(0.01), Some(1), dec!(100));
        runtime
            .process_trades("binance", "BTCUSDT", &[trade(dec!(100.0), dec!(1), false, 1_700_000_000_000, 1)])
            .unwrap();

        let state = runtime.checkpoint_state("BTCUSDT").unwrap();
        let group: CandleGroup = serde_json::from_value(state).unwrap();
        // the already-open S1 candle keeps binning at its original width...
        assert_eq!(group.current[&Timeframe::S1].bin_multiplier, 1);
        // ...but the group's adapted multiplier is ready for the next one.
        let adapted = group.bin_multiplier;
        assert!(adapted > 1, "adaptation should have widened the bins");
        assert!(implied_bin_count(dec!(100.0), dec!(0.01), adapted) <= BINS_MAX);

        runtime.seal_elapsed(1_700_000_001_000);
        let state = runtime.checkpoint_state("BTCUSDT").unwrap();
        let group: CandleGroup = serde_json::from_value(state).unwrap();
        assert_eq!(group.current[&Timeframe::S1].bin_multiplier, adapted);
    }

    #[test]
    fn update_throttle_allows_only_one_per_window() {
        let mut runtime = WorkerRuntime::new("worker_0".to_string());
        runtime.initialize_symbol("binance", "BTCUSDT", dec!(0.01), Some(1), dec!(100));
        let first = runtime
            .process_trades("binance", "BTCUSDT", &[trade(dec!(100.0), dec!(1), false, 1_700_000_000_000, 1)])
            .unwrap();
        assert!(!first.updates_to_publish.is_empty());

        let second = runtime
            .process_trades("binance", "BTCUSDT", &[trade(dec!(100.0), dec!(1), false, 1_700_000_000_001, 2)])
            .unwrap();
        assert!(second.updates_to_publish.is_empty());
    }
}
