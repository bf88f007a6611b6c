// =============================================================================
// FootprintCandle — OHLCV plus per-price-bin bid/ask volume histogram
// =============================================================================
//
// One candle for a single (exchange, symbol, timeframe, open_time) tuple.
// `apply_trade` is the per-trade algorithm from §4.3; invariants are
// re-asserted after each trade in debug builds only (the cheap monotonic
// ones — open_time stability and delta extrema — are always checked).
// =============================================================================

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::price_bin::PriceBin;
use crate::domain::rounding::round8;
use crate::domain::timeframe::Timeframe;
use crate::domain::trade::TradeData;
use crate::error::{FlowtraceError, FlowtraceResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FootprintCandle {
    pub exchange: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub open_time: i64,
    pub close_time: i64,

    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,

    pub volume: Decimal,
    pub buy_volume: Decimal,
    pub sell_volume: Decimal,
    pub quote_volume: Decimal,
    pub buy_quote_volume: Decimal,
    pub sell_quote_volume: Decimal,

    pub delta: Decimal,
    pub delta_max: Decimal,
    pub delta_min: Decimal,

    pub trade_count: u64,
    pub first_trade_id: i64,
    pub last_trade_id: i64,

    pub tick_value: Decimal,
    pub bin_multiplier: u32,
    pub bins: Vec<PriceBin>,

    pub closed: bool,
}

impl FootprintCandle {
    /// A fresh, unopened candle for the given identity.
    pub fn empty(
        exchange: &str,
        symbol: &str,
        timeframe: Timeframe,
        tick_value: Decimal,
        bin_multiplier: u32,
    ) -> Self {
        FootprintCandle {
            exchange: exchange.to_string(),
            symbol: symbol.to_string(),
            timeframe,
            open_time: 0,
            close_time: 0,
            open: Decimal::ZERO,
            high: Decimal::ZERO,
            low: Decimal::ZERO,
            close: Decimal::ZERO,
            volume: Decimal::ZERO,
            buy_volume: Decimal::ZERO,
            sell_volume: Decimal::ZERO,
            quote_volume: Decimal::ZERO,
            buy_quote_volume: Decimal::ZERO,
            sell_quote_volume: Decimal::ZERO,
            delta: Decimal::ZERO,
            delta_max: Decimal::ZERO,
            delta_min: Decimal::ZERO,
            trade_count: 0,
            first_trade_id: 0,
            last_trade_id: 0,
            tick_value,
            bin_multiplier: bin_multiplier.max(1),
            bins: Vec::new(),
            closed: false,
        }
    }

    /// Fresh candle for the period immediately after this one (typed
    /// `clone()` equivalent — never a deep recursive copy of unknown
    /// structure). `bin_multiplier` is passed explicitly rather than
    /// copied from `self` so a symbol's adapted multiplier (§4.3
    /// "Bin-multiplier adaptation") takes effect on the next candle
    /// instead of being silently dropped at rollover.
    pub fn next_period(&self, bin_multiplier: u32) -> Self {
        let mut next = Self::empty(
            &self.exchange,
            &self.symbol,
            self.timeframe,
            self.tick_value,
            bin_multiplier,
        );
        next.open_time = self.open_time + self.timeframe.period_ms();
        next
    }

    fn bin_width(&self) -> Decimal {
        self.tick_value * Decimal::from(self.bin_multiplier)
    }

    fn bin_price_for(&self, price: Decimal) -> Decimal {
        let width = self.bin_width();
        (price / width).floor() * width
    }

    fn locate_bin_mut(&mut self, bin_price: Decimal) -> &mut PriceBin {
        match self.bins.binary_search_by(|b| b.tick_price.cmp(&bin_price)) {
            Ok(idx) => &mut self.bins[idx],
            Err(idx) => {
                self.bins.insert(idx, PriceBin::new(bin_price));
                &mut self.bins[idx]
            }
        }
    }

    /// §4.3 per-trade algorithm, applied to this single timeframe.
    pub fn apply_trade(&mut self, trade: &TradeData) -> FlowtraceResult<()> {
        if self.closed {
            return Err(FlowtraceError::InvariantViolated(
                "apply_trade called on a closed candle".to_string(),
            ));
        }

        let period_ms = self.timeframe.period_ms();
        if self.open_time == 0 {
            self.open_time = self.timeframe.open_time_for(trade.timestamp);
            self.open = trade.price;
            self.high = trade.price;
            self.low = trade.price;
            self.close = trade.price;
        }

        self.high = self.high.max(trade.price);
        self.low = self.low.min(trade.price);
        self.close = trade.price;

        let is_buy = trade.is_buy();
        let quote = round8(trade.price * trade.quantity);

        self.volume = round8(self.volume + trade.quantity);
        self.quote_volume = round8(self.quote_volume + quote);
        if is_buy {
            self.buy_volume = round8(self.buy_volume + trade.quantity);
            self.buy_quote_volume = round8(self.buy_quote_volume + quote);
        } else {
            self.sell_volume = round8(self.sell_volume + trade.quantity);
            self.sell_quote_volume = round8(self.sell_quote_volume + quote);
        }

        self.trade_count += 1;
        if self.trade_count == 1 {
            self.first_trade_id = trade.trade_id;
        }
        self.last_trade_id = trade.trade_id;

        self.delta = round8(self.buy_volume - self.sell_volume);
        if self.trade_count == 1 {
            self.delta_max = self.delta;
            self.delta_min = self.delta;
        } else {
            self.delta_max = self.delta_max.max(self.delta);
            self.delta_min = self.delta_min.min(self.delta);
        }

        let bin_price = self.bin_price_for(trade.price);
        self.locate_bin_mut(bin_price).apply(trade.quantity, is_buy);

        debug_assert!(self.open_time % period_ms == 0, "open_time not period-aligned");
        self.check_invariants_debug();

        Ok(())
    }

    /// Whether `ts_ms` has moved past this candle's period (§4.3 completion
    /// detection). `ts_ms == open_time + period_ms` belongs to the next
    /// candle; `open_time + period_ms - 1` still belongs to this one.
    pub fn is_elapsed_at(&self, ts_ms: i64) -> bool {
        self.open_time != 0 && ts_ms >= self.open_time + self.timeframe.period_ms()
    }

    /// Seal the candle: §4.3 step 1 of completion detection.
    pub fn seal(&mut self) {
        self.close_time = self.open_time + self.timeframe.period_ms() - 1;
        self.closed = true;
    }

    #[cfg(debug_assertions)]
    fn check_invariants_debug(&self) {
        assert!(self.low <= self.open && self.open <= self.high, "open out of [low,high]");
        assert!(self.low <= self.close && self.close <= self.high, "close out of [low,high]");
        assert!(self.delta_max >= self.delta && self.delta >= self.delta_min, "delta extrema violated");
        assert!(self.first_trade_id <= self.last_trade_id, "first_trade_id > last_trade_id");

        let bin_total: Decimal = self.bins.iter().map(|b| b.total_volume).sum();
        let bin_buy: Decimal = self.bins.iter().map(|b| b.buy_volume).sum();
        let bin_sell: Decimal = self.bins.iter().map(|b| b.sell_volume).sum();
        let tolerance = self.tick_value.max(Decimal::new(1, 8));
        assert!(
            (round8(bin_total) - self.volume).abs() <= tolerance,
            "sum(bin.total_volume) diverged from volume"
        );
        assert!(
            (round8(bin_buy) - self.buy_volume).abs() <= tolerance,
            "sum(bin.buy_volume) diverged from buy_volume"
        );
        assert!(
            (round8(bin_sell) - self.sell_volume).abs() <= tolerance,
            "sum(bin.sell_volume) diverged from sell_volume"
        );
    }

    #[cfg(not(debug_assertions))]
    fn check_invariants_debug(&self) {}
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
    fn scenario_single_trade() {
        let mut c = FootprintCandle::empty("binance", "BTCUSDT", Timeframe::S1, dec!(0.01), 1);
        c.apply_trade(&trade(dec!(100.05), dec!(2), false, 1_700_000_000_000, 1))
            .unwrap();

        assert_eq!(c.open_time, 1_700_000_000_000);
        assert_eq!(c.open, dec!(100.05));
        assert_eq!(c.high, dec!(100.05));
        assert_eq!(c.low, dec!(100.05));
        assert_eq!(c.close, dec!(100.05));
        assert_eq!(c.volume, dec!(2));
        assert_eq!(c.buy_volume, dec!(2));
        assert_eq!(c.sell_volume, dec!(0));
        assert_eq!(c.delta, dec!(2));
        assert_eq!(c.trade_count, 1);
        assert_eq!(c.bins.len(), 1);
        assert_eq!(c.bins[0].tick_price, dec!(100.05));
        assert_eq!(c.bins[0].buy_volume, dec!(2));
        assert_eq!(c.bins[0].total_volume, dec!(2));
    }

    #[test]
    fn scenario_buy_then_sell_same_second() {
        let mut c = FootprintCandle::empty("binance", "BTCUSDT", Timeframe::S1, dec!(0.01), 1);
        c.apply_trade(&trade(dec!(100.05), dec!(2), false, 1_700_000_000_000, 1))
            .unwrap();
        c.apply_trade(&trade(dec!(100.10), dec!(1), true, 1_700_000_000_500, 2))
            .unwrap();

        assert_eq!(c.high, dec!(100.10));
        assert_eq!(c.close, dec!(100.10));
        assert_eq!(c.volume, dec!(3));
        assert_eq!(c.buy_volume, dec!(2));
        assert_eq!(c.sell_volume, dec!(1));
        assert_eq!(c.delta, dec!(1));
        assert_eq!(c.delta_max, dec!(2));
        assert_eq!(c.delta_min, dec!(1));
        assert_eq!(c.trade_count, 2);
        assert_eq!(c.bins.len(), 2);
    }

    #[test]
    fn scenario_candle_rollover_boundary() {
        let mut c = FootprintCandle::empty("binance", "BTCUSDT", Timeframe::S1, dec!(0.01), 1);
        c.apply_trade(&trade(dec!(100.0), dec!(1), false, 1_700_000_000_999, 1))
            .unwrap();
        assert!(!c.is_elapsed_at(1_700_000_000_999));
        assert!(c.is_elapsed_at(1_700_000_001_000));

        c.seal();
        assert_eq!(c.close_time, 1_700_000_000_999);
        assert!(c.closed);

        let next = c.next_period(c.bin_multiplier);
        assert_eq!(next.open_time, 1_700_000_001_000);
    }

    #[test]
    fn first_trade_lands_in_expected_bin() {
        let mut c = FootprintCandle::empty("binance", "BTCUSDT", Timeframe::S1, dec!(0.01), 5);
        // width = 0.05; price = 0.05 * 3 = 0.15 should land in bin k=3.
        c.apply_trade(&trade(dec!(0.15), dec!(1), false, 1_700_000_000_000, 1))
            .unwrap();
        assert_eq!(c.bins[0].tick_price, dec!(0.15));
    }

    #[test]
    fn closed_candle_rejects_further_trades() {
        let mut c = FootprintCandle::empty("binance", "BTCUSDT", Timeframe::S1, dec!(0.01), 1);
        c.apply_trade(&trade(dec!(100.0), dec!(1), false, 1_700_000_000_000, 1))
            .unwrap();
        c.seal();
        let err = c
            .apply_trade(&trade(dec!(100.0), dec!(1), false, 1_700_000_000_500, 2))
            .unwrap_err();
        assert!(matches!(err, FlowtraceError::InvariantViolated(_)));
    }
}
