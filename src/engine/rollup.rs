// =============================================================================
// Rollup reconciliation — read-only, never on the live trade-application path
// =============================================================================
//
// spec.md §9 leaves open whether the source's `rollup` path is ever invoked
// live or only for historical rebuild. This crate's decision (see
// DESIGN.md): every timeframe is updated independently on the live path
// (`engine::WorkerRuntime::process_trades`); `reconcile_from_1s` exists
// solely to verify — in tests and in an explicit historical-rebuild entry
// point — that independent application agrees with a roll-up of completed
// 1-second candles, per the CandleGroup invariant in spec.md §3.
// =============================================================================

use crate::domain::rounding::round8;
use crate::domain::{FootprintCandle, PriceBin, Timeframe};
use crate::error::{FlowtraceError, FlowtraceResult};

/// Build the coarser-timeframe candle that a roll-up of `one_second`
/// candles (all sharing the target timeframe's window) would produce.
pub fn reconcile_from_1s(
    one_second: &[FootprintCandle],
    target: Timeframe,
) -> FlowtraceResult<FootprintCandle> {
    let first = one_second
        .first()
        .ok_or_else(|| FlowtraceError::Precondition("reconcile_from_1s requires at least one candle".to_string()))?;

    let open_time = target.open_time_for(first.open_time);
    let mut rolled = FootprintCandle::empty(&first.exchange, &first.symbol, target, first.tick_value, first.bin_multiplier);
    rolled.open_time = open_time;
    rolled.close_time = open_time + target.period_ms() - 1;
    rolled.open = first.open;
    rolled.high = first.high;
    rolled.low = first.low;
    rolled.close = first.close;

    for (i, candle) in one_second.iter().enumerate() {
        if candle.timeframe != Timeframe::S1 {
            return Err(FlowtraceError::Precondition("reconcile_from_1s requires 1s input candles".to_string()));
        }
        if target.open_time_for(candle.open_time) != open_time {
            return Err(FlowtraceError::Precondition("input candle falls outside the target window".to_string()));
        }

        rolled.high = rolled.high.max(candle.high);
        rolled.low = rolled.low.min(candle.low);
        rolled.close = candle.close;

        rolled.volume = round8(rolled.volume + candle.volume);
        rolled.buy_volume = round8(rolled.buy_volume + candle.buy_volume);
        rolled.sell_volume = round8(rolled.sell_volume + candle.sell_volume);
        rolled.quote_volume = round8(rolled.quote_volume + candle.quote_volume);
        rolled.buy_quote_volume = round8(rolled.buy_quote_volume + candle.buy_quote_volume);
        rolled.sell_quote_volume = round8(rolled.sell_quote_volume + candle.sell_quote_volume);
        rolled.delta = round8(rolled.buy_volume - rolled.sell_volume);
        rolled.delta_max = rolled.delta_max.max(rolled.delta);
        rolled.delta_min = if i == 0 { rolled.delta } else { rolled.delta_min.min(rolled.delta) };
        rolled.trade_count += candle.trade_count;
        if i == 0 {
            rolled.first_trade_id = candle.first_trade_id;
        }
        rolled.last_trade_id = candle.last_trade_id;

        for bin in &candle.bins {
            merge_bin(&mut rolled.bins, bin);
        }
    }

    Ok(rolled)
}

fn merge_bin(bins: &mut Vec<PriceBin>, incoming: &PriceBin) {
    match bins.binary_search_by(|b| b.tick_price.cmp(&incoming.tick_price)) {
        Ok(idx) => {
            let bin = &mut bins[idx];
            bin.buy_volume = round8(bin.buy_volume + incoming.buy_volume);
            bin.sell_volume = round8(bin.sell_volume + incoming.sell_volume);
            bin.total_volume = round8(bin.buy_volume + bin.sell_volume);
            bin.trade_count += incoming.trade_count;
        }
        Err(idx) => bins.insert(idx, incoming.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TradeData;
    use rust_decimal::Decimal;
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
    fn rollup_of_1s_candles_matches_independent_5s_application() {
        use crate::domain::CandleGroup;

        let mut group = CandleGroup::new("binance", "BTCUSDT", dec!(0.01), 1);
        let mut sealed_1s = Vec::new();
        for second in 0..5 {
            let ts = 1_700_000_000_000 + second * 1000;
            let sealed = group.apply_trade(&trade(dec!(100.0) + Decimal::from(second), dec!(1), false, ts, second + 1)).unwrap();
            sealed_1s.extend(sealed.into_iter().filter(|c| c.timeframe == Timeframe::S1));
        }
        // Force-close the 5 one-second candles that are still open.
        let forced = group.seal_elapsed(1_700_000_005_000);
        sealed_1s.extend(forced.into_iter().filter(|c| c.timeframe == Timeframe::S1));

        let rolled = reconcile_from_1s(&sealed_1s, Timeframe::S5).unwrap();
        let independent = &group.current[&Timeframe::S5];

        assert_eq!(rolled.volume, independent.volume);
        assert_eq!(rolled.buy_volume, independent.buy_volume);
        assert_eq!(rolled.trade_count, independent.trade_count);
    }
}
