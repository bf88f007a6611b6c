// =============================================================================
// PriceBin — one price-bucket entry in a footprint candle ("Aggs" entry)
// =============================================================================

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::rounding::round8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBin {
    pub tick_price: Decimal,
    pub buy_volume: Decimal,
    pub sell_volume: Decimal,
    pub total_volume: Decimal,
    pub trade_count: u64,
}

impl PriceBin {
    pub fn new(tick_price: Decimal) -> Self {
        PriceBin {
            tick_price,
            buy_volume: Decimal::ZERO,
            sell_volume: Decimal::ZERO,
            total_volume: Decimal::ZERO,
            trade_count: 0,
        }
    }

    pub fn apply(&mut self, quantity: Decimal, is_buy: bool) {
        if is_buy {
            self.buy_volume = round8(self.buy_volume + quantity);
        } else {
            self.sell_volume = round8(self.sell_volume + quantity);
        }
        self.total_volume = round8(self.buy_volume + self.sell_volume);
        self.trade_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn total_equals_buy_plus_sell() {
        let mut bin = PriceBin::new(dec!(100.05));
        bin.apply(dec!(2), true);
        bin.apply(dec!(1), false);
        assert_eq!(bin.total_volume, bin.buy_volume + bin.sell_volume);
        assert_eq!(bin.trade_count, 2);
    }
}
