// =============================================================================
// TradeData — an immutable normalised trade record
// =============================================================================
//
// The sign of a trade (buy vs. sell) is derived solely from `is_buyer_maker`,
// never from price deltas, matching the venue's own semantics:
// `is_buyer_maker == true` means the resting order was a buy, so the
// aggressor sold — a "sell trade". `false` means the aggressor bought.
// This mirrors `market_data/trade_stream.rs::process_trade` exactly.
// =============================================================================

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeData {
    pub exchange: String,
    pub symbol: String,
    pub price: Decimal,
    pub quantity: Decimal,
    /// Milliseconds since epoch, exchange clock.
    pub timestamp: i64,
    /// Monotone within a symbol on a given venue; may wrap per venue contract.
    pub trade_id: i64,
    /// `true` ⇒ aggressor is seller ("sell trade"); `false` ⇒ "buy trade".
    pub is_buyer_maker: bool,
}

impl TradeData {
    pub fn is_sell(&self) -> bool {
        self.is_buyer_maker
    }

    pub fn is_buy(&self) -> bool {
        !self.is_buyer_maker
    }

    pub fn identity(&self) -> (String, String, i64) {
        (self.exchange.clone(), self.symbol.clone(), self.trade_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample(is_buyer_maker: bool) -> TradeData {
        TradeData {
            exchange: "binance".into(),
            symbol: "BTCUSDT".into(),
            price: dec!(100.05),
            quantity: dec!(2),
            timestamp: 1_700_000_000_000,
            trade_id: 1,
            is_buyer_maker,
        }
    }

    #[test]
    fn sign_derived_from_flag_not_price() {
        assert!(sample(false).is_buy());
        assert!(sample(true).is_sell());
    }
}
