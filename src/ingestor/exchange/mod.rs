pub mod binance;
pub mod bybit;
pub mod okx;

use anyhow::Result;

use crate::domain::TradeData;

/// Dispatches a raw WebSocket text frame to the right venue parser,
/// normalising Binance's "one trade per frame" shape to the same
/// `Vec<TradeData>` the multi-trade venues return.
pub fn parse_trades(exchange: &str, text: &str) -> Result<Vec<TradeData>> {
    match exchange {
        binance::EXCHANGE => binance::parse(text).map(|t| vec![t]),
        bybit::EXCHANGE => bybit::parse_all(text),
        okx::EXCHANGE => okx::parse_all(text),
        other => Err(anyhow::anyhow!("unknown exchange '{other}'")),
    }
}

pub fn subscribe_message(exchange: &str, symbols: &[String]) -> Result<String> {
    match exchange {
        binance::EXCHANGE => Ok(binance::subscribe_message(symbols)),
        bybit::EXCHANGE => Ok(bybit::subscribe_message(symbols)),
        okx::EXCHANGE => {
            let inst_ids: Vec<String> = symbols.iter().map(|s| to_okx_inst_id(s)).collect();
            Ok(okx::subscribe_message(&inst_ids))
        }
        other => Err(anyhow::anyhow!("unknown exchange '{other}'")),
    }
}

pub fn ws_url(exchange: &str, symbols: &[String]) -> Result<String> {
    match exchange {
        binance::EXCHANGE => Ok(binance::ws_url(symbols)),
        bybit::EXCHANGE => Ok(bybit::ws_url().to_string()),
        okx::EXCHANGE => Ok(okx::ws_url().to_string()),
        other => Err(anyhow::anyhow!("unknown exchange '{other}'")),
    }
}

/// OKX wants `BTC-USDT`; the rest of the system uses the hyphen-free
/// `BTCUSDT` form (see `okx::parse_one`'s note on the router's symbol
/// pattern). This is a best-effort split on the common USDT/USDC/BTC/ETH
/// quote suffixes; exotic pairs should be configured explicitly.
fn to_okx_inst_id(symbol: &str) -> String {
    for quote in ["USDT", "USDC", "BUSD", "BTC", "ETH"] {
        if let Some(base) = symbol.strip_suffix(quote) {
            if !base.is_empty() {
                return format!("{base}-{quote}");
            }
        }
    }
    symbol.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn okx_inst_id_splits_known_quote_suffixes() {
        assert_eq!(to_okx_inst_id("BTCUSDT"), "BTC-USDT");
        assert_eq!(to_okx_inst_id("ETHBTC"), "ETH-BTC");
    }
}
