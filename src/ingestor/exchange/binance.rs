// =============================================================================
// Binance trade-stream adapter
// =============================================================================
//
// Parses `aggTrade` frames off the combined WebSocket stream. Grounded on
// `market_data/trade_stream.rs::parse_agg_trade`, generalized to return a
// normalised `TradeData` instead of a raw `(f64, f64, bool)` tuple.
// =============================================================================

use anyhow::{Context, Result};
use rust_decimal::Decimal;

use crate::domain::TradeData;

pub const EXCHANGE: &str = "binance";

pub fn ws_url(symbols: &[String]) -> String {
    let streams: Vec<String> = symbols.iter().map(|s| format!("{}@aggTrade", s.to_lowercase())).collect();
    format!("wss://stream.binance.com:9443/stream?streams={}", streams.join("/"))
}

pub fn subscribe_message(symbols: &[String]) -> String {
    let params: Vec<String> = symbols.iter().map(|s| format!("{}@aggTrade", s.to_lowercase())).collect();
    serde_json::json!({ "method": "SUBSCRIBE", "params": params, "id": 1 }).to_string()
}

/// Parse one `aggTrade` event, which may arrive wrapped in a combined-stream
/// envelope (`{"stream": "...", "data": {...}}`) or bare.
pub fn parse(text: &str) -> Result<TradeData> {
    let root: serde_json::Value = serde_json::from_str(text).context("invalid aggTrade JSON")?;
    let event = root.get("data").unwrap_or(&root);

    let symbol = event["s"].as_str().context("missing field s")?.to_string();
    let price: Decimal = event["p"].as_str().context("missing field p")?.parse().context("invalid price")?;
    let quantity: Decimal = event["q"].as_str().context("missing field q")?.parse().context("invalid quantity")?;
    let timestamp = event["T"].as_i64().context("missing field T")?;
    let trade_id = event["a"].as_i64().context("missing field a")?;
    let is_buyer_maker = event["m"].as_bool().context("missing field m")?;

    Ok(TradeData {
        exchange: EXCHANGE.to_string(),
        symbol,
        price,
        quantity,
        timestamp,
        trade_id,
        is_buyer_maker,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_agg_trade() {
        let text = r#"{"e":"aggTrade","E":1700000000001,"s":"BTCUSDT","a":42,"p":"100.05","q":"2","f":1,"l":1,"T":1700000000000,"m":true}"#;
        let trade = parse(text).unwrap();
        assert_eq!(trade.symbol, "BTCUSDT");
        assert_eq!(trade.trade_id, 42);
        assert!(trade.is_sell());
    }

    #[test]
    fn parses_combined_stream_envelope() {
        let text = r#"{"stream":"btcusdt@aggTrade","data":{"e":"aggTrade","s":"BTCUSDT","a":7,"p":"1.5","q":"3","T":1700000000000,"m":false}}"#;
        let trade = parse(text).unwrap();
        assert_eq!(trade.trade_id, 7);
        assert!(trade.is_buy());
    }
}
