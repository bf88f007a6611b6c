// =============================================================================
// Bybit trade-stream adapter
// =============================================================================
//
// Parses `publicTrade.<symbol>` frames from Bybit's v5 public WebSocket.
// `side` carries the sign directly ("Buy" ⇒ taker bought); there is no
// `is_buyer_maker` flag on the wire, so it is derived here to keep
// `TradeData`'s sign convention uniform across venues.
// =============================================================================

use anyhow::{Context, Result};
use rust_decimal::Decimal;

use crate::domain::TradeData;

pub const EXCHANGE: &str = "bybit";

pub fn ws_url() -> &'static str {
    "wss://stream.bybit.com/v5/public/spot"
}

pub fn subscribe_message(symbols: &[String]) -> String {
    let args: Vec<String> = symbols.iter().map(|s| format!("publicTrade.{}", s.to_uppercase())).collect();
    serde_json::json!({ "op": "subscribe", "args": args }).to_string()
}

/// Bybit batches multiple trades per frame under `data[]`; callers should
/// loop `parse_all` rather than assume one trade per message.
pub fn parse_all(text: &str) -> Result<Vec<TradeData>> {
    let root: serde_json::Value = serde_json::from_str(text).context("invalid publicTrade JSON")?;
    let Some(data) = root.get("data").and_then(|d| d.as_array()) else {
        return Ok(Vec::new());
    };

    data.iter().map(parse_one).collect()
}

fn parse_one(entry: &serde_json::Value) -> Result<TradeData> {
    let symbol = entry["s"].as_str().context("missing field s")?.to_string();
    let price: Decimal = entry["p"].as_str().context("missing field p")?.parse().context("invalid price")?;
    let quantity: Decimal = entry["v"].as_str().context("missing field v")?.parse().context("invalid quantity")?;
    let timestamp = entry["T"].as_i64().context("missing field T")?;
    let trade_id: i64 = entry["i"].as_str().context("missing field i")?.parse().context("non-numeric trade id")?;
    let side = entry["S"].as_str().context("missing field S")?;
    let is_buyer_maker = side.eq_ignore_ascii_case("sell");

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
    fn parses_batch_of_trades() {
        let text = r#"{"topic":"publicTrade.BTCUSDT","type":"snapshot","ts":1700000000001,"data":[
            {"T":1700000000000,"s":"BTCUSDT","S":"Buy","v":"0.01","p":"100.5","i":"123456"},
            {"T":1700000000010,"s":"BTCUSDT","S":"Sell","v":"0.02","p":"100.4","i":"123457"}
        ]}"#;
        let trades = parse_all(text).unwrap();
        assert_eq!(trades.len(), 2);
        assert!(trades[0].is_buy());
        assert!(trades[1].is_sell());
        assert_eq!(trades[1].trade_id, 123457);
    }

    #[test]
    fn non_trade_frame_parses_to_empty() {
        let text = r#"{"op":"subscribe","success":true}"#;
        assert!(parse_all(text).unwrap().is_empty());
    }
}
