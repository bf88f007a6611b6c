// =============================================================================
// OKX trade-stream adapter
// =============================================================================
//
// Parses `trades` channel frames. OKX instrument ids use `BASE-QUOTE`
// ("BTC-USDT"); normalised `TradeData.symbol` keeps the hyphenated form
// as-is since the router's `^[A-Z0-9_]{3,30}$` pattern does not accept it —
// ingestion-side code must strip the hyphen before handing trades to the
// router (see `ingestor::mod::normalize_symbol`).
// =============================================================================

use anyhow::{Context, Result};
use rust_decimal::Decimal;

use crate::domain::TradeData;

pub const EXCHANGE: &str = "okx";

pub fn ws_url() -> &'static str {
    "wss://ws.okx.com:8443/ws/v5/public"
}

pub fn subscribe_message(inst_ids: &[String]) -> String {
    let args: Vec<serde_json::Value> = inst_ids
        .iter()
        .map(|id| serde_json::json!({ "channel": "trades", "instId": id }))
        .collect();
    serde_json::json!({ "op": "subscribe", "args": args }).to_string()
}

pub fn parse_all(text: &str) -> Result<Vec<TradeData>> {
    let root: serde_json::Value = serde_json::from_str(text).context("invalid trades JSON")?;
    let Some(data) = root.get("data").and_then(|d| d.as_array()) else {
        return Ok(Vec::new());
    };
    data.iter().map(parse_one).collect()
}

fn parse_one(entry: &serde_json::Value) -> Result<TradeData> {
    let symbol = entry["instId"].as_str().context("missing field instId")?.replace('-', "");
    let price: Decimal = entry["px"].as_str().context("missing field px")?.parse().context("invalid price")?;
    let quantity: Decimal = entry["sz"].as_str().context("missing field sz")?.parse().context("invalid quantity")?;
    let timestamp: i64 = entry["ts"].as_str().context("missing field ts")?.parse().context("invalid ts")?;
    let trade_id: i64 = entry["tradeId"].as_str().context("missing field tradeId")?.parse().context("non-numeric trade id")?;
    let side = entry["side"].as_str().context("missing field side")?;
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
    fn parses_trade_and_strips_hyphen() {
        let text = r#"{"arg":{"channel":"trades","instId":"BTC-USDT"},"data":[
            {"instId":"BTC-USDT","tradeId":"130639474","px":"42219.9","sz":"0.1206","side":"buy","ts":"1630048897897"}
        ]}"#;
        let trades = parse_all(text).unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].symbol, "BTCUSDT");
        assert!(trades[0].is_buy());
    }
}
