// =============================================================================
// Binance REST client — gap recovery only
// =============================================================================
//
// The only REST surface the gap-recovery orchestrator needs is historical
// trades, and Binance's `aggTrades` endpoint is public (no API key/signing
// required) — so the teacher's HMAC-signing machinery is dropped entirely.
// Field layout matches `ingestor/exchange/binance.rs::parse` exactly since
// both read the same `aggTrade` shape, just from REST instead of the WS
// stream.
// =============================================================================

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use tracing::{debug, instrument};

use crate::domain::TradeData;

/// Binance's own cap on `aggTrades?limit=`.
pub const MAX_AGG_TRADES_LIMIT: u32 = 1000;

#[derive(Clone)]
pub struct BinanceClient {
    base_url: String,
    client: reqwest::Client,
}

impl Default for BinanceClient {
    fn default() -> Self {
        Self::new()
    }
}

impl BinanceClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");
        BinanceClient { base_url: "https://api.binance.com".to_string(), client }
    }

    /// Fetches up to `limit` (capped at [`MAX_AGG_TRADES_LIMIT`]) aggregated
    /// trades for `symbol` starting at `from_id` inclusive, used by the gap
    /// recovery orchestrator to backfill a missing `trade_id` range
    /// (spec.md §4.5).
    #[instrument(skip(self))]
    pub async fn fetch_agg_trades_from(&self, symbol: &str, from_id: i64, limit: u32) -> Result<Vec<TradeData>> {
        let limit = limit.min(MAX_AGG_TRADES_LIMIT);
        let url = format!("{}/api/v3/aggTrades", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("symbol", symbol.to_string()),
                ("fromId", from_id.to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await
            .context("aggTrades request failed")?
            .error_for_status()
            .context("aggTrades returned non-2xx")?;

        let body: Vec<serde_json::Value> = resp.json().await.context("invalid aggTrades JSON body")?;
        debug!(symbol, from_id, count = body.len(), "fetched agg trades for gap recovery");

        body.iter().map(|event| parse_agg_trade(symbol, event)).collect()
    }
}

fn parse_agg_trade(symbol: &str, event: &serde_json::Value) -> Result<TradeData> {
    let price: Decimal = event["p"].as_str().context("missing field p")?.parse().context("invalid price")?;
    let quantity: Decimal = event["q"].as_str().context("missing field q")?.parse().context("invalid quantity")?;
    let timestamp = event["T"].as_i64().context("missing field T")?;
    let trade_id = event["a"].as_i64().context("missing field a")?;
    let is_buyer_maker = event["m"].as_bool().context("missing field m")?;

    Ok(TradeData {
        exchange: "binance".to_string(),
        symbol: symbol.to_string(),
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
    fn parses_one_agg_trade_event() {
        let event: serde_json::Value =
            serde_json::from_str(r#"{"a":42,"p":"100.05","q":"2","f":1,"l":1,"T":1700000000000,"m":true}"#).unwrap();
        let trade = parse_agg_trade("BTCUSDT", &event).unwrap();
        assert_eq!(trade.trade_id, 42);
        assert_eq!(trade.symbol, "BTCUSDT");
        assert!(trade.is_sell());
    }
}
