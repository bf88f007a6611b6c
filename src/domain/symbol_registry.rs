// =============================================================================
// Symbol registry — exchange-metadata and activation gate
// =============================================================================
//
// Grounded on spec.md §3's "Symbol registry" entity plus the tagged-variant
// exchange metadata note in §9. Owned by the Ingestor: consulted before a
// symbol's WebSocket subscription opens and before the Router is told to
// route for it. Plain in-memory table, matching the teacher's shared-state
// shape in `app_state.rs` (held behind a `parking_lot::RwLock`).
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolStatus {
    Active,
    Inactive,
    Delisted,
    PendingReview,
}

/// Tagged variant per venue, per §9's "replace with tagged variants" note —
/// never a dynamic map of exchange-specific fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "exchange", rename_all = "snake_case")]
pub enum ExchangeMetadata {
    Binance {
        base_asset: String,
        quote_asset: String,
        native_status: String,
    },
    Bybit {
        base_coin: String,
        quote_coin: String,
        native_status: String,
    },
    Okx {
        base_ccy: String,
        quote_ccy: String,
        native_status: String,
    },
}

impl ExchangeMetadata {
    /// Whether the exchange-native status string represents a live,
    /// tradeable market, per §3's activation precondition.
    pub fn native_status_is_trading(&self) -> bool {
        let status = match self {
            ExchangeMetadata::Binance { native_status, .. } => native_status,
            ExchangeMetadata::Bybit { native_status, .. } => native_status,
            ExchangeMetadata::Okx { native_status, .. } => native_status,
        };
        matches!(status.as_str(), "TRADING" | "live")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolEntry {
    pub id: String,
    pub exchange: String,
    pub symbol: String,
    pub tick_value: Decimal,
    pub bin_multiplier: u32,
    pub price_precision: u32,
    pub quantity_precision: u32,
    pub status: SymbolStatus,
    pub enabled_by_admin: bool,
    pub is_streaming: bool,
    pub is_processing: bool,
    pub metadata: Option<ExchangeMetadata>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl SymbolEntry {
    /// §3: `enabled_by_admin ∧ status ≠ delisted ∧ exchange metadata present
    /// ∧ exchange-native status ∈ {TRADING, live}`.
    pub fn is_active(&self) -> bool {
        self.enabled_by_admin
            && self.status != SymbolStatus::Delisted
            && self
                .metadata
                .as_ref()
                .is_some_and(|m| m.native_status_is_trading())
    }
}

#[derive(Default)]
pub struct SymbolRegistry {
    entries: RwLock<HashMap<String, SymbolEntry>>,
}

impl SymbolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, entry: SymbolEntry) {
        self.entries.write().insert(entry.id.clone(), entry);
    }

    pub fn get(&self, id: &str) -> Option<SymbolEntry> {
        self.entries.read().get(id).cloned()
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.entries.read().get(id).is_some_and(|e| e.is_active())
    }

    pub fn active_symbols(&self, exchange: &str) -> Vec<String> {
        self.entries
            .read()
            .values()
            .filter(|e| e.exchange == exchange && e.is_active())
            .map(|e| e.symbol.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn entry(enabled: bool, status: SymbolStatus, native_status: &str) -> SymbolEntry {
        SymbolEntry {
            id: "binance:BTCUSDT".into(),
            exchange: "binance".into(),
            symbol: "BTCUSDT".into(),
            tick_value: dec!(0.01),
            bin_multiplier: 1,
            price_precision: 2,
            quantity_precision: 6,
            status,
            enabled_by_admin: enabled,
            is_streaming: false,
            is_processing: false,
            metadata: Some(ExchangeMetadata::Binance {
                base_asset: "BTC".into(),
                quote_asset: "USDT".into(),
                native_status: native_status.to_string(),
            }),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn activation_requires_all_preconditions() {
        assert!(entry(true, SymbolStatus::Active, "TRADING").is_active());
        assert!(!entry(false, SymbolStatus::Active, "TRADING").is_active());
        assert!(!entry(true, SymbolStatus::Delisted, "TRADING").is_active());
        assert!(!entry(true, SymbolStatus::Active, "BREAK").is_active());
    }

    #[test]
    fn registry_filters_active_symbols_per_exchange() {
        let reg = SymbolRegistry::new();
        reg.upsert(entry(true, SymbolStatus::Active, "TRADING"));
        assert_eq!(reg.active_symbols("binance"), vec!["BTCUSDT".to_string()]);
        assert!(reg.active_symbols("bybit").is_empty());
    }
}
