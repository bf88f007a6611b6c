// =============================================================================
// Timeframe — the closed set of candle intervals
// =============================================================================

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    S1,
    S5,
    S15,
    M1,
    M5,
    M15,
    H1,
    H4,
    D1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 9] = [
        Timeframe::S1,
        Timeframe::S5,
        Timeframe::S15,
        Timeframe::M1,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
    ];

    /// Base candle that ingestion aggregates into directly.
    pub const BASE: Timeframe = Timeframe::S1;

    pub fn seconds(self) -> i64 {
        match self {
            Timeframe::S1 => 1,
            Timeframe::S5 => 5,
            Timeframe::S15 => 15,
            Timeframe::M1 => 60,
            Timeframe::M5 => 300,
            Timeframe::M15 => 900,
            Timeframe::H1 => 3_600,
            Timeframe::H4 => 14_400,
            Timeframe::D1 => 86_400,
        }
    }

    pub fn period_ms(self) -> i64 {
        self.seconds() * 1_000
    }

    pub fn label(self) -> &'static str {
        match self {
            Timeframe::S1 => "1s",
            Timeframe::S5 => "5s",
            Timeframe::S15 => "15s",
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    pub fn from_label(s: &str) -> Option<Timeframe> {
        Self::ALL.into_iter().find(|tf| tf.label() == s)
    }

    /// `open_time` of the candle containing `ts_ms`, per the floor rule.
    pub fn open_time_for(self, ts_ms: i64) -> i64 {
        let period = self.period_ms();
        (ts_ms.div_euclid(period)) * period
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_roundtrip() {
        for tf in Timeframe::ALL {
            assert_eq!(Timeframe::from_label(tf.label()), Some(tf));
        }
    }

    #[test]
    fn open_time_floors_to_period() {
        assert_eq!(Timeframe::S1.open_time_for(1_700_000_000_999), 1_700_000_000_000);
        assert_eq!(Timeframe::S1.open_time_for(1_700_000_001_000), 1_700_000_001_000);
    }

    #[test]
    fn sort_order_matches_duration() {
        let mut shuffled = vec![Timeframe::H4, Timeframe::S1, Timeframe::D1, Timeframe::M1];
        shuffled.sort();
        assert_eq!(shuffled, vec![Timeframe::S1, Timeframe::M1, Timeframe::H4, Timeframe::D1]);
    }
}
