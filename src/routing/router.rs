// =============================================================================
// Router — symbol validation, hash-ring lookup, batch routing
// =============================================================================

use std::sync::OnceLock;

use parking_lot::RwLock;
use regex::Regex;

use crate::error::{FlowtraceError, FlowtraceResult};
use crate::routing::hash_ring::HashRing;

const MAX_BATCH_SIZE: usize = 10_000;

fn symbol_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Z0-9_]{3,30}$").unwrap())
}

/// Owned by the Supervisor; mutated only by `add_worker`/`remove_worker`;
/// read by many callers under a cheap read-lock (§5).
pub struct Router {
    ring: RwLock<HashRing>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Router {
            ring: RwLock::new(HashRing::new()),
        }
    }

    pub fn add_worker(&self, worker_id: &str) {
        self.ring.write().add_worker(worker_id);
    }

    pub fn remove_worker(&self, worker_id: &str) {
        self.ring.write().remove_worker(worker_id);
    }

    pub fn worker_ids(&self) -> Vec<String> {
        self.ring.read().worker_ids().to_vec()
    }

    fn validate_symbol(symbol: &str) -> FlowtraceResult<()> {
        if symbol.is_empty() || !symbol_pattern().is_match(symbol) {
            return Err(FlowtraceError::invalid_symbol(symbol));
        }
        Ok(())
    }

    pub fn route(&self, symbol: &str) -> FlowtraceResult<String> {
        Self::validate_symbol(symbol)?;
        let ring = self.ring.read();
        if ring.is_empty() {
            return Err(FlowtraceError::no_workers());
        }
        Ok(ring
            .route(symbol)
            .expect("non-empty ring always routes")
            .to_string())
    }

    /// Route a batch of symbols, rejecting up-front per §4.1.
    pub fn route_batch(&self, symbols: &[String]) -> FlowtraceResult<Vec<(String, String)>> {
        if symbols.len() > MAX_BATCH_SIZE {
            return Err(FlowtraceError::Precondition(format!(
                "batch size {} exceeds max {MAX_BATCH_SIZE}",
                symbols.len()
            )));
        }
        symbols.iter().map(|s| self.route(s).map(|w| (s.clone(), w))).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_symbols() {
        let router = Router::new();
        router.add_worker("worker_0");
        assert!(router.route("").is_err());
        assert!(router.route("btcusdt").is_err());
        assert!(router.route("BT").is_err());
        assert!(router.route("A".repeat(31).as_str()).is_err());
        assert!(router.route("BTCUSDT").is_ok());
    }

    #[test]
    fn rejects_when_no_workers() {
        let router = Router::new();
        let err = router.route("BTCUSDT").unwrap_err();
        assert!(matches!(err, FlowtraceError::Precondition(_)));
    }

    #[test]
    fn rejects_oversize_batch() {
        let router = Router::new();
        router.add_worker("worker_0");
        let symbols: Vec<String> = (0..10_001).map(|i| format!("S{i}USD")).collect();
        assert!(router.route_batch(&symbols).is_err());
    }

    #[test]
    fn stable_mapping_survives_process_restart_simulation() {
        let router_a = Router::new();
        router_a.add_worker("worker_0");
        router_a.add_worker("worker_1");
        router_a.add_worker("worker_2");
        let owner_a = router_a.route("BTCUSDT").unwrap();

        // Simulate a fresh process: reconstruct from the same worker-id set.
        let router_b = Router::new();
        router_b.add_worker("worker_0");
        router_b.add_worker("worker_1");
        router_b.add_worker("worker_2");
        let owner_b = router_b.route("BTCUSDT").unwrap();

        assert_eq!(owner_a, owner_b);
    }
}
