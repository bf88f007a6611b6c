pub mod engine;
pub mod rollup;

pub use engine::{ProcessOutcome, SymbolConfig, WorkerRuntime, BINS_MAX, BINS_MIN};
