pub mod candle_store;
pub mod db;
pub mod schema;
pub mod service;

pub use candle_store::CandleStore;
pub use service::{PersistenceConfig, PersistenceService};
