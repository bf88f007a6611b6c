pub mod candle_group;
pub mod footprint_candle;
pub mod gap;
pub mod price_bin;
pub mod queue_message;
pub mod rounding;
pub mod symbol_registry;
pub mod timeframe;
pub mod trade;

pub use candle_group::CandleGroup;
pub use footprint_candle::FootprintCandle;
pub use gap::GapRecord;
pub use price_bin::PriceBin;
pub use queue_message::QueueMessage;
pub use symbol_registry::{ExchangeMetadata, SymbolEntry, SymbolRegistry, SymbolStatus};
pub use timeframe::Timeframe;
pub use trade::TradeData;
