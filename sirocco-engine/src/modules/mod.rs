//! Built-in engine modules.

pub mod candle;
pub mod order_hub;
pub mod position;
pub mod recorder;
pub mod replay;

pub use candle::CandleModule;
pub use order_hub::OrderHubModule;
pub use position::PositionModule;
pub use recorder::RecorderModule;
pub use replay::ReplayModule;
