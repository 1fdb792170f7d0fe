mod client;
mod models;
mod stream;
mod user_stream;

pub use client::{BinanceClient, MAX_LEVERAGE};
pub use models::{parse_market_message, parse_user_message, StreamMessage};
pub use stream::{BinanceMarketStream, MarketEvent, StreamConfig};
pub use user_stream::BinanceUserStream;
