pub mod bot;
pub mod candles;
pub mod config;
pub mod depth;
pub mod exchange;
pub mod helpers;
pub mod line;
pub mod logger;
pub mod models;
pub mod signal;
pub mod store;
pub mod strategy;

pub use config::{BotSettings, ConfigError, LineLoggerSettings, LineSettings};
pub use exchange::{ExchangeError, RetryConfig, RetryHandler};
