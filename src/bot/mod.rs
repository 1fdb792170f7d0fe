use thiserror::Error;

use crate::config::ConfigError;
use crate::exchange::ExchangeError;
use crate::line::LineError;
use crate::store::StoreError;
use crate::strategy::StrategyError;

mod orchestrator;
mod replay;
mod state;

pub use orchestrator::Orchestrator;
pub use replay::{run_replay, ReplaySummary};
pub use state::ExchangeState;

#[derive(Error, Debug)]
pub enum BotError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Line error: {0}")]
    Line(#[from] LineError),

    #[error("Strategy error: {0}")]
    Strategy(#[from] StrategyError),
}
