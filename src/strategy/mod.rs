use thiserror::Error;

use crate::candles::TechnicalError;
use crate::exchange::ExchangeError;
use crate::models::{RulesError, Symbol};
use crate::store::StoreError;

mod command_handler;
mod commands;
mod engine;
mod storage;

pub use command_handler::CommandHandler;
pub use commands::{reason, Command, OrderContext, PlaceOrder, TrailingStop};
pub use engine::Strategy;
pub use storage::LocalStorage;

#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Indicator error: {0}")]
    Technical(#[from] TechnicalError),

    #[error("Invalid rules: {0}")]
    Rules(#[from] RulesError),

    #[error("Unknown position found! symbol={0}")]
    UnknownPosition(Symbol),

    #[error("No contract for {0}")]
    MissingContract(Symbol),

    #[error("No book price for {0}")]
    MissingBook(Symbol),
}
