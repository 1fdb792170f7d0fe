use thiserror::Error;

use crate::exchange::ExchangeError;
use crate::models::{LineUpdate, Symbol};
use crate::store::StoreError;

mod amqp;
mod client;
mod logger;
mod publisher;
mod replay;
mod server;

pub use amqp::{AmqpConsumer, AmqpPublisher, MessagePublisher, EXCHANGE};
pub use client::{decode_message, LineClient};
pub use logger::LineLogger;
pub use publisher::LinePublisher;
pub use replay::ReplayClient;
pub use server::LineServer;

/// Capacity of the channels carrying line events.
pub const LINE_CAPACITY: usize = 10_000;

#[derive(Error, Debug)]
pub enum LineError {
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid line message: {0}")]
    InvalidMessage(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),
}

/// What a line source hands to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum LineEvent {
    Update { symbol: Symbol, update: LineUpdate },
    Alive,
    Reset,
    /// Replay source exhausted.
    Done,
}
