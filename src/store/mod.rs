use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::models::{Order, OrderId, Position, Symbol, Timestamp, UpdateLog};

mod memory;
mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Document not found: {0}")]
    NotFound(String),
}

impl From<mongodb::bson::ser::Error> for StoreError {
    fn from(err: mongodb::bson::ser::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Filter over persisted line updates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateLogQuery {
    pub symbols: Vec<Symbol>,
    pub from: Option<Timestamp>,
    pub to: Option<Timestamp>,
}

impl UpdateLogQuery {
    pub fn matches(&self, log: &UpdateLog) -> bool {
        self.symbols.contains(&log.symbol)
            && self.from.map_or(true, |from| log.timestamp >= from)
            && self.to.map_or(true, |to| log.timestamp <= to)
    }
}

/// Orders and positions of the strategies.
#[async_trait]
pub trait TradeStore: Send + Sync {
    async fn create_order(&self, order: &Order) -> Result<(), StoreError>;

    async fn count_orders(&self, id: OrderId) -> Result<u64, StoreError>;

    /// Sets every present field of `order` and returns the stored document.
    async fn update_order(&self, order: &Order) -> Result<Order, StoreError>;

    async fn find_orders(&self, ids: &[OrderId]) -> Result<Vec<Order>, StoreError>;

    async fn create_position(&self, position: &Position) -> Result<(), StoreError>;

    async fn update_position(&self, position: &Position) -> Result<(), StoreError>;

    async fn find_open_positions(&self, strategy_id: &str, symbols: &[Symbol]) -> Result<Vec<Position>, StoreError>;
}

/// History written by the line logger and read back by replays.
#[async_trait]
pub trait UpdateLogStore: Send + Sync {
    async fn insert_update_logs(&self, logs: Vec<UpdateLog>) -> Result<(), StoreError>;

    async fn count_update_logs(&self, query: &UpdateLogQuery) -> Result<u64, StoreError>;

    /// Matching logs in ascending time order.
    async fn stream_update_logs(
        &self,
        query: &UpdateLogQuery,
    ) -> Result<BoxStream<'static, Result<UpdateLog, StoreError>>, StoreError>;
}
