use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::models::{
    Account, AccountConfig, BookUpdate, Candle, Contract, DepthSnapshot, FundingRate, MarginType, Order, OrderId,
    OrderRequest, Symbol, Timeframe, Timestamp, UserStreamEntity,
};

pub mod binance;
mod error;
pub mod fake;
mod retry;

pub use error::{ExchangeError, ExchangeErrorType};
pub use retry::{RetryConfig, RetryHandler};

/// Capacity of the user stream broadcast channel.
pub const USER_STREAM_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum UserStreamEvent {
    AccountUpdate(Account),
    AccountConfigUpdate(AccountConfig),
    OrderTradeUpdate(Order),
}

impl UserStreamEvent {
    pub fn entity(&self) -> UserStreamEntity {
        match self {
            UserStreamEvent::AccountUpdate(_) => UserStreamEntity::AccountUpdate,
            UserStreamEvent::AccountConfigUpdate(_) => UserStreamEntity::AccountConfigUpdate,
            UserStreamEvent::OrderTradeUpdate(_) => UserStreamEntity::OrderTradeUpdate,
        }
    }
}

/// Public market data.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Trading rules of every listed contract.
    async fn get_contracts(&self) -> Result<HashMap<Symbol, Contract>, ExchangeError>;

    /// Mark price and funding rate.
    async fn get_funding_rate(&self, symbol: &str) -> Result<FundingRate, ExchangeError>;

    async fn get_historical_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
        start_time: Option<Timestamp>,
    ) -> Result<Vec<Candle>, ExchangeError>;

    /// Best bid/ask for every symbol.
    async fn get_book(&self) -> Result<HashMap<Symbol, BookUpdate>, ExchangeError>;

    async fn get_depth(&self, symbol: &str, limit: usize) -> Result<DepthSnapshot, ExchangeError>;
}

/// Account scoped operations, authenticated with a key pair.
#[async_trait]
pub trait ExchangeUserClient: Send + Sync {
    async fn get_account_info(&self) -> Result<Account, ExchangeError>;

    async fn change_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError>;

    async fn is_hedge_mode(&self) -> Result<bool, ExchangeError>;

    async fn change_position_mode(&self, hedge_mode: bool) -> Result<(), ExchangeError>;

    async fn change_margin_type(&self, symbol: &str, margin_type: MarginType) -> Result<(), ExchangeError>;

    /// Sends a new order. `None` means the exchange refused it.
    async fn place_order(&self, request: OrderRequest) -> Result<Option<Order>, ExchangeError>;

    async fn cancel_order(&self, contract: &Contract, order_id: OrderId) -> Result<Option<Order>, ExchangeError>;

    async fn get_order(&self, contract: &Contract, order_id: OrderId) -> Result<Option<Order>, ExchangeError>;

    async fn create_listen_key(&self) -> Result<String, ExchangeError>;

    async fn keepalive_listen_key(&self) -> Result<(), ExchangeError>;

    /// Account, config and order events of this user.
    fn subscribe(&self) -> broadcast::Receiver<UserStreamEvent>;
}
