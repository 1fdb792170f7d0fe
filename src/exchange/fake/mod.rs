use std::collections::HashMap;

use async_trait::async_trait;
use log::warn;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::exchange::{ExchangeClient, ExchangeError, ExchangeUserClient, UserStreamEvent, USER_STREAM_CAPACITY};
use crate::helpers::now_ms;
use crate::models::{
    Account, AccountBalance, AccountPosition, Asset, BookUpdate, Candle, Contract, DepthSnapshot, FundingRate,
    MarginType, Order, OrderId, OrderRequest, OrderSide, OrderStatus, OrderType, PositionSide, Symbol, Timeframe,
    Timestamp,
};

const CONTRACTS: &str = include_str!("contracts.json");

// https://www.binance.com/en/fee/futureFee
pub const MAKER_FEE: Decimal = dec!(0.0002);
pub const TAKER_FEE: Decimal = dec!(0.0004);

pub const SYMBOLS: [&str; 3] = ["BTCUSDT", "ETHUSDT", "DOTUSDT"];

fn initial_assets() -> HashMap<Asset, Decimal> {
    [("BTC", dec!(0.1)), ("ETH", dec!(1)), ("DOT", dec!(100)), ("USDT", dec!(1000))]
        .into_iter()
        .map(|(asset, balance)| (asset.to_string(), balance))
        .collect()
}

fn fee_stake(order_type: OrderType) -> Decimal {
    match order_type {
        OrderType::Limit => MAKER_FEE,
        OrderType::Market => TAKER_FEE,
        other => {
            warn!("Undefined fee for order_type {}", other.as_str());
            Decimal::ZERO
        }
    }
}

struct FakeState {
    books: HashMap<Symbol, BookUpdate>,
    orders: HashMap<OrderId, Order>,
    leverage: HashMap<Symbol, u32>,
    margin_type: HashMap<Symbol, MarginType>,
    hedge_mode: bool,
    assets: HashMap<Asset, Decimal>,
    positions: Vec<AccountPosition>,
}

impl FakeState {
    fn account(&self) -> Account {
        Account {
            assets: self
                .assets
                .iter()
                .map(|(asset, balance)| {
                    let balance = AccountBalance {
                        asset: asset.clone(),
                        wallet_balance: *balance,
                    };
                    (asset.clone(), balance)
                })
                .collect(),
            positions: self.positions.clone(),
        }
    }
}

/// In-process exchange used by replays. Market orders fill instantly at the last book price.
pub struct FakeExchange {
    state: RwLock<FakeState>,
    events: broadcast::Sender<UserStreamEvent>,
}

impl Default for FakeExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeExchange {
    pub fn new() -> Self {
        let symbols: Vec<Symbol> = SYMBOLS.iter().map(|s| s.to_string()).collect();
        let positions = symbols
            .iter()
            .flat_map(|symbol| {
                [PositionSide::Both, PositionSide::Long, PositionSide::Short].map(|side| AccountPosition {
                    symbol: symbol.clone(),
                    side,
                    quantity: Decimal::ZERO,
                    entry_price: Decimal::ZERO,
                    isolated: true,
                    margin: Decimal::ZERO,
                })
            })
            .collect();

        let (events, _) = broadcast::channel(USER_STREAM_CAPACITY);
        Self {
            state: RwLock::new(FakeState {
                books: HashMap::new(),
                orders: HashMap::new(),
                leverage: symbols.iter().map(|s| (s.clone(), 1)).collect(),
                margin_type: symbols.iter().map(|s| (s.clone(), MarginType::Isolated)).collect(),
                hedge_mode: true,
                assets: initial_assets(),
                positions,
            }),
            events,
        }
    }

    pub async fn set_price(&self, symbol: &str, book: BookUpdate) {
        self.state.write().await.books.insert(symbol.to_string(), book);
    }

    pub async fn balance(&self, asset: &str) -> Decimal {
        self.state.read().await.assets.get(asset).copied().unwrap_or_default()
    }

    pub async fn balances(&self) -> HashMap<Asset, Decimal> {
        self.state.read().await.assets.clone()
    }

    pub async fn leverage(&self, symbol: &str) -> Option<u32> {
        self.state.read().await.leverage.get(symbol).copied()
    }
}

#[async_trait]
impl ExchangeClient for FakeExchange {
    async fn get_contracts(&self) -> Result<HashMap<Symbol, Contract>, ExchangeError> {
        let contracts: Vec<Contract> = serde_json::from_str(CONTRACTS)?;
        Ok(contracts.into_iter().map(|c| (c.symbol.clone(), c)).collect())
    }

    async fn get_funding_rate(&self, symbol: &str) -> Result<FundingRate, ExchangeError> {
        Err(ExchangeError::ValidationError(format!("funding rate of {} is not simulated", symbol)))
    }

    async fn get_historical_candles(
        &self,
        _symbol: &str,
        _timeframe: Timeframe,
        _limit: usize,
        _start_time: Option<Timestamp>,
    ) -> Result<Vec<Candle>, ExchangeError> {
        Ok(Vec::new())
    }

    async fn get_book(&self) -> Result<HashMap<Symbol, BookUpdate>, ExchangeError> {
        Ok(self.state.read().await.books.clone())
    }

    async fn get_depth(&self, _symbol: &str, _limit: usize) -> Result<DepthSnapshot, ExchangeError> {
        Ok(DepthSnapshot::default())
    }
}

#[async_trait]
impl ExchangeUserClient for FakeExchange {
    async fn get_account_info(&self) -> Result<Account, ExchangeError> {
        Ok(self.state.read().await.account())
    }

    async fn change_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError> {
        self.state.write().await.leverage.insert(symbol.to_string(), leverage);
        Ok(())
    }

    async fn is_hedge_mode(&self) -> Result<bool, ExchangeError> {
        Ok(self.state.read().await.hedge_mode)
    }

    async fn change_position_mode(&self, hedge_mode: bool) -> Result<(), ExchangeError> {
        self.state.write().await.hedge_mode = hedge_mode;
        Ok(())
    }

    async fn change_margin_type(&self, symbol: &str, margin_type: MarginType) -> Result<(), ExchangeError> {
        self.state.write().await.margin_type.insert(symbol.to_string(), margin_type);
        Ok(())
    }

    async fn place_order(&self, request: OrderRequest) -> Result<Option<Order>, ExchangeError> {
        let contract = &request.contract;
        let mut state = self.state.write().await;

        let book = state
            .books
            .get(&contract.symbol)
            .cloned()
            .ok_or_else(|| ExchangeError::UnknownContract(contract.symbol.clone()))?;

        let price = book.price(request.side);
        let amount = price * request.quantity;
        let commission = amount * fee_stake(request.order_type);

        match request.side {
            OrderSide::Buy => {
                *state.assets.entry(contract.quote_asset.clone()).or_default() -= amount + commission;
                *state.assets.entry(contract.base_asset.clone()).or_default() += request.quantity;
            }
            OrderSide::Sell => {
                *state.assets.entry(contract.quote_asset.clone()).or_default() += amount - commission;
                *state.assets.entry(contract.base_asset.clone()).or_default() -= request.quantity;
            }
        }

        let order = Order {
            id: (Uuid::new_v4().as_u128() % 990_000_000) as OrderId + 10_000_000,
            client_order_id: request.client_order_id.clone(),
            position_id: None,
            symbol: contract.symbol.clone(),
            status: OrderStatus::Filled,
            order_type: request.order_type,
            side: request.side,
            position_side: request.position_side,
            quantity: request.quantity,
            entry_price: price,
            context: None,
            timestamp: now_ms(),
        };
        state.orders.insert(order.id, order.clone());

        let account = state.account();
        drop(state);
        let _ = self.events.send(UserStreamEvent::AccountUpdate(account));

        Ok(Some(order))
    }

    async fn cancel_order(&self, _contract: &Contract, order_id: OrderId) -> Result<Option<Order>, ExchangeError> {
        Ok(self.state.read().await.orders.get(&order_id).cloned())
    }

    async fn get_order(&self, _contract: &Contract, order_id: OrderId) -> Result<Option<Order>, ExchangeError> {
        Ok(self.state.read().await.orders.get(&order_id).cloned())
    }

    async fn create_listen_key(&self) -> Result<String, ExchangeError> {
        Ok("fake".to_string())
    }

    async fn keepalive_listen_key(&self) -> Result<(), ExchangeError> {
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<UserStreamEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market_order(contract: Contract, side: OrderSide, quantity: Decimal) -> OrderRequest {
        OrderRequest {
            contract,
            client_order_id: "test".into(),
            order_type: OrderType::Market,
            side,
            position_side: PositionSide::Long,
            quantity,
            price: None,
            time_in_force: None,
        }
    }

    #[tokio::test]
    async fn test_contracts_are_embedded() {
        let exchange = FakeExchange::new();
        let contracts = exchange.get_contracts().await.unwrap();
        assert_eq!(contracts.len(), 3);
        assert_eq!(contracts["DOTUSDT"].lot_size, dec!(0.1));
    }

    #[tokio::test]
    async fn test_market_orders_move_balances() {
        let exchange = FakeExchange::new();
        let contract = exchange.get_contracts().await.unwrap()["BTCUSDT"].clone();
        exchange.set_price("BTCUSDT", BookUpdate::new(dec!(100), dec!(101))).await;
        let mut events = exchange.subscribe();

        let order = exchange
            .place_order(market_order(contract.clone(), OrderSide::Buy, dec!(2)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.entry_price, dec!(100));
        // 1000 - (200 + 0.08)
        assert_eq!(exchange.balance("USDT").await, dec!(799.92));
        assert_eq!(exchange.balance("BTC").await, dec!(2.1));
        assert!(matches!(events.recv().await.unwrap(), UserStreamEvent::AccountUpdate(_)));

        exchange
            .place_order(market_order(contract, OrderSide::Sell, dec!(1)))
            .await
            .unwrap();
        // + (101 - 0.0404)
        assert_eq!(exchange.balance("USDT").await, dec!(900.8796));
        assert_eq!(exchange.balance("BTC").await, dec!(1.1));

        let stored = exchange
            .get_order(&exchange.get_contracts().await.unwrap()["BTCUSDT"], order.id)
            .await
            .unwrap();
        assert_eq!(stored, Some(order));
    }

    #[tokio::test]
    async fn test_order_without_price_is_rejected() {
        let exchange = FakeExchange::new();
        let contract = exchange.get_contracts().await.unwrap()["ETHUSDT"].clone();
        let result = exchange.place_order(market_order(contract, OrderSide::Buy, dec!(1))).await;
        assert!(matches!(result, Err(ExchangeError::UnknownContract(_))));
    }

    #[tokio::test]
    async fn test_account_settings_are_recorded() {
        let exchange = FakeExchange::new();
        assert!(exchange.is_hedge_mode().await.unwrap());
        exchange.change_leverage("ETHUSDT", 5).await.unwrap();
        assert_eq!(exchange.leverage("ETHUSDT").await, Some(5));
        assert_eq!(exchange.get_account_info().await.unwrap().positions.len(), 9);
    }
}
