use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::commands::{Command, PlaceOrder, TrailingStop};
use super::storage::LocalStorage;
use super::StrategyError;
use crate::bot::ExchangeState;
use crate::exchange::ExchangeUserClient;
use crate::helpers::now_ms;
use crate::models::{
    ClientOrderId, Contract, Order, OrderRequest, OrderType, Position, PositionSide, PositionStatus, StrategyId,
    Symbol,
};
use crate::store::TradeStore;

const ORDER_POLL_INTERVAL: Duration = Duration::from_secs(1);

enum Step {
    /// Run this command right away.
    Next(Command),
    /// Keep for the next round.
    Wait(Command),
    Done,
}

/// Runs order commands of one strategy and keeps its positions in sync with fills.
pub struct CommandHandler {
    store: Arc<dyn TradeStore>,
    exchange: Arc<dyn ExchangeUserClient>,
    state: Arc<RwLock<ExchangeState>>,
    strategy_id: StrategyId,
    symbols: Vec<Symbol>,
    storage: LocalStorage,
    commands: HashMap<Symbol, Vec<Command>>,
    waiting: HashMap<ClientOrderId, PlaceOrder>,
    poll_interval: Duration,
}

impl CommandHandler {
    pub fn new(
        store: Arc<dyn TradeStore>,
        exchange: Arc<dyn ExchangeUserClient>,
        state: Arc<RwLock<ExchangeState>>,
        strategy_id: StrategyId,
        symbols: Vec<Symbol>,
    ) -> Self {
        Self {
            store,
            exchange,
            state,
            strategy_id,
            symbols,
            storage: LocalStorage::new(),
            commands: HashMap::new(),
            waiting: HashMap::new(),
            poll_interval: ORDER_POLL_INTERVAL,
        }
    }

    pub fn storage(&self) -> &LocalStorage {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut LocalStorage {
        &mut self.storage
    }

    pub fn has_outgoing_commands(&self, symbol: &str) -> bool {
        self.commands.get(symbol).is_some_and(|commands| !commands.is_empty())
    }

    pub fn append(&mut self, command: Command) {
        let commands = self.commands.entry(command.symbol().to_string()).or_default();
        if commands.contains(&command) {
            warn!("Duplicate command ignored!");
            return;
        }
        commands.push(command);
    }

    /// Runs pending commands of `symbol` in order. Untriggered trailing stops stay queued.
    pub async fn execute(&mut self, symbol: &str) {
        let Some(commands) = self.commands.remove(symbol) else {
            return;
        };

        let mut next_round = Vec::new();
        for command in commands {
            let mut current = Some(command);
            while let Some(command) = current.take() {
                match self.handle(command).await {
                    Ok(Step::Next(next)) => current = Some(next),
                    Ok(Step::Wait(command)) => next_round.push(command),
                    Ok(Step::Done) => {}
                    Err(err) => error!("Command failed: symbol={}; {}", symbol, err),
                }
            }
        }

        if !next_round.is_empty() {
            self.commands.insert(symbol.to_string(), next_round);
        }
    }

    async fn handle(&mut self, command: Command) -> Result<Step, StrategyError> {
        match command {
            Command::TrailingStop(command) => Ok(self.handle_trailing_stop(command).await),
            Command::PlaceOrder(command) => {
                self.handle_place_order(command).await?;
                Ok(Step::Done)
            }
        }
    }

    async fn handle_trailing_stop(&self, mut command: TrailingStop) -> Step {
        let book = self.state.read().await.book(&command.contract.symbol).cloned();
        let triggered = book.is_some_and(|book| command.update(&book));
        if triggered {
            Step::Next(Command::PlaceOrder(command.next))
        } else {
            Step::Wait(Command::TrailingStop(command))
        }
    }

    async fn handle_place_order(&mut self, command: PlaceOrder) -> Result<(), StrategyError> {
        let client_order_id = Uuid::new_v4().simple().to_string();
        self.waiting.insert(client_order_id.clone(), command.clone());

        info!("Placing order: symbol={}", command.contract.symbol);
        let request = OrderRequest {
            contract: command.contract.clone(),
            client_order_id: client_order_id.clone(),
            order_type: OrderType::Market,
            side: command.order_side,
            position_side: command.position_side,
            quantity: command.quantity,
            price: None,
            time_in_force: None,
        };

        let placed = match self.exchange.place_order(request).await {
            Ok(placed) => placed,
            Err(err) => {
                self.waiting.remove(&client_order_id);
                return Err(err.into());
            }
        };

        match placed {
            Some(order) => {
                let order = if order.is_processed() {
                    order
                } else {
                    self.wait_for_processed(&command.contract, order).await?
                };
                self.update_order(order).await
            }
            None => {
                error!("Could not place order! symbol={}", command.contract.symbol);
                self.waiting.remove(&client_order_id);
                Ok(())
            }
        }
    }

    async fn wait_for_processed(&self, contract: &Contract, order: Order) -> Result<Order, StrategyError> {
        loop {
            tokio::time::sleep(self.poll_interval).await;
            if let Some(current) = self.exchange.get_order(contract, order.id).await? {
                if current.is_processed() {
                    return Ok(current);
                }
            }
        }
    }

    /// Applies an order update coming from a placement or the user stream.
    pub async fn update_order(&mut self, order: Order) -> Result<(), StrategyError> {
        if !self.symbols.contains(&order.symbol) {
            return Ok(());
        }
        // Skip unknown order updates
        let Some(command) = self.waiting.get(&order.client_order_id) else {
            return Ok(());
        };

        let mut order = if self.store.count_orders(order.id).await? == 0 {
            let order = Order {
                context: command.context.clone(),
                ..order
            };
            self.store.create_order(&order).await?;
            order
        } else {
            self.store.update_order(&order).await?
        };

        if order.is_filled() {
            let position = match self.storage.get_position(&order.symbol, order.position_side) {
                Some(position) => position.clone(),
                None => self.create_position(&order.symbol, order.position_side).await?,
            };

            order.position_id = Some(position.id.clone());
            order = self.store.update_order(&order).await?;
            self.storage.add_order(order.clone());

            info!(
                "Order filled! position_id={}; side={}; quantity={}; price={};",
                position.id, order.side, order.quantity, order.entry_price
            );
            self.update_position(position, &order).await?;
        }

        if order.is_processed() {
            self.waiting.remove(&order.client_order_id);
        }
        Ok(())
    }

    async fn create_position(&mut self, symbol: &str, side: PositionSide) -> Result<Position, StrategyError> {
        let position = Position {
            id: Uuid::new_v4().simple().to_string(),
            symbol: symbol.to_string(),
            side,
            strategy_id: self.strategy_id.clone(),
            status: PositionStatus::Open,
            quantity: Decimal::ZERO,
            total_quantity: Decimal::ZERO,
            entry_price: Decimal::ZERO,
            exit_price: Decimal::ZERO,
            orders: Vec::new(),
            create_timestamp: now_ms(),
            update_timestamp: None,
        };
        self.store.create_position(&position).await?;
        self.storage.add_position(position.clone());

        info!("Position created! position_id={};", position.id);
        Ok(position)
    }

    async fn update_position(&mut self, mut position: Position, order: &Order) -> Result<(), StrategyError> {
        let fills = self.storage.get_orders(&position.symbol, &position.id, Some(order.side));
        let total_quantity: Decimal = fills.iter().map(|o| o.quantity).sum();
        let total_price: Decimal = fills.iter().map(|o| o.quantity * o.entry_price).sum();
        let average = if total_quantity.is_zero() {
            order.entry_price
        } else {
            total_price / total_quantity
        };

        if order.side == position.entry_side() {
            position.entry_price = average;
            position.quantity += order.quantity;
            position.total_quantity += order.quantity;
        } else {
            position.exit_price = average;
            position.quantity -= order.quantity;
            if position.quantity <= Decimal::ZERO {
                position.status = PositionStatus::Closed;
            }
        }

        position.orders.push(order.id);
        position.update_timestamp = Some(now_ms());
        self.store.update_position(&position).await?;

        if position.is_closed() {
            self.storage.drop_position(&position.symbol, position.side);
            self.storage.drop_orders(&position.symbol, &position.id);
            info!(
                "Position closed! position_id={}; total_quantity={}; entry_price={}; exit_price={};",
                position.id, position.total_quantity, position.entry_price, position.exit_price
            );
        } else {
            self.storage.add_position(position);
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn set_poll_interval(&mut self, interval: Duration) {
        self.poll_interval = interval;
    }

    #[cfg(test)]
    pub(crate) fn commands(&self, symbol: &str) -> &[Command] {
        self.commands.get(symbol).map(Vec::as_slice).unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn waiting_len(&self) -> usize {
        self.waiting.len()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::exchange::fake::FakeExchange;
    use crate::exchange::{ExchangeError, UserStreamEvent};
    use crate::models::{Account, BookUpdate, MarginType, OrderId, OrderSide, OrderStatus};
    use crate::store::MemoryStore;
    use crate::strategy::commands::reason;
    use async_trait::async_trait;
    use mockall::mock;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::broadcast;

    mock! {
        pub UserClient {}
        #[async_trait]
        impl ExchangeUserClient for UserClient {
            async fn get_account_info(&self) -> Result<Account, ExchangeError>;
            async fn change_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError>;
            async fn is_hedge_mode(&self) -> Result<bool, ExchangeError>;
            async fn change_position_mode(&self, hedge_mode: bool) -> Result<(), ExchangeError>;
            async fn change_margin_type(&self, symbol: &str, margin_type: MarginType) -> Result<(), ExchangeError>;
            async fn place_order(&self, request: OrderRequest) -> Result<Option<Order>, ExchangeError>;
            async fn cancel_order(&self, contract: &Contract, order_id: OrderId) -> Result<Option<Order>, ExchangeError>;
            async fn get_order(&self, contract: &Contract, order_id: OrderId) -> Result<Option<Order>, ExchangeError>;
            async fn create_listen_key(&self) -> Result<String, ExchangeError>;
            async fn keepalive_listen_key(&self) -> Result<(), ExchangeError>;
            fn subscribe(&self) -> broadcast::Receiver<UserStreamEvent>;
        }
    }

    fn contract() -> Contract {
        Contract::new("BTCUSDT", "BTC", "USDT", 2, 3, dec!(5))
    }

    fn filled(request: &OrderRequest, id: OrderId, price: Decimal, status: OrderStatus) -> Order {
        Order {
            id,
            client_order_id: request.client_order_id.clone(),
            position_id: None,
            symbol: request.contract.symbol.clone(),
            status,
            order_type: request.order_type,
            side: request.side,
            position_side: request.position_side,
            quantity: request.quantity,
            entry_price: price,
            context: None,
            timestamp: id,
        }
    }

    fn place(order_side: OrderSide, quantity: Decimal) -> Command {
        Command::PlaceOrder(PlaceOrder {
            contract: contract(),
            position_side: PositionSide::Long,
            order_side,
            quantity,
            context: Some(reason("test")),
        })
    }

    async fn handler(exchange: Arc<dyn ExchangeUserClient>, store: Arc<MemoryStore>) -> CommandHandler {
        let fake = Arc::new(FakeExchange::new());
        let mut state = ExchangeState::new(fake, &["BTCUSDT".to_string()], 10, 0);
        state.update_book("BTCUSDT", BookUpdate::new(dec!(100), dec!(101)));
        CommandHandler::new(
            store,
            exchange,
            Arc::new(RwLock::new(state)),
            "strategy".into(),
            vec!["BTCUSDT".into()],
        )
    }

    #[tokio::test]
    async fn test_duplicate_commands_are_ignored() {
        let store = Arc::new(MemoryStore::new());
        let mut handler = handler(Arc::new(MockUserClient::new()), store).await;
        handler.append(place(OrderSide::Buy, dec!(1)));
        handler.append(place(OrderSide::Buy, dec!(1)));
        handler.append(place(OrderSide::Buy, dec!(2)));
        assert_eq!(handler.commands["BTCUSDT"].len(), 2);
        assert!(handler.has_outgoing_commands("BTCUSDT"));
        assert!(!handler.has_outgoing_commands("ETHUSDT"));
    }

    #[tokio::test]
    async fn test_position_averaging_and_closing() {
        let prices = [dec!(100), dec!(110), dec!(120), dec!(130)];
        let calls = Arc::new(AtomicUsize::new(0));
        let mut exchange = MockUserClient::new();
        let counter = calls.clone();
        exchange.expect_place_order().times(4).returning(move |request| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Ok(Some(filled(&request, n as OrderId + 1, prices[n], OrderStatus::Filled)))
        });

        let store = Arc::new(MemoryStore::new());
        let mut handler = handler(Arc::new(exchange), store.clone()).await;

        // entries: 1 @ 100, 3 @ 110
        handler.append(place(OrderSide::Buy, dec!(1)));
        handler.append(place(OrderSide::Buy, dec!(3)));
        handler.execute("BTCUSDT").await;
        assert!(!handler.has_outgoing_commands("BTCUSDT"));

        let position = handler.storage().get_position("BTCUSDT", PositionSide::Long).unwrap().clone();
        assert_eq!(position.quantity, dec!(4));
        assert_eq!(position.total_quantity, dec!(4));
        assert_eq!(position.entry_price, dec!(107.5));
        assert_eq!(position.orders, vec![1, 2]);

        // exits: 2 @ 120, 2 @ 130
        handler.append(place(OrderSide::Sell, dec!(2)));
        handler.execute("BTCUSDT").await;
        let position = handler.storage().get_position("BTCUSDT", PositionSide::Long).unwrap().clone();
        assert_eq!(position.quantity, dec!(2));
        assert_eq!(position.exit_price, dec!(120));

        handler.append(place(OrderSide::Sell, dec!(2)));
        handler.execute("BTCUSDT").await;
        assert!(handler.storage().get_position("BTCUSDT", PositionSide::Long).is_none());
        assert!(handler.storage().get_orders("BTCUSDT", &position.id, None).is_empty());
        assert_eq!(handler.waiting_len(), 0);

        let stored = store.positions().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, PositionStatus::Closed);
        assert_eq!(stored[0].exit_price, dec!(125));
        assert_eq!(stored[0].total_quantity, dec!(4));

        let orders = store.orders().await;
        assert_eq!(orders.len(), 4);
        assert!(orders.iter().all(|o| o.position_id.as_deref() == Some(position.id.as_str())));
        assert_eq!(orders[0].context, Some(reason("test")));
    }

    #[tokio::test]
    async fn test_pending_order_is_polled_until_processed() {
        let placed: Arc<std::sync::Mutex<Option<OrderRequest>>> = Arc::default();
        let mut exchange = MockUserClient::new();
        let sent = placed.clone();
        exchange.expect_place_order().times(1).returning(move |request| {
            *sent.lock().unwrap() = Some(request.clone());
            Ok(Some(filled(&request, 9, Decimal::ZERO, OrderStatus::New)))
        });

        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        let sent = placed.clone();
        exchange.expect_get_order().times(2).returning(move |_, id| {
            let status = if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                OrderStatus::PartiallyFilled
            } else {
                OrderStatus::Filled
            };
            let request = sent.lock().unwrap().clone().unwrap();
            Ok(Some(filled(&request, id, dec!(100), status)))
        });

        let store = Arc::new(MemoryStore::new());
        let mut handler = handler(Arc::new(exchange), store.clone()).await;
        handler.set_poll_interval(Duration::from_millis(1));
        handler.append(place(OrderSide::Buy, dec!(1)));
        handler.execute("BTCUSDT").await;

        assert_eq!(polls.load(Ordering::SeqCst), 2);
        assert_eq!(handler.waiting_len(), 0);
        let orders = store.orders().await;
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].status, OrderStatus::Filled);
        let position = handler.storage().get_position("BTCUSDT", PositionSide::Long).unwrap();
        assert_eq!(position.entry_price, dec!(100));
    }

    #[tokio::test]
    async fn test_rejected_placement_leaves_nothing_waiting() {
        let mut exchange = MockUserClient::new();
        exchange.expect_place_order().times(1).returning(|_| Ok(None));

        let store = Arc::new(MemoryStore::new());
        let mut handler = handler(Arc::new(exchange), store.clone()).await;
        handler.append(place(OrderSide::Buy, dec!(1)));
        handler.execute("BTCUSDT").await;

        assert_eq!(handler.waiting_len(), 0);
        assert!(store.positions().await.is_empty());
    }

    #[tokio::test]
    async fn test_trailing_stop_waits_for_trigger() {
        let mut exchange = MockUserClient::new();
        exchange
            .expect_place_order()
            .times(1)
            .returning(|request| Ok(Some(filled(&request, 1, dec!(101), OrderStatus::Filled))));

        let store = Arc::new(MemoryStore::new());
        let mut handler = handler(Arc::new(exchange), store).await;
        let Command::PlaceOrder(next) = place(OrderSide::Buy, dec!(1)) else {
            unreachable!()
        };
        let trailing = TrailingStop::new(
            contract(),
            BookUpdate::new(dec!(100), dec!(101)),
            OrderSide::Buy,
            dec!(0.01),
            next,
        )
        .unwrap();
        handler.append(Command::TrailingStop(trailing));

        handler.execute("BTCUSDT").await;
        assert!(handler.has_outgoing_commands("BTCUSDT"));

        handler
            .state
            .write()
            .await
            .update_book("BTCUSDT", BookUpdate::new(dec!(101), dec!(102)));
        handler.execute("BTCUSDT").await;
        assert!(!handler.has_outgoing_commands("BTCUSDT"));
        assert!(handler.storage().get_position("BTCUSDT", PositionSide::Long).is_some());
    }

    #[tokio::test]
    async fn test_foreign_updates_are_ignored() {
        let store = Arc::new(MemoryStore::new());
        let mut handler = handler(Arc::new(MockUserClient::new()), store.clone()).await;
        let request = OrderRequest {
            contract: Contract::new("ETHUSDT", "ETH", "USDT", 2, 3, dec!(5)),
            client_order_id: "someone".into(),
            order_type: OrderType::Market,
            side: OrderSide::Buy,
            position_side: PositionSide::Long,
            quantity: dec!(1),
            price: None,
            time_in_force: None,
        };
        handler
            .update_order(filled(&request, 5, dec!(1), OrderStatus::Filled))
            .await
            .unwrap();
        assert!(store.orders().await.is_empty());
    }
}
