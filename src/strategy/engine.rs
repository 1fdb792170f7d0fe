use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use log::{error, info, warn};
use rust_decimal::Decimal;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::{broadcast, RwLock};

use super::command_handler::CommandHandler;
use super::commands::{reason, Command, OrderContext, PlaceOrder, TrailingStop};
use super::StrategyError;
use crate::bot::ExchangeState;
use crate::candles::IndicatorParams;
use crate::exchange::{ExchangeUserClient, UserStreamEvent};
use crate::helpers::{round_to_step, to_decimal_places};
use crate::models::{
    AccountBalance, AccountPosition, Asset, BookUpdate, Contract, OrderSide, Position, PositionSide, StrategyRules,
    Timeframe,
};
use crate::store::TradeStore;

type SignalGroups = BTreeMap<(PositionSide, OrderSide), HashMap<(String, Timeframe), bool>>;

/// Rule driven strategy: opens positions on indicator signals and manages
/// them with stop loss and stepped take profit.
pub struct Strategy {
    rules: StrategyRules,
    state: Arc<RwLock<ExchangeState>>,
    store: Arc<dyn TradeStore>,
    exchange: Arc<dyn ExchangeUserClient>,
    events: broadcast::Receiver<UserStreamEvent>,
    handler: CommandHandler,
    assets: HashMap<Asset, AccountBalance>,
    ready: bool,
}

impl Strategy {
    pub fn new(
        rules: StrategyRules,
        state: Arc<RwLock<ExchangeState>>,
        store: Arc<dyn TradeStore>,
        exchange: Arc<dyn ExchangeUserClient>,
    ) -> Self {
        let handler = CommandHandler::new(
            store.clone(),
            exchange.clone(),
            state.clone(),
            rules.id.clone(),
            rules.symbols.clone(),
        );
        Self {
            events: exchange.subscribe(),
            rules,
            state,
            store,
            exchange,
            handler,
            assets: HashMap::new(),
            ready: false,
        }
    }

    pub fn rules(&self) -> &StrategyRules {
        &self.rules
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn balance(&self, asset: &str) -> Option<Decimal> {
        self.assets.get(asset).map(|balance| balance.wallet_balance)
    }

    /// Loads the account, restores open positions and switches the account to hedge mode.
    pub async fn start(&mut self) -> Result<(), StrategyError> {
        let account = self.exchange.get_account_info().await?;
        self.assets = account.assets;
        self.set_positions(&account.positions).await?;

        if !self.exchange.is_hedge_mode().await? {
            self.exchange.change_position_mode(true).await?;
        }

        self.ready = true;
        info!("Strategy {} started! id={}", self.rules.name, self.rules.id);
        Ok(())
    }

    async fn set_positions(&mut self, account_positions: &[AccountPosition]) -> Result<(), StrategyError> {
        let stored = self
            .store
            .find_open_positions(&self.rules.id, &self.rules.symbols)
            .await?;

        for symbol in self.rules.symbols.clone() {
            let contract = self.contract(&symbol).await?;
            let current: Vec<&AccountPosition> = account_positions
                .iter()
                .filter(|p| p.symbol == symbol && p.quantity > Decimal::ZERO)
                .collect();

            let actual: Vec<Position> = stored
                .iter()
                .filter(|p| p.symbol == symbol)
                .filter(|p| {
                    current.iter().any(|acc| {
                        acc.side == p.side
                            && acc.quantity == p.quantity
                            && to_decimal_places(acc.entry_price, contract.lot_size)
                                == to_decimal_places(p.entry_price, contract.lot_size)
                    })
                })
                .cloned()
                .collect();

            if actual.len() != current.len() {
                return Err(StrategyError::UnknownPosition(symbol));
            }

            self.exchange.change_leverage(&symbol, self.rules.leverage()).await?;

            let ids: Vec<_> = actual.iter().flat_map(|p| p.orders.iter().copied()).collect();
            let orders = if ids.is_empty() {
                Vec::new()
            } else {
                self.store.find_orders(&ids).await?
            };
            self.handler.storage_mut().set_snapshot(&symbol, actual, orders);
        }
        Ok(())
    }

    async fn contract(&self, symbol: &str) -> Result<Contract, StrategyError> {
        self.state
            .read()
            .await
            .contract(symbol)
            .cloned()
            .ok_or_else(|| StrategyError::MissingContract(symbol.to_string()))
    }

    async fn market(&self, symbol: &str) -> Result<(BookUpdate, Contract), StrategyError> {
        let state = self.state.read().await;
        let book = state
            .book(symbol)
            .cloned()
            .ok_or_else(|| StrategyError::MissingBook(symbol.to_string()))?;
        let contract = state
            .contract(symbol)
            .cloned()
            .ok_or_else(|| StrategyError::MissingContract(symbol.to_string()))?;
        Ok((book, contract))
    }

    /// Evaluates every condition over its last `save_signal_candles` candles.
    async fn evaluate_conditions(&self, symbol: &str) -> Result<SignalGroups, StrategyError> {
        let state = self.state.read().await;
        let mut groups = SignalGroups::new();

        for condition in &self.rules.conditions {
            let Some(candles) = state.candles(symbol, condition.timeframe) else {
                continue;
            };
            let params: IndicatorParams = condition
                .parameters
                .iter()
                .map(|p| (p.field.clone(), p.value))
                .collect();

            let mut triggered = false;
            for n in 1..=condition.save_signal_candles {
                let values = candles.indicator(&condition.indicator, &params, -(n as isize))?;
                triggered = condition
                    .conditions
                    .iter()
                    .any(|c| c.condition.compare(values.get(&c.field).copied().flatten(), c.value));
                if triggered {
                    break;
                }
            }

            groups
                .entry((condition.position_side, condition.order_side))
                .or_default()
                .insert((condition.indicator.clone(), condition.timeframe), triggered);
        }
        Ok(groups)
    }

    pub async fn check_signal(&mut self, symbol: &str) -> Result<(), StrategyError> {
        let groups = self.evaluate_conditions(symbol).await?;
        let (book, contract) = self.market(symbol).await?;

        for ((position_side, order_side), results) in groups {
            let triggered = results.values().filter(|triggered| **triggered).count();
            if triggered < self.rules.conditions_trigger_count {
                continue;
            }

            if let Some(position) = self.handler.storage().get_position(symbol, position_side) {
                let orders = self.handler.storage().get_orders(symbol, &position.id, Some(order_side));
                if !orders.is_empty() {
                    continue;
                }
            }

            let Some(quantity) = self.calc_trade_quantity(&book, &contract, self.rules.balance_stake, order_side) else {
                continue;
            };
            info!(
                "Signal triggered! symbol={}; position_side={}; order_side={}; conditions={};",
                symbol, position_side, order_side, triggered
            );
            self.place_order(&book, &contract, position_side, order_side, quantity, self.rules.trailing, None)?;
        }
        Ok(())
    }

    /// Quantity worth `balance_stake` of the quote balance with leverage, rounded to the lot size.
    pub fn calc_trade_quantity(
        &self,
        book: &BookUpdate,
        contract: &Contract,
        balance_stake: Decimal,
        order_side: OrderSide,
    ) -> Option<Decimal> {
        let balance = self.assets.get(&contract.quote_asset)?.wallet_balance;

        let price = book.price(order_side);
        if price <= Decimal::ZERO {
            warn!("Abnormal price during calc quantity!");
            return None;
        }

        let quantity = balance * balance_stake * Decimal::from(self.rules.leverage()) / price;
        let quantity = round_to_step(quantity, contract.lot_size);

        if quantity * price < contract.min_notional {
            error!(
                "The quantity is too small! quote_asset={}; base_asset={}; balance={}; balance_stake={}; \
                 quantity={}; price={}; lot_size={}; min_notional={};",
                contract.quote_asset,
                contract.base_asset,
                balance,
                balance_stake,
                quantity,
                price,
                contract.lot_size,
                contract.min_notional
            );
            return None;
        }
        Some(quantity)
    }

    #[allow(clippy::too_many_arguments)]
    fn place_order(
        &mut self,
        book: &BookUpdate,
        contract: &Contract,
        position_side: PositionSide,
        order_side: OrderSide,
        quantity: Decimal,
        trailing: bool,
        context: Option<OrderContext>,
    ) -> Result<(), StrategyError> {
        let command = PlaceOrder {
            contract: contract.clone(),
            position_side,
            order_side,
            quantity,
            context,
        };

        let command = match self.rules.trailing_callback_rate.filter(|_| trailing) {
            Some(rate) => Command::TrailingStop(TrailingStop::new(
                contract.clone(),
                book.clone(),
                order_side,
                rate,
                command,
            )?),
            None => Command::PlaceOrder(command),
        };
        self.handler.append(command);
        Ok(())
    }

    fn close_position(
        &mut self,
        book: &BookUpdate,
        contract: &Contract,
        position: &Position,
        context: OrderContext,
    ) -> Result<(), StrategyError> {
        self.place_order(
            book,
            contract,
            position.side,
            position.exit_side(),
            position.quantity,
            true,
            Some(context),
        )
    }

    pub fn check_stop_loss(
        &mut self,
        book: &BookUpdate,
        contract: &Contract,
        position: &Position,
    ) -> Result<(), StrategyError> {
        let Some(stop_loss) = &self.rules.stop_loss else {
            return Ok(());
        };
        if !position.is_open() || position.quantity.is_zero() {
            return Ok(());
        }

        let (price, trigger, triggered) = match position.side {
            PositionSide::Long => {
                let trigger = position.entry_price * (Decimal::ONE - stop_loss.rate);
                (book.bid, trigger, book.bid <= trigger)
            }
            PositionSide::Short => {
                let trigger = position.entry_price * (Decimal::ONE + stop_loss.rate);
                (book.ask, trigger, book.ask >= trigger)
            }
            PositionSide::Both => return Ok(()),
        };

        if triggered {
            warn!(
                "Stop loss triggered! position_id={}; trigger={}; price={};",
                position.id, trigger, price
            );
            self.close_position(book, contract, position, reason("Stop loss triggered"))?;
        }
        Ok(())
    }

    pub fn check_take_profit(
        &mut self,
        book: &BookUpdate,
        contract: &Contract,
        position: &Position,
    ) -> Result<(), StrategyError> {
        let steps = match &self.rules.take_profit {
            Some(take_profit) => take_profit.steps.clone(),
            None => return Ok(()),
        };
        if !position.is_open() || position.quantity.is_zero() {
            return Ok(());
        }

        let done = self
            .handler
            .storage()
            .get_orders(&position.symbol, &position.id, Some(position.exit_side()))
            .len();
        let Some(step) = steps.get(done) else {
            return Ok(());
        };

        let (price, triggered) = match position.side {
            PositionSide::Long => (book.bid, book.bid >= position.entry_price * (Decimal::ONE + step.level)),
            PositionSide::Short => (book.ask, book.ask <= position.entry_price * (Decimal::ONE - step.level)),
            PositionSide::Both => return Ok(()),
        };
        if !triggered {
            return Ok(());
        }
        info!("Take profit level {} reached! position_id={}", step.level, position.id);

        let mut quantity = position.total_quantity * step.stake;
        let mut top_up = Decimal::ZERO;
        if quantity * price < contract.min_notional {
            let prev = quantity;
            quantity = contract.min_notional / price;
            top_up = quantity - prev;
        }

        // Remainder left before the last level; too small to trade closes the position now
        let rest_stake: Decimal = steps[done..steps.len() - 1].iter().map(|s| s.stake).sum();
        let rest_quantity = position.total_quantity * rest_stake - top_up;
        if rest_quantity * price < contract.min_notional {
            quantity = position.quantity;
        }

        if quantity >= position.quantity {
            self.close_position(book, contract, position, reason("Last take profit level reached"))
        } else {
            let quantity = round_to_step(quantity, contract.lot_size);
            self.place_order(
                book,
                contract,
                position.side,
                position.exit_side(),
                quantity,
                true,
                Some(reason(format!("Take profit level {} reached", step.level))),
            )
        }
    }

    pub fn has_outgoing_commands(&self, symbol: &str) -> bool {
        self.handler.has_outgoing_commands(symbol)
    }

    pub async fn execute(&mut self, symbol: &str) {
        self.handler.execute(symbol).await;
    }

    pub async fn on_book_update(&mut self, symbol: &str) -> Result<(), StrategyError> {
        if !self.ready || !self.rules.has_symbol(symbol) {
            return Ok(());
        }

        // Pending trailing commands first
        if self.has_outgoing_commands(symbol) {
            self.execute(symbol).await;
            return Ok(());
        }

        for side in [PositionSide::Long, PositionSide::Short] {
            let Some(position) = self.handler.storage().get_position(symbol, side).cloned() else {
                continue;
            };
            let (book, contract) = self.market(symbol).await?;
            self.check_stop_loss(&book, &contract, &position)?;
            self.check_take_profit(&book, &contract, &position)?;

            if self.has_outgoing_commands(symbol) {
                self.execute(symbol).await;
            }
        }
        Ok(())
    }

    pub async fn on_candles_update(&mut self, symbol: &str) -> Result<(), StrategyError> {
        if !self.ready || !self.rules.has_symbol(symbol) {
            return Ok(());
        }

        self.check_signal(symbol).await?;
        if self.has_outgoing_commands(symbol) {
            self.execute(symbol).await;
        }
        Ok(())
    }

    /// Applies user stream events received since the last call.
    pub async fn process_user_events(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(event) => self.handle_user_event(event).await,
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!("Strategy {} skipped {} user stream events", self.rules.name, skipped)
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
    }

    async fn handle_user_event(&mut self, event: UserStreamEvent) {
        match event {
            UserStreamEvent::AccountUpdate(account) => {
                self.assets.extend(account.assets);
                let mut assets: Vec<&AccountBalance> = self.assets.values().collect();
                assets.sort_by(|a, b| a.asset.cmp(&b.asset));
                let assets: Vec<String> = assets
                    .iter()
                    .map(|a| format!("{}={}", a.asset, a.wallet_balance))
                    .collect();
                info!("Account updated! {}", assets.join("; "));
            }
            UserStreamEvent::AccountConfigUpdate(config) => {
                info!(
                    "Account config updated! symbol={}; leverage={}",
                    config.symbol, config.leverage
                );
            }
            UserStreamEvent::OrderTradeUpdate(order) => {
                if let Err(err) = self.handler.update_order(order).await {
                    error!("Failed to apply order update: {}", err);
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn handler(&self) -> &CommandHandler {
        &self.handler
    }

    #[cfg(test)]
    pub(crate) fn handler_mut(&mut self) -> &mut CommandHandler {
        &mut self.handler
    }
}
