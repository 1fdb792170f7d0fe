use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, RwLock};

use super::{BotError, ExchangeState};
use crate::config::BotSettings;
use crate::depth::DepthStatus;
use crate::exchange::binance::{BinanceClient, BinanceUserStream};
use crate::exchange::fake::FakeExchange;
use crate::exchange::{ExchangeClient, ExchangeUserClient};
use crate::helpers::now_ms;
use crate::line::LineEvent;
use crate::models::{
    BookUpdate, DepthUpdate, LineUpdate, StrategyRules, Symbol, TickType, Timestamp, TradeUpdate,
};
use crate::store::TradeStore;
use crate::strategy::Strategy;

const EXECUTE_CHUNK_SIZE: usize = 10;
const EXECUTE_CHUNK_PAUSE: Duration = Duration::from_millis(500);
const MAX_TRADE_DELAY_MS: i64 = 5_000;

/// Feeds line events into the exchange state and the strategies.
pub struct Orchestrator {
    settings: BotSettings,
    state: Arc<RwLock<ExchangeState>>,
    store: Arc<dyn TradeStore>,
    /// Simulated exchange in replay mode.
    fake: Option<Arc<FakeExchange>>,
    user_clients: HashMap<(String, bool), Arc<BinanceClient>>,
    strategies: Vec<Strategy>,
    last_signal_check: HashMap<Symbol, Timestamp>,
}

impl Orchestrator {
    pub fn new(
        settings: BotSettings,
        exchange: Arc<dyn ExchangeClient>,
        store: Arc<dyn TradeStore>,
        fake: Option<Arc<FakeExchange>>,
    ) -> Self {
        let state = ExchangeState::new(
            exchange,
            &settings.symbols,
            settings.candles_limit,
            settings.depth_limit,
        );
        Self {
            settings,
            state: Arc::new(RwLock::new(state)),
            store,
            fake,
            user_clients: HashMap::new(),
            strategies: Vec::new(),
            last_signal_check: HashMap::new(),
        }
    }

    pub fn is_replay(&self) -> bool {
        self.fake.is_some()
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    /// Preloads the exchange state and starts every strategy. Strategies failing to start are skipped.
    pub async fn start(&mut self, rules: Vec<StrategyRules>) -> Result<(), BotError> {
        self.state.write().await.preload().await?;

        for rules in rules {
            let name = rules.name.clone();
            let exchange = self.user_client(&rules);
            let mut strategy = Strategy::new(rules, self.state.clone(), self.store.clone(), exchange);
            match strategy.start().await {
                Ok(()) => self.strategies.push(strategy),
                Err(err) => error!("Strategy {} failed to start: {}", name, err),
            }
        }

        info!("Running {} strategies", self.strategies.len());
        Ok(())
    }

    /// One user client and user stream per key pair.
    fn user_client(&mut self, rules: &StrategyRules) -> Arc<dyn ExchangeUserClient> {
        if let Some(fake) = &self.fake {
            return fake.clone();
        }

        let key = (rules.binance_public_key.clone(), rules.binance_testnet);
        let client = self.user_clients.entry(key).or_insert_with(|| {
            let client = Arc::new(BinanceClient::new(
                &rules.binance_public_key,
                &rules.binance_private_key,
                rules.binance_testnet,
            ));
            BinanceUserStream::new(client.clone(), rules.binance_testnet).spawn();
            client
        });
        client.clone()
    }

    /// Processes line events until the source closes or a replay is done.
    pub async fn run(&mut self, mut events: mpsc::Receiver<LineEvent>) -> Result<(), BotError> {
        while let Some(event) = events.recv().await {
            for strategy in self.strategies.iter_mut() {
                strategy.process_user_events().await;
            }

            match event {
                LineEvent::Update { symbol, update } => self.on_update(&symbol, update).await,
                LineEvent::Alive => debug!("Line is alive"),
                LineEvent::Reset => {
                    info!("Line reset! Preloading exchange state...");
                    if let Err(err) = self.state.write().await.preload().await {
                        error!("Failed to preload exchange state: {}", err);
                    }
                }
                LineEvent::Done => {
                    info!("Line source is done");
                    break;
                }
            }
        }
        Ok(())
    }

    async fn on_update(&mut self, symbol: &str, update: LineUpdate) {
        match update {
            LineUpdate::Book(book) => self.on_book_update(symbol, book).await,
            LineUpdate::Trade(trade) => self.on_trade_update(symbol, trade).await,
            LineUpdate::Depth(depth) => self.on_depth_update(symbol, depth).await,
        }
    }

    async fn on_book_update(&mut self, symbol: &str, book: BookUpdate) {
        if let Some(fake) = &self.fake {
            fake.set_price(symbol, book.clone()).await;
        }
        self.state.write().await.update_book(symbol, book);

        let pause = !self.is_replay();
        let (pending, idle): (Vec<&mut Strategy>, Vec<&mut Strategy>) = self
            .strategies
            .iter_mut()
            .partition(|strategy| strategy.has_outgoing_commands(symbol));

        for strategy in idle {
            if let Err(err) = strategy.on_book_update(symbol).await {
                error!("Strategy {} book update failed: {}", strategy.rules().name, err);
            }
        }
        execute_pending(symbol, pending, pause).await;
    }

    async fn on_trade_update(&mut self, symbol: &str, trade: TradeUpdate) {
        let ticks = self.state.write().await.update_candles(symbol, &trade);

        if !self.is_replay() {
            let delay = now_ms() - trade.timestamp;
            if delay >= MAX_TRADE_DELAY_MS {
                warn!("Messages processing delay of {:.2}s!", delay as f64 / 1000.0);
                return;
            }
        }

        let new_candle = ticks.iter().any(|(_, tick)| *tick == Some(TickType::NewCandle));
        if !(new_candle || self.signal_check_due(symbol, trade.timestamp)) {
            return;
        }
        self.last_signal_check.insert(symbol.to_string(), trade.timestamp);

        let pause = !self.is_replay();
        let (pending, idle): (Vec<&mut Strategy>, Vec<&mut Strategy>) = self
            .strategies
            .iter_mut()
            .partition(|strategy| strategy.has_outgoing_commands(symbol));

        for strategy in idle {
            if let Err(err) = strategy.on_candles_update(symbol).await {
                error!("Strategy {} candles update failed: {}", strategy.rules().name, err);
            }
        }
        execute_pending(symbol, pending, pause).await;
    }

    fn signal_check_due(&mut self, symbol: &str, timestamp: Timestamp) -> bool {
        let interval = self.settings.signal_check_interval as i64 * 1000;
        if interval == 0 {
            return false;
        }
        let last = *self
            .last_signal_check
            .entry(symbol.to_string())
            .or_insert(timestamp);
        timestamp - last >= interval
    }

    async fn on_depth_update(&mut self, symbol: &str, update: DepthUpdate) {
        let status = self.state.write().await.update_depth(symbol, update);
        if let Some(DepthStatus::Gap { missing }) = status {
            warn!("Depth of {} lost {} updates, refetching snapshot", symbol, missing);
            if let Err(err) = self.state.write().await.preload_depth(symbol).await {
                error!("Failed to refetch depth snapshot of {}: {}", symbol, err);
            }
        }
    }
}

/// Runs pending commands in chunks, pausing between chunks to spare the exchange rate limits.
async fn execute_pending(symbol: &str, mut pending: Vec<&mut Strategy>, pause: bool) {
    for chunk in pending.chunks_mut(EXECUTE_CHUNK_SIZE) {
        join_all(chunk.iter_mut().map(|strategy| strategy.execute(symbol))).await;
        if pause {
            tokio::time::sleep(EXECUTE_CHUNK_PAUSE).await;
        }
    }
}
