use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use log::{info, warn};

use crate::candles::Candles;
use crate::depth::{DepthBook, DepthStatus};
use crate::exchange::{ExchangeClient, ExchangeError};
use crate::models::{BookUpdate, Contract, DepthUpdate, Symbol, TickType, Timeframe, TradeUpdate};

/// Market view shared by the orchestrator and its strategies.
pub struct ExchangeState {
    exchange: Arc<dyn ExchangeClient>,
    candles_limit: usize,
    depth_limit: usize,
    contracts: HashMap<Symbol, Contract>,
    books: HashMap<Symbol, BookUpdate>,
    candles: HashMap<Symbol, HashMap<Timeframe, Candles>>,
    depth: HashMap<Symbol, DepthBook>,
}

impl ExchangeState {
    /// `depth_limit` of 0 disables depth books.
    pub fn new(exchange: Arc<dyn ExchangeClient>, symbols: &[Symbol], candles_limit: usize, depth_limit: usize) -> Self {
        let candles = symbols
            .iter()
            .map(|symbol| {
                let by_timeframe = Timeframe::ALL
                    .iter()
                    .map(|tf| (*tf, Candles::new(*tf, candles_limit)))
                    .collect();
                (symbol.clone(), by_timeframe)
            })
            .collect();
        let depth = if depth_limit > 0 {
            symbols.iter().map(|s| (s.clone(), DepthBook::new(depth_limit))).collect()
        } else {
            HashMap::new()
        };

        Self {
            exchange,
            candles_limit,
            depth_limit,
            contracts: HashMap::new(),
            books: HashMap::new(),
            candles,
            depth,
        }
    }

    pub async fn preload(&mut self) -> Result<(), ExchangeError> {
        self.contracts = self.exchange.get_contracts().await?;
        self.books = self.exchange.get_book().await?;
        self.preload_candles().await?;

        let symbols: Vec<Symbol> = self.depth.keys().cloned().collect();
        for symbol in symbols {
            self.preload_depth(&symbol).await?;
        }
        Ok(())
    }

    async fn preload_candles(&mut self) -> Result<(), ExchangeError> {
        for (symbol, timeframes) in self.candles.iter_mut() {
            info!("Preloading candlesticks for {}...", symbol);
            let requests = Timeframe::ALL
                .iter()
                .map(|tf| self.exchange.get_historical_candles(symbol, *tf, self.candles_limit, None));
            let snapshots = join_all(requests).await;

            for (timeframe, snapshot) in Timeframe::ALL.iter().zip(snapshots) {
                if let Some(candles) = timeframes.get_mut(timeframe) {
                    candles.set_snapshot(snapshot?);
                }
            }
        }
        Ok(())
    }

    /// Fetches a fresh depth snapshot. Returns the status of the updates queued meanwhile.
    pub async fn preload_depth(&mut self, symbol: &str) -> Result<Option<DepthStatus>, ExchangeError> {
        if !self.depth.contains_key(symbol) {
            return Ok(None);
        }
        let snapshot = self.exchange.get_depth(symbol, self.depth_limit).await?;
        Ok(self.depth.get_mut(symbol).and_then(|book| book.set_snapshot(&snapshot)))
    }

    pub fn update_candles(&mut self, symbol: &str, trade: &TradeUpdate) -> Vec<(Timeframe, Option<TickType>)> {
        let Some(timeframes) = self.candles.get_mut(symbol) else {
            warn!("Trade update for unknown symbol {}", symbol);
            return Vec::new();
        };
        let mut ticks: Vec<(Timeframe, Option<TickType>)> = timeframes
            .iter_mut()
            .map(|(timeframe, candles)| (*timeframe, candles.update(trade)))
            .collect();
        ticks.sort_by_key(|(timeframe, _)| *timeframe);
        ticks
    }

    pub fn update_book(&mut self, symbol: &str, book: BookUpdate) {
        self.books.insert(symbol.to_string(), book);
    }

    /// `None` when depth is disabled for the symbol.
    pub fn update_depth(&mut self, symbol: &str, update: DepthUpdate) -> Option<DepthStatus> {
        self.depth.get_mut(symbol).map(|book| book.update(update))
    }

    pub fn book(&self, symbol: &str) -> Option<&BookUpdate> {
        self.books.get(symbol)
    }

    pub fn contract(&self, symbol: &str) -> Option<&Contract> {
        self.contracts.get(symbol)
    }

    pub fn candles(&self, symbol: &str, timeframe: Timeframe) -> Option<&Candles> {
        self.candles.get(symbol).and_then(|by_tf| by_tf.get(&timeframe))
    }

    pub fn depth(&self, symbol: &str) -> Option<&DepthBook> {
        self.depth.get(symbol)
    }

    #[cfg(test)]
    pub(crate) fn set_contract(&mut self, contract: Contract) {
        self.contracts.insert(contract.symbol.clone(), contract);
    }

    #[cfg(test)]
    pub(crate) fn candles_mut(&mut self, symbol: &str, timeframe: Timeframe) -> Option<&mut Candles> {
        self.candles.get_mut(symbol).and_then(|by_tf| by_tf.get_mut(&timeframe))
    }
}
