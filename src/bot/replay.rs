use std::collections::BTreeMap;
use std::sync::Arc;

use log::{error, info};
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{BotError, Orchestrator};
use crate::config::BotSettings;
use crate::exchange::fake::FakeExchange;
use crate::line::{LineError, ReplayClient, LINE_CAPACITY};
use crate::models::{Asset, PositionSide, StrategyRules};
use crate::store::{MemoryStore, UpdateLogQuery, UpdateLogStore};

/// Outcome of a replay run.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplaySummary {
    pub positions: usize,
    pub open_positions: usize,
    pub closed_positions: usize,
    pub orders: usize,
    /// Realized profit of closed positions in quote asset, fees excluded.
    pub pnl: Decimal,
    pub balances: BTreeMap<Asset, Decimal>,
}

impl ReplaySummary {
    pub async fn collect(store: &MemoryStore, exchange: &FakeExchange) -> Self {
        let positions = store.positions().await;
        let closed: Vec<_> = positions.iter().filter(|p| p.is_closed()).collect();
        let pnl = closed
            .iter()
            .map(|p| match p.side {
                PositionSide::Long => (p.exit_price - p.entry_price) * p.total_quantity,
                PositionSide::Short => (p.entry_price - p.exit_price) * p.total_quantity,
                PositionSide::Both => Decimal::ZERO,
            })
            .sum();

        Self {
            positions: positions.len(),
            open_positions: positions.iter().filter(|p| p.is_open()).count(),
            closed_positions: closed.len(),
            orders: store.orders().await.len(),
            pnl,
            balances: exchange.balances().await.into_iter().collect(),
        }
    }

    pub fn log(&self) {
        info!(
            "Replay summary! positions={}; open={}; closed={}; orders={}; pnl={};",
            self.positions, self.open_positions, self.closed_positions, self.orders, self.pnl
        );
        for (asset, balance) in &self.balances {
            info!("Balance {}={}", asset, balance.normalize());
        }
    }
}

/// Replay feed task, aborted when dropped before it finished.
struct ReplayTask(JoinHandle<Result<(), LineError>>);

impl Drop for ReplayTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Plays persisted updates through the strategies against the simulated exchange.
pub async fn run_replay(
    settings: &BotSettings,
    rules: Vec<StrategyRules>,
    update_logs: Arc<dyn UpdateLogStore>,
) -> Result<ReplaySummary, BotError> {
    let exchange = Arc::new(FakeExchange::new());
    let trades = Arc::new(MemoryStore::new());

    let mut orchestrator = Orchestrator::new(
        settings.clone(),
        exchange.clone(),
        trades.clone(),
        Some(exchange.clone()),
    );
    orchestrator.start(rules).await?;

    let query = UpdateLogQuery {
        symbols: settings.symbols.clone(),
        from: settings.replay_from,
        to: settings.replay_to,
    };
    let client = ReplayClient::new(update_logs, query, settings.replay_speed);
    let (tx, rx) = mpsc::channel(LINE_CAPACITY);
    let mut replay = ReplayTask(tokio::spawn(client.run(tx)));

    orchestrator.run(rx).await?;
    match (&mut replay.0).await {
        Ok(result) => result?,
        Err(err) => error!("Replay task failed: {}", err),
    }

    let summary = ReplaySummary::collect(&trades, &exchange).await;
    summary.log();
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::orchestrator::tests::{always_long, rules, settings};
    use crate::models::{BookUpdate, LineUpdate, TradeUpdate, UpdateLog};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn log(timestamp: i64, update: LineUpdate) -> UpdateLog {
        UpdateLog::new("BTCUSDT".into(), &update, timestamp).unwrap()
    }

    fn trade(price: Decimal, timestamp: i64) -> LineUpdate {
        LineUpdate::Trade(TradeUpdate {
            price,
            quantity: dec!(1),
            timestamp,
            is_buyer_maker: true,
        })
    }

    #[tokio::test]
    async fn test_replay_round_trip() {
        let logs = Arc::new(MemoryStore::new());
        logs.insert_update_logs(vec![
            log(0, LineUpdate::Book(BookUpdate::new(dec!(100), dec!(100.1)))),
            log(1_000, trade(dec!(100), 1_000)),
            log(61_000, trade(dec!(100), 61_000)),
            log(62_000, LineUpdate::Book(BookUpdate::new(dec!(97), dec!(97.1)))),
            // outside the replay period
            log(90_000_000, LineUpdate::Book(BookUpdate::new(dec!(120), dec!(120.1)))),
        ])
        .await
        .unwrap();

        let mut rules = rules("BTCUSDT");
        rules.conditions = vec![always_long()];
        let settings = settings(&[("REPLAY", "true"), ("REPLAY_TO", "100000")]);

        let summary = run_replay(&settings, vec![rules], logs).await.unwrap();
        assert_eq!(summary.positions, 1);
        assert_eq!(summary.closed_positions, 1);
        assert_eq!(summary.orders, 2);
        assert_eq!(summary.pnl, dec!(-2.9));
        // 1000 - (100 + 0.04) + (97.1 - 0.03884)
        assert_eq!(summary.balances["USDT"], dec!(997.02116));
        assert_eq!(summary.balances["BTC"], dec!(0.1));
    }

    #[tokio::test]
    async fn test_cancelled_replay_stops_feed() {
        let logs = Arc::new(MemoryStore::new());
        logs.insert_update_logs(vec![
            log(0, trade(dec!(100), 0)),
            // a thousand seconds away at speed 1
            log(1_000_000, trade(dec!(100), 1_000_000)),
        ])
        .await
        .unwrap();

        let settings = settings(&[("REPLAY", "true"), ("REPLAY_SPEED", "1")]);
        let run = run_replay(&settings, vec![rules("BTCUSDT")], logs.clone());
        assert!(tokio::time::timeout(Duration::from_millis(100), run).await.is_err());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(Arc::strong_count(&logs), 1);
    }

    #[tokio::test]
    async fn test_empty_replay() {
        let summary = run_replay(&settings(&[]), vec![rules("BTCUSDT")], Arc::new(MemoryStore::new()))
            .await
            .unwrap();
        assert_eq!(summary.positions, 0);
        assert_eq!(summary.pnl, Decimal::ZERO);
        assert_eq!(summary.balances["USDT"], dec!(1000));
    }
}
