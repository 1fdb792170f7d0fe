use std::collections::HashMap;
use std::time::Duration;

use log::{error, info, warn};
use tokio::sync::{mpsc, Notify};
use tokio::time::{interval, interval_at, Instant};

use super::{LineError, LinePublisher, LINE_CAPACITY};
use crate::exchange::binance::{BinanceMarketStream, MarketEvent};
use crate::helpers::now_ms;
use crate::models::{BookUpdate, LineUpdate, Symbol, Timestamp};

const ALIVE_INTERVAL: Duration = Duration::from_secs(30);
const STATS_INTERVAL: Duration = Duration::from_secs(60);

const DELAY_WARNING_MS: i64 = 5_000;
const DELAY_RESET_MS: i64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DelayAction {
    None,
    Warn,
    Reset,
}

fn delay_action(delay_ms: i64) -> DelayAction {
    if delay_ms >= DELAY_RESET_MS {
        DelayAction::Reset
    } else if delay_ms >= DELAY_WARNING_MS {
        DelayAction::Warn
    } else {
        DelayAction::None
    }
}

/// Republishes Binance market streams to the broker.
pub struct LineServer {
    publisher: LinePublisher,
    symbols: Vec<Symbol>,
    testnet: bool,
    prices: HashMap<Symbol, BookUpdate>,
    counter: usize,
}

impl LineServer {
    pub fn new(publisher: LinePublisher, symbols: Vec<Symbol>, testnet: bool) -> Self {
        Self {
            publisher,
            symbols,
            testnet,
            prices: HashMap::new(),
            counter: 0,
        }
    }

    pub async fn run(mut self) -> Result<(), LineError> {
        let mut stream = BinanceMarketStream::new(self.symbols.clone(), self.testnet);
        let reset = stream.reset_handle();
        let (tx, mut rx) = mpsc::channel(LINE_CAPACITY);
        let stream_task = tokio::spawn(async move { stream.run(tx).await });

        let mut alive = interval(ALIVE_INTERVAL);
        let mut stats = interval_at(Instant::now() + STATS_INTERVAL, STATS_INTERVAL);

        loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    if let Err(err) = self.handle_event(event, &reset).await {
                        error!("Failed to publish update: {}", err);
                    }
                }
                _ = alive.tick() => {
                    if let Err(err) = self.publisher.publish_alive().await {
                        error!("Failed to publish alive: {}", err);
                    }
                }
                _ = stats.tick() => {
                    info!("Published {} items last minute.", self.counter);
                    self.counter = 0;
                }
            }
        }

        stream_task.abort();
        Ok(())
    }

    async fn handle_event(&mut self, event: MarketEvent, reset: &Notify) -> Result<(), LineError> {
        match event {
            MarketEvent::Connected => self.publisher.publish_reset().await,
            MarketEvent::Update { symbol, update } => {
                if let LineUpdate::Trade(trade) = &update {
                    self.check_delay(trade.timestamp, reset);
                }
                if let LineUpdate::Book(book) = &update {
                    if self.prices.get(&symbol) == Some(book) {
                        return Ok(());
                    }
                    self.prices.insert(symbol.clone(), book.clone());
                }
                self.publisher.publish_update(&symbol, &update).await?;
                self.counter += 1;
                Ok(())
            }
        }
    }

    fn check_delay(&self, timestamp: Timestamp, reset: &Notify) {
        let delay = now_ms() - timestamp;
        match delay_action(delay) {
            DelayAction::None => {}
            DelayAction::Warn => warn!("Messages processing delay of {:.2}s!", delay as f64 / 1000.0),
            DelayAction::Reset => {
                warn!("Messages processing delay of {:.2}s!", delay as f64 / 1000.0);
                reset.notify_one();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line::publisher::tests::MockPublisher;
    use crate::models::{LineAction, TradeUpdate};
    use mockall::predicate::*;
    use rust_decimal_macros::dec;

    fn book(bid: rust_decimal::Decimal, ask: rust_decimal::Decimal) -> MarketEvent {
        MarketEvent::Update {
            symbol: "BTCUSDT".into(),
            update: LineUpdate::Book(BookUpdate::new(bid, ask)),
        }
    }

    #[test]
    fn test_delay_thresholds() {
        assert_eq!(delay_action(4_999), DelayAction::None);
        assert_eq!(delay_action(5_000), DelayAction::Warn);
        assert_eq!(delay_action(30_000), DelayAction::Reset);
    }

    #[tokio::test]
    async fn test_unchanged_book_is_not_republished() {
        let mut inner = MockPublisher::new();
        inner
            .expect_publish()
            .with(eq("BTCUSDT.book"), always())
            .times(2)
            .returning(|_, _| Ok(()));
        inner
            .expect_publish()
            .with(eq("reset"), always())
            .times(1)
            .returning(|_, message| {
                assert_eq!(message.action, LineAction::Reset);
                Ok(())
            });

        let mut server = LineServer::new(LinePublisher::new(Box::new(inner)), vec!["BTCUSDT".into()], false);
        let reset = Notify::new();

        server.handle_event(MarketEvent::Connected, &reset).await.unwrap();
        server.handle_event(book(dec!(10), dec!(11)), &reset).await.unwrap();
        server.handle_event(book(dec!(10), dec!(11)), &reset).await.unwrap();
        server.handle_event(book(dec!(10), dec!(12)), &reset).await.unwrap();
        assert_eq!(server.counter, 2);
    }

    #[tokio::test]
    async fn test_stale_trade_requests_reset() {
        let mut inner = MockPublisher::new();
        inner.expect_publish().times(1).returning(|_, _| Ok(()));

        let mut server = LineServer::new(LinePublisher::new(Box::new(inner)), vec!["BTCUSDT".into()], false);
        let reset = Notify::new();
        let trade = MarketEvent::Update {
            symbol: "BTCUSDT".into(),
            update: LineUpdate::Trade(TradeUpdate {
                price: dec!(10),
                quantity: dec!(1),
                timestamp: now_ms() - 60_000,
                is_buyer_maker: false,
            }),
        };
        server.handle_event(trade, &reset).await.unwrap();

        // notify_one stores a permit when nobody waits yet
        tokio::time::timeout(Duration::from_millis(100), reset.notified())
            .await
            .unwrap();
    }
}
