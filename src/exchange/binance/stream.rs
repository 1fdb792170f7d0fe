use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;

use super::models::{parse_market_message, StreamMessage};
use crate::exchange::ExchangeError;
use crate::models::{LineUpdate, Symbol};

const STREAM_URL: &str = "wss://fstream.binance.com/ws";
const TESTNET_STREAM_URL: &str = "wss://stream.binancefuture.com/ws";

const CHANNELS: [&str; 3] = ["aggTrade", "bookTicker", "depth"];

#[derive(Debug, Clone, PartialEq)]
pub enum MarketEvent {
    /// Emitted after every (re)connect once subscriptions are sent.
    Connected,
    Update { symbol: Symbol, update: LineUpdate },
}

#[derive(Debug, Serialize)]
struct SubscribeRequest {
    method: &'static str,
    params: Vec<String>,
    id: u64,
}

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub connect_timeout: Duration,
    pub initial_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            initial_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(60),
        }
    }
}

/// Binance market streams (aggregated trades, book ticker, diff depth).
///
/// API Doc: https://binance-docs.github.io/apidocs/futures/en/#websocket-market-streams
pub struct BinanceMarketStream {
    url: &'static str,
    symbols: Vec<Symbol>,
    config: StreamConfig,
    reset: Arc<Notify>,
    next_id: u64,
}

enum Disconnect {
    Reset,
    ReceiverClosed,
}

impl BinanceMarketStream {
    pub fn new(symbols: Vec<Symbol>, testnet: bool) -> Self {
        Self {
            url: if testnet { TESTNET_STREAM_URL } else { STREAM_URL },
            symbols,
            config: StreamConfig::default(),
            reset: Arc::new(Notify::new()),
            next_id: 0,
        }
    }

    /// Handle that forces the running stream to reconnect.
    pub fn reset_handle(&self) -> Arc<Notify> {
        self.reset.clone()
    }

    /// Runs until the event receiver is dropped, reconnecting on failures.
    pub async fn run(&mut self, events: mpsc::Sender<MarketEvent>) {
        let mut reconnect_delay = self.config.initial_reconnect_delay;

        loop {
            match self.run_connection(&events).await {
                Ok(Disconnect::ReceiverClosed) => {
                    info!("Market stream: receiver closed, stopping");
                    return;
                }
                Ok(Disconnect::Reset) => {
                    warn!("Market stream: reset requested, reconnecting...");
                    reconnect_delay = self.config.initial_reconnect_delay;
                }
                Err(err) => {
                    warn!("Market stream error: {}, reconnecting in {:?}", err, reconnect_delay);
                    tokio::time::sleep(reconnect_delay).await;
                    reconnect_delay = (reconnect_delay * 2).min(self.config.max_reconnect_delay);
                }
            }
        }
    }

    async fn run_connection(&mut self, events: &mpsc::Sender<MarketEvent>) -> Result<Disconnect, ExchangeError> {
        info!("WebSocket: Connection establishing...");
        let (ws_stream, _) = match timeout(self.config.connect_timeout, connect_async(self.url)).await {
            Ok(Ok(connection)) => connection,
            Ok(Err(err)) => return Err(ExchangeError::StreamError(err.to_string())),
            Err(_) => return Err(ExchangeError::TimeoutError(self.config.connect_timeout)),
        };
        info!("WebSocket: Connection established!");

        let (mut write, mut read) = ws_stream.split();

        for symbol in self.symbols.clone() {
            self.next_id += 1;
            info!("Subscribing to \"{}\" updates with ID {}...", symbol, self.next_id);
            let request = SubscribeRequest {
                method: "SUBSCRIBE",
                params: CHANNELS
                    .iter()
                    .map(|channel| format!("{}@{}", symbol.to_lowercase(), channel))
                    .collect(),
                id: self.next_id,
            };
            let text = serde_json::to_string(&request)?;
            write
                .send(Message::Text(text.into()))
                .await
                .map_err(|err| ExchangeError::StreamError(err.to_string()))?;
        }

        if events.send(MarketEvent::Connected).await.is_err() {
            return Ok(Disconnect::ReceiverClosed);
        }

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            match parse_market_message(&text) {
                                Ok(Some(StreamMessage::Ack(id))) => info!("ID {} successfully subscribed!", id),
                                Ok(Some(StreamMessage::Update { symbol, update })) => {
                                    if events.send(MarketEvent::Update { symbol, update }).await.is_err() {
                                        return Ok(Disconnect::ReceiverClosed);
                                    }
                                }
                                Ok(None) => {}
                                Err(err) => debug!("Failed to parse stream message: {}", err),
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write
                                .send(Message::Pong(data))
                                .await
                                .map_err(|err| ExchangeError::StreamError(err.to_string()))?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!("WebSocket: closed by server: {:?}", frame);
                            return Err(ExchangeError::StreamError("connection closed".to_string()));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            error!("WebSocket: Exception occurred: {}", err);
                            return Err(ExchangeError::StreamError(err.to_string()));
                        }
                        None => {
                            info!("WebSocket: Connection lost!");
                            return Err(ExchangeError::StreamError("stream ended".to_string()));
                        }
                    }
                }
                _ = self.reset.notified() => {
                    let _ = write.close().await;
                    return Ok(Disconnect::Reset);
                }
            }
        }
    }
}
