use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;

use super::client::BinanceClient;
use super::models::parse_user_message;
use crate::exchange::{ExchangeError, ExchangeUserClient};

const STREAM_URL: &str = "wss://fstream.binance.com/ws";
const TESTNET_STREAM_URL: &str = "wss://stream.binancefuture.com/ws";

const KEY_LIFETIME: Duration = Duration::from_secs(60 * 60);
const KEY_RENEW_BEFORE: Duration = Duration::from_secs(45 * 60);
const KEY_CHECK_INTERVAL: Duration = Duration::from_secs(60);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Whether a listen key issued at `issued_at` has to be renewed at `now`.
fn needs_renewal(issued_at: Instant, now: Instant) -> bool {
    let expires_at = issued_at + KEY_LIFETIME;
    expires_at.saturating_duration_since(now) <= KEY_RENEW_BEFORE
}

/// User data stream feeding the client's event channel.
///
/// API Doc: https://binance-docs.github.io/apidocs/futures/en/#user-data-streams
pub struct BinanceUserStream {
    client: Arc<BinanceClient>,
    url: &'static str,
}

impl BinanceUserStream {
    pub fn new(client: Arc<BinanceClient>, testnet: bool) -> Self {
        Self {
            client,
            url: if testnet { TESTNET_STREAM_URL } else { STREAM_URL },
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self) {
        loop {
            if let Err(err) = self.run_connection().await {
                error!("User stream error: {}", err);
            }
            info!("User stream: reconnecting in {:?}...", RECONNECT_DELAY);
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    async fn run_connection(&self) -> Result<(), ExchangeError> {
        info!("Requesting listen key...");
        let listen_key = self.client.create_listen_key().await?;
        let mut issued_at = Instant::now();
        info!("Listen key issued!");

        let url = format!("{}/{}", self.url, listen_key);
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|err| ExchangeError::StreamError(err.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        let events = self.client.event_sender();
        let mut renewal = tokio::time::interval(KEY_CHECK_INTERVAL);

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => match parse_user_message(&text) {
                            Ok(Some(event)) => {
                                debug!("User stream event {:?}", event.entity());
                                // ignored when nobody listens
                                let _ = events.send(event);
                            }
                            Ok(None) => {}
                            Err(err) => warn!("Failed to parse user stream message: {}", err),
                        },
                        Some(Ok(Message::Ping(data))) => {
                            write
                                .send(Message::Pong(data))
                                .await
                                .map_err(|err| ExchangeError::StreamError(err.to_string()))?;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return Err(ExchangeError::StreamError("connection closed".to_string()));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => return Err(ExchangeError::StreamError(err.to_string())),
                    }
                }
                _ = renewal.tick() => {
                    if needs_renewal(issued_at, Instant::now()) {
                        info!("Updating listen key...");
                        self.client.keepalive_listen_key().await?;
                        issued_at = Instant::now();
                        info!("Listen key updated!");
                    }
                }
            }
        }
    }
}
