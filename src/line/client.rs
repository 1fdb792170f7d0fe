use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use log::{error, info, warn};
use tokio::sync::mpsc;

use super::{AmqpConsumer, LineError, LineEvent};
use crate::helpers::now_ms;
use crate::models::{LineAction, LineMessage, LineUpdate, StreamEntity, Symbol};

const ALIVE_TIMEOUT_MS: i64 = 10_000;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

pub fn decode_message(data: &[u8]) -> Result<LineEvent, LineError> {
    let message: LineMessage = serde_json::from_slice(data)?;
    match message.action {
        LineAction::Alive => Ok(LineEvent::Alive),
        LineAction::Reset => Ok(LineEvent::Reset),
        LineAction::Update => {
            let payload = message
                .payload
                .ok_or_else(|| LineError::InvalidMessage("update without payload".to_string()))?;
            let update = LineUpdate::decode(payload.entity, payload.data)?;
            Ok(LineEvent::Update {
                symbol: payload.symbol,
                update,
            })
        }
    }
}

/// Broker subscriber turning line messages into [`LineEvent`]s.
pub struct LineClient {
    uri: String,
    binding_keys: Vec<String>,
    last_alive: AtomicI64,
}

impl LineClient {
    pub fn new(uri: &str, symbols: &[Symbol], entities: &[StreamEntity]) -> Self {
        let mut binding_keys = vec!["alive".to_string(), "reset".to_string()];
        for symbol in symbols {
            for entity in entities {
                binding_keys.push(format!("{}.{}", symbol, entity));
            }
        }
        Self {
            uri: uri.to_string(),
            binding_keys,
            last_alive: AtomicI64::new(0),
        }
    }

    pub fn binding_keys(&self) -> &[String] {
        &self.binding_keys
    }

    /// Whether the line server announced itself within the last 10 seconds.
    pub fn is_alive(&self) -> bool {
        let last = self.last_alive.load(Ordering::Relaxed);
        last > 0 && now_ms() - last < ALIVE_TIMEOUT_MS
    }

    fn mark_alive(&self, at: i64) {
        self.last_alive.store(at, Ordering::Relaxed);
    }

    /// Consumes until `events` is closed, resubscribing after connection losses.
    pub async fn run(&self, events: mpsc::Sender<LineEvent>) {
        loop {
            match AmqpConsumer::connect(&self.uri, &self.binding_keys).await {
                Ok(mut consumer) => {
                    info!("LineClient: subscribed");
                    while let Some(body) = consumer.next().await {
                        let event = match body.and_then(|data| decode_message(&data)) {
                            Ok(event) => event,
                            Err(err) => {
                                warn!("LineClient: skipping message: {}", err);
                                continue;
                            }
                        };
                        if event == LineEvent::Alive {
                            self.mark_alive(now_ms());
                        }
                        if events.send(event).await.is_err() {
                            return;
                        }
                    }
                    warn!("LineClient: connection lost");
                }
                Err(err) => error!("LineClient: failed to subscribe: {}", err),
            }
            if events.is_closed() {
                return;
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }
}
