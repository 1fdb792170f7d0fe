use super::{LineError, MessagePublisher};
use crate::models::{LineMessage, LineUpdate};

/// Publishes line messages under `{symbol}.{entity}`, `alive` and `reset` routing keys.
pub struct LinePublisher {
    inner: Box<dyn MessagePublisher>,
}

impl LinePublisher {
    pub fn new(inner: Box<dyn MessagePublisher>) -> Self {
        Self { inner }
    }

    pub async fn publish_update(&self, symbol: &str, update: &LineUpdate) -> Result<(), LineError> {
        self.send(LineMessage::update(symbol, update)?).await
    }

    pub async fn publish_alive(&self) -> Result<(), LineError> {
        self.send(LineMessage::alive()).await
    }

    pub async fn publish_reset(&self) -> Result<(), LineError> {
        self.send(LineMessage::reset()).await
    }

    async fn send(&self, message: LineMessage) -> Result<(), LineError> {
        self.inner.publish(&message.routing_key(), &message).await
    }
}
