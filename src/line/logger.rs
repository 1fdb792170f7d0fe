use std::mem;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::sync::mpsc;
use tokio::time::interval;

use super::LineEvent;
use crate::helpers::now_ms;
use crate::models::UpdateLog;
use crate::store::UpdateLogStore;

/// Persists line updates in bulks for later replays.
pub struct LineLogger {
    store: Arc<dyn UpdateLogStore>,
    bulk_interval: Duration,
    queue: Vec<UpdateLog>,
}

impl LineLogger {
    pub fn new(store: Arc<dyn UpdateLogStore>, bulk_interval: Duration) -> Self {
        Self {
            store,
            bulk_interval,
            queue: Vec::new(),
        }
    }

    /// Runs until the event channel closes, then writes what is left.
    pub async fn run(mut self, mut events: mpsc::Receiver<LineEvent>) {
        let mut writer = interval(self.bulk_interval);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.enqueue(event),
                    None => break,
                },
                _ = writer.tick() => self.flush().await,
            }
        }
        self.flush().await;
    }

    fn enqueue(&mut self, event: LineEvent) {
        match event {
            LineEvent::Update { symbol, update } => match UpdateLog::new(symbol, &update, now_ms()) {
                Ok(log) => self.queue.push(log),
                Err(err) => warn!("Failed to encode update: {}", err),
            },
            LineEvent::Alive => info!("LineLogger: alive received"),
            LineEvent::Reset | LineEvent::Done => {}
        }
    }

    async fn flush(&mut self) {
        if self.queue.is_empty() {
            return;
        }
        let logs = mem::take(&mut self.queue);
        let count = logs.len();
        match self.store.insert_update_logs(logs).await {
            Ok(()) => info!("Wrote {} updates", count),
            Err(err) => error!("Failed to write {} updates: {}", count, err),
        }
    }
}
