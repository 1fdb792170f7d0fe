use std::sync::Arc;
use std::time::Duration;

use futures::TryStreamExt;
use log::{info, warn};
use tokio::sync::mpsc;

use super::{LineError, LineEvent};
use crate::helpers::replay_period;
use crate::models::Timestamp;
use crate::store::{UpdateLogQuery, UpdateLogStore};

const MIN_DELAY: Duration = Duration::from_millis(10);

/// Delay between two logs `diff_ms` apart when replayed `speed` times faster.
fn replay_delay(diff_ms: Timestamp, speed: u32) -> Option<Duration> {
    if speed == 0 || diff_ms <= 0 {
        return None;
    }
    let delay = Duration::from_secs_f64(diff_ms as f64 / 1000.0 / speed as f64);
    (delay >= MIN_DELAY).then_some(delay)
}

/// Plays persisted line updates back as a line source.
pub struct ReplayClient {
    store: Arc<dyn UpdateLogStore>,
    query: UpdateLogQuery,
    speed: u32,
}

impl ReplayClient {
    pub fn new(store: Arc<dyn UpdateLogStore>, query: UpdateLogQuery, speed: u32) -> Self {
        Self { store, query, speed }
    }

    pub async fn run(self, events: mpsc::Sender<LineEvent>) -> Result<(), LineError> {
        let total = self.store.count_update_logs(&self.query).await?;
        info!("Replaying {} updates", total);
        let step = (total / 100).max(1);

        let mut logs = self.store.stream_update_logs(&self.query).await?;
        let mut prev_timestamp: Option<Timestamp> = None;
        let mut prev_period = None;
        let mut processed: u64 = 0;

        while let Some(log) = logs.try_next().await? {
            if let Some(delay) = prev_timestamp.and_then(|prev| replay_delay(log.timestamp - prev, self.speed)) {
                tokio::time::sleep(delay).await;
            }

            let period = replay_period(log.timestamp);
            if prev_period.is_some() && period != prev_period {
                if let Some(period) = period {
                    info!("Current replay period: {}", period.format("%d.%m.%Y %H:%M"));
                }
            }

            match log.update() {
                Ok(update) => {
                    let event = LineEvent::Update {
                        symbol: log.symbol.clone(),
                        update,
                    };
                    if events.send(event).await.is_err() {
                        return Ok(());
                    }
                }
                Err(err) => warn!("Skipping malformed update log: {}", err),
            }

            prev_timestamp = Some(log.timestamp);
            prev_period = period;
            processed += 1;
            if processed % step == 0 {
                info!("Processed {:.2}%", processed as f64 * 100.0 / total as f64);
            }
        }

        let _ = events.send(LineEvent::Done).await;
        Ok(())
    }
}
