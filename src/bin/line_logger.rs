use std::sync::Arc;

use dotenv::dotenv;
use log::info;
use tokio::sync::mpsc;

use binance_futures_bot::line::{LineClient, LineLogger, LINE_CAPACITY};
use binance_futures_bot::signal::wait_for_shutdown;
use binance_futures_bot::store::MongoStore;
use binance_futures_bot::{logger, LineLoggerSettings};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    logger::init();

    let settings = LineLoggerSettings::load_from_env()?;
    let store = Arc::new(MongoStore::connect(&settings.mongo_uri).await?);

    let line = LineClient::new(&settings.broker_amqp_uri, &settings.symbols, &settings.entities);
    info!("Subscribing to {}", line.binding_keys().join(","));

    let (tx, rx) = mpsc::channel(LINE_CAPACITY);
    let consumer = tokio::spawn(async move { line.run(tx).await });
    let logger = tokio::spawn(LineLogger::new(store, settings.bulk_interval).run(rx));

    wait_for_shutdown().await?;

    // Closing the channel makes the logger write what is still buffered
    consumer.abort();
    logger.await?;
    info!("Line logger stopped");
    Ok(())
}
