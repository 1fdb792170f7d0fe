use std::sync::Arc;

use dotenv::dotenv;
use log::{error, info};
use tokio::sync::mpsc;

use binance_futures_bot::bot::{run_replay, Orchestrator};
use binance_futures_bot::exchange::binance::BinanceClient;
use binance_futures_bot::line::{LineClient, LINE_CAPACITY};
use binance_futures_bot::signal::wait_for_shutdown;
use binance_futures_bot::store::MongoStore;
use binance_futures_bot::{logger, BotSettings};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    logger::init();

    let settings = BotSettings::load_from_env()?;
    let rules = settings.load_strategies()?;
    let store = Arc::new(MongoStore::connect(&settings.mongo_uri).await?);

    if settings.replay {
        info!(
            "Starting replay of {} at speed {}",
            settings.symbols.join(","),
            settings.replay_speed
        );
        tokio::select! {
            result = run_replay(&settings, rules, store) => {
                result?;
            }
            result = wait_for_shutdown() => result?,
        }
        return Ok(());
    }

    info!("Starting bot for {}", settings.symbols.join(","));
    let exchange = Arc::new(BinanceClient::public(settings.binance_testnet));
    let mut orchestrator = Orchestrator::new(settings.clone(), exchange, store, None);
    orchestrator.start(rules).await?;

    let line = LineClient::new(&settings.broker_amqp_uri, &settings.symbols, &settings.entities);
    let (tx, rx) = mpsc::channel(LINE_CAPACITY);
    tokio::spawn(async move { line.run(tx).await });

    tokio::select! {
        result = orchestrator.run(rx) => {
            if let Err(err) = &result {
                error!("Bot stopped: {}", err);
            }
            result?;
        }
        result = wait_for_shutdown() => result?,
    }

    info!("Bot stopped");
    Ok(())
}
