use dotenv::dotenv;
use log::info;

use binance_futures_bot::line::{AmqpPublisher, LinePublisher, LineServer};
use binance_futures_bot::signal::wait_for_shutdown;
use binance_futures_bot::{logger, LineSettings};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    logger::init();

    let settings = LineSettings::load_from_env()?;
    info!("Starting line for {}", settings.symbols.join(","));

    let publisher = AmqpPublisher::connect(&settings.broker_amqp_uri).await;
    let server = LineServer::new(
        LinePublisher::new(Box::new(publisher)),
        settings.symbols,
        settings.binance_testnet,
    );

    tokio::select! {
        result = server.run() => result?,
        result = wait_for_shutdown() => result?,
    }

    info!("Line stopped");
    Ok(())
}
