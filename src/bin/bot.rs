use anyhow::Result;
use dotenvy::dotenv;
use log::info;
use std::sync::Arc;
use std::time::Duration;

use chime::core::Config;
use chime::database::Database;
use chime::features::reminders::{LogNotifier, ReminderScheduler};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    let config = Config::from_env()?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();

    info!("Starting chime reminder bot...");

    let database = Database::open(&config.database_path)?;
    database.log("process started");

    info!(
        "Monitoring queue every {}s (retry ceiling: {})",
        config.poll_interval_seconds, config.max_num_tries
    );

    // Deployments wire a real chat transport here; the stub logs deliveries.
    let scheduler = ReminderScheduler::new(
        database.clone(),
        Arc::new(LogNotifier),
        Duration::from_secs(config.poll_interval_seconds),
        config.max_num_tries,
    );

    scheduler.start().await?;

    Ok(())
}
