use anyhow::Result;
use clap::Parser;
use log::LevelFilter;

use trainer::Settings;

fn main() -> Result<()> {
    let settings = Settings::parse();

    let mut logger = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if settings.suppress_warnings_and_error_messages {
        // Skipped samples are expected while cropping; keep only real failures.
        logger.filter_module("east_data", LevelFilter::Error);
    }
    logger.init();

    log::info!("{settings:?}");
    let history = trainer::train(&settings)?;
    log::info!("Training complete after {} epochs", history.len());
    Ok(())
}
