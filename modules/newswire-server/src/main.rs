use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use newswire_common::Config;

mod app;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Newswire pipeline starting...");
    config.log_redacted();

    app::run(config).await?;

    info!("Shutdown complete");
    Ok(())
}
