use anyhow::Context;
use kumo_lib::shared::utils::init_logger;
use kumo_lib::{Engine, EngineConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let config = EngineConfig::from_env().context("invalid engine configuration")?;
    let engine = Engine::bootstrap(config)
        .await
        .context("engine bootstrap failed")?;
    engine.start().await.context("engine failed to start")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    log::info!("Shutdown requested");
    engine.shutdown().await;
    Ok(())
}
