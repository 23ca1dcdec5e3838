use anyhow::Result;
use repcued::config::load_config;
use repcued::state::DaemonState;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::INFO)
        .with_target(false)
        .with_env_filter(EnvFilter::from_default_env().add_directive(LevelFilter::INFO.into()))
        .init();

    info!("repcue daemon (repcued) starting...");

    let config = load_config()?;
    DaemonState::new(config).run().await
}
