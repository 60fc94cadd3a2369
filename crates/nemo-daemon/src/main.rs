use nemo_engine::{Engine, EngineError};
use nemo_proto::config::Config;
use std::time::Duration;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());
    info!("Monitoring device at {}", config.device_addr());

    let engine = Engine::connect(&config).await?;
    let mut interval = tokio::time::interval(Duration::from_secs(config.polling.interval_secs));

    loop {
        tokio::select! {
            _ = interval.tick() => {
                read_once(&engine).await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                engine.shutdown().await;
                break;
            }
        }
    }

    Ok(())
}

async fn read_once(engine: &Engine) {
    match engine.read_snapshot().await {
        Ok(snapshot) => {
            let s = &snapshot.scalars;
            info!(
                "version={} active={} muted={} volume={} groups={}",
                s.software_version,
                s.active_channel_index,
                s.speaker_muted,
                s.volume,
                snapshot.groups.len()
            );
        }
        Err(EngineError::PollFailures(combined)) => {
            warn!("poll failures from last cycle:\n{}", combined);
        }
        Err(e) => {
            error!("snapshot read failed: {}", e);
        }
    }
}
