use anyhow::Context;
use scd4x_bridge::{
    probe, CoordinatorHandle, HomeAssistantApi, HomeAssistantConfig, HomeAssistantPublisher,
    LinuxTransceiver, SensorConfig, SensorEntity, Snapshot, Timings, UpdateCoordinator,
};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const NAME: &str = "SCD4x Bridge";
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting {NAME} {VERSION}");
    let config = SensorConfig::from_env().context("Reading SCD4X_* configuration")?;

    if std::env::args().nth(1).as_deref() == Some("probe") {
        let serial = probe(LinuxTransceiver, &config, Timings::default())
            .await
            .with_context(|| format!("Unable to connect to {}", config.i2c_path))?;
        println!("{serial:012x}");
        return Ok(());
    }

    let mut coordinator =
        UpdateCoordinator::from_config(LinuxTransceiver, &config, Timings::default());
    let serial = coordinator
        .setup_and_refresh()
        .await
        .context("Sensor not ready, retry later")?;

    let handle = CoordinatorHandle::spawn(coordinator, config.scan_interval());
    let snapshots = handle.subscribe();
    let logger = tokio::spawn(log_snapshots(handle.subscribe()));

    let ha_config = HomeAssistantConfig::from_env();
    let publisher = if ha_config.is_enabled() {
        let entities = SensorEntity::for_all_channels(&config.device_name, serial, &snapshots);
        let api = HomeAssistantApi::new(ha_config);
        Some(HomeAssistantPublisher::new(entities, api, snapshots).spawn())
    } else {
        info!("HA_URL not set, Home Assistant publishing disabled");
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("Waiting for shutdown signal")?;
    info!("Shutting down");

    if let Some(publisher) = publisher {
        publisher.abort();
    }
    logger.abort();
    if let Err(e) = handle.shutdown().await {
        warn!(error = %e, "Sensor did not shut down cleanly");
        return Err(e.into());
    }
    Ok(())
}

async fn log_snapshots(mut snapshots: watch::Receiver<Option<Snapshot>>) {
    while snapshots.changed().await.is_ok() {
        let latest = *snapshots.borrow_and_update();
        if let Some(snapshot) = latest {
            info!(
                "CO2 {}ppm, temperature {}°C, humidity {}%",
                snapshot.co2, snapshot.temperature, snapshot.humidity
            );
        }
    }
}
