use crate::config::SensorConfig;
use crate::entity::Channel;
use crate::error::{Result, SensorError};
use crate::moving_average::{round_to, MovingAverage};
use crate::scd4x::{SensorReading, Transceiver};
use crate::scd4x_api::{Scd4xApi, Timings};
use serde_derive::Serialize;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Smoothed values published after a successful cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Snapshot {
    pub co2: f64,
    pub temperature: f64,
    pub humidity: f64,
}

impl Snapshot {
    pub fn value(&self, channel: Channel) -> f64 {
        match channel {
            Channel::Co2 => self.co2,
            Channel::Temperature => self.temperature,
            Channel::Humidity => self.humidity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Uninitialized,
    Initializing,
    Ready,
    Polling,
    SetupFailed,
    Stopped,
}

/// Owns the sensor adapter and the three smoothing windows
pub struct UpdateCoordinator<T: Transceiver> {
    api: Scd4xApi<T>,
    state: CoordinatorState,
    co2: MovingAverage,
    temperature: MovingAverage,
    humidity: MovingAverage,
    snapshot_sender: watch::Sender<Option<Snapshot>>,
    last_update_success: bool,
}

impl<T: Transceiver> UpdateCoordinator<T> {
    pub fn new(api: Scd4xApi<T>, window_size: usize) -> Self {
        let (snapshot_sender, _) = watch::channel(None);
        Self {
            api,
            state: CoordinatorState::Uninitialized,
            co2: MovingAverage::new(window_size),
            temperature: MovingAverage::new(window_size),
            humidity: MovingAverage::new(window_size),
            snapshot_sender,
            last_update_success: false,
        }
    }

    pub fn from_config(transceiver: T, config: &SensorConfig, timings: Timings) -> Self {
        let api = Scd4xApi::from_config(transceiver, config, timings);
        Self::new(api, config.window_size())
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn last_update_success(&self) -> bool {
        self.last_update_success
    }

    pub fn serial_number(&self) -> Option<u64> {
        self.api.serial_number()
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> Option<Snapshot> {
        *self.snapshot_sender.borrow()
    }

    /// Receiver that observes every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<Option<Snapshot>> {
        self.snapshot_sender.subscribe()
    }

    /// Initializes the sensor. A failure here is terminal for this
    /// coordinator; the host retries by building a new one.
    pub async fn setup(&mut self) -> Result<u64> {
        match self.state {
            CoordinatorState::Uninitialized => {}
            CoordinatorState::Ready | CoordinatorState::Polling => {
                if let Some(serial) = self.api.serial_number() {
                    return Ok(serial);
                }
            }
            other => {
                return Err(SensorError::Lifecycle(format!("cannot set up while {other:?}")));
            }
        }

        self.state = CoordinatorState::Initializing;
        match self.api.initialize().await {
            Ok(serial) => {
                self.state = CoordinatorState::Ready;
                info!(serial, "Sensor ready");
                Ok(serial)
            }
            Err(e) => {
                error!(error = %e, "Sensor setup failed");
                if let Err(stop_err) = self.api.stop().await {
                    warn!(error = %stop_err, "Cleanup after failed setup did not finish");
                }
                self.state = CoordinatorState::SetupFailed;
                Err(SensorError::SetupFailure(Box::new(e)))
            }
        }
    }

    /// Runs `setup` followed by one refresh; the device is only considered
    /// ready once it has produced a first snapshot.
    pub async fn setup_and_refresh(&mut self) -> Result<u64> {
        let serial = self.setup().await?;
        if let Err(e) = self.refresh_once().await {
            error!(error = %e, "First refresh failed, sensor not ready");
            if let Err(stop_err) = self.api.stop().await {
                warn!(error = %stop_err, "Cleanup after failed first refresh did not finish");
            }
            self.state = CoordinatorState::SetupFailed;
            return Err(SensorError::SetupFailure(Box::new(e)));
        }
        Ok(serial)
    }

    /// One poll cycle. On failure the previous snapshot stays published.
    pub async fn refresh_once(&mut self) -> Result<Snapshot> {
        match self.state {
            CoordinatorState::Uninitialized | CoordinatorState::Ready => {}
            other => {
                self.last_update_success = false;
                return Err(SensorError::CycleFailure(format!(
                    "cannot poll while {other:?}"
                )));
            }
        }

        let previous = self.state;
        self.state = CoordinatorState::Polling;
        let result = self.api.read().await;
        self.state = previous;

        let reading = match result {
            Ok(Some(reading)) => reading,
            Ok(None) => {
                self.last_update_success = false;
                warn!("Update failed: sensor returned no data");
                return Err(SensorError::CycleFailure(
                    "sensor returned no data".to_string(),
                ));
            }
            Err(e) => {
                self.last_update_success = false;
                if e.is_recoverable() {
                    warn!(error = %e, "Update failed");
                } else {
                    error!(error = %e, "Update failed");
                }
                return Err(SensorError::CycleFailure(e.to_string()));
            }
        };

        let snapshot = self.smooth(reading);
        self.snapshot_sender.send_replace(Some(snapshot));
        self.last_update_success = true;
        debug!(?snapshot, "Published snapshot");
        Ok(snapshot)
    }

    fn smooth(&mut self, reading: SensorReading) -> Snapshot {
        let co2 = self.co2.add(reading.co2_ppm);
        let temperature = self.temperature.add(reading.temperature_celsius);
        let humidity = self.humidity.add(reading.relative_humidity_percent);
        Snapshot {
            co2: round_to(co2, Channel::Co2.precision()),
            temperature: round_to(temperature, Channel::Temperature.precision()),
            humidity: round_to(humidity, Channel::Humidity.precision()),
        }
    }

    /// Stops the sensor. Safe to call repeatedly.
    pub async fn teardown(&mut self) -> Result<()> {
        if self.state == CoordinatorState::Stopped {
            return Ok(());
        }
        self.state = CoordinatorState::Stopped;
        info!("Stopping sensor coordinator");
        self.api.stop().await.map_err(|e| {
            error!(error = %e, "Sensor teardown failed");
            SensorError::SetupFailure(Box::new(e))
        })
    }
}

/// Drives a coordinator on a fixed interval in its own task
pub struct CoordinatorHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
    snapshots: watch::Receiver<Option<Snapshot>>,
}

impl CoordinatorHandle {
    /// Spawns the poll loop. The first cycle runs one `every` from now.
    pub fn spawn<T: Transceiver>(mut coordinator: UpdateCoordinator<T>, every: Duration) -> Self {
        let snapshots = coordinator.subscribe();
        let (shutdown, mut shutdown_requested) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            info!(interval = ?every, "Starting sensor poll loop");
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = &mut shutdown_requested => break,
                    _ = ticker.tick() => {
                        // Failures are logged inside; the loop keeps going
                        let _ = coordinator.refresh_once().await;
                    }
                }
            }

            info!("Sensor poll loop exiting");
            coordinator.teardown().await
        });

        Self {
            shutdown: Some(shutdown),
            task,
            snapshots,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Snapshot>> {
        self.snapshots.clone()
    }

    pub fn snapshot(&self) -> Option<Snapshot> {
        *self.snapshots.borrow()
    }

    /// Waits for any in-flight cycle, then tears the coordinator down
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.task
            .await
            .map_err(|e| SensorError::Lifecycle(format!("poll loop panicked: {e}")))?
    }
}
