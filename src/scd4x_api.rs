use crate::config::SensorConfig;
use crate::error::{Result, SensorError};
use crate::scd4x::{Scd4xDriver, SensorReading, Transceiver};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// One device LSB of the temperature offset register
const TEMPERATURE_OFFSET_TOLERANCE: f32 = 175.0 / 65535.0;

/// Delays and deadlines used by the adapter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timings {
    /// Wait after stopping periodic measurement before talking to the sensor
    pub stop_settle: Duration,
    /// Wait after `reinit`
    pub reinit_settle: Duration,
    /// Wait after starting periodic measurement
    pub start_settle: Duration,
    /// Interval between data-ready polls
    pub data_ready_poll: Duration,
    pub initialize_timeout: Duration,
    pub read_timeout: Duration,
    pub stop_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            stop_settle: Duration::from_secs(1),
            reinit_settle: Duration::from_secs(5),
            start_settle: Duration::from_secs(1),
            data_ready_poll: Duration::from_millis(200),
            initialize_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(10),
            stop_timeout: Duration::from_secs(10),
        }
    }
}

type SharedDriver<D> = Arc<Mutex<Option<D>>>;

/// One open connection to a physical sensor
pub struct DeviceSession<D> {
    driver: SharedDriver<D>,
    altitude: i32,
    temperature_offset: f32,
    /// Bumped by every release so a late open knows it was abandoned
    generation: Arc<AtomicU64>,
    established: bool,
    serial_number: Option<u64>,
}

impl<D> DeviceSession<D> {
    fn new(altitude: i32, temperature_offset: f32) -> Self {
        Self {
            driver: Arc::new(Mutex::new(None)),
            altitude,
            temperature_offset,
            generation: Arc::new(AtomicU64::new(0)),
            established: false,
            serial_number: None,
        }
    }
}

/// Asynchronous wrapper around a blocking SCD4x driver.
///
/// Every hardware call runs on tokio's blocking pool, and each of
/// `initialize`, `read` and `stop` is bounded by its own deadline.
pub struct Scd4xApi<T: Transceiver> {
    transceiver: Arc<T>,
    i2c_path: String,
    session: DeviceSession<T::Driver>,
    timings: Timings,
}

impl<T: Transceiver> Scd4xApi<T> {
    pub fn new(
        transceiver: T,
        i2c_path: impl Into<String>,
        altitude: Option<i32>,
        temperature_offset: Option<f32>,
        timings: Timings,
    ) -> Self {
        info!("Initializing SCD4x API");
        let config = SensorConfig {
            altitude,
            temperature_offset,
            ..SensorConfig::new(i2c_path)
        };
        Self::from_config(transceiver, &config, timings)
    }

    pub fn from_config(transceiver: T, config: &SensorConfig, timings: Timings) -> Self {
        Self {
            transceiver: Arc::new(transceiver),
            i2c_path: config.i2c_path.clone(),
            session: DeviceSession::new(
                config.effective_altitude(),
                config.effective_temperature_offset(),
            ),
            timings,
        }
    }

    pub fn is_established(&self) -> bool {
        self.session.established
    }

    /// Serial number read during the last successful `initialize`
    pub fn serial_number(&self) -> Option<u64> {
        self.session.serial_number
    }

    /// Opens the bus, reconciles compensation settings and starts periodic
    /// measurement. Returns the device serial number.
    pub async fn initialize(&mut self) -> Result<u64> {
        if self.session.established {
            if let Some(serial) = self.session.serial_number {
                debug!("Initialize called on an established session, reusing it.");
                return Ok(serial);
            }
        }

        let deadline = self.timings.initialize_timeout;
        match timeout(deadline, self.initialize_sequence()).await {
            Ok(result) => result,
            Err(_) => Err(SensorError::Timeout {
                operation: "initialize",
                elapsed: deadline,
            }),
        }
    }

    async fn initialize_sequence(&mut self) -> Result<u64> {
        debug!("Initialize API called.");
        self.session.established = false;

        debug!(path = %self.i2c_path, "Opening i2c transceiver.");
        let transceiver = Arc::clone(&self.transceiver);
        let path = self.i2c_path.clone();
        let handle = Arc::clone(&self.session.driver);
        let generation = Arc::clone(&self.session.generation);
        let opened_in = generation.load(Ordering::SeqCst);
        task::spawn_blocking(move || {
            let mut driver = transceiver.open(&path)?;
            let mut guard = lock(&handle)?;
            if generation.load(Ordering::SeqCst) != opened_in {
                drop(guard);
                if let Err(e) = driver.close() {
                    warn!(error = %e, "Unable to close i2c transceiver");
                }
                return Err(SensorError::Lifecycle(
                    "session released while opening".to_string(),
                ));
            }
            if let Some(mut previous) = guard.replace(driver) {
                debug!("Closing transceiver left by an earlier attempt.");
                if let Err(e) = previous.close() {
                    warn!(error = %e, "Unable to close i2c transceiver");
                }
            }
            Ok::<_, SensorError>(())
        })
        .await
        .map_err(|e| SensorError::device(format!("open worker failed: {e}")))??;

        debug!("Stopping periodic measurements.");
        self.blocking("stop_periodic_measurement", |d| d.stop_periodic_measurement())
            .await?;
        sleep(self.timings.stop_settle).await;

        debug!("Reading serial number.");
        let serial = self
            .blocking("read_serial_number", |d| d.read_serial_number())
            .await?;
        debug!(serial, "Serial number read.");

        let altitude = altitude_register(self.session.altitude);
        let temperature_offset = self.session.temperature_offset;
        self.blocking("reconcile_compensation", move |d| {
            reconcile_compensation(d, altitude, temperature_offset)
        })
        .await?;

        debug!("Reinitializing device.");
        self.blocking("reinit", |d| d.reinit()).await?;
        sleep(self.timings.reinit_settle).await;

        debug!("Starting periodic measurements.");
        self.blocking("start_periodic_measurement", |d| {
            d.start_periodic_measurement()
        })
        .await?;
        sleep(self.timings.start_settle).await;

        self.session.serial_number = Some(serial);
        self.session.established = true;
        info!(serial, path = %self.i2c_path, "SCD4x connection established");
        Ok(serial)
    }

    /// Waits for the data-ready flag and reads one measurement.
    ///
    /// Returns `Ok(None)` without touching the bus when no session is
    /// established.
    pub async fn read(&mut self) -> Result<Option<SensorReading>> {
        if !self.session.established {
            return Ok(None);
        }

        let deadline = self.timings.read_timeout;
        match timeout(deadline, self.wait_and_read()).await {
            Ok(result) => result.map(Some),
            Err(_) => Err(SensorError::Timeout {
                operation: "read",
                elapsed: deadline,
            }),
        }
    }

    async fn wait_and_read(&self) -> Result<SensorReading> {
        while !self
            .blocking("get_data_ready_status", |d| d.get_data_ready_status())
            .await?
        {
            sleep(self.timings.data_ready_poll).await;
        }

        debug!("Data ready, getting data");
        let reading = self
            .blocking("read_measurement", |d| d.read_measurement())
            .await?;
        debug!(
            co2 = reading.co2_ppm,
            temperature = reading.temperature_celsius,
            humidity = reading.relative_humidity_percent,
            "Data available"
        );
        Ok(reading)
    }

    /// Best-effort stop of periodic measurement and release of the bus.
    ///
    /// Failures of the individual steps are logged and swallowed; the session
    /// is always marked as not established afterwards. Only an overall
    /// deadline overrun is reported.
    pub async fn stop(&mut self) -> Result<()> {
        debug!("Stop API called.");
        let deadline = self.timings.stop_timeout;
        let result = timeout(deadline, self.release()).await;

        self.session.established = false;
        self.session.serial_number = None;

        result.map_err(|_| SensorError::Timeout {
            operation: "stop",
            elapsed: deadline,
        })
    }

    async fn release(&mut self) {
        self.session.generation.fetch_add(1, Ordering::SeqCst);

        let handle = Arc::clone(&self.session.driver);
        let closed = task::spawn_blocking(move || {
            let Some(mut driver) = lock(&handle)?.take() else {
                return Ok(());
            };
            if let Err(e) = driver.stop_periodic_measurement() {
                warn!(error = %e, "Unable to stop SCD4x periodic measurements");
            }
            driver.close()
        })
        .await
        .map_err(|e| SensorError::device(format!("close worker failed: {e}")))
        .and_then(|result| result);
        if let Err(e) = closed {
            warn!(error = %e, "Unable to close i2c transceiver");
        }
    }

    /// Runs one driver call on the blocking pool
    async fn blocking<R, F>(&self, operation: &'static str, call: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut T::Driver) -> Result<R> + Send + 'static,
    {
        let handle = Arc::clone(&self.session.driver);
        task::spawn_blocking(move || {
            let mut guard = lock(&handle)?;
            let driver = guard
                .as_mut()
                .ok_or_else(|| SensorError::device("i2c transceiver is not open"))?;
            call(driver)
        })
        .await
        .map_err(|e| SensorError::device(format!("{operation} worker failed: {e}")))?
    }
}

fn lock<D>(handle: &SharedDriver<D>) -> Result<std::sync::MutexGuard<'_, Option<D>>> {
    handle
        .lock()
        .map_err(|_| SensorError::device("driver lock poisoned"))
}

/// The altitude register is unsigned; below-sea-level values compensate as 0 m
fn altitude_register(altitude: i32) -> u16 {
    altitude.clamp(0, i32::from(u16::MAX)) as u16
}

fn offsets_match(stored: f32, wanted: f32) -> bool {
    (stored - wanted).abs() < TEMPERATURE_OFFSET_TOLERANCE
}

/// Writes altitude and temperature offset only where the device disagrees,
/// persisting once if anything changed. Returns whether settings were written.
pub fn reconcile_compensation<D: Scd4xDriver + ?Sized>(
    driver: &mut D,
    altitude: u16,
    temperature_offset: f32,
) -> Result<bool> {
    let mut should_persist = false;

    let saved_altitude = driver.get_sensor_altitude()?;
    if saved_altitude != altitude {
        debug!(saved_altitude, altitude, "Setting altitude");
        driver.set_sensor_altitude(altitude)?;
        should_persist = true;
    }

    let saved_offset = driver.get_temperature_offset()?;
    if !offsets_match(saved_offset, temperature_offset) {
        debug!(saved_offset, temperature_offset, "Setting temperature offset");
        driver.set_temperature_offset(temperature_offset)?;
        should_persist = true;
    }

    if should_persist {
        debug!("Persisting settings.");
        driver.persist_settings()?;
    }
    Ok(should_persist)
}

/// Opens the sensor once to check the path and fetch its serial number
pub async fn probe<T: Transceiver>(
    transceiver: T,
    config: &SensorConfig,
    timings: Timings,
) -> Result<u64> {
    let mut api = Scd4xApi::from_config(transceiver, config, timings);
    let initialized = api.initialize().await;
    let stopped = api.stop().await;
    let serial = initialized?;
    stopped?;
    Ok(serial)
}
