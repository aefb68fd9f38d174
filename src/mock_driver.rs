//! In-memory SCD4x used by the unit tests.

use crate::error::{Result, SensorError};
use crate::scd4x::{Scd4xDriver, SensorReading, Transceiver};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

#[derive(Debug)]
pub struct MockState {
    pub calls: Vec<&'static str>,
    pub serial: u64,
    pub altitude: u16,
    pub temperature_offset: f32,
    pub readings: VecDeque<SensorReading>,
    /// Number of data-ready polls answered with `false` before the next `true`
    pub not_ready_polls: usize,
    pub never_ready: bool,
    pub failing: HashSet<&'static str>,
    /// Operations that block the calling thread before answering
    pub delays: HashMap<&'static str, Duration>,
    pub open_count: usize,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            serial: 0xf896_9f07_3bb3,
            altitude: 0,
            temperature_offset: 4.0,
            readings: VecDeque::new(),
            not_ready_polls: 0,
            never_ready: false,
            failing: HashSet::new(),
            delays: HashMap::new(),
            open_count: 0,
        }
    }
}

#[derive(Clone, Default)]
pub struct MockTransceiver {
    state: Arc<Mutex<MockState>>,
}

impl MockTransceiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn push_reading(&self, co2: f64, temperature: f64, humidity: f64) {
        self.state()
            .readings
            .push_back(SensorReading::new(co2, temperature, humidity));
    }

    pub fn fail(&self, operation: &'static str) {
        self.state().failing.insert(operation);
    }

    pub fn delay(&self, operation: &'static str, delay: Duration) {
        self.state().delays.insert(operation, delay);
    }

    fn stall(state: &Mutex<MockState>, operation: &str) {
        let delay = state.lock().unwrap().delays.get(operation).copied();
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state().calls.clone()
    }

    pub fn count(&self, operation: &str) -> usize {
        self.state().calls.iter().filter(|c| **c == operation).count()
    }
}

impl Transceiver for MockTransceiver {
    type Driver = MockDriver;

    fn open(&self, path: &str) -> Result<MockDriver> {
        Self::stall(&self.state, "open");
        let mut state = self.state();
        state.calls.push("open");
        if state.failing.contains("open") {
            return Err(SensorError::Connection {
                path: path.to_string(),
                reason: "No such file or directory".to_string(),
            });
        }
        state.open_count += 1;
        Ok(MockDriver {
            state: Arc::clone(&self.state),
        })
    }
}

pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    fn record(&self, operation: &'static str) -> Result<MutexGuard<'_, MockState>> {
        MockTransceiver::stall(&self.state, operation);
        let mut state = self.state.lock().unwrap();
        state.calls.push(operation);
        if state.failing.contains(operation) {
            return Err(SensorError::device(format!("{operation} nacked")));
        }
        Ok(state)
    }
}

impl Scd4xDriver for MockDriver {
    fn stop_periodic_measurement(&mut self) -> Result<()> {
        self.record("stop_periodic_measurement").map(|_| ())
    }

    fn start_periodic_measurement(&mut self) -> Result<()> {
        self.record("start_periodic_measurement").map(|_| ())
    }

    fn reinit(&mut self) -> Result<()> {
        self.record("reinit").map(|_| ())
    }

    fn read_serial_number(&mut self) -> Result<u64> {
        self.record("read_serial_number").map(|s| s.serial)
    }

    fn get_sensor_altitude(&mut self) -> Result<u16> {
        self.record("get_sensor_altitude").map(|s| s.altitude)
    }

    fn set_sensor_altitude(&mut self, altitude: u16) -> Result<()> {
        self.record("set_sensor_altitude")?.altitude = altitude;
        Ok(())
    }

    fn get_temperature_offset(&mut self) -> Result<f32> {
        self.record("get_temperature_offset")
            .map(|s| s.temperature_offset)
    }

    fn set_temperature_offset(&mut self, offset: f32) -> Result<()> {
        self.record("set_temperature_offset")?.temperature_offset = offset;
        Ok(())
    }

    fn persist_settings(&mut self) -> Result<()> {
        self.record("persist_settings").map(|_| ())
    }

    fn get_data_ready_status(&mut self) -> Result<bool> {
        let mut state = self.record("get_data_ready_status")?;
        if state.never_ready {
            return Ok(false);
        }
        if state.not_ready_polls > 0 {
            state.not_ready_polls -= 1;
            return Ok(false);
        }
        Ok(!state.readings.is_empty())
    }

    fn read_measurement(&mut self) -> Result<SensorReading> {
        let mut state = self.record("read_measurement")?;
        state
            .readings
            .pop_front()
            .ok_or_else(|| SensorError::device("no measurement buffered"))
    }

    fn close(&mut self) -> Result<()> {
        self.record("close").map(|_| ())
    }
}
