//! SCD4x command set over a Linux I2C character device.
//!
//! Command words, conversion formulas and execution times follow the
//! Sensirion SCD4x datasheet. Every 16-bit word on the wire is followed by a
//! CRC-8 byte (polynomial 0x31, init 0xFF).

use crate::error::{Result, SensorError};
use i2cdev::core::I2CDevice;
use i2cdev::linux::LinuxI2CDevice;
use serde_derive::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;

/// Fixed I2C address of every SCD4x
pub const SCD4X_ADDRESS: u16 = 0x62;

const CMD_START_PERIODIC_MEASUREMENT: u16 = 0x21b1;
const CMD_READ_MEASUREMENT: u16 = 0xec05;
const CMD_STOP_PERIODIC_MEASUREMENT: u16 = 0x3f86;
const CMD_SET_TEMPERATURE_OFFSET: u16 = 0x241d;
const CMD_GET_TEMPERATURE_OFFSET: u16 = 0x2318;
const CMD_SET_SENSOR_ALTITUDE: u16 = 0x2427;
const CMD_GET_SENSOR_ALTITUDE: u16 = 0x2322;
const CMD_PERSIST_SETTINGS: u16 = 0x3615;
const CMD_GET_SERIAL_NUMBER: u16 = 0x3682;
const CMD_GET_DATA_READY_STATUS: u16 = 0xe4b8;
const CMD_REINIT: u16 = 0x3646;

const EXEC_DEFAULT: Duration = Duration::from_millis(1);
const EXEC_STOP_PERIODIC: Duration = Duration::from_millis(500);
const EXEC_PERSIST: Duration = Duration::from_millis(800);
const EXEC_REINIT: Duration = Duration::from_millis(20);

/// One measurement produced by a single poll
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub co2_ppm: f64,
    pub temperature_celsius: f64,
    pub relative_humidity_percent: f64,
}

impl SensorReading {
    pub fn new(co2_ppm: f64, temperature_celsius: f64, relative_humidity_percent: f64) -> Self {
        Self {
            co2_ppm,
            temperature_celsius,
            relative_humidity_percent,
        }
    }
}

/// Synchronous operations of an SCD4x sensor.
///
/// Every method may block on the bus; callers are expected to run them on a
/// blocking worker.
pub trait Scd4xDriver: Send + 'static {
    fn stop_periodic_measurement(&mut self) -> Result<()>;
    fn start_periodic_measurement(&mut self) -> Result<()>;
    fn reinit(&mut self) -> Result<()>;
    fn read_serial_number(&mut self) -> Result<u64>;
    fn get_sensor_altitude(&mut self) -> Result<u16>;
    fn set_sensor_altitude(&mut self, altitude: u16) -> Result<()>;
    fn get_temperature_offset(&mut self) -> Result<f32>;
    fn set_temperature_offset(&mut self, offset: f32) -> Result<()>;
    fn persist_settings(&mut self) -> Result<()>;
    fn get_data_ready_status(&mut self) -> Result<bool>;
    fn read_measurement(&mut self) -> Result<SensorReading>;
    /// Releases the underlying bus handle
    fn close(&mut self) -> Result<()>;
}

/// Opens drivers for a configured device path
pub trait Transceiver: Send + Sync + 'static {
    type Driver: Scd4xDriver;

    fn open(&self, path: &str) -> Result<Self::Driver>;
}

/// Opens `/dev/i2c-*` character devices
#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxTransceiver;

impl Transceiver for LinuxTransceiver {
    type Driver = Scd4x<LinuxI2CDevice>;

    fn open(&self, path: &str) -> Result<Self::Driver> {
        let device =
            LinuxI2CDevice::new(path, SCD4X_ADDRESS).map_err(|e| SensorError::Connection {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Scd4x::new(device))
    }
}

/// SCD4x sensor on an I2C device handle
pub struct Scd4x<D> {
    device: Option<D>,
}

impl<D> Scd4x<D>
where
    D: I2CDevice,
    D::Error: std::fmt::Display,
{
    pub fn new(device: D) -> Self {
        Self {
            device: Some(device),
        }
    }

    fn device(&mut self) -> Result<&mut D> {
        self.device
            .as_mut()
            .ok_or_else(|| SensorError::device("i2c transceiver is closed"))
    }

    fn send_command(&mut self, command: u16, execution_time: Duration) -> Result<()> {
        self.device()?
            .write(&command.to_be_bytes())
            .map_err(|e| SensorError::device(format!("command 0x{command:04x}: {e}")))?;
        thread::sleep(execution_time);
        Ok(())
    }

    fn write_word(&mut self, command: u16, word: u16, execution_time: Duration) -> Result<()> {
        let frame = command_frame(command, word);
        self.device()?
            .write(&frame)
            .map_err(|e| SensorError::device(format!("command 0x{command:04x}: {e}")))?;
        thread::sleep(execution_time);
        Ok(())
    }

    fn read_words<const N: usize>(
        &mut self,
        command: u16,
        execution_time: Duration,
    ) -> Result<[u16; N]> {
        self.send_command(command, execution_time)?;
        let mut buffer = vec![0u8; N * 3];
        self.device()?
            .read(&mut buffer)
            .map_err(|e| SensorError::device(format!("reading 0x{command:04x}: {e}")))?;
        decode_words(&buffer)
    }
}

impl<D> Scd4xDriver for Scd4x<D>
where
    D: I2CDevice + Send + 'static,
    D::Error: std::fmt::Display,
{
    fn stop_periodic_measurement(&mut self) -> Result<()> {
        self.send_command(CMD_STOP_PERIODIC_MEASUREMENT, EXEC_STOP_PERIODIC)
    }

    fn start_periodic_measurement(&mut self) -> Result<()> {
        self.send_command(CMD_START_PERIODIC_MEASUREMENT, EXEC_DEFAULT)
    }

    fn reinit(&mut self) -> Result<()> {
        self.send_command(CMD_REINIT, EXEC_REINIT)
    }

    fn read_serial_number(&mut self) -> Result<u64> {
        let words: [u16; 3] = self.read_words(CMD_GET_SERIAL_NUMBER, EXEC_DEFAULT)?;
        Ok(serial_from_words(words))
    }

    fn get_sensor_altitude(&mut self) -> Result<u16> {
        let [altitude]: [u16; 1] = self.read_words(CMD_GET_SENSOR_ALTITUDE, EXEC_DEFAULT)?;
        Ok(altitude)
    }

    fn set_sensor_altitude(&mut self, altitude: u16) -> Result<()> {
        self.write_word(CMD_SET_SENSOR_ALTITUDE, altitude, EXEC_DEFAULT)
    }

    fn get_temperature_offset(&mut self) -> Result<f32> {
        let [word]: [u16; 1] = self.read_words(CMD_GET_TEMPERATURE_OFFSET, EXEC_DEFAULT)?;
        Ok(temperature_offset_from_word(word))
    }

    fn set_temperature_offset(&mut self, offset: f32) -> Result<()> {
        self.write_word(
            CMD_SET_TEMPERATURE_OFFSET,
            temperature_offset_to_word(offset),
            EXEC_DEFAULT,
        )
    }

    fn persist_settings(&mut self) -> Result<()> {
        self.send_command(CMD_PERSIST_SETTINGS, EXEC_PERSIST)
    }

    fn get_data_ready_status(&mut self) -> Result<bool> {
        let [status]: [u16; 1] = self.read_words(CMD_GET_DATA_READY_STATUS, EXEC_DEFAULT)?;
        Ok(status & 0x07ff != 0)
    }

    fn read_measurement(&mut self) -> Result<SensorReading> {
        let words: [u16; 3] = self.read_words(CMD_READ_MEASUREMENT, EXEC_DEFAULT)?;
        Ok(reading_from_words(words))
    }

    fn close(&mut self) -> Result<()> {
        // Dropping the handle closes the file descriptor
        self.device.take();
        Ok(())
    }
}

/// Sensirion CRC-8 over one 16-bit word
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc: u8 = 0xff;
    for byte in data {
        crc ^= byte;
        for _ in 0..8 {
            if crc & 0x80 != 0 {
                crc = (crc << 1) ^ 0x31;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

fn command_frame(command: u16, word: u16) -> [u8; 5] {
    let [c0, c1] = command.to_be_bytes();
    let [w0, w1] = word.to_be_bytes();
    [c0, c1, w0, w1, crc8(&[w0, w1])]
}

fn decode_words<const N: usize>(buffer: &[u8]) -> Result<[u16; N]> {
    if buffer.len() != N * 3 {
        return Err(SensorError::device(format!(
            "expected {} bytes, got {}",
            N * 3,
            buffer.len()
        )));
    }
    let mut words = [0u16; N];
    for (i, chunk) in buffer.chunks_exact(3).enumerate() {
        if crc8(&chunk[..2]) != chunk[2] {
            return Err(SensorError::device(format!("checksum mismatch in word {i}")));
        }
        words[i] = u16::from_be_bytes([chunk[0], chunk[1]]);
    }
    Ok(words)
}

fn serial_from_words(words: [u16; 3]) -> u64 {
    (u64::from(words[0]) << 32) | (u64::from(words[1]) << 16) | u64::from(words[2])
}

fn reading_from_words(words: [u16; 3]) -> SensorReading {
    SensorReading {
        co2_ppm: f64::from(words[0]),
        temperature_celsius: -45.0 + 175.0 * f64::from(words[1]) / 65535.0,
        relative_humidity_percent: 100.0 * f64::from(words[2]) / 65535.0,
    }
}

fn temperature_offset_to_word(offset: f32) -> u16 {
    let word = (f64::from(offset) * 65535.0 / 175.0).round();
    word.clamp(0.0, f64::from(u16::MAX)) as u16
}

fn temperature_offset_from_word(word: u16) -> f32 {
    (f64::from(word) * 175.0 / 65535.0) as f32
}
