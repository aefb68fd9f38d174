use crate::error::{Result, SensorError};
use serde_derive::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

pub const ALTITUDE_RANGE: (i32, i32) = (-100, 10_000);
pub const TEMPERATURE_OFFSET_RANGE: (f32, f32) = (0.0, 10.0);
/// Largest accepted moving-average window, about 14 hours at the default interval
pub const MAX_AVERAGE_WINDOW: i64 = 10_000;
pub const DEFAULT_TEMPERATURE_OFFSET: f32 = 4.0;
pub const DEFAULT_DEVICE_NAME: &str = "scd4x";
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(5);

const KEY_I2C_PATH: &str = "SCD4X_I2C_PATH";
const KEY_ALTITUDE: &str = "SCD4X_ALTITUDE";
const KEY_TEMPERATURE_OFFSET: &str = "SCD4X_TEMPERATURE_OFFSET";
const KEY_AVERAGE_WINDOW: &str = "SCD4X_MOVING_AVERAGE_WINDOW";
const KEY_DEVICE_NAME: &str = "SCD4X_DEVICE_NAME";
const KEY_SCAN_INTERVAL: &str = "SCD4X_SCAN_INTERVAL_SECS";

/// Per-device configuration, immutable once the coordinator is built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    pub i2c_path: String,
    pub altitude: Option<i32>,
    pub temperature_offset: Option<f32>,
    pub moving_average_window: Option<i64>,
    pub device_name: String,
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
}

fn default_scan_interval_secs() -> u64 {
    DEFAULT_SCAN_INTERVAL.as_secs()
}

impl SensorConfig {
    pub fn new(i2c_path: impl Into<String>) -> Self {
        Self {
            i2c_path: i2c_path.into(),
            altitude: None,
            temperature_offset: None,
            moving_average_window: None,
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            scan_interval_secs: default_scan_interval_secs(),
        }
    }

    pub fn with_altitude(mut self, altitude: i32) -> Self {
        self.altitude = Some(altitude);
        self
    }

    pub fn with_temperature_offset(mut self, offset: f32) -> Self {
        self.temperature_offset = Some(offset);
        self
    }

    pub fn with_moving_average_window(mut self, window: i64) -> Self {
        self.moving_average_window = Some(window);
        self
    }

    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }

    /// Loads the configuration from `SCD4X_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Loads the configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let i2c_path = value(KEY_I2C_PATH)
            .ok_or_else(|| SensorError::config(KEY_I2C_PATH, "an i2c device path is required"))?;

        let config = Self {
            i2c_path,
            altitude: parse_optional(KEY_ALTITUDE, value(KEY_ALTITUDE))?,
            temperature_offset: parse_optional(
                KEY_TEMPERATURE_OFFSET,
                value(KEY_TEMPERATURE_OFFSET),
            )?,
            moving_average_window: parse_optional(KEY_AVERAGE_WINDOW, value(KEY_AVERAGE_WINDOW))?,
            device_name: value(KEY_DEVICE_NAME).unwrap_or_else(|| DEFAULT_DEVICE_NAME.to_string()),
            scan_interval_secs: parse_optional(KEY_SCAN_INTERVAL, value(KEY_SCAN_INTERVAL))?
                .unwrap_or_else(default_scan_interval_secs),
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the documented ranges
    pub fn validate(&self) -> Result<()> {
        if self.i2c_path.trim().is_empty() {
            return Err(SensorError::config(
                KEY_I2C_PATH,
                "an i2c device path is required",
            ));
        }
        if let Some(altitude) = self.altitude {
            let (min, max) = ALTITUDE_RANGE;
            if !(min..=max).contains(&altitude) {
                return Err(SensorError::config(
                    KEY_ALTITUDE,
                    format!("{altitude} is outside [{min}, {max}]"),
                ));
            }
        }
        if let Some(offset) = self.temperature_offset {
            let (min, max) = TEMPERATURE_OFFSET_RANGE;
            if !offset.is_finite() || !(min..=max).contains(&offset) {
                return Err(SensorError::config(
                    KEY_TEMPERATURE_OFFSET,
                    format!("{offset} is outside [{min}, {max}]"),
                ));
            }
        }
        if let Some(window) = self.moving_average_window {
            if window > MAX_AVERAGE_WINDOW {
                return Err(SensorError::config(
                    KEY_AVERAGE_WINDOW,
                    format!("{window} is larger than {MAX_AVERAGE_WINDOW}"),
                ));
            }
        }
        if self.device_name.trim().is_empty() {
            return Err(SensorError::config(KEY_DEVICE_NAME, "must not be empty"));
        }
        if self.scan_interval_secs == 0 {
            return Err(SensorError::config(KEY_SCAN_INTERVAL, "must be at least 1"));
        }
        Ok(())
    }

    /// Window size with absent or non-positive values treated as 1 and
    /// oversized values capped at `MAX_AVERAGE_WINDOW`
    pub fn window_size(&self) -> usize {
        match self.moving_average_window {
            Some(window) if window >= 1 => window.min(MAX_AVERAGE_WINDOW) as usize,
            _ => 1,
        }
    }

    /// Altitude to reconcile against the device, 0 when unset
    pub fn effective_altitude(&self) -> i32 {
        self.altitude.unwrap_or(0)
    }

    pub fn effective_temperature_offset(&self) -> f32 {
        self.temperature_offset
            .unwrap_or(DEFAULT_TEMPERATURE_OFFSET)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }
}

/// Connection details for the Home Assistant REST API
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HomeAssistantConfig {
    pub url: String,
    pub token: String,
}

impl HomeAssistantConfig {
    pub fn from_env() -> Self {
        Self {
            url: env::var("HA_URL").unwrap_or_default(),
            token: env::var("HA_TOKEN").unwrap_or_default(),
        }
    }

    /// Publishing is skipped entirely when no URL is configured
    pub fn is_enabled(&self) -> bool {
        !self.url.is_empty()
    }
}

fn parse_optional<T>(key: &'static str, raw: Option<String>) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.map(|raw| {
        raw.parse::<T>()
            .map_err(|e| SensorError::config(key, format!("'{raw}': {e}")))
    })
    .transpose()
}
