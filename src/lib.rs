//! SCD4x Bridge Library
//!
//! This library polls a Sensirion SCD4x CO2/temperature/humidity sensor over
//! I2C, smooths the readings with a moving average per channel and publishes
//! them as Home Assistant sensor entities.

pub mod config;
pub mod coordinator;
pub mod entity;
pub mod error;
pub mod home_assistant;
pub mod moving_average;
pub mod publisher;
pub mod scd4x;
pub mod scd4x_api;

#[cfg(test)]
mod mock_driver;

// Re-export commonly used types for easier access
pub use config::{HomeAssistantConfig, SensorConfig};
pub use coordinator::{CoordinatorHandle, CoordinatorState, Snapshot, UpdateCoordinator};
pub use entity::{Channel, SensorEntity};
pub use error::{Result, SensorError};
pub use home_assistant::HomeAssistantApi;
pub use publisher::HomeAssistantPublisher;
pub use scd4x::{LinuxTransceiver, Scd4xDriver, SensorReading, Transceiver};
pub use scd4x_api::{probe, Scd4xApi, Timings};
