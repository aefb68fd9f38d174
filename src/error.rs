use std::time::Duration;

/// Result type used throughout the bridge
pub type Result<T> = std::result::Result<T, SensorError>;

/// Errors raised while talking to the sensor or running the update cycle
#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    /// The I2C path could not be opened
    #[error("Unable to open i2c path {path}: {reason}")]
    Connection { path: String, reason: String },

    /// An I2C transaction failed or returned corrupt data
    #[error("Device error: {0}")]
    Device(String),

    /// A hardware operation exceeded its deadline
    #[error("{operation} timed out after {elapsed:?}")]
    Timeout {
        operation: &'static str,
        elapsed: Duration,
    },

    /// The initialize sequence failed; the host should retry setup later
    #[error("Sensor setup failed: {0}")]
    SetupFailure(#[source] Box<SensorError>),

    /// A single poll failed; the previous snapshot is retained
    #[error("Update failed: {0}")]
    CycleFailure(String),

    /// The coordinator was asked to do something its state does not allow
    #[error("Invalid lifecycle transition: {0}")]
    Lifecycle(String),

    /// A configuration value is missing or out of range
    #[error("Invalid configuration for {key}: {reason}")]
    Config { key: &'static str, reason: String },
}

impl SensorError {
    pub(crate) fn device(reason: impl std::fmt::Display) -> Self {
        SensorError::Device(reason.to_string())
    }

    pub(crate) fn config(key: &'static str, reason: impl std::fmt::Display) -> Self {
        SensorError::Config {
            key,
            reason: reason.to_string(),
        }
    }

    /// True for failures that only affect the current cycle
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SensorError::Device(_) | SensorError::Timeout { .. } | SensorError::CycleFailure(_)
        )
    }
}
