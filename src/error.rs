use std::time::Duration;
use thiserror::Error;

use crate::domain::Fahrenheit;

/// Errors on the temperature sampling path
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SampleError {
    #[error("Thermometer read failed: {0}")]
    Read(String),
    #[error("No sample available yet")]
    NoSampleYet,
    #[error("Simulated sensor fault")]
    SimulatedFault,
}

impl SampleError {
    /// Whether retrying the read may succeed.
    ///
    /// `NoSampleYet` resolves by waiting for the monitor, not by retrying
    /// immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            SampleError::Read(_) | SampleError::SimulatedFault => true,
            SampleError::NoSampleYet => false,
        }
    }
}

/// Compressor state machine errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompressorError {
    #[error("{name} in recovery ({remaining:?} remaining)")]
    InRecovery { name: String, remaining: Duration },
}

/// Errors returned synchronously by the thermostat command interface
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ThermostatError {
    #[error("Invalid setpoint range: on {on} must be at or above off {off}")]
    InvalidRange { on: Fahrenheit, off: Fahrenheit },
    #[error("Sample period must be greater than zero and at most one day")]
    InvalidSamplePeriod,
    #[error("Thermostat control loop has shut down")]
    Closed,
}
