//! Fridge Controller
//!
//! Closed-loop compressor control: a background temperature monitor, a
//! compressor state machine with a mandatory post-stop recovery interval, and
//! an on/off hysteresis thermostat driven by a single control task.

pub mod config;
pub mod controller;
pub mod domain;
pub mod error;
pub mod hardware;
pub mod simulation;
pub mod telemetry;

pub use error::{CompressorError, SampleError, ThermostatError};
