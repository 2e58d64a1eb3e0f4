use serde::Deserialize;
use std::sync::Arc;

use crate::domain::{Fahrenheit, MockSwitch, ScriptedThermometer, Switch, SwitchState, Thermometer};
use crate::simulation::{SimulatedFridge, SimulatedFridgeConfig};

/// Hardware mode configuration
///
/// Only hardware-free backends are built in; a GPIO relay and 1-Wire sensor
/// plug in by implementing `Switch` and `Thermometer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareMode {
    /// Thermal model that cools while the relay is on and warms otherwise
    Simulated,
    /// Constant-reading thermometer and an in-memory relay
    Mock,
}

/// Thermometer and relay pair driving one compressor
#[derive(Clone)]
pub struct Devices {
    pub thermometer: Arc<dyn Thermometer>,
    pub switch: Arc<dyn Switch>,
}

/// Factory for creating device instances
pub struct DeviceFactory {
    mode: HardwareMode,
}

impl DeviceFactory {
    pub fn new(mode: HardwareMode) -> Self {
        Self { mode }
    }

    /// Create the thermometer and relay for the configured mode
    pub fn create_devices(&self, sim: &SimulatedFridgeConfig) -> Devices {
        match self.mode {
            HardwareMode::Simulated => {
                tracing::info!(
                    start = %Fahrenheit(sim.start_temp_f),
                    cooling_rate = sim.cooling_rate_f_per_s,
                    warming_rate = sim.warming_rate_f_per_s,
                    failure_probability = sim.failure_probability,
                    "using simulated fridge"
                );
                let fridge = Arc::new(SimulatedFridge::new(sim.clone()));
                Devices {
                    thermometer: fridge.clone(),
                    switch: fridge,
                }
            }
            HardwareMode::Mock => {
                tracing::warn!("using mock devices, temperature is constant");
                Devices {
                    thermometer: Arc::new(ScriptedThermometer::constant(Fahrenheit(
                        sim.start_temp_f,
                    ))),
                    switch: Arc::new(MockSwitch::new(SwitchState::Off)),
                }
            }
        }
    }
}
