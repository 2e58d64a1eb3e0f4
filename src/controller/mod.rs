pub mod compressor;
pub mod monitor;
pub mod thermostat;

pub use compressor::{Compressor, CompressorState};
pub use monitor::{Monitor, MonitorState};
pub use thermostat::{
    Action, ControlCommand, CycleStats, Setpoint, Thermostat, ThermostatConfig, ThermostatStatus,
};
