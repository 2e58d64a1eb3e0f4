use anyhow::Result;
use figment::{providers::{Env, Format, Toml}, Figment};
use serde::Deserialize;
use std::time::Duration;
use validator::Validate;

use crate::controller::{Setpoint, ThermostatConfig};
use crate::domain::Fahrenheit;
use crate::hardware::HardwareMode;
use crate::simulation::SimulatedFridgeConfig;
use crate::telemetry::LogFormat;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct Config {
    #[validate(nested)]
    pub controller: ControllerConfig,
    #[validate(nested)]
    pub setpoint: SetpointConfig,
    #[validate(nested)]
    pub monitor: MonitorConfig,
    pub hardware: HardwareConfig,
    #[validate(nested)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ControllerConfig {
    pub name: String,
    #[validate(range(min = 1, max = 86_400_000))]
    pub sample_period_ms: u64,
    pub recovery_seconds: u64,
    #[validate(range(min = 1))]
    pub max_sample_attempts: u32,
    /// Force the compressor into recovery at startup instead of trusting
    /// the relay state
    pub assume_recovery_on_start: bool,
}

impl ControllerConfig {
    pub fn recovery(&self) -> Duration {
        Duration::from_secs(self.recovery_seconds)
    }

    pub fn thermostat(&self) -> ThermostatConfig {
        ThermostatConfig {
            sample_period: Duration::from_millis(self.sample_period_ms),
            max_sample_attempts: self.max_sample_attempts,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SetpointConfig {
    pub on_f: f64,
    #[validate(range(min = 0.0))]
    pub margin_f: f64,
}

impl SetpointConfig {
    pub fn setpoint(&self) -> Result<Setpoint> {
        Ok(Setpoint::with_margin(Fahrenheit(self.on_f), Fahrenheit(self.margin_f))?)
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct MonitorConfig {
    #[validate(range(min = 1, max = 86_400_000))]
    pub sample_period_ms: u64,
    pub startup_wait_attempts: u32,
    #[validate(range(min = 1))]
    pub startup_wait_ms: u64,
    #[validate(range(min = 1))]
    pub status_interval_seconds: u64,
}

impl MonitorConfig {
    pub fn sample_period(&self) -> Duration {
        Duration::from_millis(self.sample_period_ms)
    }

    pub fn startup_wait(&self) -> Duration {
        Duration::from_millis(self.startup_wait_ms)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HardwareConfig {
    pub mode: HardwareMode,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SimulationConfig {
    pub start_temp_f: f64,
    #[validate(range(min = 0.0))]
    pub cooling_rate_f_per_s: f64,
    #[validate(range(min = 0.0))]
    pub warming_rate_f_per_s: f64,
    pub delay_ms: u64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub failure_probability: f64,
    pub seed: Option<u64>,
}

impl SimulationConfig {
    pub fn fridge(&self) -> SimulatedFridgeConfig {
        SimulatedFridgeConfig {
            start_temp_f: self.start_temp_f,
            cooling_rate_f_per_s: self.cooling_rate_f_per_s,
            warming_rate_f_per_s: self.warming_rate_f_per_s,
            delay: Duration::from_millis(self.delay_ms),
            failure_probability: self.failure_probability,
            seed: self.seed,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::from_figment(
            Figment::new()
                .merge(Toml::file("config/default.toml"))
                .merge(Env::prefixed("FRIDGE__").split("__")),
        )
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let cfg: Config = figment.extract()?;
        cfg.validate()?;
        Ok(cfg)
    }
}
