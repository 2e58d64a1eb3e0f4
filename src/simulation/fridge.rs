use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::domain::{Fahrenheit, Switch, SwitchState, Thermometer};
use crate::error::SampleError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedFridgeConfig {
    pub start_temp_f: f64,
    /// Temperature drop per second while the compressor runs (°F/s)
    pub cooling_rate_f_per_s: f64,
    /// Temperature rise per second while the compressor is off (°F/s)
    pub warming_rate_f_per_s: f64,
    /// Artificial sensor read latency
    pub delay: Duration,
    /// Probability (0.0-1.0) that a read fails with a simulated fault
    pub failure_probability: f64,
    /// Fixed RNG seed for reproducible fault sequences
    pub seed: Option<u64>,
}

impl Default for SimulatedFridgeConfig {
    fn default() -> Self {
        Self {
            start_temp_f: 78.0,
            cooling_rate_f_per_s: 0.15,
            warming_rate_f_per_s: 0.11,
            delay: Duration::ZERO,
            failure_probability: 0.0,
            seed: None,
        }
    }
}

struct SimState {
    temperature: f64,
    updated_at: Instant,
    running: bool,
    rng: StdRng,
}

/// Simulated refrigerator acting as both thermometer and compressor relay.
///
/// Temperature falls at the cooling rate while running and rises at the
/// warming rate otherwise. Elapsed time is folded in on every read and
/// before every relay change, so the trajectory is continuous across state
/// changes and across injected faults.
pub struct SimulatedFridge {
    state: Mutex<SimState>,
    cooling_rate: f64,
    warming_rate: f64,
    delay: Duration,
    failure_probability: f64,
}

impl SimulatedFridge {
    pub fn new(config: SimulatedFridgeConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            state: Mutex::new(SimState {
                temperature: config.start_temp_f,
                updated_at: Instant::now(),
                running: false,
                rng,
            }),
            cooling_rate: config.cooling_rate_f_per_s,
            warming_rate: config.warming_rate_f_per_s,
            delay: config.delay,
            failure_probability: config.failure_probability,
        }
    }

    /// Reliable simulator with the given start temperature and rates
    pub fn with_rates(start: Fahrenheit, cooling_per_s: f64, warming_per_s: f64) -> Self {
        Self::new(SimulatedFridgeConfig {
            start_temp_f: start.0,
            cooling_rate_f_per_s: cooling_per_s,
            warming_rate_f_per_s: warming_per_s,
            ..Default::default()
        })
    }

    /// Start with the relay already asserted
    pub fn running(self) -> Self {
        self.state.lock().running = true;
        self
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Current modelled temperature, without consuming a read
    pub fn temperature(&self) -> Fahrenheit {
        let st = self.state.lock();
        Fahrenheit(st.temperature + self.drift(st.running, st.updated_at.elapsed()))
    }

    fn drift(&self, running: bool, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if running {
            -self.cooling_rate * secs
        } else {
            self.warming_rate * secs
        }
    }

    fn advance(&self, st: &mut SimState) {
        let now = Instant::now();
        st.temperature += self.drift(st.running, now.duration_since(st.updated_at));
        st.updated_at = now;
    }

    fn set_running(&self, running: bool) {
        let mut st = self.state.lock();
        if st.running == running {
            return;
        }
        self.advance(&mut st);
        st.running = running;
    }
}

#[async_trait]
impl Thermometer for SimulatedFridge {
    async fn sample(&self) -> Result<Fahrenheit, SampleError> {
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        let mut st = self.state.lock();
        self.advance(&mut st);
        if self.failure_probability > 0.0 && st.rng.gen::<f64>() < self.failure_probability {
            return Err(SampleError::SimulatedFault);
        }
        Ok(Fahrenheit(st.temperature))
    }

    fn status(&self) -> String {
        self.to_string()
    }
}

impl Switch for SimulatedFridge {
    fn assert_on(&self) {
        self.set_running(true);
    }

    fn assert_off(&self) {
        self.set_running(false);
    }

    fn current_state(&self) -> SwitchState {
        if self.is_running() {
            SwitchState::On
        } else {
            SwitchState::Off
        }
    }
}

impl fmt::Display for SimulatedFridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.is_running() { "Running" } else { "Stopped" };
        write!(f, "FridgeSim: {} State: {}", self.temperature(), state)
    }
}
