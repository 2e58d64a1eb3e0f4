//! # Thermostat Control Loop
//!
//! On/off hysteresis control of a refrigeration compressor.
//!
//! A single spawned task owns the setpoint and is the only caller into the
//! compressor. It wakes on either the sampling ticker or a queued
//! [`ControlCommand`]; commands from one caller are applied in submission
//! order, and a setpoint change always completes before the next tick is
//! evaluated.
//!
//! Hysteresis rule, evaluated only with a valid sample and a configured
//! setpoint:
//! - stopped and `temp > on`: start
//! - running and `temp < off` (`off = on - margin`): stop
//! - anything in between: no change (dead band)
//!
//! Sampling failures are retried a bounded number of times; if the sensor
//! still fails the tick is skipped and the compressor keeps its last
//! commanded state.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::compressor::{Compressor, CompressorState};
use crate::domain::{Fahrenheit, Thermometer};
use crate::error::{SampleError, ThermostatError};

pub const DEFAULT_SAMPLE_PERIOD: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_SAMPLE_ATTEMPTS: u32 = 6;
/// Longest accepted sample period
pub const MAX_SAMPLE_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

// ============================================================================
// Setpoint
// ============================================================================

/// Validated cooling setpoint: start above `on`, stop below `on - margin`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Setpoint {
    on: Fahrenheit,
    margin: Fahrenheit,
}

/// Compressor action requested by the hysteresis rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
}

impl Setpoint {
    /// Build a setpoint from the on and off thresholds.
    ///
    /// Rejects `on < off` and non-finite values; never clamps.
    pub fn new(on: Fahrenheit, off: Fahrenheit) -> Result<Self, ThermostatError> {
        if !on.is_finite() || !off.is_finite() || on < off {
            return Err(ThermostatError::InvalidRange { on, off });
        }
        Ok(Self {
            on,
            margin: on - off,
        })
    }

    /// Build a setpoint from the on threshold and a non-negative margin
    pub fn with_margin(on: Fahrenheit, margin: Fahrenheit) -> Result<Self, ThermostatError> {
        if !margin.is_finite() || margin < Fahrenheit(0.0) {
            return Err(ThermostatError::InvalidRange {
                on,
                off: on - margin,
            });
        }
        Self::new(on, on - margin).map(|_| Self { on, margin })
    }

    pub fn on(&self) -> Fahrenheit {
        self.on
    }

    pub fn off(&self) -> Fahrenheit {
        self.on - self.margin
    }

    pub fn margin(&self) -> Fahrenheit {
        self.margin
    }

    /// Apply the hysteresis rule to one sample
    pub fn decide(&self, temperature: Fahrenheit, state: CompressorState) -> Option<Action> {
        match state {
            CompressorState::Stopped if temperature > self.on => Some(Action::Start),
            CompressorState::Running if temperature < self.off() => Some(Action::Stop),
            CompressorState::Stopped | CompressorState::Running | CompressorState::Recovering => {
                None
            }
        }
    }
}

impl fmt::Display for Setpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.off(), self.on)
    }
}

// ============================================================================
// Commands, configuration and status
// ============================================================================

/// The only way to influence the control loop from outside
#[derive(Debug)]
pub enum ControlCommand {
    SetSetpoint(Setpoint),
    SetSamplePeriod(Duration),
    /// Acknowledged once the compressor is stopped and the loop has exited
    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThermostatConfig {
    pub sample_period: Duration,
    /// Reads per tick before the tick is given up
    pub max_sample_attempts: u32,
}

impl Default for ThermostatConfig {
    fn default() -> Self {
        Self {
            sample_period: DEFAULT_SAMPLE_PERIOD,
            max_sample_attempts: DEFAULT_MAX_SAMPLE_ATTEMPTS,
        }
    }
}

/// Timing of the most recently completed compressor cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CycleStats {
    /// How long the compressor ran
    pub run_time: Duration,
    /// Time between the previous stop and this one
    pub cycle_time: Option<Duration>,
    pub duty_cycle_percent: Option<f64>,
}

impl CycleStats {
    fn new(run_time: Duration, cycle_time: Option<Duration>) -> Self {
        let duty_cycle_percent = cycle_time
            .filter(|c| !c.is_zero())
            .map(|c| run_time.as_secs_f64() / c.as_secs_f64() * 100.0);
        Self {
            run_time,
            cycle_time,
            duty_cycle_percent,
        }
    }
}

impl fmt::Display for CycleStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.run_time.as_secs();
        write!(f, "Last cycle {}m{}s", secs / 60, secs % 60)?;
        if let Some(duty) = self.duty_cycle_percent {
            write!(f, " duty cycle {:.2}%", duty)?;
        }
        Ok(())
    }
}

/// Read-only snapshot published by the control loop after every event
#[derive(Debug, Clone, Serialize)]
pub struct ThermostatStatus {
    pub setpoint: Option<Setpoint>,
    pub last_temperature: Option<Fahrenheit>,
    pub compressor: CompressorState,
    pub sample_period: Duration,
    pub last_cycle: Option<CycleStats>,
    /// Ticks skipped because every sampling attempt failed
    pub skipped_ticks: u64,
    pub closed: bool,
}

impl fmt::Display for ThermostatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Thermostat(")?;
        match &self.setpoint {
            Some(sp) => write!(f, "{}", sp)?,
            None => write!(f, "no setpoint")?,
        }
        match &self.last_temperature {
            Some(t) => write!(f, " temp {}", t)?,
            None => write!(f, " temp unknown")?,
        }
        write!(f, " compressor {}", self.compressor)?;
        if let Some(cycle) = &self.last_cycle {
            write!(f, " {}", cycle)?;
        }
        if self.closed {
            write!(f, " closed")?;
        }
        write!(f, ")")
    }
}

// ============================================================================
// Thermostat handle
// ============================================================================

/// Handle to a running thermostat control loop
pub struct Thermostat {
    compressor: Arc<Compressor>,
    commands: mpsc::UnboundedSender<ControlCommand>,
    status: watch::Receiver<ThermostatStatus>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Thermostat {
    /// Spawn the control loop, keeping whatever state the compressor
    /// inferred from the hardware.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        thermometer: Arc<dyn Thermometer>,
        compressor: Arc<Compressor>,
        config: ThermostatConfig,
    ) -> Self {
        let sample_period = match check_sample_period(config.sample_period) {
            Ok(period) => period,
            Err(_) => {
                warn!(period = ?config.sample_period, "invalid sample period, using default");
                DEFAULT_SAMPLE_PERIOD
            }
        };
        let (commands, rx) = mpsc::unbounded_channel();
        let initial = ThermostatStatus {
            setpoint: None,
            last_temperature: None,
            compressor: compressor.state(),
            sample_period,
            last_cycle: None,
            skipped_ticks: 0,
            closed: false,
        };
        let (status_tx, status) = watch::channel(initial);

        let control = ControlLoop {
            thermometer,
            compressor: compressor.clone(),
            commands: rx,
            status: status_tx,
            setpoint: None,
            sample_period,
            max_sample_attempts: config.max_sample_attempts.max(1),
            last_temperature: None,
            started_at: None,
            stopped_at: None,
            last_cycle: None,
            skipped_ticks: 0,
        };
        let task = tokio::spawn(control.run());
        info!(period = ?sample_period, "thermostat started");

        Self {
            compressor,
            commands,
            status,
            task: Mutex::new(Some(task)),
        }
    }

    /// Spawn the control loop after forcing the compressor into recovery,
    /// for startups where a recent run must be assumed.
    pub fn new_assuming_recovery(
        thermometer: Arc<dyn Thermometer>,
        compressor: Arc<Compressor>,
        config: ThermostatConfig,
    ) -> Self {
        compressor.set_recovering();
        Self::new(thermometer, compressor, config)
    }

    /// Queue a new on/off band. Rejected synchronously if `on < off`.
    pub fn set(&self, on: Fahrenheit, off: Fahrenheit) -> Result<(), ThermostatError> {
        self.set_setpoint(Setpoint::new(on, off)?)
    }

    pub fn set_setpoint(&self, setpoint: Setpoint) -> Result<(), ThermostatError> {
        self.send(ControlCommand::SetSetpoint(setpoint))
    }

    /// Queue a new sampling period, effective from the next tick
    pub fn set_sample_period(&self, period: Duration) -> Result<(), ThermostatError> {
        let period = check_sample_period(period)?;
        self.send(ControlCommand::SetSamplePeriod(period))
    }

    /// Stop the compressor and shut the loop down, waiting until it has
    /// exited. Calling it again is a no-op.
    ///
    /// If the loop already died the compressor is stopped from here.
    pub async fn close(&self) {
        let (ack, done) = oneshot::channel();
        let mut acked = false;
        if self.commands.send(ControlCommand::Shutdown(ack)).is_ok() {
            acked = done.await.is_ok();
        }
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(error = %e, "thermostat control loop failed");
                acked = false;
            }
        }
        if !acked && self.compressor.is_running() {
            warn!("control loop gone, stopping compressor directly");
            self.compressor.stop();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Latest published status
    pub fn status(&self) -> ThermostatStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ThermostatStatus> {
        self.status.clone()
    }

    fn send(&self, cmd: ControlCommand) -> Result<(), ThermostatError> {
        self.commands.send(cmd).map_err(|_| ThermostatError::Closed)
    }
}

impl fmt::Display for Thermostat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self.status.borrow())
    }
}

// ============================================================================
// Control loop
// ============================================================================

struct ControlLoop {
    thermometer: Arc<dyn Thermometer>,
    compressor: Arc<Compressor>,
    commands: mpsc::UnboundedReceiver<ControlCommand>,
    status: watch::Sender<ThermostatStatus>,
    setpoint: Option<Setpoint>,
    sample_period: Duration,
    max_sample_attempts: u32,
    last_temperature: Option<Fahrenheit>,
    started_at: Option<Instant>,
    stopped_at: Option<Instant>,
    last_cycle: Option<CycleStats>,
    skipped_ticks: u64,
}

impl ControlLoop {
    async fn run(mut self) {
        let mut ticker = sample_ticker(self.sample_period);

        loop {
            tokio::select! {
                biased;

                cmd = self.commands.recv() => match cmd {
                    Some(ControlCommand::SetSetpoint(setpoint)) => {
                        info!(on = %setpoint.on(), off = %setpoint.off(), "setpoint changed");
                        self.setpoint = Some(setpoint);
                        self.evaluate().await;
                    }
                    Some(ControlCommand::SetSamplePeriod(period)) => {
                        info!(period = ?period, "sample period changed");
                        self.sample_period = period;
                        ticker = sample_ticker(period);
                    }
                    Some(ControlCommand::Shutdown(ack)) => {
                        self.shutdown();
                        let _ = ack.send(());
                        return;
                    }
                    None => {
                        warn!("thermostat handle dropped without close");
                        self.shutdown();
                        return;
                    }
                },
                _ = ticker.tick() => self.evaluate().await,
            }
            self.publish(false);
        }
    }

    fn shutdown(&mut self) {
        info!("turning off compressor for shutdown");
        if self.compressor.is_running() {
            self.record_stop();
        }
        self.compressor.stop();
        self.publish(true);
    }

    async fn evaluate(&mut self) {
        let temperature = match self.sample_with_retry().await {
            Ok(t) => t,
            Err((tries, e)) => {
                self.skipped_ticks += 1;
                warn!(tries, error = %e, skipped_ticks = self.skipped_ticks, "error sampling temperature");
                return;
            }
        };
        self.last_temperature = Some(temperature);

        let Some(setpoint) = self.setpoint else {
            info!(%temperature, "thermostat waiting for setpoint");
            return;
        };

        match setpoint.decide(temperature, self.compressor.state()) {
            Some(Action::Start) => match self.compressor.start() {
                Ok(()) => {
                    info!(%temperature, on = %setpoint.on(), "chilling");
                    self.started_at = Some(Instant::now());
                }
                Err(e) => debug!(%temperature, error = %e, "start deferred"),
            },
            Some(Action::Stop) => {
                self.compressor.stop();
                self.record_stop();
                match &self.last_cycle {
                    Some(cycle) => info!(%temperature, off = %setpoint.off(), %cycle, "idle"),
                    None => info!(%temperature, off = %setpoint.off(), "idle"),
                }
            }
            None => debug!(%temperature, compressor = %self.compressor.state(), "no change"),
        }
    }

    /// Read the thermometer, retrying transient failures up to the bound.
    /// On failure returns the number of attempts made and the last error.
    async fn sample_with_retry(&self) -> Result<Fahrenheit, (u32, SampleError)> {
        let mut tries = 0;
        loop {
            tries += 1;
            match self.thermometer.sample().await {
                Ok(t) => return Ok(t),
                Err(e) if e.is_transient() && tries < self.max_sample_attempts => {
                    debug!(tries, error = %e, "sample failed, retrying");
                }
                Err(e) => return Err((tries, e)),
            }
        }
    }

    fn record_stop(&mut self) {
        let now = Instant::now();
        if let Some(started) = self.started_at.take() {
            let cycle_time = self.stopped_at.map(|prev| now.duration_since(prev));
            self.last_cycle = Some(CycleStats::new(now.duration_since(started), cycle_time));
        }
        self.stopped_at = Some(now);
    }

    fn publish(&self, closed: bool) {
        self.status.send_replace(ThermostatStatus {
            setpoint: self.setpoint,
            last_temperature: self.last_temperature,
            compressor: self.compressor.state(),
            sample_period: self.sample_period,
            last_cycle: self.last_cycle,
            skipped_ticks: self.skipped_ticks,
            closed,
        });
    }
}

fn check_sample_period(period: Duration) -> Result<Duration, ThermostatError> {
    if period.is_zero() || period > MAX_SAMPLE_PERIOD {
        return Err(ThermostatError::InvalidSamplePeriod);
    }
    Ok(period)
}

/// Ticker whose first tick is one full period away
fn sample_ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MockSwitch, ScriptedThermometer, SwitchState};
    use proptest::prelude::*;
    use rstest::rstest;

    const RECOVERY: Duration = Duration::from_secs(60);

    fn f(v: f64) -> Fahrenheit {
        Fahrenheit(v)
    }

    fn rig(
        sensor: ScriptedThermometer,
        initial: SwitchState,
    ) -> (Thermostat, Arc<Compressor>, Arc<MockSwitch>, Arc<ScriptedThermometer>) {
        let sensor = Arc::new(sensor);
        let switch = Arc::new(MockSwitch::new(initial));
        let compressor = Arc::new(Compressor::new("Fridge", switch.clone(), RECOVERY));
        let config = ThermostatConfig {
            sample_period: Duration::from_secs(1),
            ..Default::default()
        };
        let stat = Thermostat::new(sensor.clone(), compressor.clone(), config);
        (stat, compressor, switch, sensor)
    }

    #[rstest]
    #[case(69.0, 66.0, true)]
    #[case(40.0, 40.0, true)]
    #[case(66.0, 69.0, false)]
    #[case(f64::NAN, 66.0, false)]
    #[case(69.0, f64::INFINITY, false)]
    fn test_setpoint_validation(#[case] on: f64, #[case] off: f64, #[case] valid: bool) {
        assert_eq!(Setpoint::new(f(on), f(off)).is_ok(), valid);
    }

    #[test]
    fn test_setpoint_with_margin() {
        let sp = Setpoint::with_margin(f(69.0), f(3.0)).unwrap();
        assert_eq!(sp.off(), f(66.0));
        assert_eq!(sp.margin(), f(3.0));
        assert!(Setpoint::with_margin(f(69.0), f(-0.5)).is_err());
        assert_eq!(sp.to_string(), "66.00°F-69.00°F");
    }

    #[rstest]
    #[case(70.0, CompressorState::Stopped, Some(Action::Start))]
    #[case(69.0, CompressorState::Stopped, None)]
    #[case(67.0, CompressorState::Stopped, None)]
    #[case(65.0, CompressorState::Stopped, None)]
    #[case(70.0, CompressorState::Running, None)]
    #[case(66.0, CompressorState::Running, None)]
    #[case(65.9, CompressorState::Running, Some(Action::Stop))]
    #[case(75.0, CompressorState::Recovering, None)]
    #[case(60.0, CompressorState::Recovering, None)]
    fn test_hysteresis_decisions(
        #[case] temp: f64,
        #[case] state: CompressorState,
        #[case] expected: Option<Action>,
    ) {
        let sp = Setpoint::new(f(69.0), f(66.0)).unwrap();
        assert_eq!(sp.decide(f(temp), state), expected);
    }

    proptest! {
        #[test]
        fn prop_no_action_inside_dead_band(
            off in -100.0f64..100.0,
            margin in 0.01f64..20.0,
            frac in 0.001f64..0.999,
        ) {
            let on = off + margin;
            let sp = Setpoint::new(f(on), f(off)).unwrap();
            let temp = sp.off().0 + frac * sp.margin().0;
            prop_assume!(temp > sp.off().0 && temp < on);
            prop_assert_eq!(sp.decide(f(temp), CompressorState::Stopped), None);
            prop_assert_eq!(sp.decide(f(temp), CompressorState::Running), None);
        }

        #[test]
        fn prop_start_above_on_stop_below_off(
            on in -100.0f64..100.0,
            margin in 0.0f64..20.0,
            delta in 0.001f64..50.0,
        ) {
            let sp = Setpoint::with_margin(f(on), f(margin)).unwrap();
            prop_assert_eq!(sp.decide(f(on + delta), CompressorState::Stopped), Some(Action::Start));
            prop_assert_eq!(sp.decide(sp.off() - f(delta), CompressorState::Running), Some(Action::Stop));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_range_rejected_synchronously() {
        let (stat, _, _, sensor) = rig(ScriptedThermometer::constant(f(50.0)), SwitchState::Off);

        assert_eq!(
            stat.set(f(66.0), f(69.0)),
            Err(ThermostatError::InvalidRange { on: f(66.0), off: f(69.0) })
        );
        assert_eq!(
            stat.set_sample_period(Duration::ZERO),
            Err(ThermostatError::InvalidSamplePeriod)
        );

        tokio::task::yield_now().await;
        assert_eq!(sensor.reads(), 0);
        assert!(stat.status().setpoint.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_sample_period_rejected() {
        let (stat, compressor, switch, _) =
            rig(ScriptedThermometer::constant(f(50.0)), SwitchState::On);

        assert_eq!(
            stat.set_sample_period(Duration::MAX),
            Err(ThermostatError::InvalidSamplePeriod)
        );
        assert_eq!(
            stat.set_sample_period(MAX_SAMPLE_PERIOD + Duration::from_nanos(1)),
            Err(ThermostatError::InvalidSamplePeriod)
        );
        stat.set_sample_period(MAX_SAMPLE_PERIOD).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(stat.status().sample_period, MAX_SAMPLE_PERIOD);

        stat.close().await;
        assert!(!switch.is_on());
        assert!(!compressor.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_configured_period_falls_back_to_default() {
        let sensor = Arc::new(ScriptedThermometer::constant(f(50.0)));
        let switch = Arc::new(MockSwitch::new(SwitchState::Off));
        let compressor = Arc::new(Compressor::new("Fridge", switch, RECOVERY));
        let config = ThermostatConfig {
            sample_period: Duration::MAX,
            ..Default::default()
        };
        let stat = Thermostat::new(sensor.clone(), compressor, config);

        assert_eq!(stat.status().sample_period, DEFAULT_SAMPLE_PERIOD);
        tokio::time::sleep(DEFAULT_SAMPLE_PERIOD + Duration::from_millis(10)).await;
        assert_eq!(sensor.reads(), 1);
        stat.close().await;
    }

    struct BrokenThermometer;

    #[async_trait::async_trait]
    impl Thermometer for BrokenThermometer {
        async fn sample(&self) -> Result<Fahrenheit, SampleError> {
            panic!("sensor driver bug");
        }

        fn status(&self) -> String {
            "broken".into()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_stops_compressor_after_loop_died() {
        let switch = Arc::new(MockSwitch::new(SwitchState::On));
        let compressor = Arc::new(Compressor::new("Fridge", switch.clone(), RECOVERY));
        let stat = Thermostat::new(
            Arc::new(BrokenThermometer),
            compressor.clone(),
            ThermostatConfig::default(),
        );

        // The immediate evaluation panics inside the control task
        stat.set(f(40.0), f(38.0)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(stat.is_closed());
        assert!(compressor.is_running());

        stat.close().await;
        assert!(!switch.is_on());
        assert_eq!(compressor.state(), CompressorState::Recovering);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscriber_sees_published_status() {
        let (stat, _, _, _) = rig(ScriptedThermometer::constant(f(45.0)), SwitchState::Off);
        let mut rx = stat.subscribe();

        stat.set(f(40.0), f(38.0)).unwrap();
        rx.changed().await.unwrap();
        let status = rx.borrow_and_update().clone();
        assert_eq!(status.compressor, CompressorState::Running);
        assert_eq!(status.last_temperature, Some(f(45.0)));

        stat.close().await;
        rx.changed().await.unwrap();
        assert!(rx.borrow().closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_setpoint_forces_immediate_evaluation() {
        let (stat, compressor, switch, _) =
            rig(ScriptedThermometer::constant(f(45.0)), SwitchState::Off);

        stat.set(f(40.0), f(38.0)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(compressor.is_running());
        assert!(switch.is_on());
        let status = stat.status();
        assert_eq!(status.last_temperature, Some(f(45.0)));
        assert_eq!(status.compressor, CompressorState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_setpoint() {
        let (stat, compressor, _, sensor) =
            rig(ScriptedThermometer::constant(f(90.0)), SwitchState::Off);

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(sensor.reads(), 3);
        assert!(compressor.is_stopped());
        assert_eq!(stat.status().last_temperature, Some(f(90.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sampling_failures_skip_tick() {
        let failures = std::iter::repeat(Err(SampleError::Read("crc".into()))).take(6);
        let (stat, compressor, switch, sensor) = rig(
            ScriptedThermometer::new(failures, Ok(f(80.0))),
            SwitchState::Off,
        );

        stat.set(f(40.0), f(38.0)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(sensor.reads(), 6);
        assert!(compressor.is_stopped());
        assert!(!switch.is_on());
        assert_eq!(stat.status().skipped_ticks, 1);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sensor.reads(), 7);
        assert!(compressor.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_within_bound() {
        let failures = std::iter::repeat(Err(SampleError::SimulatedFault)).take(5);
        let (stat, compressor, _, sensor) = rig(
            ScriptedThermometer::new(failures, Ok(f(80.0))),
            SwitchState::Off,
        );

        stat.set(f(40.0), f(38.0)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(sensor.reads(), 6);
        assert!(compressor.is_running());
        assert_eq!(stat.status().skipped_ticks, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_applied_in_order() {
        let (stat, _, _, _) = rig(ScriptedThermometer::constant(f(39.0)), SwitchState::Off);

        stat.set(f(50.0), f(45.0)).unwrap();
        stat.set(f(42.0), f(40.0)).unwrap();
        stat.set(f(41.0), f(37.0)).unwrap();
        stat.set_sample_period(Duration::from_secs(30)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let status = stat.status();
        assert_eq!(status.setpoint, Some(Setpoint::new(f(41.0), f(37.0)).unwrap()));
        assert_eq!(status.sample_period, Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sample_period_change_applies_to_next_tick() {
        let (stat, _, _, sensor) = rig(ScriptedThermometer::constant(f(39.0)), SwitchState::Off);

        stat.set_sample_period(Duration::from_secs(10)).unwrap();
        tokio::time::sleep(Duration::from_millis(9500)).await;
        assert_eq!(sensor.reads(), 0);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sensor.reads(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_stops_running_compressor() {
        let (stat, compressor, switch, _) =
            rig(ScriptedThermometer::constant(f(50.0)), SwitchState::On);
        assert!(compressor.is_running());

        stat.close().await;

        assert!(!switch.is_on());
        assert_eq!(compressor.state(), CompressorState::Recovering);
        assert!(stat.is_closed());
        assert!(stat.status().closed);
        assert_eq!(stat.set(f(40.0), f(38.0)), Err(ThermostatError::Closed));

        // second close is a no-op
        stat.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_handle_stops_compressor() {
        let (stat, compressor, switch, _) =
            rig(ScriptedThermometer::constant(f(50.0)), SwitchState::On);

        drop(stat);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(!switch.is_on());
        assert!(!compressor.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_assuming_recovery_defers_start() {
        let sensor = Arc::new(ScriptedThermometer::constant(f(80.0)));
        let switch = Arc::new(MockSwitch::new(SwitchState::On));
        let compressor = Arc::new(Compressor::new("Fridge", switch.clone(), RECOVERY));
        let config = ThermostatConfig {
            sample_period: Duration::from_secs(1),
            ..Default::default()
        };
        let stat = Thermostat::new_assuming_recovery(sensor, compressor.clone(), config);
        assert!(!switch.is_on());

        stat.set(f(40.0), f(38.0)).unwrap();
        tokio::time::sleep(RECOVERY - Duration::from_millis(500)).await;
        assert_eq!(compressor.state(), CompressorState::Recovering);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(compressor.is_running());
        stat.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_snapshot_serializes() {
        let (stat, _, _, _) = rig(ScriptedThermometer::constant(f(39.0)), SwitchState::Off);
        stat.set(f(41.0), f(37.0)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let json = serde_json::to_value(stat.status()).unwrap();
        assert_eq!(json["compressor"], "Stopped");
        assert_eq!(json["last_temperature"], 39.0);
        assert_eq!(json["setpoint"]["on"], 41.0);
        assert_eq!(json["skipped_ticks"], 0);
        assert_eq!(json["closed"], false);
    }

    #[test]
    fn test_cycle_stats_display() {
        let stats = CycleStats::new(Duration::from_secs(125), Some(Duration::from_secs(500)));
        assert_eq!(stats.duty_cycle_percent, Some(25.0));
        assert_eq!(stats.to_string(), "Last cycle 2m5s duty cycle 25.00%");

        let first = CycleStats::new(Duration::from_secs(59), None);
        assert_eq!(first.to_string(), "Last cycle 0m59s");
    }
}
