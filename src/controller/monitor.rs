//! # Temperature Monitor
//!
//! Samples a thermometer on a fixed period in a background task and caches
//! the latest good reading. Readers never wait on the sensor: they get the
//! cached sample immediately. A failed read is counted but leaves the cached
//! sample in place, so a transient sensor fault never blanks out the last
//! known-good temperature.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::{Fahrenheit, Sample, Thermometer};
use crate::error::SampleError;

/// Shared monitor state, written only by the sampling task
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorState {
    pub last_sample: Option<Sample>,
    /// Reads attempted, successful or not
    pub sample_count: u64,
    pub error_count: u64,
    pub last_error: Option<SampleError>,
}

/// Background sampler with a cached reading
pub struct Monitor {
    sensor_status: Arc<dyn Thermometer>,
    sample_period: Duration,
    state: Arc<RwLock<MonitorState>>,
    task: JoinHandle<()>,
}

impl Monitor {
    /// Spawn the sampling task. The first read happens immediately.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(thermometer: Arc<dyn Thermometer>, sample_period: Duration) -> Self {
        let state = Arc::new(RwLock::new(MonitorState::default()));
        let task = tokio::spawn(sample_loop(
            thermometer.clone(),
            sample_period,
            state.clone(),
        ));
        info!(period = ?sample_period, "temperature monitor started");

        Self {
            sensor_status: thermometer,
            sample_period,
            state,
            task,
        }
    }

    /// Latest cached temperature, or `NoSampleYet` before the first success
    pub fn sample(&self) -> Result<Fahrenheit, SampleError> {
        self.state
            .read()
            .last_sample
            .map(|s| s.temperature)
            .ok_or(SampleError::NoSampleYet)
    }

    /// Consistent diagnostic snapshot of the monitor state
    pub fn last_sample(&self) -> MonitorState {
        self.state.read().clone()
    }

    pub fn sample_period(&self) -> Duration {
        self.sample_period
    }

    /// Poll until the first successful sample arrives, up to `attempts`
    /// checks spaced by `interval`.
    pub async fn wait_for_first_sample(
        &self,
        attempts: u32,
        interval: Duration,
    ) -> Result<Sample, SampleError> {
        for attempt in 1..=attempts {
            let cached = self.state.read().last_sample;
            if let Some(sample) = cached {
                return Ok(sample);
            }
            info!(attempt, attempts, "waiting for thermometer startup");
            tokio::time::sleep(interval).await;
        }
        let cached = self.state.read().last_sample;
        cached.ok_or(SampleError::NoSampleYet)
    }

    /// Stop the sampling task. The cached state remains readable.
    pub fn shutdown(&self) {
        self.task.abort();
        info!("temperature monitor stopped");
    }
}

async fn sample_loop(
    thermometer: Arc<dyn Thermometer>,
    sample_period: Duration,
    state: Arc<RwLock<MonitorState>>,
) {
    loop {
        let result = thermometer.sample().await;
        {
            let mut st = state.write();
            st.sample_count += 1;
            match result {
                Ok(temperature) => {
                    st.last_sample = Some(Sample::now(temperature));
                    debug!(%temperature, samples = st.sample_count, "monitor sample");
                }
                Err(e) => {
                    st.error_count += 1;
                    warn!(error = %e, errors = st.error_count, samples = st.sample_count, "monitor sample failed");
                    st.last_error = Some(e);
                }
            }
        }
        tokio::time::sleep(sample_period).await;
    }
}

#[async_trait]
impl Thermometer for Monitor {
    async fn sample(&self) -> Result<Fahrenheit, SampleError> {
        Monitor::sample(self)
    }

    fn status(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state.read();
        match &st.last_sample {
            Some(sample) => write!(f, "Monitor({} {}/{})", sample, st.error_count, st.sample_count)?,
            None => write!(f, "Monitor(no sample {}/{})", st.error_count, st.sample_count)?,
        }
        drop(st);
        write!(f, " [{}]", self.sensor_status.status())
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ScriptedThermometer;

    const PERIOD: Duration = Duration::from_secs(1);

    #[tokio::test(start_paused = true)]
    async fn test_no_sample_before_first_success() {
        let sensor = Arc::new(ScriptedThermometer::new(
            std::iter::empty(),
            Err(SampleError::Read("bus timeout".into())),
        ));
        let monitor = Monitor::spawn(sensor, PERIOD);
        assert_eq!(monitor.sample_period(), PERIOD);

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(monitor.sample(), Err(SampleError::NoSampleYet));

        let st = monitor.last_sample();
        assert!(st.last_sample.is_none());
        assert_eq!(st.sample_count, 3);
        assert_eq!(st.error_count, 3);
        assert_eq!(st.last_error, Some(SampleError::Read("bus timeout".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_sample_survives_failures() {
        let sensor = Arc::new(ScriptedThermometer::new(
            vec![Ok(Fahrenheit(40.0))],
            Err(SampleError::SimulatedFault),
        ));
        let monitor = Monitor::spawn(sensor, PERIOD);
        tokio::time::sleep(PERIOD / 2).await;

        let mut previous_errors = 0;
        for _ in 0..5 {
            tokio::time::sleep(PERIOD).await;
            let st = monitor.last_sample();
            assert_eq!(st.last_sample.map(|s| s.temperature), Some(Fahrenheit(40.0)));
            assert!(st.error_count > previous_errors);
            assert!(st.sample_count >= st.error_count);
            previous_errors = st.error_count;
        }
        assert_eq!(monitor.sample(), Ok(Fahrenheit(40.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_sample_replaces_cached() {
        let sensor = Arc::new(ScriptedThermometer::new(
            vec![Ok(Fahrenheit(40.0)), Err(SampleError::SimulatedFault)],
            Ok(Fahrenheit(38.5)),
        ));
        let monitor = Monitor::spawn(sensor, PERIOD);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(monitor.sample(), Ok(Fahrenheit(40.0)));
        tokio::time::sleep(PERIOD).await;
        assert_eq!(monitor.sample(), Ok(Fahrenheit(40.0)));
        tokio::time::sleep(PERIOD).await;
        assert_eq!(monitor.sample(), Ok(Fahrenheit(38.5)));
        assert_eq!(monitor.last_sample().error_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_first_sample() {
        let sensor = Arc::new(ScriptedThermometer::new(
            vec![Err(SampleError::SimulatedFault), Err(SampleError::SimulatedFault)],
            Ok(Fahrenheit(45.0)),
        ));
        let monitor = Monitor::spawn(sensor, PERIOD);

        let sample = monitor
            .wait_for_first_sample(10, Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(sample.temperature, Fahrenheit(45.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_first_sample_gives_up() {
        let sensor = Arc::new(ScriptedThermometer::new(
            std::iter::empty(),
            Err(SampleError::SimulatedFault),
        ));
        let monitor = Monitor::spawn(sensor, PERIOD);

        let result = monitor
            .wait_for_first_sample(3, Duration::from_millis(100))
            .await;
        assert_eq!(result, Err(SampleError::NoSampleYet));
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_as_thermometer() {
        let sensor = Arc::new(ScriptedThermometer::constant(Fahrenheit(41.0)));
        let monitor: Arc<dyn Thermometer> = Arc::new(Monitor::spawn(sensor, PERIOD));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(monitor.sample().await, Ok(Fahrenheit(41.0)));
        let status = monitor.status();
        assert!(status.starts_with("Monitor(41.00°F"), "{status}");
        assert!(status.ends_with(" 0/1) [ScriptedThermometer: 1 reads]"), "{status}");
    }
}
