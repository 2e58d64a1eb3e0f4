use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

use super::Fahrenheit;
use crate::error::SampleError;

/// A temperature sensor.
///
/// Reads may fail transiently; callers decide whether to retry.
#[async_trait]
pub trait Thermometer: Send + Sync {
    async fn sample(&self) -> Result<Fahrenheit, SampleError>;

    /// Human readable status line for periodic display
    fn status(&self) -> String;
}

/// Thermometer that replays a scripted sequence of results.
///
/// Once the script is exhausted every further read returns `fallback`.
pub struct ScriptedThermometer {
    script: Mutex<VecDeque<Result<Fahrenheit, SampleError>>>,
    fallback: Result<Fahrenheit, SampleError>,
    reads: Mutex<u64>,
}

impl ScriptedThermometer {
    pub fn new(
        script: impl IntoIterator<Item = Result<Fahrenheit, SampleError>>,
        fallback: Result<Fahrenheit, SampleError>,
    ) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            reads: Mutex::new(0),
        }
    }

    /// Always reads `temp`
    pub fn constant(temp: Fahrenheit) -> Self {
        Self::new(std::iter::empty(), Ok(temp))
    }

    /// Number of reads served so far
    pub fn reads(&self) -> u64 {
        *self.reads.lock()
    }
}

#[async_trait]
impl Thermometer for ScriptedThermometer {
    async fn sample(&self) -> Result<Fahrenheit, SampleError> {
        *self.reads.lock() += 1;
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }

    fn status(&self) -> String {
        format!("ScriptedThermometer: {} reads", self.reads())
    }
}
