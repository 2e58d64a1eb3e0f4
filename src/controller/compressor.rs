//! # Compressor State Machine
//!
//! Drives the compressor relay through `Stopped -> Running -> Recovering ->
//! Stopped`. After every stop the compressor must rest for the configured
//! recovery interval before it may start again, protecting the motor from
//! short-cycling.
//!
//! All transitions, including the recovery timer firing, are serialized under
//! one lock. The relay is physically on iff the state is `Running`.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::domain::{Switch, SwitchState};
use crate::error::CompressorError;

/// Compressor operating state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum::Display)]
pub enum CompressorState {
    Stopped,
    Running,
    Recovering,
}

struct Inner {
    state: CompressorState,
    switch: Arc<dyn Switch>,
    /// Instant of the most recent entry into `Recovering`
    recovering_since: Option<Instant>,
    /// Bumped on every arm so a stale timer never ends a newer recovery
    epoch: u64,
    timer: Option<JoinHandle<()>>,
}

impl Inner {
    /// Leave `Recovering` for `Stopped`, disarming any pending timer
    fn end_recovery(&mut self) {
        self.state = CompressorState::Stopped;
        self.recovering_since = None;
        self.epoch += 1;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Compressor controller enforcing the mandatory recovery interval.
///
/// Methods that arm the recovery timer (`stop`, `set_recovering`) spawn a
/// Tokio task and must be called from within a Tokio runtime.
pub struct Compressor {
    name: String,
    recovery: Duration,
    inner: Arc<Mutex<Inner>>,
}

impl Compressor {
    /// Create a controller for `switch`.
    ///
    /// The initial state follows the hardware: `Running` if the relay is
    /// already asserted, `Stopped` otherwise.
    pub fn new(name: impl Into<String>, switch: Arc<dyn Switch>, recovery: Duration) -> Self {
        let name = name.into();
        let state = match switch.current_state() {
            SwitchState::On => CompressorState::Running,
            SwitchState::Off => CompressorState::Stopped,
        };
        info!(compressor = %name, %state, recovery = ?recovery, "compressor controller created");

        Self {
            name,
            recovery,
            inner: Arc::new(Mutex::new(Inner {
                state,
                switch,
                recovering_since: None,
                epoch: 0,
                timer: None,
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start the compressor.
    ///
    /// Idempotent while running; rejected with `InRecovery` while resting.
    pub fn start(&self) -> Result<(), CompressorError> {
        let mut inner = self.inner.lock();
        match inner.state {
            CompressorState::Stopped => {
                inner.switch.assert_on();
                inner.state = CompressorState::Running;
                info!(compressor = %self.name, "compressor started");
                Ok(())
            }
            CompressorState::Running => Ok(()),
            CompressorState::Recovering => {
                let remaining = self.remaining_locked(&inner);
                if !remaining.is_zero() {
                    return Err(CompressorError::InRecovery {
                        name: self.name.clone(),
                        remaining,
                    });
                }
                // Interval is over but the timer task has not run yet
                inner.end_recovery();
                inner.switch.assert_on();
                inner.state = CompressorState::Running;
                info!(compressor = %self.name, "compressor started after recovery");
                Ok(())
            }
        }
    }

    /// Stop the compressor. Never fails.
    ///
    /// Only a running compressor changes state (to `Recovering`); stopping a
    /// stopped or recovering compressor is a no-op.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CompressorState::Running => {
                self.enter_recovery(&mut inner);
                info!(compressor = %self.name, recovery = ?self.recovery, "compressor stopped, recovering");
            }
            CompressorState::Stopped | CompressorState::Recovering => {}
        }
    }

    /// Force `Recovering` regardless of the current state.
    ///
    /// Used at startup when the relay state is unknown or a recent run must
    /// be assumed.
    pub fn set_recovering(&self) {
        let mut inner = self.inner.lock();
        self.enter_recovery(&mut inner);
        info!(compressor = %self.name, recovery = ?self.recovery, "compressor forced into recovery");
    }

    /// Force the relay off and leave the machine `Stopped`, cancelling any
    /// pending recovery timer.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }
        inner.epoch += 1;
        inner.switch.assert_off();
        inner.state = CompressorState::Stopped;
        inner.recovering_since = None;
        info!(compressor = %self.name, "compressor closed");
    }

    pub fn state(&self) -> CompressorState {
        self.inner.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == CompressorState::Running
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == CompressorState::Stopped
    }

    /// Time left before a recovering compressor may start again
    pub fn recovery_remaining(&self) -> Option<Duration> {
        let inner = self.inner.lock();
        match inner.state {
            CompressorState::Recovering => Some(self.remaining_locked(&inner)),
            CompressorState::Stopped | CompressorState::Running => None,
        }
    }

    fn remaining_locked(&self, inner: &Inner) -> Duration {
        inner
            .recovering_since
            .map(|since| self.recovery.saturating_sub(since.elapsed()))
            .unwrap_or_default()
    }

    fn enter_recovery(&self, inner: &mut Inner) {
        inner.switch.assert_off();
        inner.state = CompressorState::Recovering;
        inner.recovering_since = Some(Instant::now());
        inner.epoch += 1;

        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }
        inner.timer = Some(tokio::spawn(recovery_timer(
            Arc::downgrade(&self.inner),
            self.name.clone(),
            self.recovery,
            inner.epoch,
        )));
    }
}

async fn recovery_timer(inner: Weak<Mutex<Inner>>, name: String, recovery: Duration, epoch: u64) {
    tokio::time::sleep(recovery).await;

    let Some(inner) = inner.upgrade() else {
        return;
    };
    let mut inner = inner.lock();
    if inner.epoch == epoch && inner.state == CompressorState::Recovering {
        inner.timer = None;
        inner.end_recovery();
        debug!(compressor = %name, "recovery complete");
    }
}

impl fmt::Display for Compressor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.state())
    }
}

impl Drop for Compressor {
    fn drop(&mut self) {
        if let Some(timer) = self.inner.lock().timer.take() {
            timer.abort();
        }
    }
}
