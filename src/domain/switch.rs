use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Observed state of a binary actuator
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum::Display)]
pub enum SwitchState {
    On,
    Off,
}

/// A binary actuator such as a compressor relay.
///
/// Assertions are synchronous so the compressor can actuate while holding
/// its state lock.
pub trait Switch: Send + Sync {
    fn assert_on(&self);
    fn assert_off(&self);
    fn current_state(&self) -> SwitchState;
}

/// In-memory relay that records how often it was driven
#[derive(Debug, Default)]
pub struct MockSwitch {
    on: AtomicBool,
    on_count: AtomicU64,
    off_count: AtomicU64,
}

impl MockSwitch {
    pub fn new(initial: SwitchState) -> Self {
        Self {
            on: AtomicBool::new(initial == SwitchState::On),
            ..Default::default()
        }
    }

    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::SeqCst)
    }

    pub fn on_count(&self) -> u64 {
        self.on_count.load(Ordering::SeqCst)
    }

    pub fn off_count(&self) -> u64 {
        self.off_count.load(Ordering::SeqCst)
    }
}

impl Switch for MockSwitch {
    fn assert_on(&self) {
        self.on_count.fetch_add(1, Ordering::SeqCst);
        self.on.store(true, Ordering::SeqCst);
    }

    fn assert_off(&self) {
        self.off_count.fetch_add(1, Ordering::SeqCst);
        self.on.store(false, Ordering::SeqCst);
    }

    fn current_state(&self) -> SwitchState {
        if self.is_on() {
            SwitchState::On
        } else {
            SwitchState::Off
        }
    }
}
