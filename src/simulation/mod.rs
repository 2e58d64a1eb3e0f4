//! # Simulated Thermal Environment
//!
//! Hardware-free stand-in for the thermometer and compressor relay, used by
//! the tests and by the binary's simulation mode.
//!
//! ## Usage
//!
//! ```rust
//! use fridge_controller::domain::{Fahrenheit, Switch};
//! use fridge_controller::simulation::SimulatedFridge;
//!
//! // 70°F, cooling 0.1°F/s while running, no warming while stopped
//! let sim = SimulatedFridge::with_rates(Fahrenheit(70.0), 0.1, 0.0);
//! sim.assert_on();
//! assert!(sim.is_running());
//! ```

pub mod fridge;

pub use fridge::{SimulatedFridge, SimulatedFridgeConfig};
