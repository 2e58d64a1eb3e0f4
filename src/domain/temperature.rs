use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Neg, Sub};
use tokio::time::Instant;

// ============================================================================
// Temperature Unit Newtypes
// ============================================================================

/// Temperature in degrees Fahrenheit (°F)
///
/// The control path works in Fahrenheit end to end.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, PartialOrd)]
#[serde(transparent)]
pub struct Fahrenheit(pub f64);

/// Temperature in degrees Celsius (°C)
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, PartialOrd)]
#[serde(transparent)]
pub struct Celsius(pub f64);

impl Fahrenheit {
    pub fn is_finite(&self) -> bool {
        self.0.is_finite()
    }
}

/// `C = (F - 32) * 5/9`
pub fn f_to_c(f: Fahrenheit) -> Celsius {
    Celsius((f.0 - 32.0) * 5.0 / 9.0)
}

/// `F = C * 9/5 + 32`
pub fn c_to_f(c: Celsius) -> Fahrenheit {
    Fahrenheit(c.0 * 9.0 / 5.0 + 32.0)
}

impl From<Celsius> for Fahrenheit {
    fn from(c: Celsius) -> Self {
        c_to_f(c)
    }
}

impl From<Fahrenheit> for Celsius {
    fn from(f: Fahrenheit) -> Self {
        f_to_c(f)
    }
}

impl Add for Fahrenheit {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Fahrenheit {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl Neg for Fahrenheit {
    type Output = Self;
    fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl fmt::Display for Fahrenheit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}°F", self.0)
    }
}

impl fmt::Display for Celsius {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}°C", self.0)
    }
}

// ============================================================================
// Samples
// ============================================================================

/// One successful thermometer reading.
///
/// `taken_at` is the monotonic instant used for age calculations; `at` is the
/// wall-clock time for display and logs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub temperature: Fahrenheit,
    pub taken_at: Instant,
    pub at: DateTime<Utc>,
}

impl Sample {
    pub fn now(temperature: Fahrenheit) -> Self {
        Self {
            temperature,
            taken_at: Instant::now(),
            at: Utc::now(),
        }
    }

    /// Time elapsed since the reading was taken
    pub fn age(&self) -> std::time::Duration {
        Instant::now().saturating_duration_since(self.taken_at)
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @{:.1?}", self.temperature, self.age())
    }
}
