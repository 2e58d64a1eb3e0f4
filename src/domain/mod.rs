pub mod switch;
pub mod temperature;
pub mod thermometer;

pub use switch::*;
pub use temperature::*;
pub use thermometer::*;
