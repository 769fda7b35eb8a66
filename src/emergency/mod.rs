pub mod detector;

pub use detector::{EmergencyDetector, EmergencyRequest};
