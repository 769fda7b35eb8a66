use crate::error::SourceError;

/// A vehicle as reported by the source at the current simulated instant.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleObservation {
    pub id: String,
    /// Lane the vehicle is on, `None` while it is inside the junction box.
    pub lane: Option<String>,
    /// Meters left to the end of `lane`. Meaningless when `lane` is `None`.
    pub distance_to_stop_line: f64,
    pub is_emergency: bool,
}

/// Vehicles that entered and left the network during one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickCounts {
    pub departed: u32,
    pub arrived: u32,
}

/// The external simulation / sensor / actuator boundary.
///
/// Calls are synchronous. Actuation (`set_phase`, `set_phase_duration`) must be
/// issued before `advance` to take effect for that tick. Any error is fatal to
/// the current run.
pub trait TrafficSource {
    /// Halting-vehicle count on one lane.
    fn halting_count(&mut self, lane: &str) -> Result<u32, SourceError>;

    /// Every vehicle currently in the simulation.
    fn vehicles(&mut self) -> Result<Vec<VehicleObservation>, SourceError>;

    fn set_phase(&mut self, phase: usize) -> Result<(), SourceError>;

    fn set_phase_duration(&mut self, phase: usize, seconds: u32) -> Result<(), SourceError>;

    /// Simulates one second.
    fn advance(&mut self) -> Result<TickCounts, SourceError>;
}
