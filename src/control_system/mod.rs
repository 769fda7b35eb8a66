pub mod fairness_tracker;
pub mod green_time_allocator;
pub mod phase_runner;
pub mod preemption;
pub mod signal_controller;
