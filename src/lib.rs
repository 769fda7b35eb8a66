pub mod config;
pub mod control_system;
pub mod emergency;
pub mod error;
pub mod global_variables;
pub mod intersection;
pub mod monitoring;
pub mod simulation_engine;
