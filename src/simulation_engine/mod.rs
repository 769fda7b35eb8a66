// simulation_engine/mod.rs
pub mod simulation;
pub mod traffic_source;
