pub mod approach_registry;
pub mod queue_sampler;
