use thiserror::Error;

/// Invalid controller configuration. Always fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no approaches configured")]
    NoApproaches,

    #[error("approach {0} is configured more than once")]
    DuplicateApproach(String),

    #[error("approach {0} has no controlled lanes")]
    EmptyLaneSet(String),

    #[error("lane {lane} is assigned to both {first} and {second}")]
    SharedLane {
        lane: String,
        first: String,
        second: String,
    },

    #[error("phase index {0} is used by more than one phase")]
    DuplicatePhase(usize),

    #[error("invalid green bounds: g_min={g_min}, g_max={g_max}")]
    GreenBounds { g_min: u32, g_max: u32 },

    #[error("invalid {name}: {value}")]
    InvalidValue { name: &'static str, value: String },

    #[error("could not read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("could not parse config file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// Failure of the external traffic source. The controller has no retry policy.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("traffic source disconnected: {0}")]
    Disconnected(String),

    #[error("unknown lane {0}")]
    UnknownLane(String),

    #[error("unknown phase index {0}")]
    UnknownPhase(usize),

    #[error("invalid reading: {0}")]
    InvalidReading(String),
}

/// Top-level error for a controller run.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("plot error: {0}")]
    Plot(String),
}
