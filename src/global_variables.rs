// Timing defaults (seconds)
pub const G_MIN: u32 = 10;
pub const G_MAX: u32 = 30;
pub const YELLOW_TIME: u32 = 3;
pub const GAP_TIME: u32 = 3;
pub const MAX_WAIT: u32 = 90;
pub const ALL_RED_TIME: u32 = 1;
pub const EXTRA_CLEAR_TIME: u32 = 3;
pub const RUN_SECONDS: u64 = 900;

// Queue length at which the linear policy reaches G_MAX
pub const Q_REF: u32 = 15;

// Meters from the stop line
pub const DETECTION_RADIUS: f64 = 200.0;

// Actuator phase indices of the reference 4-way junction
pub const ALL_RED_PHASE: usize = 8;
pub const ALL_YELLOW_PHASE: usize = 9;

// Output files
pub const METRICS_CSV: &str = "signal_metrics.csv";
pub const QUEUE_CHART_PNG: &str = "queue_vs_time.png";
pub const THROUGHPUT_CHART_PNG: &str = "throughput_vs_time.png";

// Rolling-mean window for the queue chart (seconds)
pub const SMOOTH_WINDOW_SEC: usize = 15;

// Queue Routing Keys
pub const QUEUE_SIGNAL_METRICS: &str = "signal_metrics";
