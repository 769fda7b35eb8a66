use crate::control_system::preemption::SignalState;
use crate::emergency::EmergencyRequest;
use crate::error::ControlError;
use crate::global_variables::QUEUE_SIGNAL_METRICS;
use crate::intersection::approach_registry::ApproachId;
use crate::intersection::queue_sampler::QueueSnapshot;
use amiquip::{Channel, Connection, Exchange, Publish, QueueDeclareOptions};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

/// One row per simulated second.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub time: u64,
    /// Actuated phase index, empty if nothing was actuated.
    pub phase: Option<usize>,
    pub phase_label: String,
    pub state: SignalState,
    /// "N", "N_Y", "ALL_RED", "EMG_N", ...
    pub served_dir: String,
    pub green_time: u32,
    pub departed: u32,
    pub arrived: u32,
    #[serde(rename = "qN")]
    pub q_n: u32,
    #[serde(rename = "qE")]
    pub q_e: u32,
    #[serde(rename = "qS")]
    pub q_s: u32,
    #[serde(rename = "qW")]
    pub q_w: u32,
    pub total_queue: u32,
    pub emg_active: bool,
    pub emg_id: Option<String>,
    pub emg_dir: Option<ApproachId>,
    pub emg_dist: Option<f64>,
    pub emg_detect_t: Option<u64>,
    pub emg_green_t: Option<u64>,
    pub emg_wait_time: Option<u64>,
}

impl MetricsRecord {
    pub fn set_queues(&mut self, snapshot: &QueueSnapshot) {
        self.q_n = snapshot.get(ApproachId::North);
        self.q_e = snapshot.get(ApproachId::East);
        self.q_s = snapshot.get(ApproachId::South);
        self.q_w = snapshot.get(ApproachId::West);
        self.total_queue = snapshot.total();
    }

    pub fn set_emergency(&mut self, request: Option<&EmergencyRequest>) {
        self.emg_active = request.is_some();
        self.emg_id = request.map(|r| r.vehicle_id.clone());
        self.emg_dir = request.map(|r| r.approach);
        self.emg_dist = request.map(|r| (r.distance * 10.0).round() / 10.0);
        self.emg_detect_t = request.map(|r| r.detected_at);
        self.emg_green_t = request.and_then(|r| r.first_green_at);
        self.emg_wait_time = request.and_then(EmergencyRequest::wait);
    }
}

/// Receives one record per tick. Implementations swallow their own failures.
pub trait MetricsSink {
    fn emit(&mut self, record: &MetricsRecord);
}

impl MetricsSink for Vec<MetricsRecord> {
    fn emit(&mut self, record: &MetricsRecord) {
        self.push(record.clone());
    }
}

/// Discards everything.
impl MetricsSink for () {
    fn emit(&mut self, _record: &MetricsRecord) {}
}

impl<T: MetricsSink + ?Sized> MetricsSink for Box<T> {
    fn emit(&mut self, record: &MetricsRecord) {
        (**self).emit(record);
    }
}

/// Appends a record to a CSV file, writing the header only when the file is new.
pub fn log_to_csv<T: Serialize>(filename: &Path, record: &T) -> Result<(), ControlError> {
    let file_exists = filename.exists();
    let file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(filename)?;
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(!file_exists)
        .from_writer(file);
    wtr.serialize(record)?;
    wtr.flush()?;
    Ok(())
}

pub struct CsvSink {
    path: PathBuf,
}

impl CsvSink {
    /// Starts a fresh file, removing any previous run at `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, ControlError> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetricsSink for CsvSink {
    fn emit(&mut self, record: &MetricsRecord) {
        if let Err(e) = log_to_csv(&self.path, record) {
            log::error!("Error logging metrics to {}: {}", self.path.display(), e);
        }
    }
}

/// Hands records to a writer task so the control loop never waits on I/O.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: UnboundedSender<MetricsRecord>,
    closed: bool,
}

pub fn metrics_channel() -> (ChannelSink, UnboundedReceiver<MetricsRecord>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelSink { tx, closed: false }, rx)
}

impl MetricsSink for ChannelSink {
    fn emit(&mut self, record: &MetricsRecord) {
        if self.tx.send(record.clone()).is_err() && !self.closed {
            self.closed = true;
            log::warn!("Metrics writer has stopped; dropping records from t={}", record.time);
        }
    }
}

/// Publishes each record as JSON on the `signal_metrics` queue.
pub struct AmqpSink {
    connection: Connection,
    channel: Channel,
}

impl AmqpSink {
    pub fn connect(url: &str) -> amiquip::Result<Self> {
        let mut connection = Connection::insecure_open(url)?;
        let channel = connection.open_channel(None)?;
        channel.queue_declare(QUEUE_SIGNAL_METRICS, QueueDeclareOptions::default())?;
        Ok(Self {
            connection,
            channel,
        })
    }

    pub fn close(self) -> amiquip::Result<()> {
        self.connection.close()
    }
}

impl MetricsSink for AmqpSink {
    fn emit(&mut self, record: &MetricsRecord) {
        let payload = match serde_json::to_vec(record) {
            Ok(payload) => payload,
            Err(e) => {
                log::error!("ERROR serializing metrics record: {}", e);
                return;
            }
        };
        let exchange = Exchange::direct(&self.channel);
        if let Err(e) = exchange.publish(Publish::new(&payload, QUEUE_SIGNAL_METRICS)) {
            log::error!("Error publishing metrics to '{}': {}", QUEUE_SIGNAL_METRICS, e);
        }
    }
}

/// Drains the channel into a CSV file (and RabbitMQ when `amqp_url` is set)
/// on a blocking thread. Resolves to the number of records written once
/// every `ChannelSink` has been dropped.
pub fn spawn_writer(
    mut rx: UnboundedReceiver<MetricsRecord>,
    csv_path: PathBuf,
    amqp_url: Option<String>,
) -> JoinHandle<Result<usize, ControlError>> {
    tokio::task::spawn_blocking(move || -> Result<usize, ControlError> {
        let mut csv = CsvSink::create(&csv_path)?;
        let mut amqp = match amqp_url.as_deref() {
            Some(url) => match AmqpSink::connect(url) {
                Ok(sink) => {
                    log::info!("Publishing metrics to '{}' at {}", QUEUE_SIGNAL_METRICS, url);
                    Some(sink)
                }
                Err(e) => {
                    log::error!("RabbitMQ unavailable ({}), writing CSV only", e);
                    None
                }
            },
            None => None,
        };

        let mut written = 0usize;
        while let Some(record) = rx.blocking_recv() {
            csv.emit(&record);
            if let Some(sink) = amqp.as_mut() {
                sink.emit(&record);
            }
            written += 1;
        }

        if let Some(sink) = amqp.take() {
            if let Err(e) = sink.close() {
                log::warn!("Error closing RabbitMQ connection: {}", e);
            }
        }
        log::info!("Wrote {} metrics records to {}", written, csv.path().display());
        Ok(written)
    })
}
