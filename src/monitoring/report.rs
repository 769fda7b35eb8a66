use crate::error::ControlError;
use crate::intersection::approach_registry::ApproachId;
use crate::monitoring::metrics::MetricsRecord;
use plotters::prelude::*;
use std::error::Error;
use std::fmt;
use std::path::Path;

/// One emergency vehicle as seen across a run.
#[derive(Debug, Clone, PartialEq)]
pub struct EmergencyEvent {
    pub vehicle_id: String,
    pub approach: Option<ApproachId>,
    pub detected_at: u64,
    pub first_green_at: Option<u64>,
    pub wait_time: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub label: String,
    pub ticks: usize,
    pub avg_queue: f64,
    pub max_queue: u32,
    pub final_arrived: u64,
    pub emergencies: Vec<EmergencyEvent>,
}

impl RunSummary {
    pub fn from_records(label: &str, records: &[MetricsRecord]) -> Self {
        let ticks = records.len();
        let avg_queue = if ticks == 0 {
            0.0
        } else {
            records.iter().map(|r| f64::from(r.total_queue)).sum::<f64>() / ticks as f64
        };
        Self {
            label: label.to_string(),
            ticks,
            avg_queue,
            max_queue: records.iter().map(|r| r.total_queue).max().unwrap_or(0),
            final_arrived: records.iter().map(|r| u64::from(r.arrived)).sum(),
            emergencies: emergency_events(records),
        }
    }

    /// (count, mean, min, max) of the emergency waits that got a green.
    pub fn wait_stats(&self) -> Option<(usize, f64, u64, u64)> {
        let waits: Vec<u64> = self.emergencies.iter().filter_map(|e| e.wait_time).collect();
        let min = *waits.iter().min()?;
        let max = *waits.iter().max()?;
        let mean = waits.iter().sum::<u64>() as f64 / waits.len() as f64;
        Some((waits.len(), mean, min, max))
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            "{}: {} ticks, avg queue {:.2}, max queue {}, arrived {}",
            self.label, self.ticks, self.avg_queue, self.max_queue, self.final_arrived
        )?;
        for event in &self.emergencies {
            let approach = event.approach.map(|a| a.to_string()).unwrap_or_default();
            match (event.first_green_at, event.wait_time) {
                (Some(green), Some(wait)) => writeln!(
                    f,
                    "  emergency {} ({}): detected t={}, green t={}, wait {}s",
                    event.vehicle_id, approach, event.detected_at, green, wait
                )?,
                _ => writeln!(
                    f,
                    "  emergency {} ({}): detected t={}, never served",
                    event.vehicle_id, approach, event.detected_at
                )?,
            }
        }
        if let Some((n, mean, min, max)) = self.wait_stats() {
            writeln!(f, "  emergency wait: n={} avg={:.1}s min={}s max={}s", n, mean, min, max)?;
        }
        Ok(())
    }
}

/// Distinct emergency vehicles in order of first appearance, with the last
/// green/wait values recorded for each.
pub fn emergency_events(records: &[MetricsRecord]) -> Vec<EmergencyEvent> {
    let mut events: Vec<EmergencyEvent> = Vec::new();
    for record in records {
        let Some(id) = record.emg_id.as_deref() else {
            continue;
        };
        let idx = match events.iter().position(|e| e.vehicle_id == id) {
            Some(idx) => idx,
            None => {
                events.push(EmergencyEvent {
                    vehicle_id: id.to_string(),
                    approach: record.emg_dir,
                    detected_at: record.emg_detect_t.unwrap_or(record.time),
                    first_green_at: None,
                    wait_time: None,
                });
                events.len() - 1
            }
        };
        let event = &mut events[idx];
        if record.emg_green_t.is_some() {
            event.first_green_at = record.emg_green_t;
            event.wait_time = record.emg_wait_time;
        }
    }
    events
}

/// Trailing mean over `window` samples; the first samples average what exists.
pub fn rolling_mean(values: &[u32], window: usize) -> Vec<f64> {
    let window = window.max(1);
    let mut out = Vec::with_capacity(values.len());
    let mut sum = 0u64;
    for (i, v) in values.iter().enumerate() {
        sum += u64::from(*v);
        if i >= window {
            sum -= u64::from(values[i - window]);
        }
        let n = (i + 1).min(window);
        out.push(sum as f64 / n as f64);
    }
    out
}

pub fn cumulative(values: &[u32]) -> Vec<u64> {
    values
        .iter()
        .scan(0u64, |acc, v| {
            *acc += u64::from(*v);
            Some(*acc)
        })
        .collect()
}

pub fn load_csv<P: AsRef<Path>>(path: P) -> Result<Vec<MetricsRecord>, ControlError> {
    let mut rdr = csv::Reader::from_path(path)?;
    let mut records = Vec::new();
    for result in rdr.deserialize() {
        let record: MetricsRecord = result?;
        records.push(record);
    }
    records.sort_by_key(|r| r.time);
    Ok(records)
}

/// A named run for plotting.
pub struct Run {
    pub label: String,
    pub records: Vec<MetricsRecord>,
}

/// Smoothed total queue vs time, one line per run.
pub fn plot_queue_vs_time(runs: &[Run], window: usize, output: &Path) -> Result<(), ControlError> {
    let series: Vec<(&str, Vec<(u64, f64)>)> = runs
        .iter()
        .map(|run| {
            let queues: Vec<u32> = run.records.iter().map(|r| r.total_queue).collect();
            let smooth = rolling_mean(&queues, window);
            let points = run.records.iter().map(|r| r.time).zip(smooth).collect();
            (run.label.as_str(), points)
        })
        .collect();
    let caption = format!("Total Queue vs Time ({}s rolling avg)", window);
    draw_lines(&caption, "Total queue (halting vehicles)", &series, output)
        .map_err(|e| ControlError::Plot(e.to_string()))
}

/// Cumulative arrived vehicles vs time, one line per run.
pub fn plot_throughput(runs: &[Run], output: &Path) -> Result<(), ControlError> {
    let series: Vec<(&str, Vec<(u64, f64)>)> = runs
        .iter()
        .map(|run| {
            let arrived: Vec<u32> = run.records.iter().map(|r| r.arrived).collect();
            let points = run
                .records
                .iter()
                .map(|r| r.time)
                .zip(cumulative(&arrived).into_iter().map(|c| c as f64))
                .collect();
            (run.label.as_str(), points)
        })
        .collect();
    draw_lines(
        "Throughput vs Time",
        "Cumulative arrived vehicles",
        &series,
        output,
    )
    .map_err(|e| ControlError::Plot(e.to_string()))
}

fn draw_lines(
    caption: &str,
    y_desc: &str,
    series: &[(&str, Vec<(u64, f64)>)],
    output: &Path,
) -> Result<(), Box<dyn Error>> {
    let max_t = series
        .iter()
        .flat_map(|(_, pts)| pts.iter().map(|p| p.0))
        .max()
        .unwrap_or(0)
        .max(1);
    let max_y = series
        .iter()
        .flat_map(|(_, pts)| pts.iter().map(|p| p.1))
        .fold(1.0f64, f64::max);

    let backend = BitMapBackend::new(output, (1100, 600));
    let root = backend.into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(caption, ("sans-serif", 20))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0u64..max_t, 0f64..max_y * 1.05)?;

    chart
        .configure_mesh()
        .x_desc("Time (s)")
        .y_desc(y_desc)
        .draw()?;

    for (i, (label, points)) in series.iter().enumerate() {
        let color = Palette99::pick(i).mix(0.9);
        chart
            .draw_series(LineSeries::new(points.iter().copied(), &color))?
            .label(*label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &color));
    }

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;

    root.present()?;
    log::info!("Chart saved to {}", output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_system::preemption::SignalState;

    fn record(time: u64, total_queue: u32, arrived: u32) -> MetricsRecord {
        MetricsRecord {
            time,
            phase: None,
            phase_label: String::new(),
            state: SignalState::Normal,
            served_dir: String::new(),
            green_time: 0,
            departed: 0,
            arrived,
            q_n: total_queue,
            q_e: 0,
            q_s: 0,
            q_w: 0,
            total_queue,
            emg_active: false,
            emg_id: None,
            emg_dir: None,
            emg_dist: None,
            emg_detect_t: None,
            emg_green_t: None,
            emg_wait_time: None,
        }
    }

    #[test]
    fn rolling_mean_uses_partial_windows_at_start() {
        let smooth = rolling_mean(&[3, 6, 9, 12], 2);
        assert_eq!(smooth, vec![3.0, 4.5, 7.5, 10.5]);
        assert_eq!(rolling_mean(&[4, 8], 0), vec![4.0, 8.0]);
        assert!(rolling_mean(&[], 15).is_empty());
    }

    #[test]
    fn cumulative_sums_arrivals() {
        assert_eq!(cumulative(&[0, 2, 1, 0, 3]), vec![0, 2, 3, 3, 6]);
    }

    #[test]
    fn summary_over_a_run() {
        let records: Vec<MetricsRecord> = vec![record(0, 2, 0), record(1, 6, 1), record(2, 4, 2)];
        let summary = RunSummary::from_records("adaptive", &records);
        assert_eq!(summary.ticks, 3);
        assert!((summary.avg_queue - 4.0).abs() < 1e-9);
        assert_eq!(summary.max_queue, 6);
        assert_eq!(summary.final_arrived, 3);
        assert!(summary.emergencies.is_empty());
        assert_eq!(summary.wait_stats(), None);
    }

    #[test]
    fn emergency_events_keep_first_detection_and_green() {
        let mut records: Vec<MetricsRecord> = (0..6).map(|t| record(t, 0, 0)).collect();
        for r in records.iter_mut().take(5).skip(1) {
            r.emg_id = Some("amb_1".to_string());
            r.emg_dir = Some(ApproachId::East);
            r.emg_detect_t = Some(1);
        }
        for r in records.iter_mut().take(5).skip(3) {
            r.emg_green_t = Some(3);
            r.emg_wait_time = Some(2);
        }
        records[5].emg_id = Some("amb_2".to_string());
        records[5].emg_detect_t = Some(5);

        let events = emergency_events(&records);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].detected_at, 1);
        assert_eq!(events[0].wait_time, Some(2));
        assert_eq!(events[1].first_green_at, None);

        let summary = RunSummary::from_records("x", &records);
        assert_eq!(summary.wait_stats(), Some((1, 2.0, 2, 2)));
        assert!(summary.to_string().contains("never served"));
    }
}
