use adaptive_signal::error::ControlError;
use adaptive_signal::global_variables::{
    METRICS_CSV, QUEUE_CHART_PNG, SMOOTH_WINDOW_SEC, THROUGHPUT_CHART_PNG,
};
use adaptive_signal::monitoring::report::{
    load_csv, plot_queue_vs_time, plot_throughput, Run, RunSummary,
};
use std::env;
use std::path::Path;

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        eprintln!("Report error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), ControlError> {
    // Usage: traffic_report_main <metrics.csv>...
    let mut paths: Vec<String> = env::args().skip(1).collect();
    if paths.is_empty() {
        paths.push(METRICS_CSV.to_string());
    }

    let mut runs = Vec::new();
    for path in &paths {
        let records = load_csv(path)?;
        let label = Path::new(path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(path)
            .to_string();
        print!("{}", RunSummary::from_records(&label, &records));
        runs.push(Run { label, records });
    }

    plot_queue_vs_time(&runs, SMOOTH_WINDOW_SEC, Path::new(QUEUE_CHART_PNG))?;
    plot_throughput(&runs, Path::new(THROUGHPUT_CHART_PNG))?;
    println!("Saved {} and {}", QUEUE_CHART_PNG, THROUGHPUT_CHART_PNG);
    Ok(())
}
