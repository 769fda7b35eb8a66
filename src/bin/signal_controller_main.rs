use adaptive_signal::config::ControllerConfig;
use adaptive_signal::control_system::signal_controller::SignalController;
use adaptive_signal::error::ControlError;
use adaptive_signal::global_variables::METRICS_CSV;
use adaptive_signal::intersection::approach_registry::ApproachRegistry;
use adaptive_signal::monitoring::metrics::{metrics_channel, spawn_writer};
use adaptive_signal::monitoring::report::{load_csv, RunSummary};
use adaptive_signal::simulation_engine::simulation::{IntersectionSim, SimConfig};
use std::env;
use std::path::PathBuf;

#[tokio::main]
async fn main() {
    env_logger::init();
    println!("Starting adaptive signal controller...");
    if let Err(e) = run().await {
        eprintln!("Controller error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ControlError> {
    // Usage: signal_controller_main [config.json] [metrics.csv]
    let mut args = env::args().skip(1);
    let config = match args.next() {
        Some(path) => ControllerConfig::from_json_file(&path)?,
        None => ControllerConfig::default(),
    };
    let csv_path = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(METRICS_CSV));

    let registry = ApproachRegistry::from_config(&config)?;
    let source = IntersectionSim::new(registry, SimConfig::default());
    let (sink, rx) = metrics_channel();
    let writer = spawn_writer(rx, csv_path.clone(), config.amqp_url.clone());
    let mut controller = SignalController::new(config, source, sink)?;

    // The control loop is synchronous; keep it off the async workers.
    let ticks = tokio::task::spawn_blocking(move || controller.run())
        .await
        .map_err(|e| ControlError::Io(std::io::Error::other(e)))??;
    let written = writer
        .await
        .map_err(|e| ControlError::Io(std::io::Error::other(e)))??;
    println!("Simulated {}s, {} records in {}", ticks, written, csv_path.display());

    let records = load_csv(&csv_path)?;
    print!("{}", RunSummary::from_records("adaptive", &records));
    Ok(())
}
