//! Faceplate entrypoint: decides what the device screen shows while the assistant works.
//!
//! Bus traffic arrives as JSON lines on stdin and leaves as JSON lines on stdout.
//!
//! # Architecture
//!
//! - Reader thread: parses stdin lines into bus messages
//! - Main thread: delivers them to the activity handlers in order
//! - Timer worker: fires idle checks, collect delays and brightness changes

use anyhow::{Context, Result};
use faceplate::clock::{Clock, SystemClock};
use faceplate::config::AppConfig;
use faceplate::settings::JsonFileSettings;
use faceplate::{
    bus::BusSession, init_logging, init_tracing, install_panic_hook, log_debug,
    log_file_path, schedule_report, Controller,
};
use std::io::{self, BufReader};
use std::sync::Arc;

fn main() -> Result<()> {
    let config = AppConfig::parse_args()?;
    init_logging(&config);
    init_tracing(&config);
    install_panic_hook();
    let log_path = log_file_path();
    log_debug("=== Faceplate Started ===");
    log_debug(&format!("Log file: {log_path:?}"));

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());

    if config.print_schedule {
        let location = config
            .location()?
            .context("--print-schedule requires --latitude and --longitude")?;
        print!("{}", schedule_report(&location, clock.wall()));
        return Ok(());
    }

    let settings = Arc::new(JsonFileSettings::new(config.settings_path()));
    log_debug(&format!("Settings file: {:?}", settings.path()));
    let mut controller = Controller::new(&config, clock, settings)?;
    // The writer must be on the bus before start() sends the collect request.
    let session = BusSession::attach(controller.bus(), io::stdout());
    controller.start()?;
    controller.run_timers();

    let stats = session.run(BufReader::new(io::stdin()));
    controller.shutdown();
    let stats = stats?;
    tracing::info!(
        delivered = stats.delivered,
        rejected = stats.rejected,
        "bus session ended"
    );
    log_debug("=== Faceplate Exiting ===");
    Ok(())
}
