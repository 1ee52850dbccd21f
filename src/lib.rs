pub mod app;
pub mod arbiter;
pub mod brightness;
pub mod bus;
pub mod clock;
pub mod config;
pub mod display;
mod lock;
pub mod meter;
pub mod router;
pub mod scheduler;
pub mod settings;
mod telemetry;

pub(crate) use lock::lock_or_recover;
pub use app::logging::{
    crash_log_path, init_logging, install_panic_hook, log_debug, log_debug_content,
    log_file_path, log_panic,
};
pub use app::{schedule_report, Controller};
pub use telemetry::init_tracing;
