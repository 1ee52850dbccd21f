//! Command-line parsing and validation helpers.

mod defaults;
mod validation;

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

pub use defaults::{
    default_mic_level_file, default_settings_path, DEFAULT_COLLECT_DELAY_MS, DEFAULT_IDLE_PAGE_SUFFIX,
    DEFAULT_IDLE_SCREEN, DEFAULT_IDLE_SECS, DEFAULT_METER_POLL_MS, DEFAULT_PAGE,
    DEFAULT_PAGE_IDLE_SECS, DEFAULT_RESET_GRACE_MS, DEFAULT_SELF_ORIGIN, DEFAULT_STOP_GRACE_MS,
    DEFAULT_TIMEZONE, DEFAULT_VISEME_TAIL_SECS,
};

/// CLI options for the faceplate display controller.
#[derive(Debug, Parser, Clone)]
#[command(about = "Faceplate display controller", author, version)]
pub struct AppConfig {
    /// Idle timeout armed when listening starts (seconds)
    #[arg(long = "default-idle-secs", default_value_t = DEFAULT_IDLE_SECS)]
    pub default_idle_secs: u64,

    /// Idle timeout after a skill page is shown or touched (seconds)
    #[arg(long = "page-idle-secs", default_value_t = DEFAULT_PAGE_IDLE_SECS)]
    pub page_idle_secs: u64,

    /// Extra time after the last viseme before idle returns (seconds)
    #[arg(long = "viseme-tail-secs", default_value_t = DEFAULT_VISEME_TAIL_SECS)]
    pub viseme_tail_secs: u64,

    /// Minimum override age before a reset-idle request releases it (milliseconds)
    #[arg(long = "reset-grace-ms", default_value_t = DEFAULT_RESET_GRACE_MS)]
    pub reset_grace_ms: u64,

    /// Minimum override age before a stop request releases it (milliseconds)
    #[arg(long = "stop-grace-ms", default_value_t = DEFAULT_STOP_GRACE_MS)]
    pub stop_grace_ms: u64,

    /// Delay between requesting idle screen registrations and showing idle (milliseconds)
    #[arg(long = "collect-delay-ms", default_value_t = DEFAULT_COLLECT_DELAY_MS)]
    pub collect_delay_ms: u64,

    /// Page used for the listening/thinking/speaking faces
    #[arg(long = "default-page", default_value = DEFAULT_PAGE)]
    pub default_page: String,

    /// Page name suffix that marks an idle screen page
    #[arg(long = "idle-page-suffix", default_value = DEFAULT_IDLE_PAGE_SUFFIX)]
    pub idle_page_suffix: String,

    /// Origin tag carried by pages this controller shows itself
    #[arg(long = "self-origin", default_value = DEFAULT_SELF_ORIGIN)]
    pub self_origin: String,

    /// Idle screen selected when no choice has been saved
    #[arg(long = "default-idle-screen", default_value = DEFAULT_IDLE_SCREEN)]
    pub default_idle_screen: String,

    /// Settings file holding the selected idle screen
    #[arg(long = "settings-path")]
    pub settings_path: Option<PathBuf>,

    /// Listener level file polled while recording
    #[arg(long = "mic-level-file")]
    pub mic_level_file: Option<PathBuf>,

    /// Mic level poll interval (milliseconds)
    #[arg(long = "meter-poll-ms", default_value_t = DEFAULT_METER_POLL_MS)]
    pub meter_poll_ms: u64,

    /// Device latitude in degrees (north positive)
    #[arg(long, allow_hyphen_values = true)]
    pub latitude: Option<f64>,

    /// Device longitude in degrees (east positive)
    #[arg(long, allow_hyphen_values = true)]
    pub longitude: Option<f64>,

    /// Device timezone (IANA name); independent of the system timezone
    #[arg(long, env = "FACEPLATE_TIMEZONE", default_value = DEFAULT_TIMEZONE)]
    pub timezone: String,

    /// Follow sunrise/noon/sunset brightness levels
    #[arg(long = "auto-brightness", default_value_t = false)]
    pub auto_brightness: bool,

    /// YAML table of named brightness levels (name: level 0-30)
    #[arg(long = "brightness-names")]
    pub brightness_names: Option<PathBuf>,

    /// Print today's brightness schedule and exit
    #[arg(long = "print-schedule", default_value_t = false)]
    pub print_schedule: bool,

    /// Enable file logging (debug)
    #[arg(long = "logs", env = "FACEPLATE_LOGS", default_value_t = false)]
    pub logs: bool,

    /// Disable all file logging (overrides --logs and log env vars)
    #[arg(long = "no-logs", env = "FACEPLATE_NO_LOGS", default_value_t = false)]
    pub no_logs: bool,

    /// Allow logging message payloads (debug log only)
    #[arg(
        long = "log-content",
        env = "FACEPLATE_LOG_CONTENT",
        default_value_t = false
    )]
    pub log_content: bool,
}

/// Timing knobs shared by the arbiter and the event router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdleTimings {
    pub default_idle: Duration,
    pub page_idle: Duration,
    pub viseme_tail: Duration,
    pub reset_grace: Duration,
    pub stop_grace: Duration,
    pub collect_delay: Duration,
}

impl Default for IdleTimings {
    fn default() -> Self {
        Self {
            default_idle: Duration::from_secs(DEFAULT_IDLE_SECS),
            page_idle: Duration::from_secs(DEFAULT_PAGE_IDLE_SECS),
            viseme_tail: Duration::from_secs(DEFAULT_VISEME_TAIL_SECS),
            reset_grace: Duration::from_millis(DEFAULT_RESET_GRACE_MS),
            stop_grace: Duration::from_millis(DEFAULT_STOP_GRACE_MS),
            collect_delay: Duration::from_millis(DEFAULT_COLLECT_DELAY_MS),
        }
    }
}

/// Page names and origin tags the router compares against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageNames {
    pub default_page: String,
    pub idle_page_suffix: String,
    pub self_origin: String,
}

impl Default for PageNames {
    fn default() -> Self {
        Self {
            default_page: DEFAULT_PAGE.to_string(),
            idle_page_suffix: DEFAULT_IDLE_PAGE_SUFFIX.to_string(),
            self_origin: DEFAULT_SELF_ORIGIN.to_string(),
        }
    }
}
