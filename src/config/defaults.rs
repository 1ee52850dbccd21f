use std::env;
use std::path::PathBuf;

pub const DEFAULT_IDLE_SECS: u64 = 60;
pub const DEFAULT_PAGE_IDLE_SECS: u64 = 30;
pub const DEFAULT_VISEME_TAIL_SECS: u64 = 5;
pub const DEFAULT_RESET_GRACE_MS: u64 = 2_000;
pub const DEFAULT_STOP_GRACE_MS: u64 = 7_000;
pub const DEFAULT_COLLECT_DELAY_MS: u64 = 1_000;
pub const DEFAULT_METER_POLL_MS: u64 = 50;

pub const DEFAULT_PAGE: &str = "all.qml";
pub const DEFAULT_IDLE_PAGE_SUFFIX: &str = "idle.qml";
pub const DEFAULT_SELF_ORIGIN: &str = "mycroft-gui";
pub const DEFAULT_IDLE_SCREEN: &str = "Time and Date";
pub const DEFAULT_TIMEZONE: &str = "UTC";

pub(super) const MAX_IDLE_SECS: u64 = 3_600;
pub(super) const MAX_GRACE_MS: u64 = 60_000;
pub(super) const MAX_COLLECT_DELAY_MS: u64 = 30_000;
pub(super) const MIN_METER_POLL_MS: u64 = 10;
pub(super) const MAX_METER_POLL_MS: u64 = 1_000;
pub(super) const MAX_ORIGIN_BYTES: usize = 128;

/// Settings file used when `--settings-path` is not given.
pub fn default_settings_path() -> PathBuf {
    match env::var_os("XDG_CONFIG_HOME") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir).join("faceplate/settings.json"),
        _ => match env::var_os("HOME") {
            Some(home) if !home.is_empty() => {
                PathBuf::from(home).join(".config/faceplate/settings.json")
            }
            _ => env::temp_dir().join("faceplate/settings.json"),
        },
    }
}

/// Level file the speech listener rewrites while recording.
pub fn default_mic_level_file() -> PathBuf {
    env::temp_dir().join("mycroft/ipc/mic_level")
}
