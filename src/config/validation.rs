use super::defaults::{
    default_mic_level_file, default_settings_path, MAX_COLLECT_DELAY_MS, MAX_GRACE_MS,
    MAX_IDLE_SECS, MAX_METER_POLL_MS, MAX_ORIGIN_BYTES, MIN_METER_POLL_MS,
};
use super::{AppConfig, IdleTimings, PageNames};
use crate::brightness::Location;
use anyhow::{anyhow, bail, Result};
use chrono_tz::Tz;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

impl AppConfig {
    /// Parse CLI arguments and validate them right away.
    pub fn parse_args() -> Result<Self> {
        let mut config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    /// Check CLI values and normalize names.
    pub fn validate(&mut self) -> Result<()> {
        for (flag, value) in [
            ("--default-idle-secs", self.default_idle_secs),
            ("--page-idle-secs", self.page_idle_secs),
        ] {
            if !(1..=MAX_IDLE_SECS).contains(&value) {
                bail!("{flag} must be between 1 and {MAX_IDLE_SECS}, got {value}");
            }
        }
        if self.viseme_tail_secs > 60 {
            bail!(
                "--viseme-tail-secs must be at most 60, got {}",
                self.viseme_tail_secs
            );
        }
        for (flag, value) in [
            ("--reset-grace-ms", self.reset_grace_ms),
            ("--stop-grace-ms", self.stop_grace_ms),
        ] {
            if value > MAX_GRACE_MS {
                bail!("{flag} must be at most {MAX_GRACE_MS} ms, got {value}");
            }
        }
        if self.collect_delay_ms > MAX_COLLECT_DELAY_MS {
            bail!(
                "--collect-delay-ms must be at most {MAX_COLLECT_DELAY_MS} ms, got {}",
                self.collect_delay_ms
            );
        }
        if !(MIN_METER_POLL_MS..=MAX_METER_POLL_MS).contains(&self.meter_poll_ms) {
            bail!(
                "--meter-poll-ms must be between {MIN_METER_POLL_MS} and {MAX_METER_POLL_MS}, got {}",
                self.meter_poll_ms
            );
        }

        self.default_page = non_empty_name(&self.default_page, "--default-page")?;
        self.idle_page_suffix = non_empty_name(&self.idle_page_suffix, "--idle-page-suffix")?;
        self.self_origin = non_empty_name(&self.self_origin, "--self-origin")?;
        if self.self_origin.len() > MAX_ORIGIN_BYTES {
            bail!("--self-origin must be at most {MAX_ORIGIN_BYTES} bytes");
        }
        self.default_idle_screen =
            non_empty_name(&self.default_idle_screen, "--default-idle-screen")?;

        if let Some(latitude) = self.latitude {
            if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
                bail!("--latitude must be between -90 and 90 degrees, got {latitude}");
            }
        }
        if let Some(longitude) = self.longitude {
            if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
                bail!("--longitude must be between -180 and 180 degrees, got {longitude}");
            }
        }
        if self.latitude.is_some() != self.longitude.is_some() {
            bail!("--latitude and --longitude must be given together");
        }
        self.timezone()?;
        if (self.auto_brightness || self.print_schedule) && self.latitude.is_none() {
            bail!("--auto-brightness and --print-schedule require --latitude and --longitude");
        }
        if let Some(path) = &self.brightness_names {
            if !path.is_file() {
                bail!("--brightness-names file not found: {}", path.display());
            }
        }
        Ok(())
    }

    /// Device timezone; never derived from the host's local zone.
    pub fn timezone(&self) -> Result<Tz> {
        self.timezone
            .trim()
            .parse::<Tz>()
            .map_err(|err| anyhow!("--timezone '{}' is not an IANA zone: {err}", self.timezone))
    }

    /// Device location, when coordinates were configured.
    pub fn location(&self) -> Result<Option<Location>> {
        match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => Ok(Some(Location {
                latitude,
                longitude,
                timezone: self.timezone()?,
            })),
            _ => Ok(None),
        }
    }

    pub fn idle_timings(&self) -> IdleTimings {
        IdleTimings {
            default_idle: Duration::from_secs(self.default_idle_secs),
            page_idle: Duration::from_secs(self.page_idle_secs),
            viseme_tail: Duration::from_secs(self.viseme_tail_secs),
            reset_grace: Duration::from_millis(self.reset_grace_ms),
            stop_grace: Duration::from_millis(self.stop_grace_ms),
            collect_delay: Duration::from_millis(self.collect_delay_ms),
        }
    }

    pub fn page_names(&self) -> PageNames {
        PageNames {
            default_page: self.default_page.clone(),
            idle_page_suffix: self.idle_page_suffix.clone(),
            self_origin: self.self_origin.clone(),
        }
    }

    pub fn settings_path(&self) -> PathBuf {
        self.settings_path
            .clone()
            .unwrap_or_else(default_settings_path)
    }

    pub fn mic_level_file(&self) -> PathBuf {
        self.mic_level_file
            .clone()
            .unwrap_or_else(default_mic_level_file)
    }

    pub fn meter_poll(&self) -> Duration {
        Duration::from_millis(self.meter_poll_ms)
    }
}

fn non_empty_name(value: &str, flag: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        bail!("{flag} cannot be empty");
    }
    if trimmed.chars().any(char::is_control) {
        bail!("{flag} contains control characters");
    }
    Ok(trimmed.to_string())
}
