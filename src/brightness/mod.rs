//! Daily automatic brightness: bright at sunrise, full at noon, dim at sunset.
//!
//! Each time of day owns one wall-clock timer (`AutoBrightness:<label>`).
//! A firing applies its level when auto mode is on and always re-arms the
//! label for its next occurrence, so the cycle keeps itself going. Times are
//! computed for the device's local date in its configured timezone.

mod level;
mod solar;


pub use level::{
    level_from_percent, parse_brightness, percent_from_level, BrightnessNames, MAX_LEVEL,
};
pub use solar::{solar_times, SolarTimes};

use crate::display::{DisplayStore, KEY_BRIGHTNESS};
use crate::lock_or_recover;
use crate::scheduler::{Deadline, Scheduler};
use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

const TIMER_PREFIX: &str = "AutoBrightness";
/// How far ahead to look for a day that has a given event (polar regions).
const MAX_SEARCH_DAYS: u64 = 366;

/// Where the device is. Coordinates in degrees, east and north positive.
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: Tz,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeOfDay {
    Sunrise,
    Noon,
    Sunset,
}

impl TimeOfDay {
    pub const ALL: [TimeOfDay; 3] = [TimeOfDay::Sunrise, TimeOfDay::Noon, TimeOfDay::Sunset];

    pub fn level(self) -> u8 {
        match self {
            TimeOfDay::Sunrise => 20,
            TimeOfDay::Noon => 30,
            TimeOfDay::Sunset => 5,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TimeOfDay::Sunrise => "Sunrise",
            TimeOfDay::Noon => "Noon",
            TimeOfDay::Sunset => "Sunset",
        }
    }

    pub fn timer_name(self) -> String {
        format!("{TIMER_PREFIX}:{}", self.label())
    }

    fn pick(self, times: &SolarTimes) -> Option<DateTime<Utc>> {
        match self {
            TimeOfDay::Sunrise => times.sunrise,
            TimeOfDay::Noon => Some(times.noon),
            TimeOfDay::Sunset => times.sunset,
        }
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One row of a day's schedule. `at` is `None` when the event does not happen that day.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledLevel {
    pub label: TimeOfDay,
    pub at: Option<DateTime<Utc>>,
    pub level: u8,
}

/// Timer payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FirePayload {
    label: TimeOfDay,
    level: u8,
}

impl Location {
    /// Calendar date at `at` in the device's timezone.
    pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.timezone).date_naive()
    }

    pub fn solar_times_on(&self, date: NaiveDate) -> SolarTimes {
        solar_times(date, self.latitude, self.longitude)
    }

    pub fn schedule_on(&self, date: NaiveDate) -> Vec<ScheduledLevel> {
        let times = self.solar_times_on(date);
        TimeOfDay::ALL
            .iter()
            .map(|&label| ScheduledLevel {
                label,
                at: label.pick(&times),
                level: label.level(),
            })
            .collect()
    }

    /// First occurrence of `label` strictly after `after`.
    pub fn next_occurrence(&self, label: TimeOfDay, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut date = self.local_date(after);
        for _ in 0..=MAX_SEARCH_DAYS {
            if let Some(at) = label.pick(&self.solar_times_on(date)) {
                if at > after {
                    return Some(at);
                }
            }
            date = date.succ_opt()?;
        }
        None
    }

    /// When to arm `label` on start-up: today's time, pushed a day on if it
    /// has already passed. Days without the event fall back to the next one found.
    pub fn first_fire_time(&self, label: TimeOfDay, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match label.pick(&self.solar_times_on(self.local_date(now))) {
            Some(at) if at >= now => Some(at),
            Some(at) => Some(at + chrono::Duration::hours(24)),
            None => self.next_occurrence(label, now),
        }
    }
}

struct BrightnessShared {
    scheduler: Scheduler,
    display: Arc<DisplayStore>,
    auto: AtomicBool,
    location: Mutex<Option<Location>>,
}

/// Keeps the three daily brightness timers armed.
#[derive(Clone)]
pub struct BrightnessScheduler {
    shared: Arc<BrightnessShared>,
}

impl BrightnessScheduler {
    pub fn new(scheduler: Scheduler, display: Arc<DisplayStore>, location: Option<Location>) -> Self {
        Self {
            shared: Arc::new(BrightnessShared {
                scheduler,
                display,
                auto: AtomicBool::new(false),
                location: Mutex::new(location),
            }),
        }
    }

    pub fn is_auto(&self) -> bool {
        self.shared.auto.load(Ordering::SeqCst)
    }

    pub fn location(&self) -> Option<Location> {
        lock_or_recover(&self.shared.location, "BrightnessScheduler::location").clone()
    }

    /// Turn auto mode on and arm every time of day.
    pub fn enable_auto(&self) -> Result<Vec<ScheduledLevel>> {
        if self.location().is_none() {
            bail!("auto brightness needs a location");
        }
        self.shared.auto.store(true, Ordering::SeqCst);
        tracing::info!("auto brightness enabled");
        Ok(self.schedule_all())
    }

    /// Timers stay armed; their firings only reschedule until auto is re-enabled.
    pub fn disable_auto(&self) {
        if self.shared.auto.swap(false, Ordering::SeqCst) {
            tracing::info!("auto brightness disabled");
        }
    }

    /// A user-chosen level. Turns auto mode off.
    pub fn set_manual(&self, level: u8) -> u8 {
        self.disable_auto();
        let level = level.min(MAX_LEVEL);
        self.apply_level(level);
        level
    }

    /// Move the device. Re-syncs any armed timers to the new place and timezone.
    pub fn set_location(&self, location: Location) {
        *lock_or_recover(&self.shared.location, "BrightnessScheduler::set_location") =
            Some(location);
        let armed = TimeOfDay::ALL
            .iter()
            .any(|label| self.shared.scheduler.is_armed(&label.timer_name()));
        if armed || self.is_auto() {
            self.schedule_all();
        }
    }

    /// Arm (or re-arm) every time of day from the current wall clock.
    pub fn schedule_all(&self) -> Vec<ScheduledLevel> {
        let Some(location) = self.location() else {
            tracing::warn!("no location; brightness schedule not armed");
            return Vec::new();
        };
        let now = self.shared.scheduler.clock().wall();
        TimeOfDay::ALL
            .iter()
            .map(|&label| {
                let at = location.first_fire_time(label, now);
                match at {
                    Some(at) => self.arm(label, at),
                    None => {
                        self.shared.scheduler.cancel(&label.timer_name());
                        tracing::warn!(%label, "no upcoming occurrence; not armed");
                    }
                }
                ScheduledLevel {
                    label,
                    at,
                    level: label.level(),
                }
            })
            .collect()
    }

    /// When `label` is next due, if armed.
    pub fn next_fire(&self, label: TimeOfDay) -> Option<DateTime<Utc>> {
        match self.shared.scheduler.deadline(&label.timer_name()) {
            Some(Deadline::Wall(at)) => Some(at),
            _ => None,
        }
    }

    fn arm(&self, label: TimeOfDay, at: DateTime<Utc>) {
        let payload = serde_json::to_value(FirePayload {
            label,
            level: label.level(),
        })
        .ok();
        let weak = Arc::downgrade(&self.shared);
        self.shared
            .scheduler
            .schedule_at(&label.timer_name(), at, payload, move |payload| {
                if let Some(shared) = weak.upgrade() {
                    BrightnessScheduler { shared }.fire(label, payload);
                }
            });
        tracing::debug!(%label, %at, "brightness change armed");
    }

    fn fire(&self, label: TimeOfDay, payload: Option<Value>) {
        let level = payload
            .and_then(|value| serde_json::from_value::<FirePayload>(value).ok())
            .map_or(label.level(), |payload| payload.level);
        if self.is_auto() {
            self.shared.scheduler.cancel(&label.timer_name());
            self.apply_level(level);
            tracing::info!(%label, level, "auto brightness applied");
        } else {
            tracing::debug!(%label, "auto brightness off; rescheduling only");
        }

        let Some(location) = self.location() else {
            return;
        };
        let now = self.shared.scheduler.clock().wall();
        match location.next_occurrence(label, now) {
            Some(at) => self.arm(label, at),
            None => tracing::warn!(%label, "no upcoming occurrence; not re-armed"),
        }
    }

    fn apply_level(&self, level: u8) {
        self.shared.display.set(KEY_BRIGHTNESS, Value::from(level));
    }
}
