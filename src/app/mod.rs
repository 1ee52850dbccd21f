//! Controller wiring: one clock, one timer table, one bus, and the components on top.

pub mod logging;

use crate::arbiter::IdleArbiter;
use crate::brightness::{BrightnessNames, BrightnessScheduler, Location, ScheduledLevel};
use crate::bus::{topics, BusEmitter, LocalBus, Message, SubscriptionSet};
use crate::clock::Clock;
use crate::config::AppConfig;
use crate::display::{DisplayChange, DisplayStore, KEY_SELECTED};
use crate::meter::MicLevelMonitor;
use crate::router::{ActivityRouter, RouterDeps};
use crate::scheduler::{Scheduler, SchedulerWorker};
use crate::settings::SettingsStore;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::fmt::Write as _;
use std::sync::Arc;

pub struct Controller {
    config: AppConfig,
    scheduler: Scheduler,
    bus: LocalBus,
    display: Arc<DisplayStore>,
    arbiter: IdleArbiter,
    brightness: BrightnessScheduler,
    meter: Arc<MicLevelMonitor>,
    router: ActivityRouter,
    subscriptions: SubscriptionSet,
    worker: Option<SchedulerWorker>,
    started: bool,
}

impl Controller {
    pub fn new(
        config: &AppConfig,
        clock: Arc<dyn Clock>,
        settings: Arc<dyn SettingsStore>,
    ) -> Result<Self> {
        let scheduler = Scheduler::new(clock);
        let bus = LocalBus::new();
        let emitter: Arc<dyn BusEmitter> = Arc::new(bus.clone());
        let display = Arc::new(DisplayStore::new());
        let timings = config.idle_timings();

        let arbiter = IdleArbiter::new(
            scheduler.clone(),
            Arc::clone(&emitter),
            Arc::clone(&display),
            settings,
            &timings,
        );
        let brightness = BrightnessScheduler::new(
            scheduler.clone(),
            Arc::clone(&display),
            config.location()?,
        );
        let brightness_names = match &config.brightness_names {
            Some(path) => BrightnessNames::load(path)?,
            None => BrightnessNames::default(),
        };
        let meter = Arc::new(MicLevelMonitor::new(
            config.mic_level_file(),
            Arc::clone(&display),
            config.meter_poll(),
        ));
        let router = ActivityRouter::new(RouterDeps {
            arbiter: arbiter.clone(),
            display: Arc::clone(&display),
            meter: Arc::clone(&meter),
            brightness: brightness.clone(),
            brightness_names,
            scheduler: scheduler.clone(),
            bus: emitter,
            names: config.page_names(),
            timings,
        });

        Ok(Self {
            config: config.clone(),
            scheduler,
            bus,
            display,
            arbiter,
            brightness,
            meter,
            router,
            subscriptions: SubscriptionSet::new(),
            worker: None,
            started: false,
        })
    }

    /// Subscribe handlers, bridge the display to the bus and ask skills for idle screens.
    /// Timers only fire through [`Scheduler::run_due`] until [`Controller::run_timers`].
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        self.started = true;

        let bus = self.bus.clone();
        let origin = self.config.self_origin.clone();
        self.display
            .on_change(move |change| bus.emit(display_message(change, &origin)));

        let arbiter = self.arbiter.clone();
        self.display.set_on_remote_change(move |key, value| {
            if key == KEY_SELECTED {
                if let Some(name) = value.as_str() {
                    arbiter.set_selected_from_remote(name);
                }
            }
        });

        let selected = self.arbiter.load_selection(&self.config.default_idle_screen);
        tracing::info!(%selected, "idle screen loaded");

        let routed = self.router.attach(&self.bus);
        self.subscriptions.extend(routed);

        self.router.collect_idle_screens();
        if self.config.auto_brightness {
            self.brightness
                .enable_auto()
                .context("enable auto brightness")?;
        }
        crate::log_debug("controller started");
        Ok(())
    }

    /// Fire timers from a background thread from now on.
    pub fn run_timers(&mut self) {
        if self.worker.is_none() {
            self.worker = Some(self.scheduler.start_worker());
        }
    }

    pub fn shutdown(&mut self) {
        if !self.started {
            return;
        }
        self.started = false;
        self.subscriptions.release();
        self.meter.stop();
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
        }
        crate::log_debug("controller stopped");
    }

    pub fn bus(&self) -> &LocalBus {
        &self.bus
    }

    pub fn display(&self) -> &Arc<DisplayStore> {
        &self.display
    }

    pub fn arbiter(&self) -> &IdleArbiter {
        &self.arbiter
    }

    pub fn brightness(&self) -> &BrightnessScheduler {
        &self.brightness
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn router(&self) -> &ActivityRouter {
        &self.router
    }

    pub fn is_started(&self) -> bool {
        self.started
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Outbound message that tells the external GUI about a local display change.
fn display_message(change: &DisplayChange, origin: &str) -> Message {
    match change {
        DisplayChange::Page { name } => Message::with_data(
            topics::PAGE_SHOW,
            json!({"page": [name], "__from": origin}),
        ),
        DisplayChange::Value { key, value } => {
            let mut data = Map::new();
            data.insert("__from".to_string(), Value::from(origin));
            data.insert(key.clone(), value.clone());
            Message::with_data(topics::VALUE_SET, Value::Object(data))
        }
    }
}

/// Today's brightness schedule as printable lines, in the device's timezone.
pub fn schedule_report(location: &Location, now: DateTime<Utc>) -> String {
    let date = location.local_date(now);
    let mut out = format!(
        "Brightness schedule for {date} ({}, {:.4}, {:.4})\n",
        location.timezone, location.latitude, location.longitude
    );
    for ScheduledLevel { label, at, level } in location.schedule_on(date) {
        let when = at.map_or_else(
            || "does not occur".to_string(),
            |at| {
                at.with_timezone(&location.timezone)
                    .format("%H:%M %Z")
                    .to_string()
            },
        );
        let _ = writeln!(out, "{:<8} {when:<16} level {level}", label.label());
    }
    out
}
