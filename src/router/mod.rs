//! Turns assistant activity on the bus into display states and idle timers.
//!
//! Every handler returns `anyhow::Result` and is isolated by the bus: a bad
//! payload is logged there and never stops other subscribers.


use crate::arbiter::IdleArbiter;
use crate::brightness::{parse_brightness, BrightnessNames, BrightnessScheduler};
use crate::bus::{
    topics, BrightnessAuto, BrightnessSet, BusEmitter, HandlerStart, IdleDirective,
    IdleRegistration, LocalBus, Message, PageShow, SelectIdle, SubscriptionSet, UnregisterIdle,
    VisemeList,
};
use crate::config::{IdleTimings, PageNames};
use crate::display::{empty_viseme, DisplayStore, FaceState, KEY_VISEME};
use crate::meter::MicLevelMonitor;
use crate::scheduler::Scheduler;
use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Timer that shows idle once skills had a chance to register their screens.
pub const COLLECT_IDLE_TIMER: &str = "CollectIdle";

/// Handler names whose start does not mean a skill took over the screen:
/// this controller itself and the clock's background refresh.
const QUIET_HANDLERS: [&str; 2] = ["MycroftGUI", "TimeSkill.update_display"];

/// Longest idle timeout a skill page may ask for; larger requests are clamped.
pub const MAX_PAGE_IDLE: Duration = Duration::from_secs(24 * 60 * 60);

/// Everything the router drives.
pub struct RouterDeps {
    pub arbiter: IdleArbiter,
    pub display: Arc<DisplayStore>,
    pub meter: Arc<MicLevelMonitor>,
    pub brightness: BrightnessScheduler,
    pub brightness_names: BrightnessNames,
    pub scheduler: Scheduler,
    pub bus: Arc<dyn BusEmitter>,
    pub names: PageNames,
    pub timings: IdleTimings,
}

struct RouterInner {
    deps: RouterDeps,
    /// Set once a skill shows its own page during an interaction.
    has_shown_page: AtomicBool,
}

#[derive(Clone)]
pub struct ActivityRouter {
    inner: Arc<RouterInner>,
}

type RouteFn = fn(&ActivityRouter, &Message) -> Result<()>;

const ROUTES: &[(&str, RouteFn)] = &[
    (topics::LISTENER_STARTED, ActivityRouter::on_listener_started),
    (topics::LISTENER_ENDED, ActivityRouter::on_listener_ended),
    (topics::RECOGNITION_FAILED, ActivityRouter::on_recognition_failed),
    (topics::VISEME_LIST, ActivityRouter::on_viseme_list),
    (topics::MOUTH_RESET, ActivityRouter::on_mouth_reset),
    (topics::AUDIO_OUTPUT_END, ActivityRouter::on_mouth_reset),
    (topics::INTERNET_CONNECTED, ActivityRouter::on_mouth_reset),
    (topics::PAGE_SHOW, ActivityRouter::on_page_show),
    (topics::PAGE_INTERACTION, ActivityRouter::on_page_interaction),
    (topics::SLEEP, ActivityRouter::on_sleep),
    (topics::AWOKEN, ActivityRouter::on_awoken),
    (topics::STOP, ActivityRouter::on_stop),
    (topics::HANDLER_START, ActivityRouter::on_handler_start),
    (topics::SKILLS_INITIALIZED, ActivityRouter::on_skills_initialized),
    (topics::REGISTER_IDLE, ActivityRouter::on_register_idle),
    (topics::UNREGISTER_IDLE, ActivityRouter::on_unregister_idle),
    (topics::RESET_IDLE, ActivityRouter::on_reset_idle),
    (topics::FORCE_HOMESCREEN, ActivityRouter::on_force_homescreen),
    (topics::SELECT_IDLE, ActivityRouter::on_select_idle),
    (topics::VALUE_CHANGED, ActivityRouter::on_value_changed),
    (topics::BRIGHTNESS_SET, ActivityRouter::on_brightness_set),
    (topics::BRIGHTNESS_AUTO, ActivityRouter::on_brightness_auto),
];

impl ActivityRouter {
    pub fn new(deps: RouterDeps) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                deps,
                has_shown_page: AtomicBool::new(false),
            }),
        }
    }

    /// Subscribe every handler. Dropping or releasing the set unsubscribes them all.
    pub fn attach(&self, bus: &LocalBus) -> SubscriptionSet {
        let mut subscriptions = SubscriptionSet::new();
        for &(topic, route) in ROUTES {
            let router = self.clone();
            subscriptions.push(bus.on(topic, move |message| route(&router, message)));
        }
        tracing::debug!(count = subscriptions.len(), "activity handlers attached");
        subscriptions
    }

    pub fn has_shown_page(&self) -> bool {
        self.inner.has_shown_page.load(Ordering::SeqCst)
    }

    fn deps(&self) -> &RouterDeps {
        &self.inner.deps
    }

    fn set_shown_page(&self, shown: bool) {
        self.inner.has_shown_page.store(shown, Ordering::SeqCst);
    }

    fn show_face(&self, state: FaceState) {
        let deps = self.deps();
        deps.display.set_state(state);
        deps.display.show_page(&deps.names.default_page);
    }

    fn reset_viseme(&self) {
        self.deps().display.set(KEY_VISEME, empty_viseme());
    }

    /// Ask skills for their idle screens, then show idle once they had time to answer.
    pub fn collect_idle_screens(&self) {
        let deps = self.deps();
        deps.bus.emit(Message::new(topics::COLLECT_IDLE));
        let arbiter = deps.arbiter.clone();
        deps.scheduler
            .schedule_in(COLLECT_IDLE_TIMER, deps.timings.collect_delay, None, move |_| {
                arbiter.show();
            });
    }

    // ------------------------------------------------------------------
    // Listening / thinking / speaking
    // ------------------------------------------------------------------

    fn on_listener_started(&self, _message: &Message) -> Result<()> {
        let deps = self.deps();
        deps.arbiter.cancel_idle_event();
        deps.arbiter.start_idle_event(deps.timings.default_idle, true);
        deps.meter.halve_peak();
        deps.meter.start();
        self.show_face(FaceState::Listening);
        Ok(())
    }

    fn on_listener_ended(&self, _message: &Message) -> Result<()> {
        self.set_shown_page(false);
        self.show_face(FaceState::Thinking);
        self.deps().meter.stop();
        Ok(())
    }

    fn on_recognition_failed(&self, _message: &Message) -> Result<()> {
        self.deps().arbiter.show();
        Ok(())
    }

    fn on_viseme_list(&self, message: &Message) -> Result<()> {
        let visemes: VisemeList = message.payload()?;
        let deps = self.deps();
        deps.display.set(KEY_VISEME, Value::Object(message.data.clone()));
        if self.has_shown_page() {
            return Ok(());
        }
        self.show_face(FaceState::Speaking);
        let speech_end = visemes.last_end().unwrap_or(0.0).max(0.0);
        let offset = Duration::try_from_secs_f64(speech_end)
            .context("viseme end time out of range")?
            .saturating_add(deps.timings.viseme_tail);
        deps.arbiter.start_idle_event(offset, false);
        Ok(())
    }

    fn on_mouth_reset(&self, _message: &Message) -> Result<()> {
        self.reset_viseme();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Skill pages
    // ------------------------------------------------------------------

    fn on_page_show(&self, message: &Message) -> Result<()> {
        let show: PageShow = message.payload()?;
        let deps = self.deps();
        if show.from.contains(deps.names.self_origin.as_str()) {
            return Ok(());
        }
        self.set_shown_page(true);

        match show.idle {
            Some(IdleDirective::Flag(true)) => {
                tracing::info!(from = %show.from, "skill page holds the screen");
                deps.arbiter.set_override(message.clone());
                deps.arbiter.cancel_idle_event();
            }
            Some(IdleDirective::Seconds(secs)) => {
                tracing::info!(from = %show.from, secs, "skill page sets idle timeout");
                let timeout = Duration::from_secs(secs).min(MAX_PAGE_IDLE);
                deps.arbiter.clear_override();
                deps.arbiter.start_idle_event(timeout, false);
            }
            _ => {
                let is_idle_page = show
                    .page
                    .first()
                    .map_or(true, |page| page.ends_with(&deps.names.idle_page_suffix));
                if is_idle_page {
                    return Ok(());
                }
                if deps.arbiter.override_matches(message) {
                    tracing::info!(from = %show.from, "skill released its idle override");
                    deps.arbiter.clear_override();
                }
                deps.arbiter.start_idle_event(deps.timings.page_idle, false);
            }
        }
        Ok(())
    }

    fn on_page_interaction(&self, _message: &Message) -> Result<()> {
        let deps = self.deps();
        deps.arbiter.start_idle_event(deps.timings.page_idle, false);
        Ok(())
    }

    fn on_handler_start(&self, message: &Message) -> Result<()> {
        let start: HandlerStart = message.payload()?;
        if QUIET_HANDLERS.iter().any(|quiet| start.handler.contains(quiet)) {
            return Ok(());
        }
        self.set_shown_page(false);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sleep, stop, idle requests
    // ------------------------------------------------------------------

    fn on_sleep(&self, _message: &Message) -> Result<()> {
        self.show_face(FaceState::Resting);
        Ok(())
    }

    fn on_awoken(&self, _message: &Message) -> Result<()> {
        self.show_face(FaceState::Awake);
        Ok(())
    }

    fn on_stop(&self, _message: &Message) -> Result<()> {
        self.deps().arbiter.stop_grace();
        self.reset_viseme();
        Ok(())
    }

    fn on_reset_idle(&self, _message: &Message) -> Result<()> {
        self.deps().arbiter.restore();
        Ok(())
    }

    fn on_force_homescreen(&self, _message: &Message) -> Result<()> {
        self.deps().arbiter.cancel_override();
        Ok(())
    }

    fn on_skills_initialized(&self, _message: &Message) -> Result<()> {
        self.collect_idle_screens();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Idle screen registry and selection
    // ------------------------------------------------------------------

    fn on_register_idle(&self, message: &Message) -> Result<()> {
        let registration: IdleRegistration = message.payload().unwrap_or_default();
        self.deps().arbiter.register(
            registration.name.as_deref().unwrap_or_default(),
            registration.id.as_deref().unwrap_or_default(),
        );
        Ok(())
    }

    fn on_unregister_idle(&self, message: &Message) -> Result<()> {
        let unregister: UnregisterIdle = message.payload()?;
        self.deps().arbiter.unregister_skill(&unregister.id);
        Ok(())
    }

    fn on_select_idle(&self, message: &Message) -> Result<()> {
        let select: SelectIdle = message.payload()?;
        self.deps().arbiter.select_idle_screen(&select.selected);
        Ok(())
    }

    /// Values edited on the screen itself, as `{key: value}` pairs.
    fn on_value_changed(&self, message: &Message) -> Result<()> {
        let display = &self.deps().display;
        for (key, value) in &message.data {
            if key.starts_with("__") {
                continue;
            }
            display.apply_remote(key, value.clone());
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Brightness
    // ------------------------------------------------------------------

    fn on_brightness_set(&self, message: &Message) -> Result<()> {
        let request: BrightnessSet = message.payload()?;
        let deps = self.deps();
        let level = request
            .as_text()
            .and_then(|text| parse_brightness(&text, &deps.brightness_names));
        match level {
            Some(level) => {
                let level = deps.brightness.set_manual(level);
                tracing::info!(level, "manual brightness");
            }
            None => {
                tracing::info!(value = %request.value, "brightness not understood");
                deps.bus.emit(Message::with_data(
                    topics::BRIGHTNESS_NOT_UNDERSTOOD,
                    json!({"value": request.value}),
                ));
            }
        }
        Ok(())
    }

    fn on_brightness_auto(&self, message: &Message) -> Result<()> {
        let request: BrightnessAuto = message.payload()?;
        let brightness = &self.deps().brightness;
        if request.enabled {
            brightness.enable_auto()?;
        } else {
            brightness.disable_auto();
        }
        Ok(())
    }
}
