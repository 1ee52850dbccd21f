//! Idle/override arbitration and the idle timer.
//!
//! Decides what the screen falls back to when no activity owns it: the
//! selected idle screen, or a skill page that asked to stay up ("override").
//! Registrations, the override, the selection and the idle timer floor are one
//! unit of state behind one lock; `show()` reads all of them together.
//!
//! Nothing is emitted on the bus while the lock is held. Bus handlers run
//! synchronously and routinely call back into the arbiter.

#[cfg(test)]
mod tests;

use crate::bus::{idle_activation_topic, BusEmitter, Message};
use crate::config::IdleTimings;
use crate::display::{DisplayStore, KEY_SELECTED};
use crate::lock_or_recover;
use crate::scheduler::{Deadline, Scheduler};
use crate::settings::SettingsStore;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Name of the single pending "return to idle" timer.
pub const IDLE_CHECK_TIMER: &str = "IdleCheck";

/// What a call to [`IdleArbiter::show`] put on the bus.
#[derive(Debug, Clone, PartialEq)]
pub enum ShowOutcome {
    /// The override's original page request was re-emitted.
    Override { origin: Option<String> },
    /// The selected idle screen was activated.
    Idle { id: String },
    /// A screen is selected but nobody registered it.
    Unregistered { selected: String },
    Nothing,
}

#[derive(Debug, Clone)]
struct OverrideState {
    origin: Message,
    set_at: Duration,
}

#[derive(Debug, Default)]
struct ArbiterState {
    registrations: HashMap<String, String>,
    override_idle: Option<OverrideState>,
    selected: Option<String>,
    /// Earliest time a newly requested idle check may land. `None` means no floor.
    next_fire_not_before: Option<Duration>,
}

struct ArbiterShared {
    state: Mutex<ArbiterState>,
    scheduler: Scheduler,
    bus: Arc<dyn BusEmitter>,
    display: Arc<DisplayStore>,
    settings: Arc<dyn SettingsStore>,
    reset_grace: Duration,
    stop_grace: Duration,
}

#[derive(Clone)]
pub struct IdleArbiter {
    shared: Arc<ArbiterShared>,
}

impl IdleArbiter {
    pub fn new(
        scheduler: Scheduler,
        bus: Arc<dyn BusEmitter>,
        display: Arc<DisplayStore>,
        settings: Arc<dyn SettingsStore>,
        timings: &IdleTimings,
    ) -> Self {
        Self {
            shared: Arc::new(ArbiterShared {
                state: Mutex::new(ArbiterState::default()),
                scheduler,
                bus,
                display,
                settings,
                reset_grace: timings.reset_grace,
                stop_grace: timings.stop_grace,
            }),
        }
    }

    fn now(&self) -> Duration {
        self.shared.scheduler.clock().monotonic()
    }

    fn lock(&self, context: &str) -> std::sync::MutexGuard<'_, ArbiterState> {
        lock_or_recover(&self.shared.state, context)
    }

    // ------------------------------------------------------------------
    // Registrations and selection
    // ------------------------------------------------------------------

    /// Load the saved selection, falling back to `default_name`.
    pub fn load_selection(&self, default_name: &str) -> String {
        let selected = match self.shared.settings.load_selected() {
            Ok(Some(name)) if !name.trim().is_empty() => name,
            Ok(_) => default_name.to_string(),
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "could not read saved idle screen");
                default_name.to_string()
            }
        };
        self.lock("IdleArbiter::load_selection").selected = Some(selected.clone());
        self.shared
            .display
            .set(KEY_SELECTED, Value::from(selected.as_str()));
        selected
    }

    /// Offer an idle screen. Empty fields are logged and dropped.
    pub fn register(&self, name: &str, id: &str) -> bool {
        if name.is_empty() || id.is_empty() {
            tracing::error!(name, id, "malformed idle screen registration");
            return false;
        }
        let previous = self
            .lock("IdleArbiter::register")
            .registrations
            .insert(name.to_string(), id.to_string());
        tracing::info!(name, id, replaced = previous.is_some(), "registered idle screen");
        true
    }

    /// Forget every idle screen offered by skill `id`. Returns how many were dropped.
    pub fn unregister_skill(&self, id: &str) -> usize {
        let mut state = self.lock("IdleArbiter::unregister_skill");
        let before = state.registrations.len();
        state.registrations.retain(|_, registered| registered != id);
        let removed = before - state.registrations.len();
        if removed > 0 {
            tracing::info!(id, removed, "pruned idle screens");
        }
        removed
    }

    /// Choose the idle screen, mirror it to the display and persist it.
    pub fn select_idle_screen(&self, name: &str) {
        self.lock("IdleArbiter::select_idle_screen").selected = Some(name.to_string());
        self.shared.display.set(KEY_SELECTED, Value::from(name));
        self.persist_selected(name);
    }

    /// Record a selection the display layer already shows.
    pub fn set_selected_from_remote(&self, name: &str) {
        self.lock("IdleArbiter::set_selected_from_remote").selected = Some(name.to_string());
        self.persist_selected(name);
    }

    fn persist_selected(&self, name: &str) {
        if let Err(err) = self.shared.settings.save_selected(name) {
            tracing::warn!(name, error = %format!("{err:#}"), "could not save idle screen");
        }
    }

    // ------------------------------------------------------------------
    // Showing
    // ------------------------------------------------------------------

    /// Put the fallback screen up: the override page if one is active, else
    /// the selected idle screen. Safe to call any number of times.
    pub fn show(&self) -> ShowOutcome {
        let (outcome, message) = {
            let state = self.lock("IdleArbiter::show");
            if let Some(active) = &state.override_idle {
                (
                    ShowOutcome::Override {
                        origin: active.origin.origin().map(str::to_string),
                    },
                    Some(active.origin.clone()),
                )
            } else {
                match (&state.selected, state.registrations.is_empty()) {
                    (Some(selected), false) => match state.registrations.get(selected) {
                        Some(id) => (
                            ShowOutcome::Idle { id: id.clone() },
                            Some(Message::new(idle_activation_topic(id))),
                        ),
                        None => (
                            ShowOutcome::Unregistered {
                                selected: selected.clone(),
                            },
                            None,
                        ),
                    },
                    _ => (ShowOutcome::Nothing, None),
                }
            }
        };
        tracing::debug!(?outcome, "show idle");
        if let Some(message) = message {
            self.shared.bus.emit(message);
        }
        outcome
    }

    // ------------------------------------------------------------------
    // Override
    // ------------------------------------------------------------------

    /// Keep `origin`'s page up instead of idle. Re-installing refreshes its age.
    pub fn set_override(&self, origin: Message) {
        let set_at = self.now();
        tracing::info!(from = origin.origin().unwrap_or("?"), "idle overridden");
        self.lock("IdleArbiter::set_override").override_idle =
            Some(OverrideState { origin, set_at });
    }

    /// Drop the override without showing anything. Returns whether one was active.
    pub fn clear_override(&self) -> bool {
        self.lock("IdleArbiter::clear_override")
            .override_idle
            .take()
            .is_some()
    }

    /// Drop the override and show idle right away.
    pub fn cancel_override(&self) -> ShowOutcome {
        self.clear_override();
        self.show()
    }

    /// Release the override if it has sat longer than the reset grace period.
    /// Returns the show outcome when it was released.
    pub fn restore(&self) -> Option<ShowOutcome> {
        let now = self.now();
        {
            let mut state = self.lock("IdleArbiter::restore");
            let stale = state
                .override_idle
                .as_ref()
                .is_some_and(|active| now.saturating_sub(active.set_at) > self.shared.reset_grace);
            if !stale {
                return None;
            }
            state.override_idle = None;
        }
        tracing::info!("stale idle override released");
        Some(self.show())
    }

    /// Stop request: show idle unless a young override is still up.
    pub fn stop_grace(&self) -> Option<ShowOutcome> {
        let now = self.now();
        {
            let mut state = self.lock("IdleArbiter::stop_grace");
            if let Some(active) = &state.override_idle {
                if now <= active.set_at + self.shared.stop_grace {
                    return None;
                }
                state.override_idle = None;
            }
        }
        Some(self.show())
    }

    pub fn override_active(&self) -> bool {
        self.lock("IdleArbiter::override_active")
            .override_idle
            .is_some()
    }

    pub fn override_origin(&self) -> Option<Message> {
        self.lock("IdleArbiter::override_origin")
            .override_idle
            .as_ref()
            .map(|active| active.origin.clone())
    }

    /// True when an override is active and was installed by the same skill as `message`.
    pub fn override_matches(&self, message: &Message) -> bool {
        self.lock("IdleArbiter::override_matches")
            .override_idle
            .as_ref()
            .is_some_and(|active| active.origin.same_origin(message))
    }

    // ------------------------------------------------------------------
    // Idle timer
    // ------------------------------------------------------------------

    pub fn cancel_idle_event(&self) {
        let mut state = self.lock("IdleArbiter::cancel_idle_event");
        state.next_fire_not_before = None;
        self.shared.scheduler.cancel(IDLE_CHECK_TIMER);
    }

    /// Arm the idle check `offset` from now.
    ///
    /// Abandoned when an earlier non-weak request already committed to a later
    /// time. A `weak` request re-arms the timer without raising that floor.
    /// Returns whether the timer was (re)armed.
    pub fn start_idle_event(&self, offset: Duration, weak: bool) -> bool {
        let mut state = self.lock("IdleArbiter::start_idle_event");
        let Some(target) = self.now().checked_add(offset) else {
            tracing::warn!(?offset, "idle offset out of range; request dropped");
            return false;
        };
        if let Some(floor) = state.next_fire_not_before {
            if target < floor {
                tracing::debug!(?offset, ?floor, "idle check already scheduled later");
                return false;
            }
        }
        if !weak {
            state.next_fire_not_before = Some(target);
        }

        let scheduler = &self.shared.scheduler;
        scheduler.cancel(IDLE_CHECK_TIMER);
        let arbiter = Arc::downgrade(&self.shared);
        scheduler.schedule_in(IDLE_CHECK_TIMER, offset, None, move |_| {
            if let Some(shared) = arbiter.upgrade() {
                IdleArbiter { shared }.show();
            }
        });
        tracing::info!(?offset, weak, "idle screen scheduled");
        true
    }

    /// Monotonic time at which the armed idle check fires.
    pub fn idle_deadline(&self) -> Option<Duration> {
        match self.shared.scheduler.deadline(IDLE_CHECK_TIMER) {
            Some(Deadline::Monotonic(at)) => Some(at),
            _ => None,
        }
    }

    pub fn idle_floor(&self) -> Option<Duration> {
        self.lock("IdleArbiter::idle_floor").next_fire_not_before
    }

    // ------------------------------------------------------------------
    // Read-only views
    // ------------------------------------------------------------------

    pub fn selected(&self) -> Option<String> {
        self.lock("IdleArbiter::selected").selected.clone()
    }

    pub fn registration(&self, name: &str) -> Option<String> {
        self.lock("IdleArbiter::registration")
            .registrations
            .get(name)
            .cloned()
    }

    pub fn registration_count(&self) -> usize {
        self.lock("IdleArbiter::registration_count")
            .registrations
            .len()
    }
}
