use super::*;
use crate::bus::{topics, LocalBus, Subscription};
use crate::clock::ManualClock;
use crate::settings::MemorySettings;
use chrono::{TimeZone, Utc};
use serde_json::json;

struct Harness {
    clock: Arc<ManualClock>,
    scheduler: Scheduler,
    bus: LocalBus,
    display: Arc<DisplayStore>,
    settings: Arc<MemorySettings>,
    arbiter: IdleArbiter,
    emitted: Arc<Mutex<Vec<Message>>>,
    _tap: Subscription,
}

fn harness() -> Harness {
    harness_with(IdleTimings::default())
}

fn harness_with(timings: IdleTimings) -> Harness {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 5, 4, 9, 30, 0).unwrap(),
    ));
    let scheduler = Scheduler::new(clock.clone());
    let bus = LocalBus::new();
    let display = Arc::new(DisplayStore::new());
    let settings = Arc::new(MemorySettings::default());
    let arbiter = IdleArbiter::new(
        scheduler.clone(),
        Arc::new(bus.clone()),
        Arc::clone(&display),
        settings.clone(),
        &timings,
    );
    let emitted = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&emitted);
    let tap = bus.tap(move |message| {
        sink.lock().unwrap().push(message.clone());
        Ok(())
    });
    Harness {
        clock,
        scheduler,
        bus,
        display,
        settings,
        arbiter,
        emitted,
        _tap: tap,
    }
}

impl Harness {
    fn topics(&self) -> Vec<String> {
        self.emitted
            .lock()
            .unwrap()
            .iter()
            .map(|message| message.msg_type.clone())
            .collect()
    }

    fn clear(&self) {
        self.emitted.lock().unwrap().clear();
    }

    fn advance(&self, by: Duration) {
        self.clock.advance(by);
        self.scheduler.run_due();
    }

    fn weather(&self) {
        self.arbiter.register("Weather", "weather-skill");
        self.arbiter.select_idle_screen("Weather");
    }
}

fn page(from: &str) -> Message {
    Message::with_data(
        topics::PAGE_SHOW,
        json!({"page": ["timer.qml"], "__from": from, "__idle": true}),
    )
}

fn secs(value: f64) -> Duration {
    Duration::from_secs_f64(value)
}

// -------------------------------------------------------------------------
// Registration and selection
// -------------------------------------------------------------------------

#[test]
fn registered_selection_shows_idle_activation() {
    let h = harness();
    h.weather();
    assert_eq!(
        h.arbiter.show(),
        ShowOutcome::Idle {
            id: "weather-skill".to_string()
        }
    );
    assert_eq!(h.topics(), vec!["weather-skill.idle".to_string()]);
}

#[test]
fn unregistered_selection_shows_nothing() {
    let h = harness();
    h.arbiter.register("Weather", "weather-skill");
    h.arbiter.select_idle_screen("Time and Date");
    assert_eq!(
        h.arbiter.show(),
        ShowOutcome::Unregistered {
            selected: "Time and Date".to_string()
        }
    );
    assert!(h.topics().is_empty());
}

#[test]
fn no_registrations_is_a_noop() {
    let h = harness();
    h.arbiter.select_idle_screen("Weather");
    assert_eq!(h.arbiter.show(), ShowOutcome::Nothing);
    assert!(h.topics().is_empty());
}

#[test]
fn malformed_registration_is_dropped() {
    let h = harness();
    assert!(!h.arbiter.register("", "weather-skill"));
    assert!(!h.arbiter.register("Weather", ""));
    assert_eq!(h.arbiter.registration_count(), 0);
}

#[test]
fn last_registration_for_a_name_wins() {
    let h = harness();
    h.arbiter.register("Clock", "old-clock");
    h.arbiter.register("Clock", "new-clock");
    assert_eq!(h.arbiter.registration("Clock").as_deref(), Some("new-clock"));
    assert_eq!(h.arbiter.registration_count(), 1);
}

#[test]
fn unregister_prunes_every_screen_of_a_skill() {
    let h = harness();
    h.arbiter.register("Clock", "clock-skill");
    h.arbiter.register("Analog Clock", "clock-skill");
    h.arbiter.register("Weather", "weather-skill");
    assert_eq!(h.arbiter.unregister_skill("clock-skill"), 2);
    assert_eq!(h.arbiter.registration_count(), 1);
    assert_eq!(h.arbiter.unregister_skill("clock-skill"), 0);
}

#[test]
fn selection_is_mirrored_and_persisted() {
    let h = harness();
    h.arbiter.select_idle_screen("Weather");
    assert_eq!(h.display.get(KEY_SELECTED), Some(json!("Weather")));
    assert_eq!(h.settings.load_selected().unwrap().as_deref(), Some("Weather"));
    assert_eq!(h.arbiter.selected().as_deref(), Some("Weather"));
}

#[test]
fn load_selection_prefers_saved_choice() {
    let h = harness();
    assert_eq!(h.arbiter.load_selection("Time and Date"), "Time and Date");
    h.settings.save_selected("Weather").unwrap();
    assert_eq!(h.arbiter.load_selection("Time and Date"), "Weather");
    assert_eq!(h.display.get(KEY_SELECTED), Some(json!("Weather")));
}

// -------------------------------------------------------------------------
// Override
// -------------------------------------------------------------------------

#[test]
fn override_takes_precedence_over_idle() {
    let h = harness();
    h.weather();
    let timer_page = page("timer-skill");
    h.arbiter.set_override(timer_page.clone());

    for _ in 0..3 {
        assert_eq!(
            h.arbiter.show(),
            ShowOutcome::Override {
                origin: Some("timer-skill".to_string())
            }
        );
    }
    let emitted = h.emitted.lock().unwrap().clone();
    assert_eq!(emitted, vec![timer_page.clone(), timer_page.clone(), timer_page]);
    assert!(h.arbiter.override_active());
}

#[test]
fn restore_respects_reset_grace() {
    let h = harness();
    h.weather();
    h.arbiter.set_override(page("timer-skill"));

    h.clock.advance(secs(1.9));
    assert_eq!(h.arbiter.restore(), None);
    assert!(h.arbiter.override_active());

    h.clock.advance(secs(0.2));
    assert_eq!(
        h.arbiter.restore(),
        Some(ShowOutcome::Idle {
            id: "weather-skill".to_string()
        })
    );
    assert!(!h.arbiter.override_active());
}

#[test]
fn restore_without_override_does_nothing() {
    let h = harness();
    h.weather();
    assert_eq!(h.arbiter.restore(), None);
    assert!(h.topics().is_empty());
}

#[test]
fn transient_override_then_expiry() {
    let h = harness();
    h.weather();
    let message = page("timer-skill");
    h.arbiter.set_override(message.clone());

    h.clock.advance(secs(0.1));
    h.arbiter.show();
    assert_eq!(h.emitted.lock().unwrap().last(), Some(&message));

    h.clock.advance(secs(2.9));
    h.arbiter.restore();
    assert_eq!(
        h.topics().last().map(String::as_str),
        Some("weather-skill.idle")
    );
    assert!(!h.arbiter.override_active());
}

#[test]
fn reinstalling_override_refreshes_its_age() {
    let h = harness();
    let message = page("timer-skill");
    h.arbiter.set_override(message.clone());
    h.clock.advance(secs(1.5));
    h.arbiter.set_override(message);
    h.clock.advance(secs(1.5));
    assert_eq!(h.arbiter.restore(), None);
}

#[test]
fn stop_grace_uses_its_own_window() {
    let h = harness();
    h.weather();
    h.arbiter.set_override(page("timer-skill"));

    h.clock.advance(secs(3.0));
    assert_eq!(h.arbiter.stop_grace(), None);
    assert!(h.arbiter.override_active());

    h.clock.advance(secs(4.5));
    assert!(matches!(h.arbiter.stop_grace(), Some(ShowOutcome::Idle { .. })));
    assert!(!h.arbiter.override_active());
}

#[test]
fn stop_without_override_shows_idle() {
    let h = harness();
    h.weather();
    assert!(matches!(h.arbiter.stop_grace(), Some(ShowOutcome::Idle { .. })));
}

#[test]
fn grace_windows_are_configurable() {
    let timings = IdleTimings {
        reset_grace: Duration::from_millis(100),
        ..IdleTimings::default()
    };
    let h = harness_with(timings);
    h.weather();
    h.arbiter.set_override(page("timer-skill"));
    h.clock.advance(Duration::from_millis(150));
    assert!(h.arbiter.restore().is_some());
}

#[test]
fn cancel_override_shows_idle_immediately() {
    let h = harness();
    h.weather();
    h.arbiter.set_override(page("timer-skill"));
    assert_eq!(
        h.arbiter.cancel_override(),
        ShowOutcome::Idle {
            id: "weather-skill".to_string()
        }
    );
    assert!(!h.arbiter.override_active());
}

#[test]
fn override_matches_by_origin() {
    let h = harness();
    h.arbiter.set_override(page("timer-skill"));
    assert!(h.arbiter.override_matches(&page("timer-skill")));
    assert!(!h.arbiter.override_matches(&page("weather-skill")));
    assert!(h.arbiter.clear_override());
    assert!(!h.arbiter.override_matches(&page("timer-skill")));
}

#[test]
fn emitted_override_may_reenter_arbiter() {
    let h = harness();
    let arbiter = h.arbiter.clone();
    let _handler = h.bus.on(topics::PAGE_SHOW, move |message| {
        arbiter.set_override(message.clone());
        arbiter.cancel_idle_event();
        Ok(())
    });
    h.arbiter.set_override(page("timer-skill"));
    h.arbiter.show();
    assert!(h.arbiter.override_active());
}

// -------------------------------------------------------------------------
// Idle timer
// -------------------------------------------------------------------------

#[test]
fn later_deadline_is_not_shortened() {
    let h = harness();
    assert!(h.arbiter.start_idle_event(Duration::from_secs(60), false));
    assert!(!h.arbiter.start_idle_event(Duration::from_secs(5), false));
    assert_eq!(h.arbiter.idle_deadline(), Some(Duration::from_secs(60)));
}

#[test]
fn longer_request_extends_deadline() {
    let h = harness();
    h.arbiter.start_idle_event(Duration::from_secs(5), false);
    h.arbiter.start_idle_event(Duration::from_secs(60), false);
    assert_eq!(h.arbiter.idle_deadline(), Some(Duration::from_secs(60)));
}

#[test]
fn weak_request_does_not_raise_floor() {
    let h = harness();
    h.arbiter.start_idle_event(Duration::from_secs(60), true);
    assert_eq!(h.arbiter.idle_floor(), None);
    assert!(h.arbiter.start_idle_event(Duration::from_secs(5), false));
    assert_eq!(h.arbiter.idle_deadline(), Some(Duration::from_secs(5)));
}

#[test]
fn cancel_clears_floor_and_timer() {
    let h = harness();
    h.arbiter.start_idle_event(Duration::from_secs(60), false);
    h.arbiter.cancel_idle_event();
    assert_eq!(h.arbiter.idle_floor(), None);
    assert_eq!(h.arbiter.idle_deadline(), None);
    assert!(h.arbiter.start_idle_event(Duration::from_secs(5), false));
}

#[test]
fn out_of_range_offset_keeps_current_timer() {
    let h = harness();
    h.arbiter.start_idle_event(Duration::from_secs(30), false);
    assert!(!h.arbiter.start_idle_event(Duration::MAX, false));
    assert!(!h.arbiter.start_idle_event(Duration::MAX, true));
    assert_eq!(h.arbiter.idle_deadline(), Some(Duration::from_secs(30)));
    assert_eq!(h.arbiter.idle_floor(), Some(Duration::from_secs(30)));
}

#[test]
fn at_most_one_idle_timer() {
    let h = harness();
    let offsets = [30u64, 5, 60, 0, 15, 90, 2];
    for (step, offset) in offsets.iter().enumerate() {
        match step % 3 {
            0 => {
                h.arbiter.start_idle_event(Duration::from_secs(*offset), false);
            }
            1 => {
                h.arbiter.start_idle_event(Duration::from_secs(*offset), true);
            }
            _ => h.arbiter.cancel_idle_event(),
        }
        let armed = h
            .scheduler
            .armed_names()
            .iter()
            .filter(|name| name.as_str() == IDLE_CHECK_TIMER)
            .count();
        assert!(armed <= 1);
        h.clock.advance(Duration::from_secs(1));
    }
}

#[test]
fn idle_timer_fires_show_once() {
    let h = harness();
    h.weather();
    h.arbiter.start_idle_event(Duration::from_secs(30), false);
    h.advance(Duration::from_secs(29));
    assert!(h.topics().is_empty());
    h.advance(Duration::from_secs(1));
    assert_eq!(h.topics(), vec!["weather-skill.idle".to_string()]);
    h.advance(Duration::from_secs(60));
    assert_eq!(h.topics().len(), 1);
    assert_eq!(h.arbiter.idle_deadline(), None);
}

#[test]
fn idle_timer_restores_override_page() {
    let h = harness();
    h.weather();
    let message = page("timer-skill");
    h.arbiter.set_override(message.clone());
    h.arbiter.start_idle_event(Duration::from_secs(10), false);
    h.clear();
    h.advance(Duration::from_secs(10));
    assert_eq!(h.emitted.lock().unwrap().clone(), vec![message]);
}

#[test]
fn idle_timer_outliving_arbiter_is_harmless() {
    let h = harness();
    h.arbiter.start_idle_event(Duration::from_secs(1), false);
    let Harness {
        clock,
        scheduler,
        arbiter,
        ..
    } = h;
    drop(arbiter);
    clock.advance(Duration::from_secs(2));
    assert_eq!(scheduler.run_due(), 1);
}

#[test]
fn concurrent_requests_with_worker_running() {
    const THREADS: u64 = 4;
    let h = harness();
    h.weather();
    let mut worker = h.scheduler.start_worker();

    let (done_tx, done_rx) = crossbeam_channel::bounded(THREADS as usize);
    let handles: Vec<_> = (0..THREADS)
        .map(|n| {
            let arbiter = h.arbiter.clone();
            let clock = Arc::clone(&h.clock);
            let scheduler = h.scheduler.clone();
            let done = done_tx.clone();
            std::thread::spawn(move || {
                for i in 0..200u64 {
                    match (n + i) % 5 {
                        0 => arbiter.cancel_idle_event(),
                        1 => arbiter.set_override(page(&format!("skill-{n}"))),
                        2 => {
                            arbiter.start_idle_event(Duration::from_millis(5), true);
                        }
                        _ => {
                            arbiter.start_idle_event(Duration::from_millis(1 + i % 20), false);
                        }
                    }
                    clock.advance(Duration::from_millis(1));
                    let idle_timers = scheduler
                        .armed_names()
                        .iter()
                        .filter(|name| name.as_str() == IDLE_CHECK_TIMER)
                        .count();
                    assert!(idle_timers <= 1);
                }
                let _ = done.send(());
            })
        })
        .collect();
    drop(done_tx);
    for _ in 0..THREADS {
        assert!(
            done_rx.recv_timeout(Duration::from_secs(10)).is_ok(),
            "idle requests stalled"
        );
    }
    for handle in handles {
        handle.join().unwrap();
    }

    if let (Some(deadline), Some(floor)) = (h.arbiter.idle_deadline(), h.arbiter.idle_floor()) {
        assert!(deadline >= floor);
    }

    h.arbiter.cancel_idle_event();
    let now = crate::clock::Clock::monotonic(h.clock.as_ref());
    assert!(h.arbiter.start_idle_event(Duration::from_secs(60), false));
    assert!(!h.arbiter.start_idle_event(Duration::from_secs(5), false));
    assert_eq!(
        h.arbiter.idle_deadline(),
        Some(now + Duration::from_secs(60))
    );

    h.clear();
    h.clock.advance(Duration::from_secs(60));
    let give_up = std::time::Instant::now() + Duration::from_secs(5);
    while h.arbiter.idle_deadline().is_some() && std::time::Instant::now() < give_up {
        std::thread::sleep(Duration::from_millis(10));
    }
    worker.stop();
    assert_eq!(h.arbiter.idle_deadline(), None);
    assert!(!h.emitted.lock().unwrap().is_empty());
}
