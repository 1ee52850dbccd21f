//! Named one-shot timers.
//!
//! A name identifies at most one pending timer: arming a name that is already
//! armed replaces the old timer. Due timers are taken out of the table before
//! their callbacks run, so a callback can freely arm or cancel timers
//! (including its own name) without deadlocking.

use crate::clock::Clock;
use crate::lock_or_recover;
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Upper bound on how long the worker sleeps between checks.
const MAX_WORKER_WAIT: Duration = Duration::from_secs(1);

pub type TimerCallback = Box<dyn FnOnce(Option<Value>) + Send + 'static>;

/// When a timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    /// Offset on the clock's monotonic timeline.
    Monotonic(Duration),
    /// Wall-clock instant; re-evaluated on every check so clock jumps and
    /// missed deadlines fire on the next pass.
    Wall(DateTime<Utc>),
}

impl Deadline {
    fn is_due(self, now_monotonic: Duration, now_wall: DateTime<Utc>) -> bool {
        match self {
            Deadline::Monotonic(at) => at <= now_monotonic,
            Deadline::Wall(at) => at <= now_wall,
        }
    }

    fn remaining(self, now_monotonic: Duration, now_wall: DateTime<Utc>) -> Duration {
        match self {
            Deadline::Monotonic(at) => at.saturating_sub(now_monotonic),
            Deadline::Wall(at) => (at - now_wall).to_std().unwrap_or(Duration::ZERO),
        }
    }
}

struct PendingTimer {
    deadline: Deadline,
    armed_seq: u64,
    payload: Option<Value>,
    callback: TimerCallback,
}

struct SchedulerShared {
    clock: Arc<dyn Clock>,
    timers: Mutex<HashMap<String, PendingTimer>>,
    next_seq: AtomicU64,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

/// Cloneable handle to one timer table.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<SchedulerShared>,
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (wake_tx, wake_rx) = bounded(1);
        Self {
            shared: Arc::new(SchedulerShared {
                clock,
                timers: Mutex::new(HashMap::new()),
                next_seq: AtomicU64::new(0),
                wake_tx,
                wake_rx,
            }),
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.shared.clock
    }

    /// Arm `name` to fire `offset` from now on the monotonic timeline.
    pub fn schedule_in<F>(
        &self,
        name: &str,
        offset: Duration,
        payload: Option<Value>,
        callback: F,
    ) -> Deadline
    where
        F: FnOnce(Option<Value>) + Send + 'static,
    {
        let deadline = Deadline::Monotonic(self.shared.clock.monotonic().saturating_add(offset));
        self.arm(name, deadline, payload, Box::new(callback));
        deadline
    }

    /// Arm `name` to fire once the wall clock reaches `at`.
    pub fn schedule_at<F>(
        &self,
        name: &str,
        at: DateTime<Utc>,
        payload: Option<Value>,
        callback: F,
    ) -> Deadline
    where
        F: FnOnce(Option<Value>) + Send + 'static,
    {
        let deadline = Deadline::Wall(at);
        self.arm(name, deadline, payload, Box::new(callback));
        deadline
    }

    fn arm(&self, name: &str, deadline: Deadline, payload: Option<Value>, callback: TimerCallback) {
        let armed_seq = self.shared.next_seq.fetch_add(1, Ordering::Relaxed);
        let replaced = lock_or_recover(&self.shared.timers, "Scheduler::arm")
            .insert(
                name.to_string(),
                PendingTimer {
                    deadline,
                    armed_seq,
                    payload,
                    callback,
                },
            )
            .is_some();
        tracing::debug!(timer = name, ?deadline, replaced, "timer armed");
        self.wake();
    }

    /// Drop a pending timer. Returns whether one was armed.
    pub fn cancel(&self, name: &str) -> bool {
        let removed = lock_or_recover(&self.shared.timers, "Scheduler::cancel")
            .remove(name)
            .is_some();
        if removed {
            tracing::debug!(timer = name, "timer cancelled");
            self.wake();
        }
        removed
    }

    pub fn is_armed(&self, name: &str) -> bool {
        lock_or_recover(&self.shared.timers, "Scheduler::is_armed").contains_key(name)
    }

    pub fn deadline(&self, name: &str) -> Option<Deadline> {
        lock_or_recover(&self.shared.timers, "Scheduler::deadline")
            .get(name)
            .map(|timer| timer.deadline)
    }

    pub fn armed_names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock_or_recover(&self.shared.timers, "Scheduler::armed_names")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Fire every timer whose deadline has passed, in arming order.
    /// Returns how many fired.
    pub fn run_due(&self) -> usize {
        let now_monotonic = self.shared.clock.monotonic();
        let now_wall = self.shared.clock.wall();
        let mut due: Vec<(String, PendingTimer)> = {
            let mut timers = lock_or_recover(&self.shared.timers, "Scheduler::run_due");
            let names: Vec<String> = timers
                .iter()
                .filter(|(_, timer)| timer.deadline.is_due(now_monotonic, now_wall))
                .map(|(name, _)| name.clone())
                .collect();
            names
                .into_iter()
                .filter_map(|name| timers.remove(&name).map(|timer| (name, timer)))
                .collect()
        };
        due.sort_by_key(|(_, timer)| timer.armed_seq);

        let fired = due.len();
        for (name, timer) in due {
            tracing::debug!(timer = %name, "timer firing");
            let PendingTimer {
                payload, callback, ..
            } = timer;
            if panic::catch_unwind(AssertUnwindSafe(move || callback(payload))).is_err() {
                tracing::error!(timer = %name, "timer callback panicked");
                crate::log_debug(&format!("timer callback '{name}' panicked"));
            }
        }
        fired
    }

    /// Time until the next deadline, if anything is armed.
    pub fn next_wait(&self) -> Option<Duration> {
        let now_monotonic = self.shared.clock.monotonic();
        let now_wall = self.shared.clock.wall();
        lock_or_recover(&self.shared.timers, "Scheduler::next_wait")
            .values()
            .map(|timer| timer.deadline.remaining(now_monotonic, now_wall))
            .min()
    }

    fn wake(&self) {
        let _ = self.shared.wake_tx.try_send(());
    }

    /// Drive this table from a background thread until the worker is dropped.
    pub fn start_worker(&self) -> SchedulerWorker {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);
        let scheduler = self.clone();
        let handle = thread::spawn(move || {
            while thread_running.load(Ordering::Relaxed) {
                scheduler.run_due();
                let wait = scheduler
                    .next_wait()
                    .map_or(MAX_WORKER_WAIT, |wait| wait.min(MAX_WORKER_WAIT));
                match scheduler.shared.wake_rx.recv_timeout(wait) {
                    Ok(()) | Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            tracing::debug!("scheduler worker stopped");
        });
        SchedulerWorker {
            running,
            scheduler: self.clone(),
            handle: Some(handle),
        }
    }
}

/// Background thread firing due timers. Stops and joins on drop.
pub struct SchedulerWorker {
    running: Arc<AtomicBool>,
    scheduler: Scheduler,
    handle: Option<thread::JoinHandle<()>>,
}

impl SchedulerWorker {
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.running.store(false, Ordering::Relaxed);
        self.scheduler.wake();
        if handle.join().is_err() {
            tracing::error!("scheduler worker panicked");
        }
    }
}

impl Drop for SchedulerWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
