//! Microphone level meter.
//!
//! The listener process appends lines like `Energy:  cur=4 thresh=1.5` to an
//! IPC file while it records. While the meter runs, the newest `cur` reading
//! is scaled against the loudest one seen so far and written to the display's
//! `volume` key as 0..=10.

use crate::display::{DisplayStore, KEY_VOLUME};
use crate::lock_or_recover;
use anyhow::{Context, Result};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime};

/// Peak never drops below this, so a silent room does not read as full scale.
const PEAK_FLOOR: f32 = 0.001;
const VOLUME_STEPS: f32 = 10.0;

/// Newest `cur=` reading in the listener's level file.
pub fn parse_meter_line(text: &str) -> Option<f32> {
    text.lines().rev().find_map(|line| {
        let (_, rest) = line.split_once("cur=")?;
        rest.split_whitespace().next()?.parse::<f32>().ok()
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    changed: (i64, i64),
    len: u64,
}

impl FileStamp {
    fn of(meta: &fs::Metadata) -> Self {
        #[cfg(unix)]
        let changed = {
            use std::os::unix::fs::MetadataExt;
            (meta.ctime(), meta.ctime_nsec())
        };
        #[cfg(not(unix))]
        let changed = (0, 0);
        Self {
            modified: meta.modified().ok(),
            changed,
            len: meta.len(),
        }
    }
}

struct MeterShared {
    path: PathBuf,
    display: Arc<DisplayStore>,
    poll: Duration,
    running: AtomicBool,
    peak_bits: AtomicU32,
    last_stamp: Mutex<Option<FileStamp>>,
}

impl MeterShared {
    fn peak(&self) -> f32 {
        f32::from_bits(self.peak_bits.load(Ordering::Relaxed))
    }

    fn set_peak(&self, peak: f32) {
        self.peak_bits.store(peak.to_bits(), Ordering::Relaxed);
    }

    /// Raw reading if the file changed since the last look.
    fn read_changed(&self) -> Result<Option<f32>> {
        let meta = match fs::metadata(&self.path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("stat {}", self.path.display()));
            }
        };
        let stamp = FileStamp::of(&meta);
        {
            let mut last = lock_or_recover(&self.last_stamp, "MicLevelMonitor::stamp");
            if *last == Some(stamp) {
                return Ok(None);
            }
            *last = Some(stamp);
        }
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("read {}", self.path.display()))?;
        Ok(parse_meter_line(&text))
    }

    fn sample(&self) -> Option<u8> {
        let raw = match self.read_changed() {
            Ok(raw) => raw?,
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "mic level read failed");
                return None;
            }
        };
        let mut peak = self.peak();
        if raw > peak {
            peak = raw;
            self.set_peak(peak);
        }
        let scaled = (raw.max(0.0) / peak * VOLUME_STEPS) as u8;
        let volume = scaled.min(VOLUME_STEPS as u8);
        self.display.set(KEY_VOLUME, Value::from(volume));
        Some(volume)
    }
}

/// Polls the level file on its own thread between `start` and `stop`.
pub struct MicLevelMonitor {
    shared: Arc<MeterShared>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl MicLevelMonitor {
    pub fn new(path: impl Into<PathBuf>, display: Arc<DisplayStore>, poll: Duration) -> Self {
        Self {
            shared: Arc::new(MeterShared {
                path: path.into(),
                display,
                poll,
                running: AtomicBool::new(false),
                peak_bits: AtomicU32::new(PEAK_FLOOR.to_bits()),
                last_stamp: Mutex::new(None),
            }),
            handle: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> f32 {
        self.shared.peak()
    }

    /// Halve the running peak so one loud burst does not pin the meter low.
    pub fn halve_peak(&self) {
        let peak = self.shared.peak();
        if peak > PEAK_FLOOR {
            self.shared.set_peak((peak / 2.0).max(PEAK_FLOOR));
        }
    }

    /// Take one reading now. `None` when the file is missing, unchanged or unreadable.
    pub fn sample(&self) -> Option<u8> {
        self.shared.sample()
    }

    pub fn start(&self) {
        let mut handle = lock_or_recover(&self.handle, "MicLevelMonitor::start");
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let shared = Arc::clone(&self.shared);
        *handle = Some(thread::spawn(move || {
            tracing::debug!(path = %shared.path.display(), "mic meter started");
            while shared.running.load(Ordering::SeqCst) {
                shared.sample();
                thread::sleep(shared.poll);
            }
            tracing::debug!("mic meter stopped");
        }));
    }

    /// Stop polling and wait for the thread to exit.
    ///
    /// The handle lock is held until the join completes, so a racing `start`
    /// waits for this stop instead of seeing a stale `running` flag.
    pub fn stop(&self) {
        let mut handle = lock_or_recover(&self.handle, "MicLevelMonitor::stop");
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = handle.take() {
            if handle.join().is_err() {
                tracing::error!("mic meter thread panicked");
            }
        }
    }
}

impl Drop for MicLevelMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::UNIX_EPOCH;

    fn temp_level_file(contents: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path = std::env::temp_dir().join(format!("faceplate_mic_level_{nanos}"));
        fs::write(&path, contents).unwrap();
        path
    }

    fn monitor(path: &Path) -> (Arc<DisplayStore>, MicLevelMonitor) {
        let display = Arc::new(DisplayStore::new());
        let meter = MicLevelMonitor::new(path, Arc::clone(&display), Duration::from_millis(10));
        (display, meter)
    }

    #[test]
    fn parses_last_reading() {
        let text = "Energy:  cur=4 thresh=1.5\nEnergy:  cur=2.5 thresh=1.5\n";
        assert_eq!(parse_meter_line(text), Some(2.5));
        assert_eq!(parse_meter_line("Energy: cur=7\ngarbage\n"), Some(7.0));
        assert_eq!(parse_meter_line("nothing here"), None);
        assert_eq!(parse_meter_line(""), None);
    }

    #[test]
    fn scales_against_peak() {
        let path = temp_level_file("Energy:  cur=8 thresh=1.5\n");
        let (display, meter) = monitor(&path);
        assert_eq!(meter.sample(), Some(10));
        assert_eq!(display.get(KEY_VOLUME), Some(json!(10)));

        fs::write(&path, "Energy:  cur=4 thresh=1.5\nEnergy:  cur=4 thresh=1.5\n").unwrap();
        assert_eq!(meter.sample(), Some(5));
        assert_eq!(meter.peak(), 8.0);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn unchanged_file_gives_no_reading() {
        let path = temp_level_file("Energy:  cur=3 thresh=1.5\n");
        let (_display, meter) = monitor(&path);
        assert!(meter.sample().is_some());
        assert_eq!(meter.sample(), None);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn missing_file_gives_no_reading() {
        let (display, meter) = monitor(Path::new("/nonexistent/faceplate/mic_level"));
        assert_eq!(meter.sample(), None);
        assert_eq!(display.get(KEY_VOLUME), None);
    }

    #[test]
    fn halving_respects_floor() {
        let path = temp_level_file("Energy:  cur=8 thresh=1.5\n");
        let (_display, meter) = monitor(&path);
        meter.halve_peak();
        assert_eq!(meter.peak(), PEAK_FLOOR);
        meter.sample();
        meter.halve_peak();
        assert_eq!(meter.peak(), 4.0);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn racing_start_and_stop_settle_on_last_call() {
        let path = temp_level_file("Energy:  cur=6 thresh=1.5\n");
        let (_display, meter) = monitor(&path);
        let meter = Arc::new(meter);
        let togglers: Vec<_> = (0..4)
            .map(|_| {
                let meter = Arc::clone(&meter);
                thread::spawn(move || {
                    for _ in 0..25 {
                        meter.start();
                        meter.stop();
                    }
                })
            })
            .collect();
        for toggler in togglers {
            toggler.join().unwrap();
        }
        assert!(!meter.is_running());

        meter.start();
        assert!(meter.is_running());
        assert!(meter.handle.lock().unwrap().is_some());
        meter.stop();
        assert!(!meter.is_running());
        assert!(meter.handle.lock().unwrap().is_none());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn start_stop_joins_thread() {
        let path = temp_level_file("Energy:  cur=6 thresh=1.5\n");
        let (display, meter) = monitor(&path);
        meter.start();
        meter.start();
        assert!(meter.is_running());
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while display.get(KEY_VOLUME).is_none() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        meter.stop();
        assert!(!meter.is_running());
        assert_eq!(display.get(KEY_VOLUME), Some(json!(10)));
        meter.stop();
        let _ = fs::remove_file(&path);
    }
}
