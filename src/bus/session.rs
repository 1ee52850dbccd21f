//! JSON-lines bridge between an external bus connection and the local bus.
//!
//! - Reader thread: parses one message per line, hands it to the main loop
//! - Main loop: delivers inbound messages to local handlers in arrival order
//! - Tap: every outbound message is written back as one JSON line

use super::local::{BusEmitter, LocalBus, Subscription};
use super::protocol::{topics, Message};
use crate::{lock_or_recover, log_debug, log_debug_content};
use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Sender};
use serde_json::json;
use std::io::{BufRead, Write};
use std::sync::{Arc, Mutex};
use std::thread;

enum SessionInput {
    Message(Message),
    Invalid(String),
}

/// Counts reported when a session ends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub delivered: u64,
    pub rejected: u64,
}

fn spawn_line_reader<R>(reader: R, tx: Sender<SessionInput>) -> thread::JoinHandle<()>
where
    R: BufRead + Send + 'static,
{
    thread::spawn(move || {
        for line in reader.lines() {
            let line = match line {
                Ok(l) => l,
                Err(_) => break,
            };

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let input = match serde_json::from_str::<Message>(trimmed) {
                Ok(message) => SessionInput::Message(message),
                Err(e) => SessionInput::Invalid(format!("Invalid message: {e}")),
            };
            if tx.send(input).is_err() {
                break; // Main loop has exited
            }
        }

        log_debug("Bus reader thread exiting");
    })
}

fn write_message<W: Write>(writer: &Mutex<W>, message: &Message) -> Result<()> {
    let json = serde_json::to_string(message).context("encode outbound message")?;
    let mut out = lock_or_recover(writer, "session writer");
    writeln!(out, "{json}").context("write outbound message")?;
    out.flush().context("flush outbound message")?;
    Ok(())
}

/// An outbound forwarder installed on the bus, and the inbound pump that
/// runs once the controller is ready.
///
/// Attach before anything emits: messages sent while the controller starts
/// (the collect request, the restored selection) must reach the writer too.
pub struct BusSession {
    bus: LocalBus,
    _forward: Subscription,
}

impl BusSession {
    /// Forward every outbound message on `bus` to `writer` as one JSON line.
    pub fn attach<W>(bus: &LocalBus, writer: W) -> Self
    where
        W: Write + Send + 'static,
    {
        log_debug("Attaching JSON-lines bus writer");
        let writer = Arc::new(Mutex::new(writer));
        let forward = bus.tap(move |message| write_message(&writer, message));
        Self {
            bus: bus.clone(),
            _forward: forward,
        }
    }

    /// Pump messages from `reader` into the bus until EOF.
    /// Malformed lines become `faceplate.error` messages. The writer is
    /// detached when this returns.
    pub fn run<R>(self, reader: R) -> Result<SessionStats>
    where
        R: BufRead + Send + 'static,
    {
        log_debug("Starting JSON-lines bus session");
        let bus = &self.bus;
        let (tx, rx) = unbounded();
        let reader_handle = spawn_line_reader(reader, tx);

        let mut stats = SessionStats::default();
        for input in rx.iter() {
            match input {
                SessionInput::Message(message) => {
                    stats.delivered += 1;
                    log_debug_content(&format!(
                        "inbound {}: {}",
                        message.msg_type,
                        serde_json::Value::Object(message.data.clone())
                    ));
                    bus.deliver(&message);
                }
                SessionInput::Invalid(reason) => {
                    stats.rejected += 1;
                    tracing::warn!(%reason, "rejected bus line");
                    bus.emit(Message::with_data(
                        topics::SESSION_ERROR,
                        json!({"message": reason, "recoverable": true}),
                    ));
                }
            }
        }

        if reader_handle.join().is_err() {
            tracing::error!("bus reader thread panicked");
        }
        log_debug(&format!(
            "Bus session ended: {} delivered, {} rejected",
            stats.delivered, stats.rejected
        ));
        Ok(stats)
    }
}

/// Attach a writer and pump `reader` in one go.
pub fn run_bus_session<R, W>(bus: &LocalBus, reader: R, writer: W) -> Result<SessionStats>
where
    R: BufRead + Send + 'static,
    W: Write + Send + 'static,
{
    BusSession::attach(bus, writer).run(reader)
}
