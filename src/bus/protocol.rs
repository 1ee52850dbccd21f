//! Bus message shape and the payloads this controller reads and writes.
//!
//! Messages use the assistant bus wire shape:
//! `{"type": "...", "data": {...}, "context": {...}}`, one JSON object per line.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Topics
// ============================================================================

pub mod topics {
    // Inbound
    pub const LISTENER_STARTED: &str = "recognizer_loop:record_begin";
    pub const LISTENER_ENDED: &str = "recognizer_loop:record_end";
    pub const RECOGNITION_FAILED: &str = "mycroft.speech.recognition.unknown";
    pub const VISEME_LIST: &str = "enclosure.mouth.viseme_list";
    pub const MOUTH_RESET: &str = "enclosure.mouth.reset";
    pub const AUDIO_OUTPUT_END: &str = "recognizer_loop:audio_output_end";
    pub const INTERNET_CONNECTED: &str = "mycroft.internet.connected";
    pub const PAGE_SHOW: &str = "gui.page.show";
    pub const PAGE_INTERACTION: &str = "gui.page_interaction";
    pub const SLEEP: &str = "recognizer_loop:sleep";
    pub const AWOKEN: &str = "mycroft.awoken";
    pub const STOP: &str = "mycroft.stop";
    pub const HANDLER_START: &str = "mycroft.skill.handler.start";
    pub const SKILLS_INITIALIZED: &str = "mycroft.skills.initialized";
    pub const REGISTER_IDLE: &str = "mycroft.mycroft-gui.register_idle";
    pub const UNREGISTER_IDLE: &str = "mycroft.mycroft-gui.unregister_idle";
    pub const RESET_IDLE: &str = "mycroft.mycroft-gui.reset_idle";
    pub const FORCE_HOMESCREEN: &str = "mycroft.device.show.idle";
    pub const SELECT_IDLE: &str = "mycroft.device.set.idle";
    pub const VALUE_CHANGED: &str = "gui.value.changed";
    pub const BRIGHTNESS_SET: &str = "mycroft.device.brightness.set";
    pub const BRIGHTNESS_AUTO: &str = "mycroft.device.brightness.auto";

    // Outbound
    pub const COLLECT_IDLE: &str = "mycroft.mycroft-gui.collect_idle";
    pub const VALUE_SET: &str = "gui.value.set";
    pub const BRIGHTNESS_NOT_UNDERSTOOD: &str = "faceplate.brightness.not_understood";
    pub const SESSION_ERROR: &str = "faceplate.error";
}

/// Topic that activates the idle screen registered under `id`.
pub fn idle_activation_topic(id: &str) -> String {
    format!("{id}.idle")
}

// ============================================================================
// Message
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl Message {
    pub fn new(msg_type: impl Into<String>) -> Self {
        Self {
            msg_type: msg_type.into(),
            data: Map::new(),
            context: Map::new(),
        }
    }

    /// Build a message from a JSON object; anything else yields empty data.
    pub fn with_data(msg_type: impl Into<String>, data: Value) -> Self {
        let mut message = Self::new(msg_type);
        if let Value::Object(map) = data {
            message.data = map;
        }
        message
    }

    /// Skill id that sent the message (`data.__from`).
    pub fn origin(&self) -> Option<&str> {
        self.data.get("__from").and_then(Value::as_str)
    }

    pub fn same_origin(&self, other: &Message) -> bool {
        self.origin() == other.origin()
    }

    /// Decode `data` into a typed payload.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.data.clone()))
            .with_context(|| format!("malformed '{}' payload", self.msg_type))
    }
}

// ============================================================================
// Payloads
// ============================================================================

/// The `__idle` directive a skill attaches to a page it shows.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum IdleDirective {
    /// `true` keeps the page up instead of idle; `false` ends the skill's own override.
    Flag(bool),
    /// Return to idle after this many seconds.
    Seconds(u64),
    /// Anything else is treated as if no directive was given.
    Other(Value),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageShow {
    #[serde(default)]
    pub page: Vec<String>,
    #[serde(rename = "__from", default)]
    pub from: String,
    #[serde(rename = "__idle", default)]
    pub idle: Option<IdleDirective>,
    #[serde(rename = "__animations", default)]
    pub animations: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VisemeList {
    #[serde(default)]
    pub start: f64,
    /// `[code, end_seconds]` pairs, ordered by end time.
    #[serde(default)]
    pub visemes: Vec<(Value, f64)>,
}

impl VisemeList {
    pub fn last_end(&self) -> Option<f64> {
        self.visemes.last().map(|(_, end)| *end)
    }
}

/// Fields are optional so a malformed registration can be reported instead of rejected by serde.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdleRegistration {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnregisterIdle {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SelectIdle {
    #[serde(alias = "name")]
    pub selected: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HandlerStart {
    #[serde(default)]
    pub handler: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrightnessSet {
    pub value: Value,
}

impl BrightnessSet {
    /// The spoken/typed value as text, whether it arrived as a string or a number.
    pub fn as_text(&self) -> Option<String> {
        match &self.value {
            Value::String(text) => Some(text.clone()),
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrightnessAuto {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}
