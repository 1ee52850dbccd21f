//! What the screen is showing: a key/value store plus the current page.
//!
//! The rendering layer is external. It learns about local changes through
//! observers and reports its own edits (a settings view changing `selected`)
//! through [`DisplayStore::apply_remote`].

use crate::lock_or_recover;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

pub const KEY_STATE: &str = "state";
pub const KEY_VISEME: &str = "viseme";
pub const KEY_SELECTED: &str = "selected";
pub const KEY_VOLUME: &str = "volume";
pub const KEY_BRIGHTNESS: &str = "brightness";

/// Face animation states rendered by the default page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaceState {
    Listening,
    Thinking,
    Speaking,
    Resting,
    Awake,
}

impl FaceState {
    pub fn as_str(self) -> &'static str {
        match self {
            FaceState::Listening => "listening",
            FaceState::Thinking => "thinking",
            FaceState::Speaking => "speaking",
            FaceState::Resting => "resting",
            FaceState::Awake => "awake",
        }
    }
}

/// Viseme payload meaning "mouth at rest".
pub fn empty_viseme() -> Value {
    json!({"start": 0, "visemes": []})
}

#[derive(Debug, Clone, PartialEq)]
pub enum DisplayChange {
    Value { key: String, value: Value },
    Page { name: String },
}

pub type DisplayObserver = Arc<dyn Fn(&DisplayChange) + Send + Sync>;
pub type RemoteChangeHook = Arc<dyn Fn(&str, &Value) + Send + Sync>;

#[derive(Default)]
struct DisplayInner {
    values: BTreeMap<String, Value>,
    page: Option<String>,
    observers: Vec<DisplayObserver>,
    remote_hook: Option<RemoteChangeHook>,
}

/// Observers run outside `inner` so they may read the store, but inside
/// `notify` so they hear changes in the order the store took them.
/// An observer must not write back into the same store.
#[derive(Default)]
pub struct DisplayStore {
    inner: Mutex<DisplayInner>,
    notify: Mutex<()>,
}

impl DisplayStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a renderer-side observer for local changes.
    pub fn on_change<F>(&self, observer: F)
    where
        F: Fn(&DisplayChange) + Send + Sync + 'static,
    {
        lock_or_recover(&self.inner, "DisplayStore::on_change")
            .observers
            .push(Arc::new(observer));
    }

    /// Hook invoked when the rendering layer edits a value.
    pub fn set_on_remote_change<F>(&self, hook: F)
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        lock_or_recover(&self.inner, "DisplayStore::set_on_remote_change").remote_hook =
            Some(Arc::new(hook));
    }

    /// Store a value. Observers hear about it only if it changed.
    pub fn set(&self, key: &str, value: Value) -> bool {
        let _ordered = lock_or_recover(&self.notify, "DisplayStore::notify");
        let observers = {
            let mut inner = lock_or_recover(&self.inner, "DisplayStore::set");
            if inner.values.get(key) == Some(&value) {
                return false;
            }
            inner.values.insert(key.to_string(), value.clone());
            inner.observers.clone()
        };
        let change = DisplayChange::Value {
            key: key.to_string(),
            value,
        };
        for observer in &observers {
            observer(&change);
        }
        true
    }

    pub fn set_state(&self, state: FaceState) -> bool {
        self.set(KEY_STATE, Value::from(state.as_str()))
    }

    /// Show a page. Always notifies, since re-showing must re-render.
    pub fn show_page(&self, name: &str) {
        let _ordered = lock_or_recover(&self.notify, "DisplayStore::notify");
        let observers = {
            let mut inner = lock_or_recover(&self.inner, "DisplayStore::show_page");
            inner.page = Some(name.to_string());
            inner.observers.clone()
        };
        let change = DisplayChange::Page {
            name: name.to_string(),
        };
        for observer in &observers {
            observer(&change);
        }
    }

    /// Record an edit made by the rendering layer and run the remote hook.
    pub fn apply_remote(&self, key: &str, value: Value) {
        let hook = {
            let mut inner = lock_or_recover(&self.inner, "DisplayStore::apply_remote");
            inner.values.insert(key.to_string(), value.clone());
            inner.remote_hook.clone()
        };
        if let Some(hook) = hook {
            hook(key, &value);
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        lock_or_recover(&self.inner, "DisplayStore::get")
            .values
            .get(key)
            .cloned()
    }

    pub fn state(&self) -> Option<String> {
        self.get(KEY_STATE)
            .and_then(|value| value.as_str().map(str::to_string))
    }

    pub fn current_page(&self) -> Option<String> {
        lock_or_recover(&self.inner, "DisplayStore::current_page")
            .page
            .clone()
    }
}
