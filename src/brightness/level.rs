//! Brightness levels and the phrases people use for them.

use anyhow::{Context, Result};
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

/// Highest hardware brightness level.
pub const MAX_LEVEL: u8 = 30;

/// Below this a bare number is read as a raw level, at or above it as a percentage.
const BARE_PERCENT_THRESHOLD: u32 = 30;

pub fn level_from_percent(percent: u32) -> u8 {
    let percent = f64::from(percent.min(100));
    (percent / 100.0 * f64::from(MAX_LEVEL)).round() as u8
}

pub fn percent_from_level(level: u8) -> u32 {
    let level = f64::from(level.min(MAX_LEVEL));
    (level * 100.0 / f64::from(MAX_LEVEL)).round() as u32
}

/// Named brightness levels ("dim", "full", ...).
#[derive(Debug, Clone, PartialEq)]
pub struct BrightnessNames {
    levels: HashMap<String, u8>,
}

impl Default for BrightnessNames {
    fn default() -> Self {
        let levels = [
            ("off", 0),
            ("minimum", 1),
            ("lowest", 1),
            ("dim", 5),
            ("low", 5),
            ("medium", 15),
            ("half", 15),
            ("bright", 25),
            ("high", 25),
            ("maximum", MAX_LEVEL),
            ("max", MAX_LEVEL),
            ("full", MAX_LEVEL),
        ]
        .into_iter()
        .map(|(name, level)| (name.to_string(), level))
        .collect();
        Self { levels }
    }
}

impl BrightnessNames {
    /// Load a YAML `name: level` table. It replaces the built-in English names.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("read brightness names {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("parse brightness names {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let raw: HashMap<String, u8> = serde_yaml::from_str(text)?;
        let levels = raw
            .into_iter()
            .map(|(name, level)| (normalize(&name), level.min(MAX_LEVEL)))
            .collect();
        Ok(Self { levels })
    }

    pub fn get(&self, name: &str) -> Option<u8> {
        self.levels.get(&normalize(name)).copied()
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Turn a spoken or typed brightness into a level.
///
/// Accepts a named level, `NN%`, `NN percent`, or a bare integer. Bare
/// integers below 30 are raw levels and 30..=100 are percentages, so "20"
/// means level 20 even if the speaker meant 20 percent.
pub fn parse_brightness(text: &str, names: &BrightnessNames) -> Option<u8> {
    let text = normalize(text);
    if text.is_empty() {
        return None;
    }
    if let Some(level) = names.get(&text) {
        return Some(level);
    }

    static PERCENT_RE: OnceLock<Regex> = OnceLock::new();
    let percent_re = PERCENT_RE.get_or_init(|| {
        Regex::new(r"^(\d{1,3})\s*(?:%|percent)$").expect("brightness percent regex should compile")
    });
    if let Some(caps) = percent_re.captures(&text) {
        let percent: u32 = caps[1].parse().ok()?;
        return (percent <= 100).then(|| level_from_percent(percent));
    }

    let value: u32 = text.parse().ok()?;
    if value < BARE_PERCENT_THRESHOLD {
        u8::try_from(value).ok()
    } else if value <= 100 {
        Some(level_from_percent(value))
    } else {
        None
    }
}
