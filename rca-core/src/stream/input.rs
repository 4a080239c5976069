//! Client input: interaction events, viewport size specs, and the
//! press/release de-duplication filter.
//!
//! Events arrive as free-form JSON objects with a mandatory `type`
//! field. Everything else is passed through untouched to the frame
//! source, which knows how to interpret it.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Sentinel sent by the client when a continuous gesture begins.
pub const START_INTERACTION: &str = "StartInteractionEvent";
/// Sentinel sent by the client when a continuous gesture ends.
pub const END_INTERACTION: &str = "EndInteractionEvent";

// ── InteractionEvent ─────────────────────────────────────────────

/// An interaction event relayed from the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionEvent {
    /// Event type, e.g. `LeftButtonPress`, `MouseMove`, `KeyRelease`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Remaining event fields (position, modifiers, key, ...).
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl InteractionEvent {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: Map::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    /// Field lookup.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// The `key` field for keyboard events.
    pub fn key(&self) -> Option<&str> {
        self.fields.get("key").and_then(Value::as_str)
    }

    /// Start/end gesture brackets; never forwarded to a renderer.
    pub fn is_envelope(&self) -> bool {
        self.kind == START_INTERACTION || self.kind == END_INTERACTION
    }

    pub fn is_press(&self) -> bool {
        self.kind.contains("Press")
    }

    pub fn is_release(&self) -> bool {
        self.kind.ends_with("Release")
    }

    /// Tag identifying which press a release pairs with.
    fn press_tag(&self) -> String {
        let base = if self.is_release() {
            let stem = &self.kind[..self.kind.len() - "Release".len()];
            format!("{stem}Press")
        } else {
            self.kind.clone()
        };
        match self.key() {
            Some(key) => format!("{base}:{key}"),
            None => base,
        }
    }
}

// ── SizeSpec ─────────────────────────────────────────────────────

fn default_extent() -> f64 {
    300.0
}

fn default_pixel_ratio() -> f64 {
    1.0
}

/// Client viewport as sent with `rca.size`: CSS pixels plus device
/// pixel ratio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SizeSpec {
    #[serde(default = "default_extent")]
    pub w: f64,
    #[serde(default = "default_extent")]
    pub h: f64,
    #[serde(default = "default_pixel_ratio")]
    pub p: f64,
}

impl SizeSpec {
    pub fn new(w: f64, h: f64, p: f64) -> Self {
        Self { w, h, p }
    }
}

impl Default for SizeSpec {
    fn default() -> Self {
        Self::new(default_extent(), default_extent(), default_pixel_ratio())
    }
}

// ── ReleaseFilter ────────────────────────────────────────────────

/// Drops release events that lack a matching, not-yet-released press.
///
/// Clients replaying their event stream (reconnects, focus changes) can
/// emit releases the renderer never saw pressed; forwarding them leaves
/// interactor styles in a confused state.
#[derive(Debug, Default)]
pub struct ReleaseFilter {
    pressed: HashSet<String>,
}

impl ReleaseFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when `event` must be discarded.
    pub fn discard_extra_release(&mut self, event: &InteractionEvent) -> bool {
        if event.is_press() {
            self.pressed.insert(event.press_tag());
            return false;
        }

        if !event.is_release() {
            return false;
        }

        !self.pressed.remove(&event.press_tag())
    }

    /// Number of presses still waiting for their release.
    pub fn pending_presses(&self) -> usize {
        self.pressed.len()
    }
}
