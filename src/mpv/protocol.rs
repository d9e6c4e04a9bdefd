//! MPV JSON IPC protocol types.
//!
//! Reference: https://mpv.io/manual/master/#json-ipc

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicI64, Ordering};

/// Global request ID counter for unique command identification.
static REQUEST_ID: AtomicI64 = AtomicI64::new(1);

/// Generate a unique request ID for MPV commands.
pub fn next_request_id() -> i64 {
  REQUEST_ID.fetch_add(1, Ordering::SeqCst)
}

/// Event name mpv uses for observed property notifications.
pub const PROPERTY_CHANGE: &str = "property-change";

/// Command sent to MPV via IPC.
#[derive(Debug, Clone, Serialize)]
pub struct MpvCommand {
  pub command: Vec<Value>,
  pub request_id: i64,
}

impl MpvCommand {
  /// Create a new command with auto-generated request ID.
  pub fn new(args: Vec<Value>) -> Self {
    Self {
      command: args,
      request_id: next_request_id(),
    }
  }

  /// Serialize to a single IPC line (without the trailing newline).
  pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(self)
  }

  /// Load a file for playback.
  pub fn loadfile(url: &str) -> Self {
    Self::new(vec!["loadfile".into(), url.into()])
  }

  /// Load a file, replacing the current one, with per-file options.
  pub fn loadfile_with_options(url: &str, options: &str) -> Self {
    Self::new(vec![
      "loadfile".into(),
      url.into(),
      "replace".into(),
      options.into(),
    ])
  }

  /// Seek to absolute position in seconds.
  pub fn seek(time: f64) -> Self {
    Self::new(vec!["seek".into(), time.into(), "absolute".into()])
  }

  /// Set pause state.
  pub fn set_pause(paused: bool) -> Self {
    Self::set_property("pause", paused.into())
  }

  /// Set volume (0-100).
  pub fn set_volume(volume: f64) -> Self {
    Self::set_property("volume", volume.into())
  }

  /// Set an arbitrary property.
  pub fn set_property(name: &str, value: Value) -> Self {
    Self::new(vec!["set_property".into(), name.into(), value])
  }

  /// Observe a property for changes.
  pub fn observe_property(id: i64, name: &str) -> Self {
    Self::new(vec!["observe_property".into(), id.into(), name.into()])
  }

  /// Stop observing a property.
  pub fn unobserve_property(id: i64) -> Self {
    Self::new(vec!["unobserve_property".into(), id.into()])
  }

  /// Get a property value.
  pub fn get_property(name: &str) -> Self {
    Self::new(vec!["get_property".into(), name.into()])
  }

  /// Quit MPV.
  pub fn quit() -> Self {
    Self::new(vec!["quit".into()])
  }

  /// Cycle (toggle) a property.
  pub fn cycle(property: &str) -> Self {
    Self::new(vec!["cycle".into(), property.into()])
  }
}

fn default_error() -> String {
  "success".to_string()
}

/// Response from MPV for a command.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MpvResponse {
  /// "success" or error message.
  #[serde(default = "default_error")]
  pub error: String,
  /// Response data (command-specific), `Null` when absent.
  #[serde(default)]
  pub data: Value,
  /// Matching request ID.
  pub request_id: i64,
}

impl MpvResponse {
  /// Check if the command succeeded.
  pub fn is_success(&self) -> bool {
    self.error == "success"
  }
}

/// Event sent by MPV (property changes, playback events, etc.).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MpvEvent {
  /// Event type (e.g., "property-change", "idle", "pause").
  pub event: String,
  /// Observer ID for property-change events.
  pub id: Option<i64>,
  /// Property name for property-change events.
  pub name: Option<String>,
  /// Event data, `Null` when the property is unavailable.
  #[serde(default)]
  pub data: Value,
  /// Reason for end-file events (e.g., "eof", "stop", "quit", "error").
  pub reason: Option<String>,
}

impl MpvEvent {
  pub fn is_property_change(&self) -> bool {
    self.event == PROPERTY_CHANGE
  }
}

/// Typed property values from MPV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
  Bool(bool),
  Number(f64),
  String(String),
  /// Arrays and objects kept as their JSON text.
  Json(String),
  Null,
}

impl From<Value> for PropertyValue {
  fn from(value: Value) -> Self {
    match value {
      Value::Bool(b) => PropertyValue::Bool(b),
      Value::Number(n) => PropertyValue::Number(n.as_f64().unwrap_or(0.0)),
      Value::String(s) => PropertyValue::String(s),
      Value::Array(_) | Value::Object(_) => PropertyValue::Json(value.to_string()),
      Value::Null => PropertyValue::Null,
    }
  }
}

/// Message received from MPV IPC.
///
/// A frame carrying `event` is always a notification, even if it also has a
/// `request_id`. Anything that fits neither shape is kept as `Unrecognized`
/// so newer protocol additions pass through harmlessly.
#[derive(Debug, Clone, PartialEq)]
pub enum MpvMessage {
  Event(MpvEvent),
  Response(MpvResponse),
  Unrecognized(Value),
}

impl MpvMessage {
  /// Classify an already decoded frame.
  pub fn classify(value: Value) -> Self {
    if value.get("event").is_some() {
      return match MpvEvent::deserialize(&value) {
        Ok(event) => MpvMessage::Event(event),
        Err(_) => MpvMessage::Unrecognized(value),
      };
    }

    if value.get("request_id").is_some() {
      return match MpvResponse::deserialize(&value) {
        Ok(response) => MpvMessage::Response(response),
        Err(_) => MpvMessage::Unrecognized(value),
      };
    }

    MpvMessage::Unrecognized(value)
  }
}
