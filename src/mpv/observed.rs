//! Last-known values of observed MPV properties.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

/// Property that is tracked on its own and never enters the map.
pub const TIME_POS: &str = "time-pos";

/// Immutable copy of the observed properties at publication time.
pub type PropertySnapshot = Arc<BTreeMap<String, Value>>;

/// Cache of observed property values.
#[derive(Debug, Default)]
pub struct ObservedProperties {
  values: BTreeMap<String, Value>,
  time_pos: Option<f64>,
}

impl ObservedProperties {
  pub fn new() -> Self {
    Self::default()
  }

  /// Insert or overwrite a property value.
  ///
  /// `time-pos` is redirected to the time position scalar.
  pub fn set(&mut self, name: impl Into<String>, value: Value) {
    let name = name.into();
    if name == TIME_POS {
      self.set_time_pos(&value);
      return;
    }
    self.values.insert(name, value);
  }

  pub fn get(&self, name: &str) -> Option<&Value> {
    self.values.get(name)
  }

  /// Copy the current mapping; later writes are not visible through it.
  pub fn snapshot(&self) -> PropertySnapshot {
    Arc::new(self.values.clone())
  }

  /// Update the current playback position. Non-numeric data (mpv sends
  /// `null` while nothing is loaded) resets it.
  pub fn set_time_pos(&mut self, value: &Value) {
    self.time_pos = value.as_f64();
  }

  pub fn time_pos(&self) -> Option<f64> {
    self.time_pos
  }

  pub fn clear(&mut self) {
    self.values.clear();
    self.time_pos = None;
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }
}
