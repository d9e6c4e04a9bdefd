//! Player events published to subscribers.
//!
//! Raw mpv event names are translated into [`PlayerEvent`] and fanned out
//! through an [`EventBus`] backed by `tokio::sync::broadcast`. Every
//! subscriber gets its own copy of each event; a subscriber that falls more
//! than the buffer size behind receives `RecvError::Lagged` and carries on.

use serde_json::Value;
use tokio::sync::broadcast;

use super::observed::PropertySnapshot;

pub use tokio::sync::broadcast::error::{RecvError, TryRecvError};

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

/// Stable event vocabulary exposed to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
  /// Playback stopped, mpv is idle.
  Stopped,
  /// Playback (re)started.
  Started,
  Paused,
  Resumed,
  /// An observed property changed; carries every observed value.
  StatusChange(PropertySnapshot),
  /// A response arrived for a request nobody is waiting on.
  GetRequest { request_id: i64, data: Value },
}

impl PlayerEvent {
  /// Translate a raw mpv event name. Property changes are handled
  /// separately and are not part of this table.
  pub fn from_mpv_event(name: &str) -> Option<Self> {
    match name {
      "idle" => Some(PlayerEvent::Stopped),
      "playback-restart" => Some(PlayerEvent::Started),
      "pause" => Some(PlayerEvent::Paused),
      "unpause" => Some(PlayerEvent::Resumed),
      _ => None,
    }
  }

  /// Subscriber-facing name of the event.
  pub fn name(&self) -> &'static str {
    match self {
      PlayerEvent::Stopped => "stopped",
      PlayerEvent::Started => "started",
      PlayerEvent::Paused => "paused",
      PlayerEvent::Resumed => "resumed",
      PlayerEvent::StatusChange(_) => "statuschange",
      PlayerEvent::GetRequest { .. } => "getrequest",
    }
  }
}

/// Fan-out channel for [`PlayerEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
  sender: broadcast::Sender<PlayerEvent>,
}

impl EventBus {
  pub fn new(capacity: usize) -> Self {
    let (sender, _) = broadcast::channel(capacity.max(1));
    Self { sender }
  }

  /// Publish an event. Returns the number of subscribers that will see it;
  /// publishing with nobody listening is not an error.
  pub fn emit(&self, event: PlayerEvent) -> usize {
    self.sender.send(event).unwrap_or(0)
  }

  /// Receive every event.
  pub fn subscribe(&self) -> EventStream {
    EventStream {
      receiver: self.sender.subscribe(),
      names: None,
    }
  }

  /// Receive only events whose [`PlayerEvent::name`] is in `names`.
  pub fn subscribe_to(&self, names: &[&str]) -> EventStream {
    EventStream {
      receiver: self.sender.subscribe(),
      names: Some(names.iter().map(|n| n.to_string()).collect()),
    }
  }

  pub fn subscriber_count(&self) -> usize {
    self.sender.receiver_count()
  }
}

impl Default for EventBus {
  fn default() -> Self {
    Self::new(DEFAULT_EVENT_BUFFER_SIZE)
  }
}

/// Subscription handle, optionally filtered by event name.
#[derive(Debug)]
pub struct EventStream {
  receiver: broadcast::Receiver<PlayerEvent>,
  names: Option<Vec<String>>,
}

impl EventStream {
  fn wants(&self, event: &PlayerEvent) -> bool {
    match &self.names {
      Some(names) => names.iter().any(|n| n == event.name()),
      None => true,
    }
  }

  pub async fn recv(&mut self) -> Result<PlayerEvent, RecvError> {
    loop {
      let event = self.receiver.recv().await?;
      if self.wants(&event) {
        return Ok(event);
      }
    }
  }

  pub fn try_recv(&mut self) -> Result<PlayerEvent, TryRecvError> {
    loop {
      let event = self.receiver.try_recv()?;
      if self.wants(&event) {
        return Ok(event);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use std::collections::BTreeMap;
  use std::sync::Arc;

  #[test]
  fn test_event_name_table() {
    assert_eq!(PlayerEvent::from_mpv_event("idle"), Some(PlayerEvent::Stopped));
    assert_eq!(
      PlayerEvent::from_mpv_event("playback-restart"),
      Some(PlayerEvent::Started)
    );
    assert_eq!(PlayerEvent::from_mpv_event("pause"), Some(PlayerEvent::Paused));
    assert_eq!(PlayerEvent::from_mpv_event("unpause"), Some(PlayerEvent::Resumed));
    assert_eq!(PlayerEvent::from_mpv_event("end-file"), None);
    assert_eq!(PlayerEvent::from_mpv_event("property-change"), None);
  }

  #[test]
  fn test_emit_without_subscribers() {
    let bus = EventBus::new(4);
    assert_eq!(bus.emit(PlayerEvent::Paused), 0);
  }

  #[test]
  fn test_every_subscriber_sees_event() {
    let bus = EventBus::default();
    let mut a = bus.subscribe();
    let mut b = bus.subscribe();
    assert_eq!(bus.emit(PlayerEvent::Started), 2);
    assert_eq!(a.try_recv().unwrap(), PlayerEvent::Started);
    assert_eq!(b.try_recv().unwrap(), PlayerEvent::Started);
  }

  #[test]
  fn test_filtered_subscription() {
    let bus = EventBus::default();
    let mut status = bus.subscribe_to(&["statuschange"]);
    let snapshot = Arc::new(BTreeMap::from([("volume".to_string(), json!(70))]));

    bus.emit(PlayerEvent::Paused);
    bus.emit(PlayerEvent::StatusChange(snapshot.clone()));
    bus.emit(PlayerEvent::Resumed);

    assert_eq!(status.try_recv().unwrap(), PlayerEvent::StatusChange(snapshot));
    assert!(matches!(status.try_recv(), Err(TryRecvError::Empty)));
  }
}
