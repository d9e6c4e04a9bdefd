//! Turns decoded mpv frames into store updates, request replies and
//! player events.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use super::events::{EventBus, PlayerEvent};
use super::observed::{ObservedProperties, TIME_POS};
use super::pending::{Resolution, SharedPending};
use super::protocol::{MpvEvent, MpvMessage, MpvResponse};

/// Dispatcher for messages arriving from one transport.
///
/// Messages must be fed in arrival order from a single task; each one is
/// fully handled, including publication, before the next.
#[derive(Debug, Clone)]
pub struct Translator {
  observed: Arc<RwLock<ObservedProperties>>,
  pending: SharedPending,
  events: EventBus,
  verbose: bool,
}

impl Translator {
  pub fn new(
    observed: Arc<RwLock<ObservedProperties>>,
    pending: SharedPending,
    events: EventBus,
    verbose: bool,
  ) -> Self {
    Self {
      observed,
      pending,
      events,
      verbose,
    }
  }

  /// Classify and handle a raw frame.
  pub fn handle_value(&self, value: Value) {
    self.handle(MpvMessage::classify(value));
  }

  pub fn handle(&self, message: MpvMessage) {
    match message {
      MpvMessage::Event(event) => self.handle_event(event),
      MpvMessage::Response(response) => self.handle_response(response),
      MpvMessage::Unrecognized(value) => {
        log::trace!("Ignoring unrecognized MPV message: {}", value);
      }
    }
  }

  fn handle_event(&self, event: MpvEvent) {
    if event.is_property_change() {
      self.handle_property_change(event);
      return;
    }

    if self.verbose {
      log::info!("MPV event received: {:?}", event);
    }

    match PlayerEvent::from_mpv_event(&event.event) {
      Some(translated) => self.publish(translated),
      None => log::trace!("No player event for MPV event '{}'", event.event),
    }
  }

  fn handle_property_change(&self, event: MpvEvent) {
    let Some(name) = event.name else {
      log::trace!("Ignoring property-change without a name");
      return;
    };

    if name == TIME_POS {
      self.observed.write().set_time_pos(&event.data);
      return;
    }

    if self.verbose {
      log::info!("Property change: {} - {}", name, event.data);
    }

    let snapshot = {
      let mut observed = self.observed.write();
      observed.set(name, event.data);
      observed.snapshot()
    };
    self.publish(PlayerEvent::StatusChange(snapshot));
  }

  fn handle_response(&self, response: MpvResponse) {
    if self.verbose {
      log::info!(
        "MPV response: request_id={} - {}",
        response.request_id,
        response.data
      );
    }

    match self.pending.resolve(response) {
      Resolution::Resolved => {}
      Resolution::Unresolved(response) => self.publish(PlayerEvent::GetRequest {
        request_id: response.request_id,
        data: response.data,
      }),
    }
  }

  fn publish(&self, event: PlayerEvent) {
    if self.verbose {
      log::info!("Event: {}", event.name());
    }
    self.events.emit(event);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::mpv::events::{EventStream, TryRecvError};
  use crate::mpv::pending::Continuation;
  use serde_json::json;
  use std::sync::atomic::{AtomicUsize, Ordering};

  struct Harness {
    translator: Translator,
    observed: Arc<RwLock<ObservedProperties>>,
    pending: SharedPending,
    stream: EventStream,
  }

  fn harness() -> Harness {
    let observed = Arc::new(RwLock::new(ObservedProperties::new()));
    let pending = SharedPending::new();
    let events = EventBus::new(16);
    let stream = events.subscribe();
    let translator = Translator::new(observed.clone(), pending.clone(), events, false);
    Harness {
      translator,
      observed,
      pending,
      stream,
    }
  }

  fn assert_no_event(stream: &mut EventStream) {
    assert!(matches!(stream.try_recv(), Err(TryRecvError::Empty)));
  }

  #[test]
  fn test_playback_events_translate_one_to_one() {
    let cases = [
      ("idle", PlayerEvent::Stopped),
      ("playback-restart", PlayerEvent::Started),
      ("pause", PlayerEvent::Paused),
      ("unpause", PlayerEvent::Resumed),
    ];
    for (raw, expected) in cases {
      let mut h = harness();
      h.translator.handle_value(json!({ "event": raw }));
      assert_eq!(h.stream.try_recv().unwrap(), expected);
      assert_no_event(&mut h.stream);
      assert!(h.observed.read().is_empty());
    }
  }

  #[test]
  fn test_unknown_event_is_ignored() {
    let mut h = harness();
    h.translator.handle_value(json!({"event": "end-file", "reason": "eof"}));
    assert_no_event(&mut h.stream);
  }

  #[test]
  fn test_property_change_updates_store_and_publishes_snapshot() {
    let mut h = harness();
    h.translator
      .handle_value(json!({"event": "property-change", "name": "volume", "data": 70}));

    assert_eq!(h.observed.read().get("volume"), Some(&json!(70)));
    match h.stream.try_recv().unwrap() {
      PlayerEvent::StatusChange(snapshot) => {
        assert_eq!(snapshot.get("volume"), Some(&json!(70)));
      }
      other => panic!("Expected statuschange, got {:?}", other),
    }
  }

  #[test]
  fn test_snapshot_carries_all_observed_properties() {
    let mut h = harness();
    h.translator
      .handle_value(json!({"event": "property-change", "name": "pause", "data": true}));
    h.translator
      .handle_value(json!({"event": "property-change", "name": "mute", "data": false}));

    let _first = h.stream.try_recv().unwrap();
    match h.stream.try_recv().unwrap() {
      PlayerEvent::StatusChange(snapshot) => {
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get("pause"), Some(&json!(true)));
        assert_eq!(snapshot.get("mute"), Some(&json!(false)));
      }
      other => panic!("Expected statuschange, got {:?}", other),
    }
  }

  #[test]
  fn test_time_pos_is_not_published() {
    let mut h = harness();
    h.translator
      .handle_value(json!({"event": "property-change", "name": "time-pos", "data": 12.5}));

    assert_no_event(&mut h.stream);
    assert!(h.observed.read().is_empty());
    assert_eq!(h.observed.read().time_pos(), Some(12.5));
  }

  #[test]
  fn test_registered_response_resolves_continuation() {
    let mut h = harness();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    h.pending
      .register(
        42,
        Continuation::callback(move |reply| {
          assert_eq!(reply.unwrap().data, json!("ok"));
          counter.fetch_add(1, Ordering::SeqCst);
        }),
      )
      .unwrap();

    h.translator.handle_value(json!({"request_id": 42, "data": "ok"}));

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!h.pending.contains(42));
    assert_no_event(&mut h.stream);
  }

  #[test]
  fn test_unregistered_response_publishes_getrequest() {
    let mut h = harness();
    h.pending.register(1, Continuation::callback(|_| {})).unwrap();

    h.translator.handle_value(json!({"request_id": 7, "data": "x"}));

    assert_eq!(
      h.stream.try_recv().unwrap(),
      PlayerEvent::GetRequest {
        request_id: 7,
        data: json!("x"),
      }
    );
    assert_eq!(h.pending.len(), 1);
  }

  #[test]
  fn test_response_for_abandoned_request_publishes_getrequest() {
    let mut h = harness();
    let (continuation, rx) = Continuation::channel();
    h.pending.register(9, continuation).unwrap();
    drop(rx);

    h.translator.handle_value(json!({"request_id": 9, "data": 3}));

    assert_eq!(
      h.stream.try_recv().unwrap(),
      PlayerEvent::GetRequest {
        request_id: 9,
        data: json!(3),
      }
    );
    assert!(h.pending.is_empty());
  }

  #[test]
  fn test_unrecognized_message_changes_nothing() {
    let mut h = harness();
    h.pending.register(1, Continuation::callback(|_| {})).unwrap();
    h.observed.write().set("volume", json!(5));

    h.translator.handle_value(json!({"unexpected": true}));
    h.translator
      .handle_value(json!({"event": "property-change", "data": 1}));

    assert_no_event(&mut h.stream);
    assert_eq!(h.pending.len(), 1);
    assert_eq!(h.observed.read().len(), 1);
    assert_eq!(h.observed.read().get("volume"), Some(&json!(5)));
  }
}
