//! Bookkeeping for requests waiting on an MPV response.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;

use super::ipc::IpcError;
use super::protocol::MpvResponse;

/// Result handed to whoever issued a request.
pub type Reply = Result<MpvResponse, IpcError>;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TableError {
  #[error("Request id {0} is already pending")]
  DuplicateRequestId(i64),
}

/// One-shot delivery of a reply to the original caller.
pub enum Continuation {
  /// Reply sent to an awaiting task.
  Channel(oneshot::Sender<Reply>),
  /// Reply passed to a callback.
  Callback(Box<dyn FnOnce(Reply) + Send>),
}

impl Continuation {
  pub fn callback<F>(f: F) -> Self
  where
    F: FnOnce(Reply) + Send + 'static,
  {
    Continuation::Callback(Box::new(f))
  }

  /// Create a channel continuation and the receiver that awaits it.
  pub fn channel() -> (Self, oneshot::Receiver<Reply>) {
    let (tx, rx) = oneshot::channel();
    (Continuation::Channel(tx), rx)
  }

  /// Hand `reply` over. A channel whose receiver is gone gives it back.
  fn deliver(self, reply: Reply) -> Result<(), Reply> {
    match self {
      Continuation::Channel(tx) => tx.send(reply),
      Continuation::Callback(f) => {
        f(reply);
        Ok(())
      }
    }
  }
}

/// Deliver a response, or hand it back if nobody is listening anymore.
fn settle(continuation: Continuation, response: MpvResponse) -> Resolution {
  match continuation.deliver(Ok(response)) {
    Err(Ok(response)) => Resolution::Unresolved(response),
    _ => Resolution::Resolved,
  }
}

impl fmt::Debug for Continuation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Continuation::Channel(_) => f.write_str("Continuation::Channel"),
      Continuation::Callback(_) => f.write_str("Continuation::Callback"),
    }
  }
}

/// Outcome of matching a response against the table.
#[derive(Debug, PartialEq)]
pub enum Resolution {
  Resolved,
  /// No continuation was registered; the response is handed back.
  Unresolved(MpvResponse),
}

/// Request id to continuation map.
#[derive(Debug, Default)]
pub struct PendingRequests {
  entries: HashMap<i64, Continuation>,
}

impl PendingRequests {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(&mut self, id: i64, continuation: Continuation) -> Result<(), TableError> {
    match self.entries.entry(id) {
      Entry::Occupied(_) => Err(TableError::DuplicateRequestId(id)),
      Entry::Vacant(slot) => {
        slot.insert(continuation);
        Ok(())
      }
    }
  }

  /// Remove the entry for `response.request_id` and deliver to it. A
  /// response nobody is waiting for anymore comes back as `Unresolved`.
  pub fn resolve(&mut self, response: MpvResponse) -> Resolution {
    match self.entries.remove(&response.request_id) {
      Some(continuation) => settle(continuation, response),
      None => Resolution::Unresolved(response),
    }
  }

  fn take(&mut self, id: i64) -> Option<Continuation> {
    self.entries.remove(&id)
  }

  /// Drop the entry without delivering. Returns whether it existed.
  pub fn clear(&mut self, id: i64) -> bool {
    self.entries.remove(&id).is_some()
  }

  fn drain(&mut self) -> Vec<Continuation> {
    self.entries.drain().map(|(_, c)| c).collect()
  }

  pub fn contains(&self, id: i64) -> bool {
    self.entries.contains_key(&id)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

/// Pending table shared between the request side and the dispatcher.
///
/// Continuations always run after the lock is released, so a callback may
/// register a follow-up request without deadlocking.
#[derive(Debug, Clone, Default)]
pub struct SharedPending(Arc<Mutex<PendingRequests>>);

impl SharedPending {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(&self, id: i64, continuation: Continuation) -> Result<(), TableError> {
    self.0.lock().register(id, continuation)
  }

  pub fn resolve(&self, response: MpvResponse) -> Resolution {
    let entry = self.0.lock().take(response.request_id);
    match entry {
      Some(continuation) => settle(continuation, response),
      None => Resolution::Unresolved(response),
    }
  }

  pub fn clear(&self, id: i64) -> bool {
    self.0.lock().clear(id)
  }

  /// Fail every outstanding request with the error built by `error`.
  /// Returns how many were failed.
  pub fn fail_all(&self, error: impl Fn() -> IpcError) -> usize {
    let drained = self.0.lock().drain();
    let count = drained.len();
    for continuation in drained {
      // Receivers that already gave up need nothing.
      let _ = continuation.deliver(Err(error()));
    }
    count
  }

  pub fn contains(&self, id: i64) -> bool {
    self.0.lock().contains(id)
  }

  pub fn len(&self) -> usize {
    self.0.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.lock().is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::{json, Value};
  use std::sync::atomic::{AtomicUsize, Ordering};

  fn response(id: i64, data: Value) -> MpvResponse {
    MpvResponse {
      error: "success".to_string(),
      data,
      request_id: id,
    }
  }

  #[test]
  fn test_duplicate_id_rejected() {
    let mut table = PendingRequests::new();
    table.register(1, Continuation::callback(|_| {})).unwrap();
    let err = table.register(1, Continuation::callback(|_| {})).unwrap_err();
    assert_eq!(err, TableError::DuplicateRequestId(1));
    assert_eq!(table.len(), 1);
  }

  #[test]
  fn test_resolve_invokes_once_and_removes() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(None));
    let mut table = PendingRequests::new();
    {
      let calls = calls.clone();
      let seen = seen.clone();
      table
        .register(
          42,
          Continuation::callback(move |reply| {
            calls.fetch_add(1, Ordering::SeqCst);
            *seen.lock() = Some(reply.unwrap().data);
          }),
        )
        .unwrap();
    }

    assert_eq!(table.resolve(response(42, json!("ok"))), Resolution::Resolved);
    assert!(!table.contains(42));

    let second = table.resolve(response(42, json!("again")));
    assert_eq!(second, Resolution::Unresolved(response(42, json!("again"))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(*seen.lock(), Some(json!("ok")));
  }

  #[test]
  fn test_unknown_id_leaves_table_untouched() {
    let mut table = PendingRequests::new();
    table.register(1, Continuation::callback(|_| {})).unwrap();
    let outcome = table.resolve(response(7, json!("x")));
    assert_eq!(outcome, Resolution::Unresolved(response(7, json!("x"))));
    assert!(table.contains(1));
    assert_eq!(table.len(), 1);
  }

  #[test]
  fn test_clear() {
    let mut table = PendingRequests::new();
    table.register(5, Continuation::callback(|_| {})).unwrap();
    assert!(table.clear(5));
    assert!(!table.clear(5));
    assert!(table.is_empty());
  }

  #[test]
  fn test_callback_can_register_from_inside_resolve() {
    let shared = SharedPending::new();
    let inner = shared.clone();
    shared
      .register(
        1,
        Continuation::callback(move |_| {
          inner.register(2, Continuation::callback(|_| {})).unwrap();
        }),
      )
      .unwrap();

    assert_eq!(shared.resolve(response(1, Value::Null)), Resolution::Resolved);
    assert!(shared.contains(2));
  }

  #[tokio::test]
  async fn test_fail_all_delivers_errors() {
    let shared = SharedPending::new();
    let (first, rx1) = Continuation::channel();
    let (second, rx2) = Continuation::channel();
    shared.register(1, first).unwrap();
    shared.register(2, second).unwrap();

    assert_eq!(shared.fail_all(|| IpcError::SubprocessCrashed), 2);
    assert!(shared.is_empty());
    assert!(matches!(rx1.await, Ok(Err(IpcError::SubprocessCrashed))));
    assert!(matches!(rx2.await, Ok(Err(IpcError::SubprocessCrashed))));
  }

  #[test]
  fn test_abandoned_receiver_hands_response_back() {
    let shared = SharedPending::new();
    let (continuation, rx) = Continuation::channel();
    shared.register(8, continuation).unwrap();
    drop(rx);

    let outcome = shared.resolve(response(8, json!(12.5)));
    assert_eq!(outcome, Resolution::Unresolved(response(8, json!(12.5))));
    assert!(shared.is_empty());
  }
}
