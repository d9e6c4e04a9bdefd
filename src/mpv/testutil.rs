//! In-memory launcher and transport for driving the player stack in tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, Sender};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;

use super::client::MpvError;
use super::ipc::{IpcError, Transport, TransportSignal};
use super::supervisor::Launcher;

pub struct FakeTransport {
  signal_tx: Sender<TransportSignal>,
  signal_rx: Receiver<TransportSignal>,
  sent: Mutex<Vec<Value>>,
  closed: AtomicBool,
  destroyed: AtomicBool,
}

impl FakeTransport {
  pub fn new() -> Self {
    let (signal_tx, signal_rx) = async_channel::unbounded();
    Self {
      signal_tx,
      signal_rx,
      sent: Mutex::new(Vec::new()),
      closed: AtomicBool::new(false),
      destroyed: AtomicBool::new(false),
    }
  }

  pub fn push(&self, signal: TransportSignal) {
    self.signal_tx.try_send(signal).unwrap();
  }

  pub fn push_message(&self, value: Value) {
    self.push(TransportSignal::Message(value));
  }

  /// Commands written so far, decoded.
  pub fn sent(&self) -> Vec<Value> {
    self.sent.lock().clone()
  }

  pub fn is_closed(&self) -> bool {
    self.closed.load(Ordering::SeqCst)
  }

  pub fn is_destroyed(&self) -> bool {
    self.destroyed.load(Ordering::SeqCst)
  }
}

impl Transport for FakeTransport {
  fn send(&self, line: Vec<u8>) -> Result<(), IpcError> {
    if self.is_destroyed() || self.is_closed() {
      return Err(IpcError::Disconnected);
    }
    let value = serde_json::from_slice(&line).map_err(|e| IpcError::WriteFailed(e.into()))?;
    self.sent.lock().push(value);
    Ok(())
  }

  fn signals(&self) -> Receiver<TransportSignal> {
    self.signal_rx.clone()
  }

  fn close(&self) {
    self.closed.store(true, Ordering::SeqCst);
  }

  fn destroy(&self) {
    self.destroyed.store(true, Ordering::SeqCst);
  }
}

/// Hands out a new [`FakeTransport`] per launch, optionally failing every
/// launch from a given index on.
pub struct FakeLauncher {
  transports: Mutex<Vec<Arc<FakeTransport>>>,
  launches: AtomicUsize,
  shutdowns: Arc<AtomicUsize>,
  fail_from: Option<usize>,
}

impl FakeLauncher {
  pub fn new() -> Self {
    Self {
      transports: Mutex::new(Vec::new()),
      launches: AtomicUsize::new(0),
      shutdowns: Arc::new(AtomicUsize::new(0)),
      fail_from: None,
    }
  }

  pub fn failing_from(index: usize) -> Self {
    Self {
      fail_from: Some(index),
      ..Self::new()
    }
  }

  pub fn launch_count(&self) -> usize {
    self.launches.load(Ordering::SeqCst)
  }

  pub fn shutdown_count(&self) -> usize {
    self.shutdowns.load(Ordering::SeqCst)
  }

  /// Transport created by the `index`-th successful launch.
  pub fn transport(&self, index: usize) -> Arc<FakeTransport> {
    self.transports.lock()[index].clone()
  }
}

impl Launcher for FakeLauncher {
  fn launch(&self) -> BoxFuture<'static, Result<Arc<dyn Transport>, MpvError>> {
    let index = self.launches.fetch_add(1, Ordering::SeqCst);
    let result = match self.fail_from {
      Some(from) if index >= from => Err(MpvError::Ipc(IpcError::ConnectionFailed(
        "connection refused".to_string(),
      ))),
      _ => {
        let transport = Arc::new(FakeTransport::new());
        self.transports.lock().push(transport.clone());
        let transport: Arc<dyn Transport> = transport;
        Ok(transport)
      }
    };
    async move { result }.boxed()
  }

  fn shutdown(&self) -> BoxFuture<'static, ()> {
    let shutdowns = self.shutdowns.clone();
    async move {
      shutdowns.fetch_add(1, Ordering::SeqCst);
    }
    .boxed()
  }
}

/// Poll `condition` until it holds, panicking after two seconds.
pub async fn eventually(condition: impl Fn() -> bool) {
  let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
  while !condition() {
    if tokio::time::Instant::now() > deadline {
      panic!("condition not reached in time");
    }
    tokio::time::sleep(Duration::from_millis(5)).await;
  }
}
