//! Player process supervision: start, crash detection and restart.
//!
//! The supervisor owns the active transport and drives its signal stream.
//! Messages go to the [`Translator`] in arrival order; a close that was not
//! preceded by a quit request is treated as a crash: the stale transport is
//! destroyed, outstanding requests are failed and the start sequence runs
//! again in the background.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_channel::Receiver;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::client::MpvError;
use super::ipc::{IpcError, Transport, TransportSignal};
use super::pending::SharedPending;
use super::translator::Translator;

/// Starts a player and hands back a connected transport.
pub trait Launcher: Send + Sync + 'static {
  fn launch(&self) -> BoxFuture<'static, Result<Arc<dyn Transport>, MpvError>>;

  /// Release the player process, if any.
  fn shutdown(&self) -> BoxFuture<'static, ()>;
}

/// Called with the fresh transport after every successful (re)start.
pub type ReadyHook = Arc<dyn Fn(&dyn Transport) + Send + Sync>;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
  Disconnected,
  Starting,
  Connected,
  CrashedRestarting,
}

impl fmt::Display for ConnectionState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Disconnected => write!(f, "disconnected"),
      Self::Starting => write!(f, "starting"),
      Self::Connected => write!(f, "connected"),
      Self::CrashedRestarting => write!(f, "crashed-restarting"),
    }
  }
}

/// Backoff between restart attempts, in seconds.
const RESTART_DELAYS: &[u64] = &[1, 2, 5, 10, 30, 60];

/// How many times to try bringing a crashed player back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartPolicy {
  pub attempts: u32,
  /// Waits before the 2nd, 3rd, ... attempt; the last entry repeats.
  pub delays: Vec<Duration>,
}

impl RestartPolicy {
  pub fn new(attempts: u32) -> Self {
    Self {
      attempts,
      delays: RESTART_DELAYS.iter().map(|s| Duration::from_secs(*s)).collect(),
    }
  }

  /// Delay before the 1-based `attempt`. The first attempt is immediate.
  pub fn delay_before(&self, attempt: u32) -> Duration {
    if attempt <= 1 || self.delays.is_empty() {
      return Duration::ZERO;
    }
    let idx = (attempt as usize - 2).min(self.delays.len() - 1);
    self.delays[idx]
  }
}

impl Default for RestartPolicy {
  fn default() -> Self {
    Self::new(1)
  }
}

struct ActiveTransport {
  transport: Arc<dyn Transport>,
  cancel: CancellationToken,
}

struct Inner {
  launcher: Arc<dyn Launcher>,
  translator: Translator,
  pending: SharedPending,
  state: watch::Sender<ConnectionState>,
  active: Mutex<Option<ActiveTransport>>,
  quit_requested: AtomicBool,
  /// Serializes start, restart and stop sequences.
  lifecycle: tokio::sync::Mutex<()>,
  on_ready: Mutex<Option<ReadyHook>>,
  policy: RestartPolicy,
  debug: bool,
}

/// Supervises one player process at a time.
#[derive(Clone)]
pub struct Supervisor {
  inner: Arc<Inner>,
}

impl Supervisor {
  pub fn new(
    launcher: Arc<dyn Launcher>,
    translator: Translator,
    pending: SharedPending,
    policy: RestartPolicy,
    debug: bool,
  ) -> Self {
    let (state, _) = watch::channel(ConnectionState::Disconnected);
    Self {
      inner: Arc::new(Inner {
        launcher,
        translator,
        pending,
        state,
        active: Mutex::new(None),
        quit_requested: AtomicBool::new(false),
        lifecycle: tokio::sync::Mutex::new(()),
        on_ready: Mutex::new(None),
        policy,
        debug,
      }),
    }
  }

  pub fn set_ready_hook(&self, hook: ReadyHook) {
    *self.inner.on_ready.lock() = Some(hook);
  }

  pub fn state(&self) -> ConnectionState {
    *self.inner.state.borrow()
  }

  /// Observe state transitions.
  pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
    self.inner.state.subscribe()
  }

  pub fn is_connected(&self) -> bool {
    self.state() == ConnectionState::Connected
  }

  /// The transport commands should currently be written to.
  pub fn transport(&self) -> Option<Arc<dyn Transport>> {
    self
      .inner
      .active
      .lock()
      .as_ref()
      .map(|active| active.transport.clone())
  }

  /// Start the player, replacing any current connection.
  pub async fn start(&self) -> Result<(), MpvError> {
    let _guard = self.inner.lifecycle.lock().await;
    self.inner.quit_requested.store(false, Ordering::SeqCst);

    if let Some(previous) = self.detach() {
      log::info!("Replacing existing MPV connection");
      previous.close();
    }

    self.transition(ConnectionState::Starting);
    if let Err(e) = self.launch_and_attach().await {
      self.transition(ConnectionState::Disconnected);
      return Err(e);
    }

    log::info!("MPV client connected");
    Ok(())
  }

  /// Mark the next close as intentional. Must be called before the quit
  /// command is written.
  pub fn mark_quitting(&self) {
    self.inner.quit_requested.store(true, Ordering::SeqCst);
  }

  /// Disconnect and release the player process without restarting.
  pub async fn stop(&self) {
    self.mark_quitting();
    let _guard = self.inner.lifecycle.lock().await;

    match self.detach() {
      Some(transport) => transport.close(),
      None => log::debug!("No MPV connection to close"),
    }
    self.inner.launcher.shutdown().await;

    let failed = self.inner.pending.fail_all(|| IpcError::Disconnected);
    if failed > 0 {
      log::debug!("Dropped {} pending MPV requests on stop", failed);
    }
    self.transition(ConnectionState::Disconnected);
    log::info!("MPV client stopped");
  }

  async fn launch_and_attach(&self) -> Result<(), MpvError> {
    let transport = match self.inner.launcher.launch().await {
      Ok(transport) => transport,
      Err(e) => {
        // The player may be running even though its IPC never came up.
        self.inner.launcher.shutdown().await;
        return Err(e);
      }
    };
    self.attach(transport.clone());

    let hook = self.inner.on_ready.lock().clone();
    if let Some(hook) = hook {
      hook(transport.as_ref());
    }
    Ok(())
  }

  fn attach(&self, transport: Arc<dyn Transport>) {
    let cancel = CancellationToken::new();
    let signals = transport.signals();
    *self.inner.active.lock() = Some(ActiveTransport {
      transport,
      cancel: cancel.clone(),
    });
    self.transition(ConnectionState::Connected);

    let supervisor = self.clone();
    tokio::spawn(async move {
      supervisor.pump(signals, cancel).await;
    });
  }

  /// Take the active transport and stop dispatching its signals.
  fn detach(&self) -> Option<Arc<dyn Transport>> {
    let active = self.inner.active.lock().take()?;
    active.cancel.cancel();
    Some(active.transport)
  }

  async fn pump(self, signals: Receiver<TransportSignal>, cancel: CancellationToken) {
    loop {
      let signal = tokio::select! {
        biased;
        _ = cancel.cancelled() => break,
        signal = signals.recv() => signal,
      };

      match signal {
        Ok(TransportSignal::Message(value)) => self.inner.translator.handle_value(value),
        Ok(TransportSignal::Error(err)) => self.on_error(&err),
        Ok(TransportSignal::Closed) | Err(_) => {
          if !cancel.is_cancelled() {
            self.on_closed();
          }
          break;
        }
      }
    }
  }

  fn on_error(&self, err: &str) {
    if self.inner.debug {
      log::error!("MPV reported an error: {}", err);
    } else {
      log::debug!("MPV reported an error: {}", err);
    }
  }

  fn on_closed(&self) {
    let transport = self.detach();

    if self.inner.quit_requested.load(Ordering::SeqCst) {
      log::info!("MPV connection closed after quit");
      if let Some(transport) = transport {
        transport.destroy();
      }
      self.inner.pending.fail_all(|| IpcError::Disconnected);
      self.transition(ConnectionState::Disconnected);
      return;
    }

    if self.state() != ConnectionState::Connected {
      log::debug!("Ignoring close while {}", self.state());
      return;
    }

    if self.inner.debug {
      log::warn!("MPV player seems to have died, trying to restart");
    } else {
      log::info!("MPV player seems to have died, trying to restart");
    }
    self.transition(ConnectionState::CrashedRestarting);

    // Nothing else may be dispatched from the dead connection.
    if let Some(transport) = transport {
      transport.destroy();
    }

    let failed = self.inner.pending.fail_all(|| IpcError::SubprocessCrashed);
    if failed > 0 {
      log::warn!("Failed {} pending MPV requests after crash", failed);
    }

    let supervisor = self.clone();
    tokio::spawn(async move {
      supervisor.restart().await;
    });
  }

  async fn restart(self) {
    let attempts = self.inner.policy.attempts.max(1);

    for attempt in 1..=attempts {
      let delay = self.inner.policy.delay_before(attempt);
      if !delay.is_zero() {
        log::info!("Retrying MPV restart in {:?} (attempt {})", delay, attempt);
        tokio::time::sleep(delay).await;
      }

      let _guard = self.inner.lifecycle.lock().await;
      if self.inner.quit_requested.load(Ordering::SeqCst)
        || self.state() != ConnectionState::CrashedRestarting
      {
        log::debug!("MPV restart abandoned, state is {}", self.state());
        return;
      }

      match self.launch_and_attach().await {
        Ok(()) => {
          if self.inner.debug {
            log::info!("Restarted MPV player");
          }
          return;
        }
        Err(e) => log::error!("MPV restart attempt {}/{} failed: {}", attempt, attempts, e),
      }
    }

    log::error!("Giving up on restarting MPV after {} attempt(s)", attempts);
  }

  fn transition(&self, next: ConnectionState) {
    let previous = self.inner.state.send_replace(next);
    if previous != next {
      log::debug!("MPV connection state: {} -> {}", previous, next);
    }
  }
}
