//! High-level MPV client with command methods.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;

use super::events::{EventBus, EventStream};
use super::ipc::{IpcError, Transport};
use super::observed::{ObservedProperties, PropertySnapshot};
use super::pending::{Continuation, SharedPending, TableError};
use super::process::{MpvLauncher, ProcessError};
use super::protocol::{MpvCommand, MpvResponse, PropertyValue};
use super::supervisor::{ConnectionState, Launcher, ReadyHook, RestartPolicy, Supervisor};
use super::translator::Translator;
use crate::config::{ConfigError, PlayerConfig};

#[derive(Error, Debug)]
pub enum MpvError {
  #[error("Process error: {0}")]
  Process(#[from] ProcessError),
  #[error("IPC error: {0}")]
  Ipc(#[from] IpcError),
  #[error("MPV command failed: {0}")]
  CommandFailed(String),
  #[error("Not connected")]
  NotConnected,
  #[error("Request id {0} is already pending")]
  DuplicateRequestId(i64),
  #[error("Config error: {0}")]
  Config(#[from] ConfigError),
}

impl From<TableError> for MpvError {
  fn from(err: TableError) -> Self {
    match err {
      TableError::DuplicateRequestId(id) => MpvError::DuplicateRequestId(id),
    }
  }
}

/// Register `continuation` under the command's id, then write the command.
/// The entry is removed again if the write fails.
fn send_registered(
  pending: &SharedPending,
  transport: &dyn Transport,
  cmd: &MpvCommand,
  continuation: Continuation,
) -> Result<(), MpvError> {
  let line = cmd.to_bytes().map_err(|e| IpcError::WriteFailed(e.into()))?;
  pending.register(cmd.request_id, continuation)?;

  if let Err(e) = transport.send(line) {
    pending.clear(cmd.request_id);
    return Err(e.into());
  }
  Ok(())
}

/// Re-observe `properties` on every fresh connection.
fn observe_hook(pending: SharedPending, properties: Vec<String>) -> ReadyHook {
  Arc::new(move |transport: &dyn Transport| {
    for (idx, name) in properties.iter().enumerate() {
      let cmd = MpvCommand::observe_property(idx as i64 + 1, name);
      let property = name.clone();
      let continuation = Continuation::callback(move |reply| match reply {
        Ok(response) if response.is_success() => {
          log::debug!("Observing MPV property '{}'", property)
        }
        Ok(response) => log::warn!("Failed to observe '{}': {}", property, response.error),
        Err(e) => log::warn!("Failed to observe '{}': {}", property, e),
      });

      if let Err(e) = send_registered(&pending, transport, &cmd, continuation) {
        log::warn!("Failed to send observe_property for '{}': {}", name, e);
      }
    }
  })
}

/// High-level MPV client.
#[derive(Clone)]
pub struct MpvClient {
  config: Arc<RwLock<PlayerConfig>>,
  observed: Arc<RwLock<ObservedProperties>>,
  pending: SharedPending,
  events: EventBus,
  supervisor: Supervisor,
}

impl MpvClient {
  /// Create a client that spawns a local MPV process.
  pub fn new(config: PlayerConfig) -> Self {
    let config = Arc::new(RwLock::new(config));
    let launcher = Arc::new(MpvLauncher::new(config.clone()));
    Self::build(config, launcher)
  }

  /// Create a client that starts players through `launcher`.
  pub fn with_launcher(config: PlayerConfig, launcher: Arc<dyn Launcher>) -> Self {
    Self::build(Arc::new(RwLock::new(config)), launcher)
  }

  fn build(config: Arc<RwLock<PlayerConfig>>, launcher: Arc<dyn Launcher>) -> Self {
    let observed = Arc::new(RwLock::new(ObservedProperties::new()));
    let pending = SharedPending::new();

    let (events, supervisor) = {
      let cfg = config.read();
      let events = EventBus::new(cfg.event_buffer);
      let translator = Translator::new(observed.clone(), pending.clone(), events.clone(), cfg.verbose);
      let supervisor = Supervisor::new(
        launcher,
        translator,
        pending.clone(),
        RestartPolicy::new(cfg.restart_attempts),
        cfg.debug,
      );
      supervisor.set_ready_hook(observe_hook(pending.clone(), cfg.observe.clone()));
      (events, supervisor)
    };

    Self {
      config,
      observed,
      pending,
      events,
      supervisor,
    }
  }

  /// Update MPV path (takes effect on next start).
  pub fn set_mpv_path(&self, path: Option<PathBuf>) {
    self.config.write().mpv_path = path.map(|p| p.to_string_lossy().into_owned());
  }

  /// Update extra MPV arguments (takes effect on next start).
  pub fn set_extra_args(&self, args: Vec<String>) {
    self.config.write().mpv_args = args;
  }

  /// Start MPV and connect to IPC.
  pub async fn start(&self) -> Result<(), MpvError> {
    self.supervisor.start().await
  }

  /// Stop MPV and disconnect without sending a quit command.
  pub async fn stop(&self) {
    self.supervisor.stop().await;
  }

  /// Quit MPV gracefully.
  pub async fn quit(&self) -> Result<(), MpvError> {
    self.supervisor.mark_quitting();
    if let Err(e) = self.send(MpvCommand::quit()).await {
      log::debug!("Quit not acknowledged: {}", e);
    }
    self.supervisor.stop().await;
    Ok(())
  }

  /// Check if connected.
  pub fn is_connected(&self) -> bool {
    self.supervisor.is_connected()
  }

  pub fn state(&self) -> ConnectionState {
    self.supervisor.state()
  }

  /// Observe connection state transitions.
  pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
    self.supervisor.watch_state()
  }

  /// Subscribe to all player events.
  pub fn events(&self) -> EventStream {
    self.events.subscribe()
  }

  /// Subscribe to the named player events only.
  pub fn subscribe_to(&self, names: &[&str]) -> EventStream {
    self.events.subscribe_to(names)
  }

  /// Last observed value of a property.
  pub fn observed(&self, name: &str) -> Option<Value> {
    self.observed.read().get(name).cloned()
  }

  pub fn observed_snapshot(&self) -> PropertySnapshot {
    self.observed.read().snapshot()
  }

  /// Last observed playback position in seconds.
  pub fn time_pos(&self) -> Option<f64> {
    self.observed.read().time_pos()
  }

  /// Send a command to MPV and wait for its response.
  async fn send(&self, cmd: MpvCommand) -> Result<MpvResponse, MpvError> {
    let transport = self.supervisor.transport().ok_or(MpvError::NotConnected)?;
    let request_id = cmd.request_id;

    let (continuation, rx) = Continuation::channel();
    send_registered(&self.pending, transport.as_ref(), &cmd, continuation)?;

    let timeout = Duration::from_secs(self.config.read().request_timeout_secs);
    let response = match tokio::time::timeout(timeout, rx).await {
      Ok(Ok(reply)) => reply?,
      Ok(Err(_)) => {
        log::error!("MPV reply channel closed unexpectedly");
        return Err(IpcError::Disconnected.into());
      }
      Err(_) => {
        // A late response will surface as a getrequest event.
        log::error!(
          "MPV command timeout after {:?}, request_id={}",
          timeout,
          request_id
        );
        self.pending.clear(request_id);
        return Err(IpcError::Timeout.into());
      }
    };

    if !response.is_success() {
      return Err(MpvError::CommandFailed(response.error));
    }
    Ok(response)
  }

  /// Write a command without waiting for its response. The response is
  /// published as a getrequest event. Returns the request id.
  pub fn send_detached(&self, cmd: MpvCommand) -> Result<i64, MpvError> {
    let transport = self.supervisor.transport().ok_or(MpvError::NotConnected)?;
    let line = cmd.to_bytes().map_err(|e| IpcError::WriteFailed(e.into()))?;
    transport.send(line)?;
    Ok(cmd.request_id)
  }

  /// Load a file for playback.
  pub async fn loadfile(&self, url: &str) -> Result<(), MpvError> {
    log::info!("Loading file: {}", url);
    self.send(MpvCommand::loadfile(url)).await?;
    Ok(())
  }

  /// Load a file for playback with options.
  /// Start position and track selection are applied atomically with the load.
  pub async fn loadfile_with_options(
    &self,
    url: &str,
    start: Option<f64>,
    audio_index: Option<i64>,
    subtitle_index: Option<i64>,
  ) -> Result<(), MpvError> {
    let mut options = Vec::new();

    if let Some(start) = start.filter(|s| *s > 0.0) {
      options.push(format!("start={}", start));
    }
    if let Some(aid) = audio_index {
      options.push(format!("aid={}", aid));
    }
    match subtitle_index {
      Some(-1) => options.push("sid=no".to_string()),
      Some(sid) => options.push(format!("sid={}", sid)),
      None => {}
    }

    if options.is_empty() {
      return self.loadfile(url).await;
    }

    let options_str = options.join(",");
    log::info!("Loading file: {} with options: {}", url, options_str);
    self
      .send(MpvCommand::loadfile_with_options(url, &options_str))
      .await?;
    Ok(())
  }

  /// Seek to absolute position in seconds.
  pub async fn seek(&self, time: f64) -> Result<(), MpvError> {
    self.send(MpvCommand::seek(time)).await?;
    Ok(())
  }

  /// Set pause state.
  pub async fn set_pause(&self, paused: bool) -> Result<(), MpvError> {
    self.send(MpvCommand::set_pause(paused)).await?;
    Ok(())
  }

  pub async fn pause(&self) -> Result<(), MpvError> {
    self.set_pause(true).await
  }

  pub async fn resume(&self) -> Result<(), MpvError> {
    self.set_pause(false).await
  }

  /// Set volume (0-100).
  pub async fn set_volume(&self, volume: f64) -> Result<(), MpvError> {
    self.send(MpvCommand::set_volume(volume)).await?;
    Ok(())
  }

  /// Toggle mute state.
  pub async fn toggle_mute(&self) -> Result<(), MpvError> {
    self.send(MpvCommand::cycle("mute")).await?;
    Ok(())
  }

  /// Toggle fullscreen state.
  pub async fn toggle_fullscreen(&self) -> Result<(), MpvError> {
    self.send(MpvCommand::cycle("fullscreen")).await?;
    Ok(())
  }

  /// Cycle any cyclable property.
  pub async fn cycle(&self, property: &str) -> Result<(), MpvError> {
    self.send(MpvCommand::cycle(property)).await?;
    Ok(())
  }

  pub async fn set_property(&self, name: &str, value: Value) -> Result<(), MpvError> {
    self.send(MpvCommand::set_property(name, value)).await?;
    Ok(())
  }

  /// Get a property value.
  pub async fn get_property(&self, name: &str) -> Result<PropertyValue, MpvError> {
    let response = self.send(MpvCommand::get_property(name)).await?;
    Ok(PropertyValue::from(response.data))
  }

  /// Ask for a property without waiting; the value arrives as a getrequest
  /// event carrying the returned id.
  pub fn request_property(&self, name: &str) -> Result<i64, MpvError> {
    self.send_detached(MpvCommand::get_property(name))
  }

  /// Observe a property for changes.
  /// Changes show up in the observed store and as statuschange events.
  pub async fn observe_property(&self, observer_id: i64, property: &str) -> Result<(), MpvError> {
    self
      .send(MpvCommand::observe_property(observer_id, property))
      .await?;
    Ok(())
  }

  pub async fn unobserve_property(&self, observer_id: i64) -> Result<(), MpvError> {
    self.send(MpvCommand::unobserve_property(observer_id)).await?;
    Ok(())
  }
}
