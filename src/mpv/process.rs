//! MPV process detection, spawning and teardown.

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;

use super::client::MpvError;
use super::ipc::{MpvIpc, Transport};
use super::supervisor::Launcher;
use crate::config::PlayerConfig;

#[derive(Error, Debug)]
pub enum ProcessError {
  #[error("MPV executable not found")]
  NotFound,
  #[error("Failed to spawn MPV: {0}")]
  SpawnFailed(#[from] std::io::Error),
}

/// Default IPC socket/pipe path for MPV.
pub fn default_ipc_path() -> String {
  #[cfg(windows)]
  {
    r"\\.\pipe\mpvlink".to_string()
  }
  #[cfg(not(windows))]
  {
    "/tmp/mpvlink.sock".to_string()
  }
}

/// Find MPV executable in common locations.
pub fn find_mpv() -> Option<PathBuf> {
  if let Ok(path) = which::which("mpv") {
    return Some(path);
  }

  #[cfg(windows)]
  let common_paths: &[&str] = &[
    r"C:\Program Files\mpv\mpv.exe",
    r"C:\Program Files (x86)\mpv\mpv.exe",
    r"C:\mpv\mpv.exe",
  ];
  #[cfg(target_os = "macos")]
  let common_paths: &[&str] = &[
    "/usr/local/bin/mpv",
    "/opt/homebrew/bin/mpv",
    "/Applications/mpv.app/Contents/MacOS/mpv",
  ];
  #[cfg(not(any(windows, target_os = "macos")))]
  let common_paths: &[&str] = &["/usr/bin/mpv", "/usr/local/bin/mpv"];

  common_paths
    .iter()
    .map(PathBuf::from)
    .find(|p| p.exists())
}

/// Command-line arguments for an MPV instance listening on `ipc`.
pub fn mpv_args(ipc: &str, extra_args: &[String]) -> Vec<String> {
  let mut args = vec![
    format!("--input-ipc-server={}", ipc),
    "--idle".to_string(),
    "--force-window".to_string(),
    "--keep-open=no".to_string(),
    "--no-terminal".to_string(),
  ];
  args.extend(extra_args.iter().cloned());
  args
}

/// Spawn MPV process with IPC server enabled.
pub fn spawn_mpv(
  mpv_path: Option<&PathBuf>,
  ipc: &str,
  extra_args: &[String],
) -> Result<Child, ProcessError> {
  let mpv_exe = mpv_path
    .cloned()
    .or_else(find_mpv)
    .ok_or(ProcessError::NotFound)?;

  log::info!("Spawning MPV: {:?} with IPC: {}", mpv_exe, ipc);
  if !extra_args.is_empty() {
    log::info!("Extra MPV args: {:?}", extra_args);
  }

  let child = Command::new(&mpv_exe)
    .args(mpv_args(ipc, extra_args))
    .stdin(Stdio::null())
    .stdout(Stdio::null())
    .stderr(Stdio::null())
    .spawn()?;

  Ok(child)
}

/// Remove a stale socket file.
pub fn cleanup_ipc(path: &str) {
  #[cfg(not(windows))]
  {
    let _ = std::fs::remove_file(path);
  }
  // Windows named pipes are cleaned up automatically
  #[cfg(windows)]
  let _ = path;
}

/// Kill and reap a child without blocking the async runtime.
async fn kill_child(mut child: Child) {
  let pid = child.id();
  log::info!("Killing MPV process (pid: {})", pid);

  let result = tokio::task::spawn_blocking(move || {
    let kill_result = child.kill();
    let wait_result = child.wait();
    (kill_result, wait_result)
  })
  .await;

  match result {
    Ok((kill_result, wait_result)) => {
      if let Err(e) = kill_result {
        // Already exited on its own, e.g. after a quit command or a crash.
        log::debug!("kill() failed: {}", e);
      }
      match wait_result {
        Ok(status) => log::info!("MPV process exited with: {}", status),
        Err(e) => log::error!("wait() failed: {}", e),
      }
    }
    Err(e) => {
      log::error!("spawn_blocking panicked during process cleanup: {}", e);
    }
  }
}

/// Launches a real MPV subprocess and connects to its IPC server.
pub struct MpvLauncher {
  config: Arc<RwLock<PlayerConfig>>,
  process: Arc<Mutex<Option<Child>>>,
}

impl MpvLauncher {
  pub fn new(config: Arc<RwLock<PlayerConfig>>) -> Self {
    Self {
      config,
      process: Arc::new(Mutex::new(None)),
    }
  }
}

impl Launcher for MpvLauncher {
  fn launch(&self) -> BoxFuture<'static, Result<Arc<dyn Transport>, MpvError>> {
    let config = self.config.read().clone();
    let process = self.process.clone();

    async move {
      // A previous instance may still linger after a crash.
      let stale = process.lock().take();
      if let Some(child) = stale {
        kill_child(child).await;
      }

      let ipc = config.ipc_path();
      cleanup_ipc(&ipc);

      let mpv_path = config.mpv_path();
      let child = spawn_mpv(mpv_path.as_ref(), &ipc, &config.mpv_args)?;
      *process.lock() = Some(child);

      // Give MPV a moment to create the socket
      tokio::time::sleep(Duration::from_millis(config.startup_delay_ms)).await;

      let conn = MpvIpc::connect(&ipc, config.connect_retries).await?;
      let transport: Arc<dyn Transport> = Arc::new(conn);
      Ok::<_, MpvError>(transport)
    }
    .boxed()
  }

  fn shutdown(&self) -> BoxFuture<'static, ()> {
    let ipc = self.config.read().ipc_path();
    let process = self.process.clone();

    async move {
      let child = process.lock().take();
      match child {
        Some(child) => kill_child(child).await,
        None => log::debug!("No MPV process handle to kill"),
      }
      cleanup_ipc(&ipc);
    }
    .boxed()
  }
}
