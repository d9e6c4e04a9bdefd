//! Async IPC connection to MPV.
//!
//! Handles platform-specific socket/pipe connections. Incoming lines are
//! decoded into JSON and forwarded, in order, as [`TransportSignal`]s.

use std::time::Duration;

use async_channel::{Receiver, Sender};
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;

#[derive(Error, Debug)]
pub enum IpcError {
  #[error("Connection failed: {0}")]
  ConnectionFailed(String),
  #[error("Write failed: {0}")]
  WriteFailed(#[from] std::io::Error),
  #[error("Command timeout")]
  Timeout,
  #[error("Disconnected")]
  Disconnected,
  #[error("MPV process crashed")]
  SubprocessCrashed,
}

/// What a transport reports to whoever drives it.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportSignal {
  /// One decoded JSON frame.
  Message(Value),
  /// The connection ended. Always the last signal.
  Closed,
  /// The connection or the player reported an error.
  Error(String),
}

/// A live connection to a player.
pub trait Transport: Send + Sync {
  /// Queue one serialized command line.
  fn send(&self, line: Vec<u8>) -> Result<(), IpcError>;

  /// Receiver of this connection's signals.
  fn signals(&self) -> Receiver<TransportSignal>;

  /// Flush queued writes and close the write side.
  fn close(&self);

  /// Tear the connection down immediately.
  fn destroy(&self);
}

/// Writer channel message.
enum WriteMessage {
  Command(Vec<u8>),
  Close,
}

/// MPV IPC connection.
pub struct MpvIpc {
  write_tx: Sender<WriteMessage>,
  signal_rx: Receiver<TransportSignal>,
  reader_handle: Mutex<Option<JoinHandle<()>>>,
  writer_handle: Mutex<Option<JoinHandle<()>>>,
}

impl MpvIpc {
  /// Connect to MPV IPC socket/pipe.
  pub async fn connect(path: &str, retry_count: u32) -> Result<Self, IpcError> {
    let mut last_error = None;

    for attempt in 0..retry_count {
      if attempt > 0 {
        tokio::time::sleep(Duration::from_millis(100 * (attempt as u64 + 1))).await;
      }

      match Self::try_connect(path).await {
        Ok(ipc) => return Ok(ipc),
        Err(e) => {
          log::debug!("IPC connect attempt {} failed: {}", attempt + 1, e);
          last_error = Some(e);
        }
      }
    }

    Err(last_error.unwrap_or_else(|| IpcError::ConnectionFailed("Unknown error".into())))
  }

  #[cfg(windows)]
  async fn try_connect(path: &str) -> Result<Self, IpcError> {
    use tokio::net::windows::named_pipe::ClientOptions;

    let client = ClientOptions::new()
      .open(path)
      .map_err(|e| IpcError::ConnectionFailed(format!("Failed to open pipe: {}", e)))?;

    let (reader, writer) = tokio::io::split(client);
    Ok(Self::from_io(reader, writer))
  }

  #[cfg(not(windows))]
  async fn try_connect(path: &str) -> Result<Self, IpcError> {
    use tokio::net::UnixStream;

    let stream = UnixStream::connect(path)
      .await
      .map_err(|e| IpcError::ConnectionFailed(e.to_string()))?;

    let (reader, writer) = tokio::io::split(stream);
    Ok(Self::from_io(reader, writer))
  }

  /// Drive an already open byte stream.
  pub fn from_io<R, W>(reader: R, writer: W) -> Self
  where
    R: tokio::io::AsyncRead + Send + Unpin + 'static,
    W: tokio::io::AsyncWrite + Send + Unpin + 'static,
  {
    let (signal_tx, signal_rx) = async_channel::unbounded();
    let (write_tx, write_rx) = async_channel::unbounded::<WriteMessage>();

    let reader_handle = tokio::spawn(async move {
      Self::reader_loop(reader, signal_tx).await;
    });

    let writer_handle = tokio::spawn(async move {
      Self::writer_loop(writer, write_rx).await;
    });

    Self {
      write_tx,
      signal_rx,
      reader_handle: Mutex::new(Some(reader_handle)),
      writer_handle: Mutex::new(Some(writer_handle)),
    }
  }

  async fn reader_loop<R: tokio::io::AsyncRead + Unpin>(
    reader: R,
    signal_tx: Sender<TransportSignal>,
  ) {
    log::debug!("MPV IPC reader loop started");
    let mut buf_reader = BufReader::new(reader);
    let mut line = Vec::new();

    loop {
      line.clear();
      match buf_reader.read_until(b'\n', &mut line).await {
        Ok(0) => {
          log::info!("MPV IPC connection closed");
          break;
        }
        Ok(_) => {
          if line.iter().all(u8::is_ascii_whitespace) {
            continue;
          }

          // Paths and tags are not guaranteed to be valid UTF-8.
          match serde_json::from_slice::<Value>(&line) {
            Ok(value) => {
              if signal_tx.send(TransportSignal::Message(value)).await.is_err() {
                log::debug!("MPV IPC signal receiver dropped");
                return;
              }
            }
            Err(e) => {
              log::warn!(
                "Failed to decode MPV message: {} - {}",
                e,
                String::from_utf8_lossy(&line).trim_end()
              );
            }
          }
        }
        Err(e) => {
          log::error!("MPV IPC read error: {}", e);
          let _ = signal_tx.send(TransportSignal::Error(e.to_string())).await;
          break;
        }
      }
    }

    let _ = signal_tx.send(TransportSignal::Closed).await;
  }

  async fn writer_loop<W: tokio::io::AsyncWrite + Unpin>(
    mut writer: W,
    write_rx: Receiver<WriteMessage>,
  ) {
    log::debug!("MPV IPC writer loop started");

    while let Ok(msg) = write_rx.recv().await {
      match msg {
        WriteMessage::Command(data) => {
          if let Err(e) = writer.write_all(&data).await {
            log::error!("MPV IPC write error: {}", e);
            break;
          }
          if let Err(e) = writer.write_all(b"\n").await {
            log::error!("MPV IPC write newline error: {}", e);
            break;
          }
          if let Err(e) = writer.flush().await {
            log::error!("MPV IPC flush error: {}", e);
            break;
          }
        }
        WriteMessage::Close => {
          log::debug!("MPV IPC writer closing");
          let _ = writer.shutdown().await;
          break;
        }
      }
    }
  }
}

impl Transport for MpvIpc {
  fn send(&self, line: Vec<u8>) -> Result<(), IpcError> {
    log::debug!("Sending MPV command: {}", String::from_utf8_lossy(&line));
    self
      .write_tx
      .try_send(WriteMessage::Command(line))
      .map_err(|_| IpcError::Disconnected)
  }

  fn signals(&self) -> Receiver<TransportSignal> {
    self.signal_rx.clone()
  }

  fn close(&self) {
    let _ = self.write_tx.try_send(WriteMessage::Close);
  }

  fn destroy(&self) {
    self.write_tx.close();
    self.signal_rx.close();
    if let Some(handle) = self.reader_handle.lock().take() {
      handle.abort();
    }
    if let Some(handle) = self.writer_handle.lock().take() {
      handle.abort();
    }
  }
}

impl Drop for MpvIpc {
  fn drop(&mut self) {
    self.destroy();
  }
}
