//! MPV IPC module - spawns, supervises and talks to an external MPV player.
//!
//! Architecture:
//! - `process.rs` - MPV binary detection, process spawning and the default launcher
//! - `ipc.rs` - Async IPC connection (Named Pipes on Windows, Unix Sockets on Linux/macOS)
//! - `protocol.rs` - JSON command/response types and message classification
//! - `observed.rs` - Cache of observed property values
//! - `pending.rs` - Requests waiting for a response, keyed by request id
//! - `events.rs` - Player events and the broadcast bus subscribers listen on
//! - `translator.rs` - Routes incoming messages to the cache, pending requests and events
//! - `supervisor.rs` - Connection lifecycle, crash detection and restart
//! - `client.rs` - High-level MPV client with command methods

mod client;
mod events;
mod ipc;
mod observed;
mod pending;
mod process;
mod protocol;
mod supervisor;
mod translator;

#[cfg(test)]
mod testutil;

pub use client::{MpvClient, MpvError};
pub use events::{EventBus, EventStream, PlayerEvent, RecvError, DEFAULT_EVENT_BUFFER_SIZE};
pub use ipc::{IpcError, MpvIpc, Transport, TransportSignal};
pub use observed::{ObservedProperties, PropertySnapshot, TIME_POS};
pub use pending::{Continuation, PendingRequests, Reply, Resolution, SharedPending, TableError};
pub use process::{default_ipc_path, find_mpv, MpvLauncher, ProcessError};
pub use protocol::{MpvCommand, MpvEvent, MpvMessage, MpvResponse, PropertyValue};
pub use supervisor::{ConnectionState, Launcher, ReadyHook, RestartPolicy, Supervisor};
pub use translator::Translator;
