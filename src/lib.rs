//! Typed player events and correlated requests on top of MPV's JSON IPC.
//!
//! [`MpvClient`] spawns MPV, restarts it when it dies, translates its raw
//! notifications into [`PlayerEvent`]s and matches responses to the requests
//! that asked for them.

mod config;
pub mod mpv;

pub use config::{ConfigError, PlayerConfig};
pub use mpv::{ConnectionState, MpvClient, MpvError, PlayerEvent, PropertyValue};
