//! Development server for sheetpack.
//!
//! Serves a compilation from memory, recompiles when the source tree
//! changes and pushes module updates to the browser over a WebSocket.

pub mod server;
pub mod watcher;
pub mod websocket;

pub use server::{rebuild, router, DevServer, ServerError, ServerState, SharedState};
pub use watcher::{FileWatcher, WatchEvent};
pub use websocket::{HmrHub, HmrMessage};
