// net/mod.rs
//! Networking layer: the client channel abstraction, its WebSocket and
//! in-memory implementations, and the accept loop.

pub mod connection;
pub mod listener;
pub mod memory;

pub use connection::{BoxedConnection, ClientConnection, WsConnection};
pub use listener::serve;
pub use memory::{ClientEvent, MemoryClient, MemoryConnection, memory_pair};
