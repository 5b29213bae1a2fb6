//! charla: a minimal TCP chat service
//!
//! A server accepts concurrent connections, treats each inbound read as one
//! complete message, persists it to SQLite with a timestamp and the peer's
//! IP, and acknowledges with `Mensaje recibido: <timestamp>`. A companion
//! client relays operator-entered lines until the sentinel word "éxito".
//!
//! There is deliberately no message framing, no authentication, and no cap
//! on concurrent connections: one tokio task per accepted connection, with
//! the SQLite store as the only shared resource.

pub mod client;
pub mod config;
pub mod server;
pub mod store;
