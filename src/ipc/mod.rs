//! TCP+msgpack command transport.
//!
//! The chat platform adapter resolves the caller and their roles, then sends
//! each command as a length-prefixed msgpack frame. Prompt submissions come
//! back as a stream: a `queued` chunk right away, the `reply` chunk once the
//! drain loop reaches the request.

pub mod codec;
pub mod handlers;
pub mod router;
pub mod server;

pub use server::IpcServer;
