//! Service handlers, one module per IPC service.

pub mod mind;
