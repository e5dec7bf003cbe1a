//! # Mind Relay - single-flight chat relay to a shared assistant
//!
//! Forwards chat prompts to one persistent assistant conversation shared by
//! every caller, and relays the answers back:
//! - Admission gate with an operator-refilled request budget
//! - FIFO queue absorbing bursts of prompts
//! - Single drain loop: at most one backend call in flight, system-wide
//! - Off / Ready / Exhausted status signal for presence displays
//! - Role-checked administrative commands over a TCP+msgpack transport
//!
//! ## Architecture
//!
//! ```text
//!                    ┌─────────────────────────────────────┐
//!   IPC commands →   │          ModuleController           │
//!                    │  ┌──────────┐  ┌──────────────┐     │
//!                    │  │Admission │→ │ RequestQueue │     │
//!                    │  │   Gate   │  └──────┬───────┘     │
//!                    │  └────┬─────┘         ▼            │
//!                    │       │         ┌────────────┐      │
//!                    │       │         │ Serializer │──────┼─→ BackendSession
//!                    │       ▼         └────────────┘      │
//!                    │  ┌──────────────┐                   │
//!                    │  │StatusPublisher│──→ presence      │
//!                    │  └──────────────┘                   │
//!                    └─────────────────────────────────────┘
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod access;
pub mod backend;
pub mod controller;
pub mod ipc;
pub mod pipeline;
pub mod store;
pub mod types;

// Internal utilities
pub mod observability;

pub use controller::{ModuleController, Submission, Ticket};
pub use store::ConfigStore;
pub use types::{Config, Error, Result};
