//! Admission-controlled, single-flight request pipeline.
//!
//! ```text
//!   submit ─► AdmissionGate ─► RequestQueue ─► Serializer ─► BackendSession
//!                 │                                 │
//!                 └────────► StatusPublisher ◄──────┘
//! ```
//!
//! Subsystems are plain structs owned by the controller; only the queue and
//! the status channel are shared with the drain task.

pub mod gate;
pub mod queue;
pub mod serializer;
pub mod status;
mod types;

pub use gate::{AdmissionGate, Admission, GateSnapshot};
pub use queue::{Pending, RequestQueue};
pub use serializer::{Serializer, FALLBACK_REPLY};
pub use status::{compute_status, LogPresence, PresenceSink, Status, StatusPublisher};
pub use types::{Originator, Reply, ReplyKind, Request};
