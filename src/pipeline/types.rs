//! Request and reply records flowing through the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{RequestId, UserId};

/// Who asked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Originator {
    pub id: UserId,
    pub display_name: String,
}

/// An admitted prompt. Immutable once created.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    pub id: RequestId,
    pub originator: Originator,
    pub prompt: String,
    pub enqueued_at: DateTime<Utc>,
}

impl Request {
    pub fn new(originator: Originator, prompt: impl Into<String>) -> Self {
        Self {
            id: RequestId::new(),
            originator,
            prompt: prompt.into(),
            enqueued_at: Utc::now(),
        }
    }
}

/// How a reply was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplyKind {
    /// Text came from the backend.
    Answer,
    /// Backend failed; text is the fixed apology.
    Fallback,
}

/// What the originator of a request finally receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reply {
    pub request_id: RequestId,
    pub kind: ReplyKind,
    pub text: String,
}
