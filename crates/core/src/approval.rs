use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{ApprovalId, ImportId};

/// Opaque identity of an already-authenticated operator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(pub String);

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActorId {
    fn from(s: &str) -> Self {
        ActorId(s.to_string())
    }
}

/// The caller resolves permissions; the engine only sees the outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    pub may_auto_approve: bool,
}

impl Actor {
    pub fn new(id: impl Into<String>) -> Self {
        Actor {
            id: ActorId(id.into()),
            may_auto_approve: false,
        }
    }

    pub fn with_auto_approve(mut self) -> Self {
        self.may_auto_approve = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Pending,
    Approved,
    Rejected,
}

labeled_enum!(ApprovalDecision {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
});

/// Maker-checker record. At most one `Pending` request exists per import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: ApprovalId,
    pub import_id: ImportId,
    pub requested_by: ActorId,
    pub requested_at: DateTime<Utc>,
    pub decision: ApprovalDecision,
    pub decided_by: Option<ActorId>,
    pub decided_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
}

impl ApprovalRequest {
    pub fn is_open(&self) -> bool {
        self.decision == ApprovalDecision::Pending
    }
}
