use serde::{Deserialize, Serialize};

use crate::{ActorId, ApprovalId, ImportId, ResidentId, RowId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowFailure {
    pub row_id: RowId,
    pub index: usize,
    pub error: String,
}

/// Structured notifications for whoever delivers them to people.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ImportEvent {
    ImportCreated {
        import_id: ImportId,
        rows: usize,
        uploaded_by: ActorId,
    },
    MatchingCompleted {
        import_id: ImportId,
        matched: usize,
        unmatched: usize,
        duplicates: usize,
        likely_duplicates: usize,
    },
    AliasLearned {
        fragment: String,
        resident_id: ResidentId,
    },
    ApprovalRequested {
        import_id: ImportId,
        approval_id: ApprovalId,
        requested_by: ActorId,
    },
    ImportApproved {
        import_id: ImportId,
        approval_id: ApprovalId,
        approved_by: ActorId,
        auto_approved: bool,
    },
    ImportRejected {
        import_id: ImportId,
        approval_id: ApprovalId,
        rejected_by: ActorId,
        reason: String,
    },
    ProcessingCompleted {
        import_id: ImportId,
        posted: usize,
        duplicates: usize,
        failed: usize,
        failures: Vec<RowFailure>,
    },
}

impl ImportEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ImportEvent::ImportCreated { .. } => "import_created",
            ImportEvent::MatchingCompleted { .. } => "matching_completed",
            ImportEvent::AliasLearned { .. } => "alias_learned",
            ImportEvent::ApprovalRequested { .. } => "approval_requested",
            ImportEvent::ImportApproved { .. } => "import_approved",
            ImportEvent::ImportRejected { .. } => "import_rejected",
            ImportEvent::ProcessingCompleted { .. } => "processing_completed",
        }
    }

    pub fn import_id(&self) -> Option<ImportId> {
        match self {
            ImportEvent::ImportCreated { import_id, .. }
            | ImportEvent::MatchingCompleted { import_id, .. }
            | ImportEvent::ApprovalRequested { import_id, .. }
            | ImportEvent::ImportApproved { import_id, .. }
            | ImportEvent::ImportRejected { import_id, .. }
            | ImportEvent::ProcessingCompleted { import_id, .. } => Some(*import_id),
            ImportEvent::AliasLearned { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_event_tag() {
        let event = ImportEvent::ImportRejected {
            import_id: ImportId(3),
            approval_id: ApprovalId(9),
            rejected_by: ActorId::from("checker"),
            reason: "wrong period".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "import_rejected");
        assert_eq!(json["import_id"], 3);
        assert_eq!(event.name(), "import_rejected");
    }
}
