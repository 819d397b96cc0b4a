use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::row::RowOutcome;
use crate::{ActorId, DateRange, ImportId, StatementFormat, StatementRow, TransactionFilter};

/// The part of an import's lifecycle that is stored. Everything finer grained
/// is derived from the rows, see [`derive_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStage {
    Draft,
    Review,
    PendingApproval,
    Approved,
}

labeled_enum!(ImportStage {
    Draft => "draft",
    Review => "review",
    PendingApproval => "pending_approval",
    Approved => "approved",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    Draft,
    Matching,
    Matched,
    PendingApproval,
    Approved,
    Processing,
    Processed,
    Failed,
}

labeled_enum!(ImportStatus {
    Draft => "draft",
    Matching => "matching",
    Matched => "matched",
    PendingApproval => "pending_approval",
    Approved => "approved",
    Processing => "processing",
    Processed => "processed",
    Failed => "failed",
});

/// Computes the batch status from the stored stage and the rows.
///
/// `processing_ran` is true once at least one processing pass has finished;
/// it only matters for batches with no processable rows.
pub fn derive_status(stage: ImportStage, processing_ran: bool, rows: &[StatementRow]) -> ImportStatus {
    match stage {
        ImportStage::Draft => ImportStatus::Draft,
        ImportStage::Review => {
            if rows.iter().all(|r| r.status.is_resolved()) {
                ImportStatus::Matched
            } else {
                ImportStatus::Matching
            }
        }
        ImportStage::PendingApproval => ImportStatus::PendingApproval,
        ImportStage::Approved => {
            let (mut pending, mut posted, mut failed) = (0usize, 0usize, 0usize);
            for row in rows {
                match row.outcome() {
                    RowOutcome::Pending => pending += 1,
                    RowOutcome::Posted(_) => posted += 1,
                    RowOutcome::Failed(_) => failed += 1,
                    RowOutcome::NotProcessable => {}
                }
            }
            let done = posted + failed;
            if pending == 0 && (done > 0 || processing_ran) {
                if failed > 0 {
                    ImportStatus::Failed
                } else {
                    ImportStatus::Processed
                }
            } else if done == 0 {
                ImportStatus::Approved
            } else {
                ImportStatus::Processing
            }
        }
    }
}

/// One uploaded statement batch. Never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementImport {
    pub id: ImportId,
    pub bank_account_ref: String,
    pub format: StatementFormat,
    pub period: DateRange,
    pub file_name: String,
    pub file_hash: String,
    pub layout_profile: Option<String>,
    pub account_hint: Option<String>,
    pub transaction_filter: TransactionFilter,
    pub stage: ImportStage,
    pub uploaded_by: ActorId,
    pub created_at: DateTime<Utc>,
    pub approved_by: Option<ActorId>,
    pub approved_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl StatementImport {
    pub fn status(&self, rows: &[StatementRow]) -> ImportStatus {
        derive_status(self.stage, self.processed_at.is_some(), rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::fixtures::row;
    use crate::{LedgerRecordKind, LedgerRecordRef, RowStatus};

    fn posted(mut r: StatementRow) -> StatementRow {
        r.posted_record = Some(LedgerRecordRef::new(LedgerRecordKind::Payment, r.id.0));
        r
    }

    #[test]
    fn review_is_matching_until_no_row_is_unmatched() {
        let mut rows = vec![
            row(0, 100, RowStatus::Matched),
            row(1, 200, RowStatus::Unmatched),
        ];
        assert_eq!(derive_status(ImportStage::Review, false, &rows), ImportStatus::Matching);
        rows[1].status = RowStatus::Skipped;
        assert_eq!(derive_status(ImportStage::Review, false, &rows), ImportStatus::Matched);
    }

    #[test]
    fn approved_progresses_with_row_outcomes() {
        let rows = vec![
            row(0, 100, RowStatus::Matched),
            row(1, -200, RowStatus::ManuallyMatched),
            row(2, 300, RowStatus::Duplicate),
        ];
        assert_eq!(derive_status(ImportStage::Approved, false, &rows), ImportStatus::Approved);

        let partial = vec![posted(rows[0].clone()), rows[1].clone(), rows[2].clone()];
        assert_eq!(derive_status(ImportStage::Approved, false, &partial), ImportStatus::Processing);

        let all = vec![posted(rows[0].clone()), posted(rows[1].clone()), rows[2].clone()];
        assert_eq!(derive_status(ImportStage::Approved, true, &all), ImportStatus::Processed);
    }

    #[test]
    fn any_failed_row_marks_batch_failed() {
        let mut failed = row(1, -200, RowStatus::ManuallyMatched);
        failed.processing_error = Some("ledger rejected".into());
        let rows = vec![posted(row(0, 100, RowStatus::Matched)), failed];
        assert_eq!(derive_status(ImportStage::Approved, true, &rows), ImportStatus::Failed);
    }

    #[test]
    fn nothing_to_post_is_processed_after_a_run() {
        let rows = vec![row(0, 100, RowStatus::Skipped)];
        assert_eq!(derive_status(ImportStage::Approved, false, &rows), ImportStatus::Approved);
        assert_eq!(derive_status(ImportStage::Approved, true, &rows), ImportStatus::Processed);
    }
}
