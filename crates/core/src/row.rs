use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{ImportId, LedgerRecordRef, ResidentId, RowId, TransactionType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    Unmatched,
    Matched,
    ManuallyMatched,
    Skipped,
    Duplicate,
}

labeled_enum!(RowStatus {
    Unmatched => "unmatched",
    Matched => "matched",
    ManuallyMatched => "manually_matched",
    Skipped => "skipped",
    Duplicate => "duplicate",
});

impl RowStatus {
    /// Everything except `Unmatched` is a settled per-row decision.
    pub fn is_resolved(self) -> bool {
        !matches!(self, RowStatus::Unmatched)
    }

    /// Rows that turn into a payment or expense when the batch is processed.
    pub fn is_processable(self) -> bool {
        matches!(self, RowStatus::Matched | RowStatus::ManuallyMatched)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchConfidence {
    Low,
    Medium,
    High,
}

labeled_enum!(MatchConfidence {
    Low => "low",
    Medium => "medium",
    High => "high",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    ExactAlias,
    Fuzzy,
    Manual,
}

labeled_enum!(MatchMethod {
    ExactAlias => "exact_alias",
    Fuzzy => "fuzzy",
    Manual => "manual",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateTier {
    Likely,
    Exact,
}

labeled_enum!(DuplicateTier {
    Likely => "likely",
    Exact => "exact",
});

/// Where a row stands with respect to the processing step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    /// Skipped, duplicate or still unmatched; never posted.
    NotProcessable,
    Pending,
    Posted(LedgerRecordRef),
    Failed(String),
}

/// A persisted statement line together with its match and processing state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementRow {
    pub id: RowId,
    pub import_id: ImportId,
    pub index: usize,
    pub transaction_date: NaiveDate,
    pub narration: String,
    pub normalized_narration: Option<String>,
    pub reference: Option<String>,
    pub amount_cents: i64,
    pub balance_cents: Option<i64>,
    pub status: RowStatus,
    pub resident_id: Option<ResidentId>,
    pub expense_category: Option<String>,
    pub confidence: Option<MatchConfidence>,
    pub method: Option<MatchMethod>,
    pub score: Option<f64>,
    /// Human-readable reason for the current status.
    pub match_note: Option<String>,
    pub duplicate_tier: Option<DuplicateTier>,
    pub duplicate_of: Option<LedgerRecordRef>,
    pub duplicate_acknowledged: bool,
    pub tag: Option<String>,
    pub posted_record: Option<LedgerRecordRef>,
    pub processing_error: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl StatementRow {
    pub fn transaction_type(&self) -> Option<TransactionType> {
        TransactionType::of(self.amount_cents)
    }

    pub fn is_credit(&self) -> bool {
        self.amount_cents > 0
    }

    pub fn outcome(&self) -> RowOutcome {
        if !self.status.is_processable() {
            return RowOutcome::NotProcessable;
        }
        if let Some(record) = self.posted_record {
            return RowOutcome::Posted(record);
        }
        match &self.processing_error {
            Some(err) => RowOutcome::Failed(err.clone()),
            None => RowOutcome::Pending,
        }
    }

    /// A likely duplicate that nobody has acknowledged blocks posting.
    pub fn has_unacknowledged_warning(&self) -> bool {
        self.duplicate_tier == Some(DuplicateTier::Likely) && !self.duplicate_acknowledged
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::row;
    use super::*;
    use crate::LedgerRecordKind;
    use std::str::FromStr;

    #[test]
    fn row_status_roundtrip() {
        for status in [
            RowStatus::Unmatched,
            RowStatus::Matched,
            RowStatus::ManuallyMatched,
            RowStatus::Skipped,
            RowStatus::Duplicate,
        ] {
            assert_eq!(RowStatus::from_str(status.as_str()).unwrap(), status);
        }
        assert!(RowStatus::from_str("likely_duplicate").is_err());
    }

    #[test]
    fn confidence_orders_low_to_high() {
        assert!(MatchConfidence::High > MatchConfidence::Medium);
        assert!(MatchConfidence::Medium > MatchConfidence::Low);
    }

    #[test]
    fn outcome_follows_status_then_posting() {
        let mut r = row(0, 500_000, RowStatus::Skipped);
        assert_eq!(r.outcome(), RowOutcome::NotProcessable);

        r.status = RowStatus::Matched;
        assert_eq!(r.outcome(), RowOutcome::Pending);

        r.processing_error = Some("ledger offline".into());
        assert_eq!(r.outcome(), RowOutcome::Failed("ledger offline".into()));

        let record = LedgerRecordRef::new(LedgerRecordKind::Payment, 7);
        r.posted_record = Some(record);
        assert_eq!(r.outcome(), RowOutcome::Posted(record));
    }

    #[test]
    fn acknowledged_warning_no_longer_blocks() {
        let mut r = row(0, 100, RowStatus::Matched);
        r.duplicate_tier = Some(DuplicateTier::Likely);
        assert!(r.has_unacknowledged_warning());
        r.duplicate_acknowledged = true;
        assert!(!r.has_unacknowledged_warning());
    }
}
